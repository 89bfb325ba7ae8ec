//! # trust-chain
//! Polling indexers that pull micro-payment settlements and generic
//! transfers from the L2 chain via [`trust_core::traits::RpcClient`] and
//! persist them through trust-store.

pub mod indexer;

pub use indexer::{Indexer, IndexerPhase, TickOutcome};
