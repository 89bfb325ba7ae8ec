//! Integration test suite for the wallet trust-scoring pipeline.
//!
//! Exercises the crates together the way the running service does:
//! indexing transfers into the store, computing scores through the
//! engine, publishing reputation, and delivering webhooks, against fake
//! collaborators instead of a live chain or HTTP endpoint.

pub mod helpers;
