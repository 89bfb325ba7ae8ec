//! Shared fake collaborators and fixtures for the integration test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trust_core::error::RpcError;
use trust_core::traits::{BasenameResolver, ChainWriter, CodeHostClient, RpcClient, WebhookTransport};
use trust_core::types::{Address, AuthorizationUse, RawTransfer};
use trust_engine::engine::ScoringEngine;
use trust_store::AsyncDb;

/// Build a wallet address from a single repeated byte, for readable test
/// fixtures (`addr(1)` reads better than a literal 20-byte array).
pub fn addr(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

pub fn transfer(tx_hash: &str, from: Address, to: Address, amount: u64, block: u64, at: DateTime<Utc>) -> RawTransfer {
    RawTransfer { tx_hash: tx_hash.to_string(), block_number: block, from, to, amount, timestamp: at }
}

/// In-memory [`RpcClient`] backed by a fixed transfer log, with a
/// configurable max result window and a one-shot failure switch so tests
/// can drive the indexer through backfill, chunk-shrink, and retry paths.
pub struct FakeRpcClient {
    pub tip: u64,
    pub transfers: Vec<RawTransfer>,
    pub max_window: u64,
    pub fail_next: Mutex<bool>,
    pub native_balance: u64,
    pub stablecoin_balance: u64,
    pub tx_count: u64,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub authorization_uses: Vec<AuthorizationUse>,
    pub facilitator_sent: Mutex<std::collections::HashSet<String>>,
}

impl FakeRpcClient {
    pub fn new(tip: u64, transfers: Vec<RawTransfer>) -> Self {
        Self {
            tip,
            transfers,
            max_window: u64::MAX,
            fail_next: Mutex::new(false),
            native_balance: 0,
            stablecoin_balance: 0,
            tx_count: 0,
            first_seen_at: None,
            authorization_uses: Vec::new(),
            facilitator_sent: Mutex::new(std::collections::HashSet::new()),
        }
    }
}

#[async_trait]
impl RpcClient for FakeRpcClient {
    async fn chain_tip(&self) -> Result<u64, RpcError> {
        Ok(self.tip)
    }

    async fn get_transfers(&self, from: u64, to: u64) -> Result<Vec<RawTransfer>, RpcError> {
        if *self.fail_next.lock().unwrap() {
            return Err(RpcError::ConnectionFailed("fake rpc failure".into()));
        }
        if to - from > self.max_window {
            return Err(RpcError::ResultWindowTooLarge);
        }
        Ok(self.transfers.iter().filter(|t| t.block_number >= from && t.block_number <= to).cloned().collect())
    }

    async fn is_canonical(&self, block: u64, _block_hash: &str) -> Result<bool, RpcError> {
        Ok(block <= self.tip)
    }

    async fn native_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
        Ok(self.native_balance)
    }

    async fn stablecoin_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
        Ok(self.stablecoin_balance)
    }

    async fn tx_count(&self, _wallet: &Address) -> Result<u64, RpcError> {
        Ok(self.tx_count)
    }

    async fn first_seen_at(&self, _wallet: &Address) -> Result<Option<DateTime<Utc>>, RpcError> {
        Ok(self.first_seen_at)
    }

    async fn authorization_uses(&self, from: u64, to: u64) -> Result<Vec<AuthorizationUse>, RpcError> {
        Ok(self
            .authorization_uses
            .iter()
            .filter(|a| {
                self.transfers
                    .iter()
                    .any(|t| t.tx_hash == a.tx_hash && t.block_number >= from && t.block_number <= to)
            })
            .cloned()
            .collect())
    }

    async fn is_facilitator_sent(&self, tx_hash: &str) -> Result<bool, RpcError> {
        Ok(self.facilitator_sent.lock().unwrap().contains(tx_hash))
    }
}

/// Fake code-host enrichment, keyed by wallet.
#[derive(Default)]
pub struct FakeCodeHost {
    pub repos: HashMap<Address, u32>,
    pub account_age_days: HashMap<Address, u32>,
    pub repo_stars: HashMap<Address, u32>,
}

#[async_trait]
impl CodeHostClient for FakeCodeHost {
    async fn repo_count(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(self.repos.get(wallet).copied())
    }

    async fn account_age_days(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(self.account_age_days.get(wallet).copied())
    }

    async fn repo_stars(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(self.repo_stars.get(wallet).copied())
    }
}

/// Fake basename resolver, keyed by wallet.
#[derive(Default)]
pub struct FakeBasenameResolver {
    pub names: HashMap<Address, String>,
}

#[async_trait]
impl BasenameResolver for FakeBasenameResolver {
    async fn resolve(&self, wallet: &Address) -> Result<Option<String>, RpcError> {
        Ok(self.names.get(wallet).cloned())
    }
}

/// Fake chain writer that records every publish call instead of talking
/// to a chain.
#[derive(Default)]
pub struct FakeChainWriter {
    pub published: Mutex<Vec<(Address, u8, String)>>,
}

#[async_trait]
impl ChainWriter for FakeChainWriter {
    async fn publish_reputation(&self, wallet: &Address, score: u8, model_version: &str) -> Result<String, RpcError> {
        let tx_hash = format!("0xpub-{wallet}-{score}");
        self.published.lock().unwrap().push((*wallet, score, model_version.to_string()));
        Ok(tx_hash)
    }
}

/// Fake webhook transport returning a fixed status, recording every call.
pub struct FakeWebhookTransport {
    pub status: u16,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeWebhookTransport {
    pub fn new(status: u16) -> Self {
        Self { status, calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl WebhookTransport for FakeWebhookTransport {
    async fn deliver(&self, url: &str, body: &[u8], signature_header: &str) -> Result<u16, RpcError> {
        self.calls.lock().unwrap().push((url.to_string(), signature_header.to_string()));
        let _ = body;
        Ok(self.status)
    }
}

pub type TestEngine = ScoringEngine<FakeRpcClient, FakeCodeHost, FakeBasenameResolver>;

/// A scoring engine over an in-memory store with empty enrichment fakes,
/// for tests that only care about on-chain transfer history.
pub async fn test_engine(store: AsyncDb) -> TestEngine {
    ScoringEngine::new(
        store,
        std::sync::Arc::new(FakeRpcClient::new(0, vec![])),
        std::sync::Arc::new(FakeCodeHost::default()),
        std::sync::Arc::new(FakeBasenameResolver::default()),
    )
}
