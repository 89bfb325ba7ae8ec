//! Collaborator interfaces for the wallet trust scoring pipeline.
//!
//! These traits define the contracts between crates:
//! - [`RpcClient`] — chain-tip and transfer log access (trust-chain implements, against the L2 RPC)
//! - [`CodeHostClient`] — identity/capability enrichment from a code host (out-of-scope concrete impl)
//! - [`BasenameResolver`] — reverse name resolution for identity scoring (out-of-scope concrete impl)
//! - [`WebhookTransport`] — signed outbound delivery (trust-engine implements, over HTTP)
//! - [`ChainWriter`] — on-chain reputation publication (trust-engine implements)

use async_trait::async_trait;

use chrono::{DateTime, Utc};

use crate::error::RpcError;
use crate::types::{Address, AuthorizationUse, RawTransfer};

/// Read-only access to the L2 chain's transfer log and tip.
///
/// Implemented against the live RPC endpoint by trust-chain; test doubles
/// implement it directly over an in-memory transfer list.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Current chain tip block number.
    async fn chain_tip(&self) -> Result<u64, RpcError>;

    /// Fetch transfers in the inclusive block range `[from, to]`.
    ///
    /// Implementations must surface [`RpcError::ResultWindowTooLarge`] when
    /// the range is too wide for the upstream to answer in one call, so the
    /// indexer can halve its chunk size and retry.
    async fn get_transfers(&self, from: u64, to: u64) -> Result<Vec<RawTransfer>, RpcError>;

    /// True if `block` is still part of the canonical chain as observed by
    /// this client, used by the indexer to detect shallow reorgs.
    async fn is_canonical(&self, block: u64, block_hash: &str) -> Result<bool, RpcError>;

    /// Current native-token balance, in minor units.
    async fn native_balance(&self, wallet: &Address) -> Result<u64, RpcError>;

    /// Current stablecoin balance, in minor units.
    async fn stablecoin_balance(&self, wallet: &Address) -> Result<u64, RpcError>;

    /// Total outbound transaction count (nonce), used as a fallback
    /// estimator for active micro-payment services.
    async fn tx_count(&self, wallet: &Address) -> Result<u64, RpcError>;

    /// Earliest on-chain activity timestamp visible to this RPC's own
    /// scan, or `None` if the wallet has no observed activity.
    async fn first_seen_at(&self, wallet: &Address) -> Result<Option<DateTime<Utc>>, RpcError>;

    /// Settlement authorisation-use events in the inclusive block range
    /// `[from, to]`; only settlement authorisations emit these.
    async fn authorization_uses(&self, from: u64, to: u64) -> Result<Vec<AuthorizationUse>, RpcError>;

    /// True if `tx_hash` was sent by the configured facilitator address.
    async fn is_facilitator_sent(&self, tx_hash: &str) -> Result<bool, RpcError>;
}

/// Enrichment signal: verified code-hosting activity tied to a wallet
/// (e.g. a linked account with commit history), used by the Capability
/// dimension. No concrete implementation ships in-core; this interface
/// exists so the scorer can be exercised against a fake.
#[async_trait]
pub trait CodeHostClient: Send + Sync {
    /// Number of public repositories with commits attributable to the
    /// wallet's linked identity, or `None` if no identity is linked.
    async fn repo_count(&self, wallet: &Address) -> Result<Option<u32>, RpcError>;

    /// Account age in days for the linked identity, or `None` if unlinked.
    async fn account_age_days(&self, wallet: &Address) -> Result<Option<u32>, RpcError>;

    /// Aggregate star count across the linked identity's repositories, or
    /// `None` if no identity is linked.
    async fn repo_stars(&self, wallet: &Address) -> Result<Option<u32>, RpcError>;
}

/// Reverse-resolves a wallet address to a human-readable basename, an
/// Identity-dimension signal. No concrete implementation ships in-core.
#[async_trait]
pub trait BasenameResolver: Send + Sync {
    /// Resolved basename, or `None` if the wallet has none registered.
    async fn resolve(&self, wallet: &Address) -> Result<Option<String>, RpcError>;
}

/// Outbound delivery of signed webhook payloads.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` (already HMAC-signed by the caller) to `url` with the
    /// given signature header value. Returns the upstream status code.
    async fn deliver(
        &self,
        url: &str,
        body: &[u8],
        signature_header: &str,
    ) -> Result<u16, RpcError>;
}

/// Publishes a wallet's reputation summary to the L2 chain.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Submit a reputation publication transaction; returns its hash.
    async fn publish_reputation(
        &self,
        wallet: &Address,
        score: u8,
        model_version: &str,
    ) -> Result<String, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockRpcClient {
        tip: u64,
        transfers: Vec<RawTransfer>,
        max_window: u64,
    }

    #[async_trait]
    impl RpcClient for MockRpcClient {
        async fn chain_tip(&self) -> Result<u64, RpcError> {
            Ok(self.tip)
        }

        async fn get_transfers(&self, from: u64, to: u64) -> Result<Vec<RawTransfer>, RpcError> {
            if to - from > self.max_window {
                return Err(RpcError::ResultWindowTooLarge);
            }
            Ok(self
                .transfers
                .iter()
                .filter(|t| t.block_number >= from && t.block_number <= to)
                .cloned()
                .collect())
        }

        async fn is_canonical(&self, block: u64, _block_hash: &str) -> Result<bool, RpcError> {
            Ok(block <= self.tip)
        }

        async fn native_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn stablecoin_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn tx_count(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn first_seen_at(&self, _wallet: &Address) -> Result<Option<DateTime<Utc>>, RpcError> {
            Ok(None)
        }

        async fn authorization_uses(&self, _from: u64, _to: u64) -> Result<Vec<AuthorizationUse>, RpcError> {
            Ok(vec![])
        }

        async fn is_facilitator_sent(&self, _tx_hash: &str) -> Result<bool, RpcError> {
            Ok(false)
        }
    }

    struct MockCodeHostClient {
        repos: HashMap<Address, u32>,
    }

    #[async_trait]
    impl CodeHostClient for MockCodeHostClient {
        async fn repo_count(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(self.repos.get(wallet).copied())
        }

        async fn account_age_days(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(self.repos.get(wallet).map(|_| 365))
        }

        async fn repo_stars(&self, wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(self.repos.get(wallet).map(|n| n * 10))
        }
    }

    struct MockBasenameResolver {
        names: HashMap<Address, String>,
    }

    #[async_trait]
    impl BasenameResolver for MockBasenameResolver {
        async fn resolve(&self, wallet: &Address) -> Result<Option<String>, RpcError> {
            Ok(self.names.get(wallet).cloned())
        }
    }

    struct MockWebhookTransport {
        responses: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl WebhookTransport for MockWebhookTransport {
        async fn deliver(
            &self,
            _url: &str,
            _body: &[u8],
            _signature_header: &str,
        ) -> Result<u16, RpcError> {
            let mut responses = self.responses.lock().unwrap();
            responses.pop().ok_or(RpcError::ConnectionFailed("exhausted".into()))
        }
    }

    struct MockChainWriter;

    #[async_trait]
    impl ChainWriter for MockChainWriter {
        async fn publish_reputation(
            &self,
            wallet: &Address,
            score: u8,
            _model_version: &str,
        ) -> Result<String, RpcError> {
            Ok(format!("0xpublished-{wallet}-{score}"))
        }
    }

    fn sample_address() -> Address {
        "0x0000000000000000000000000000000000aaaa".parse().unwrap()
    }

    fn _assert_rpc_client_object_safe(rc: &dyn RpcClient) {
        let _ = rc;
    }

    fn _assert_code_host_client_object_safe(c: &dyn CodeHostClient) {
        let _ = c;
    }

    fn _assert_basename_resolver_object_safe(b: &dyn BasenameResolver) {
        let _ = b;
    }

    fn _assert_webhook_transport_object_safe(w: &dyn WebhookTransport) {
        let _ = w;
    }

    fn _assert_chain_writer_object_safe(cw: &dyn ChainWriter) {
        let _ = cw;
    }

    #[tokio::test]
    async fn rpc_client_chain_tip() {
        let rc = MockRpcClient { tip: 100, transfers: vec![], max_window: 10 };
        assert_eq!(rc.chain_tip().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn rpc_client_window_too_large() {
        let rc = MockRpcClient { tip: 100, transfers: vec![], max_window: 10 };
        let err = rc.get_transfers(0, 50).await.unwrap_err();
        assert_eq!(err, RpcError::ResultWindowTooLarge);
    }

    #[tokio::test]
    async fn rpc_client_is_canonical() {
        let rc = MockRpcClient { tip: 100, transfers: vec![], max_window: 10 };
        assert!(rc.is_canonical(50, "0xabc").await.unwrap());
        assert!(!rc.is_canonical(200, "0xabc").await.unwrap());
    }

    #[tokio::test]
    async fn code_host_client_unlinked_wallet_returns_none() {
        let client = MockCodeHostClient { repos: HashMap::new() };
        assert_eq!(client.repo_count(&sample_address()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn basename_resolver_as_dyn() {
        let mut names = HashMap::new();
        names.insert(sample_address(), "alice.base".to_string());
        let resolver = MockBasenameResolver { names };
        let dyn_resolver: &dyn BasenameResolver = &resolver;
        assert_eq!(
            dyn_resolver.resolve(&sample_address()).await.unwrap(),
            Some("alice.base".to_string())
        );
    }

    #[tokio::test]
    async fn webhook_transport_delivers() {
        let transport = MockWebhookTransport { responses: Mutex::new(vec![200]) };
        let code = transport.deliver("https://example.com", b"{}", "sha256=abc").await.unwrap();
        assert_eq!(code, 200);
    }

    #[tokio::test]
    async fn chain_writer_publishes() {
        let writer = MockChainWriter;
        let tx = writer.publish_reputation(&sample_address(), 80, "v1").await.unwrap();
        assert!(tx.starts_with("0xpublished-"));
    }
}
