//! Stand-in collaborators for enrichment signals with no concrete
//! implementation in this crate (code-host linking, basename resolution,
//! on-chain publication are operator-supplied integrations). Used by the
//! service binary when the corresponding configuration is absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trust_core::error::RpcError;
use trust_core::traits::{BasenameResolver, ChainWriter, CodeHostClient, RpcClient};
use trust_core::types::{Address, AuthorizationUse, RawTransfer};

/// Always reports no linked identity. Capability and the identity
/// dimension's account-age signal fall back to their "unknown" defaults.
pub struct DisabledCodeHost;

#[async_trait]
impl CodeHostClient for DisabledCodeHost {
    async fn repo_count(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(None)
    }

    async fn account_age_days(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(None)
    }

    async fn repo_stars(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
        Ok(None)
    }
}

/// Fails closed on every call. Wired in when no live RPC endpoint is
/// configured (e.g. the CLI's offline commands), so anything that needs
/// chain data gets a safe, inert default rather than a live request.
pub struct DisabledRpcClient;

#[async_trait]
impl RpcClient for DisabledRpcClient {
    async fn chain_tip(&self) -> Result<u64, RpcError> {
        Ok(0)
    }

    async fn get_transfers(&self, _from: u64, _to: u64) -> Result<Vec<RawTransfer>, RpcError> {
        Ok(vec![])
    }

    async fn is_canonical(&self, _block: u64, _block_hash: &str) -> Result<bool, RpcError> {
        Ok(false)
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

/// Always reports no resolved basename.
pub struct DisabledBasenameResolver;

#[async_trait]
impl BasenameResolver for DisabledBasenameResolver {
    async fn resolve(&self, _wallet: &Address) -> Result<Option<String>, RpcError> {
        Ok(None)
    }
}

/// Rejects every publish attempt. Wired in when `publishing_enabled` is
/// `false`, so the publisher job's gating logic still runs but never
/// actually reaches a chain.
pub struct DisabledChainWriter;

#[async_trait]
impl ChainWriter for DisabledChainWriter {
    async fn publish_reputation(&self, _wallet: &Address, _score: u8, _model_version: &str) -> Result<String, RpcError> {
        Err(RpcError::ConnectionFailed("reputation publishing is disabled".into()))
    }
}
