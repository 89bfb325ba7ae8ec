//! Concrete [`RpcClient`] against the L2 chain's JSON-RPC endpoint.
//!
//! Speaks a small `eth_*`-shaped subset: block number for the tip, and a
//! custom `trustmesh_getTransfers` method the chain's indexing-friendly
//! nodes expose for paginated settlement logs. Only a client; this crate
//! never stands up an RPC server.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;

use trust_core::error::RpcError;
use trust_core::traits::RpcClient;
use trust_core::types::{Address, AuthorizationUse, RawTransfer};

pub struct HttpRpcClient {
    inner: HttpClient,
}

impl HttpRpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let inner = HttpClientBuilder::default()
            .build(url)
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[derive(Deserialize)]
struct TransferLogEntry {
    tx_hash: String,
    block_number: u64,
    from: String,
    to: String,
    amount: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct AuthorizationUseEntry {
    tx_hash: String,
    sender: String,
}

fn map_call_error(err: jsonrpsee::core::ClientError) -> RpcError {
    match &err {
        jsonrpsee::core::ClientError::RequestTimeout => RpcError::Timeout,
        jsonrpsee::core::ClientError::Call(obj) if obj.code() == -32005 => RpcError::RateLimited,
        jsonrpsee::core::ClientError::Call(obj) if obj.message().contains("window") => {
            RpcError::ResultWindowTooLarge
        }
        _ => RpcError::ConnectionFailed(err.to_string()),
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn chain_tip(&self) -> Result<u64, RpcError> {
        let hex_height: String = self
            .inner
            .request("eth_blockNumber", rpc_params![])
            .await
            .map_err(map_call_error)?;
        u64::from_str_radix(hex_height.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))
    }

    async fn get_transfers(&self, from: u64, to: u64) -> Result<Vec<RawTransfer>, RpcError> {
        let entries: Vec<TransferLogEntry> = self
            .inner
            .request("trustmesh_getTransfers", rpc_params![from, to])
            .await
            .map_err(map_call_error)?;

        entries
            .into_iter()
            .map(|e| {
                Ok(RawTransfer {
                    tx_hash: e.tx_hash,
                    block_number: e.block_number,
                    from: e.from.parse().map_err(|_| RpcError::MalformedResponse("bad from address".into()))?,
                    to: e.to.parse().map_err(|_| RpcError::MalformedResponse("bad to address".into()))?,
                    amount: e.amount,
                    timestamp: e.timestamp,
                })
            })
            .collect()
    }

    async fn is_canonical(&self, block: u64, block_hash: &str) -> Result<bool, RpcError> {
        let hex_block = format!("0x{block:x}");
        let observed: Option<String> = self
            .inner
            .request("eth_getBlockHashByNumber", rpc_params![hex_block])
            .await
            .map_err(map_call_error)?;
        Ok(observed.as_deref() == Some(block_hash))
    }

    async fn native_balance(&self, wallet: &Address) -> Result<u64, RpcError> {
        let hex_balance: String = self
            .inner
            .request("trustmesh_getNativeBalance", rpc_params![wallet.to_string()])
            .await
            .map_err(map_call_error)?;
        u64::from_str_radix(hex_balance.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))
    }

    async fn stablecoin_balance(&self, wallet: &Address) -> Result<u64, RpcError> {
        let hex_balance: String = self
            .inner
            .request("trustmesh_getStablecoinBalance", rpc_params![wallet.to_string()])
            .await
            .map_err(map_call_error)?;
        u64::from_str_radix(hex_balance.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))
    }

    async fn tx_count(&self, wallet: &Address) -> Result<u64, RpcError> {
        let hex_count: String = self
            .inner
            .request("trustmesh_getTxCount", rpc_params![wallet.to_string()])
            .await
            .map_err(map_call_error)?;
        u64::from_str_radix(hex_count.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))
    }

    async fn first_seen_at(&self, wallet: &Address) -> Result<Option<chrono::DateTime<chrono::Utc>>, RpcError> {
        self.inner
            .request("trustmesh_getFirstSeenAt", rpc_params![wallet.to_string()])
            .await
            .map_err(map_call_error)
    }

    async fn authorization_uses(&self, from: u64, to: u64) -> Result<Vec<AuthorizationUse>, RpcError> {
        let entries: Vec<AuthorizationUseEntry> = self
            .inner
            .request("trustmesh_getAuthorizationUses", rpc_params![from, to])
            .await
            .map_err(map_call_error)?;
        entries
            .into_iter()
            .map(|e| {
                Ok(AuthorizationUse {
                    tx_hash: e.tx_hash,
                    sender: e.sender.parse().map_err(|_| RpcError::MalformedResponse("bad sender address".into()))?,
                })
            })
            .collect()
    }

    async fn is_facilitator_sent(&self, tx_hash: &str) -> Result<bool, RpcError> {
        self.inner
            .request("trustmesh_isFacilitatorSent", rpc_params![tx_hash])
            .await
            .map_err(map_call_error)
    }
}
