//! Error taxonomy for the wallet trust scoring pipeline.
//!
//! Each leaf error carries enough detail for logs; [`ErrorKind`] is the
//! abstract classification callers (the HTTP layer, the scheduler) use to
//! decide how to react, independent of which subsystem raised it.
use thiserror::Error;

/// Abstract error classification, independent of subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Precondition,
    Capacity,
    UpstreamTransient,
    UpstreamFatal,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed wallet address: {0}")]
    MalformedWallet(String),
    #[error("limit out of range: {0}")]
    LimitOutOfRange(i64),
    #[error("fraud report details exceed {max} characters")]
    ReportDetailsTooLong { max: usize },
    #[error("empty fraud report reason")]
    EmptyReportReason,
    #[error("invalid webhook url: {0}")]
    InvalidWebhookUrl(String),
    #[error("unknown webhook event type: {0}")]
    UnknownEventType(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("wallet not found: {0}")]
    WalletNotFound(String),
    #[error("score not found: {0}")]
    ScoreNotFound(String),
    #[error("webhook not found: {0}")]
    WebhookNotFound(i64),
    #[error("underlying sqlite error: {0}")]
    Sqlite(String),
    #[error("schema migration failed: {0}")]
    Migration(String),
    #[error("database busy, exhausted retries")]
    BusyRetriesExhausted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("result window too large")]
    ResultWindowTooLarge,
    #[error("chain reorg detected at block {0}")]
    Reorg(u64),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("insufficient transfer history for wallet {0}")]
    InsufficientHistory(String),
    #[error("relationship graph query failed: {0}")]
    GraphQueryFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublisherError {
    #[error("chain writer rejected publication: {0}")]
    WriteRejected(String),
    #[error("insufficient confidence to publish: {0}")]
    InsufficientConfidence(f64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("delivery transport error: {0}")]
    TransportError(String),
    #[error("webhook auto-disabled after {0} consecutive failures")]
    AutoDisabled(u32),
    #[error("signing key missing")]
    MissingSecret,
}

/// Top-level error type, wrapping every subsystem error via `#[from]`.
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Publisher(#[from] PublisherError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error("timed out computing score within the deadline")]
    ComputeTimeout,
    #[error("internal: {0}")]
    Internal(String),
}

impl ScoreError {
    /// Map to an abstract kind for callers that branch on error category
    /// (e.g. the HTTP layer picking a status code) rather than the exact
    /// variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(StoreError::WalletNotFound(_))
            | Self::Store(StoreError::ScoreNotFound(_))
            | Self::Store(StoreError::WebhookNotFound(_)) => ErrorKind::NotFound,
            Self::Store(StoreError::BusyRetriesExhausted) => ErrorKind::Capacity,
            Self::Store(_) => ErrorKind::Internal,
            Self::Rpc(RpcError::Timeout)
            | Self::Rpc(RpcError::RateLimited)
            | Self::Rpc(RpcError::ConnectionFailed(_)) => ErrorKind::UpstreamTransient,
            Self::Rpc(RpcError::Reorg(_)) | Self::Rpc(RpcError::MalformedResponse(_)) => {
                ErrorKind::UpstreamFatal
            }
            Self::Rpc(RpcError::ResultWindowTooLarge) => ErrorKind::Precondition,
            Self::Detection(DetectionError::InsufficientHistory(_)) => ErrorKind::Precondition,
            Self::Detection(_) => ErrorKind::Internal,
            Self::Publisher(PublisherError::InsufficientConfidence(_)) => ErrorKind::Precondition,
            Self::Publisher(_) => ErrorKind::UpstreamTransient,
            Self::Webhook(WebhookError::AutoDisabled(_)) => ErrorKind::Precondition,
            Self::Webhook(WebhookError::MissingSecret) => ErrorKind::Validation,
            Self::Webhook(_) => ErrorKind::UpstreamTransient,
            Self::ComputeTimeout => ErrorKind::UpstreamTransient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a background job may simply retry on its next tick rather
    /// than surfacing the error to an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamTransient | ErrorKind::Capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_correctly() {
        let err: ScoreError = StoreError::ScoreNotFound("0xabc".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn rpc_timeout_is_retryable() {
        let err: ScoreError = RpcError::Timeout.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn reorg_is_not_retryable() {
        let err: ScoreError = RpcError::Reorg(42).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_maps_to_validation_kind() {
        let err: ScoreError = ValidationError::LimitOutOfRange(500).into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
