//! Core domain types: wallets, transfers, relationships, scores, and the
//! supporting record types from the data model.
//!
//! Amounts are fixed-point with 6 decimal places (stablecoin precision),
//! stored as `u64` minor units (i.e. `amount_minor / 1_000_000` is the
//! human-readable value) so arithmetic stays exact.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Fixed-point decimal places used for all stored amounts.
pub const AMOUNT_DECIMALS: u32 = 6;

/// A lowercased 20-byte on-chain wallet address.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    /// Parse a `0x`-prefixed, 40-hex-character address. Case-insensitive;
    /// the result is always lowercased, per the data model's key convention.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.len() != 40 {
            return Err(ValidationError::MalformedWallet(s.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(stripped, &mut bytes)
            .map_err(|_| ValidationError::MalformedWallet(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A wallet, as tracked by the scoring pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Wallet {
    pub address: Address,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_tx_count: u64,
    pub volume_in: u64,
    pub volume_out: u64,
    pub scored: bool,
}

/// An immutable, append-only settlement or transfer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransfer {
    pub tx_hash: String,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    /// Fixed-point amount, 6 decimal places, in minor units.
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

/// A settlement authorisation-use event, emitted only by the payment
/// facilitator's authorisation path (distinct from a plain token transfer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationUse {
    pub tx_hash: String,
    pub sender: Address,
}

/// An undirected relationship edge between two wallets, keyed by the
/// ordered pair `(wallet_a < wallet_b)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub wallet_a: Address,
    pub wallet_b: Address,
    /// Tx count and volume from `wallet_a` to `wallet_b`.
    pub tx_count_a_to_b: u64,
    pub volume_a_to_b: u64,
    /// Tx count and volume from `wallet_b` to `wallet_a`.
    pub tx_count_b_to_a: u64,
    pub volume_b_to_a: u64,
    pub first_interaction: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
}

impl RelationshipEdge {
    pub fn total_tx_count(&self) -> u64 {
        self.tx_count_a_to_b + self.tx_count_b_to_a
    }

    pub fn total_volume(&self) -> u64 {
        self.volume_a_to_b.saturating_add(self.volume_b_to_a)
    }

    /// True if inbound/outbound volume between the pair is within `pct`
    /// percent of each other (symmetric-transaction sybil signal input).
    pub fn is_symmetric(&self, pct: f64) -> bool {
        if self.volume_a_to_b == 0 || self.volume_b_to_a == 0 {
            return false;
        }
        let hi = self.volume_a_to_b.max(self.volume_b_to_a) as f64;
        let lo = self.volume_a_to_b.min(self.volume_b_to_a) as f64;
        (hi - lo) / hi <= pct
    }
}

/// Order a wallet pair so the smaller address comes first, matching the
/// store's unique-ordered-pair constraint.
pub fn ordered_pair(a: Address, b: Address) -> (Address, Address) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Rolling window label used in [`WalletStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollingWindow {
    Hours24,
    Days7,
    Days30,
}

/// Pre-rolled per-wallet aggregate totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub address: Address,
    pub unique_partners: u64,
    pub inflow_24h: u64,
    pub outflow_24h: u64,
    pub inflow_7d: u64,
    pub outflow_7d: u64,
    pub inflow_30d: u64,
    pub outflow_30d: u64,
    /// `income / burn`, clamped to a sane display range by the caller.
    pub income_burn_ratio: f64,
    pub trend: TrendDirection,
    /// Set once a wallet's native balance has been observed to hit zero
    /// after having held a nonzero balance. Sticky: never clears.
    pub ever_drained: bool,
}

/// A wallet's behavioural signature, classified from its transfer
/// inter-arrival pattern (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviourClass {
    Organic,
    Mixed,
    Automated,
    Suspicious,
}

impl fmt::Display for BehaviourClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Organic => "organic",
            Self::Mixed => "mixed",
            Self::Automated => "automated",
            Self::Suspicious => "suspicious",
        };
        write!(f, "{s}")
    }
}

/// A wallet's trend classification over its rolling volume history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Stable,
    Declining,
    Freefall,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rising => "rising",
            Self::Stable => "stable",
            Self::Declining => "declining",
            Self::Freefall => "freefall",
        };
        write!(f, "{s}")
    }
}

/// Discrete trust tier, derived from the composite score via current
/// thresholds (§3 invariant: `tier == score_to_tier(composite)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Unverified,
    Emerging,
    Established,
    Trusted,
    Elite,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Emerging => "emerging",
            Self::Established => "established",
            Self::Trusted => "trusted",
            Self::Elite => "elite",
        };
        write!(f, "{s}")
    }
}

/// The priority-ordered action recommendation attached to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    FlaggedForReview,
    InsufficientHistory,
    HighRisk,
    Proceed,
    ProceedWithCaution,
    RpcUnavailable,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FlaggedForReview => "flagged_for_review",
            Self::InsufficientHistory => "insufficient_history",
            Self::HighRisk => "high_risk",
            Self::Proceed => "proceed",
            Self::ProceedWithCaution => "proceed_with_caution",
            Self::RpcUnavailable => "rpc_unavailable",
        };
        write!(f, "{s}")
    }
}

/// Where a served score came from, for client transparency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cached,
    Unavailable,
}

/// Closed set of sybil detection indicator tags (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SybilIndicator {
    TightCluster,
    SymmetricTransactions,
    WashTrading,
    CoordinatedCreation,
    FundedByTopPartner,
    SingleSourceFunding,
    SinglePartner,
    VolumeWithoutDiversity,
}

impl fmt::Display for SybilIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TightCluster => "tight_cluster",
            Self::SymmetricTransactions => "symmetric_transactions",
            Self::WashTrading => "wash_trading",
            Self::CoordinatedCreation => "coordinated_creation",
            Self::FundedByTopPartner => "funded_by_top_partner",
            Self::SingleSourceFunding => "single_source_funding",
            Self::SinglePartner => "single_partner",
            Self::VolumeWithoutDiversity => "volume_without_diversity",
        };
        write!(f, "{s}")
    }
}

/// Closed set of gaming detection indicator tags (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamingIndicator {
    BalanceWindowDressing,
    BurstAndStop,
    NonceInflation,
    RevenueRecycling,
}

impl fmt::Display for GamingIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BalanceWindowDressing => "balance_window_dressing",
            Self::BurstAndStop => "burst_and_stop",
            Self::NonceInflation => "nonce_inflation",
            Self::RevenueRecycling => "revenue_recycling",
        };
        write!(f, "{s}")
    }
}

/// Per-signal point breakdown, for explainability, attached to each
/// dimension score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub signal: String,
    pub points: i32,
}

/// One of the five dimension scores plus its explainable breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: u8,
    pub data: Vec<SignalBreakdown>,
}

/// The five scored dimensions (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub reliability: DimensionScore,
    pub viability: DimensionScore,
    pub identity: DimensionScore,
    pub capability: DimensionScore,
    pub behaviour: DimensionScore,
}

/// A wallet's current trust score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub wallet: Address,
    pub composite: u8,
    pub dimensions: Dimensions,
    pub tier: Tier,
    /// Opaque snapshot used to re-hydrate a cached full response without
    /// recomputation (breakdown, top contributors/detractors, etc).
    pub raw_snapshot: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub model_version: String,
    pub sybil_flag: bool,
    pub sybil_indicators: Vec<SybilIndicator>,
    pub gaming_indicators: Vec<GamingIndicator>,
    pub integrity_multiplier: f64,
}

impl Score {
    /// Freshness in `[0, 1]`, `1.0` at `computed_at`, `0.0` at `expires_at`
    /// and beyond (§4.6, §8 invariant 4).
    pub fn freshness(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.expires_at - self.computed_at).num_milliseconds();
        if total <= 0 {
            return 0.0;
        }
        let elapsed = (now - self.computed_at).num_milliseconds();
        (1.0 - (elapsed as f64 / total as f64)).clamp(0.0, 1.0)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// One append-only entry in a wallet's score history (bounded to the 50
/// most recent rows per wallet, §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub wallet: Address,
    pub score: u8,
    pub computed_at: DateTime<Utc>,
    pub confidence: f64,
    pub model_version: String,
}

/// History trend summary returned by the `history` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDirection {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTrend {
    pub direction: HistoryDirection,
    pub change_pct: f64,
    pub min_score: u8,
    pub max_score: u8,
}

/// The four outcome classifications linking a prior paid query to a later
/// on-chain event (§3, calibration input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    SuccessfulTx,
    MultipleSuccessfulTx,
    FraudReport,
    NoActivity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub wallet: Address,
    pub queried_at: DateTime<Utc>,
    pub predicted_score: u8,
    pub outcome_type: OutcomeType,
    pub observed_at: DateTime<Utc>,
}

/// Maximum number of reports a single reporter may file against one target
/// (§3 invariant).
pub const MAX_REPORTS_PER_REPORTER_PER_TARGET: u32 = 3;

/// Maximum length of a fraud report's free-text details field.
pub const MAX_FRAUD_REPORT_DETAILS_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudReport {
    pub id: i64,
    pub target: Address,
    pub reporter: Address,
    pub reason: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub penalty_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationPublication {
    pub wallet: Address,
    pub last_published_score: u8,
    pub model_version: String,
    pub tx_hash: String,
    pub published_at: DateTime<Utc>,
}

/// Events a webhook subscriber can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    ScoreUpdated,
    SybilFlagged,
    FraudReported,
    TierChanged,
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ScoreUpdated => "score.updated",
            Self::SybilFlagged => "score.sybil_flagged",
            Self::FraudReported => "score.fraud_reported",
            Self::TierChanged => "score.tier_changed",
        };
        write!(f, "{s}")
    }
}

/// Threshold above which consecutive delivery failures auto-disable a
/// webhook (§3 invariant).
pub const WEBHOOK_AUTO_DISABLE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub wallet: Address,
    pub url: String,
    pub secret: String,
    pub events: Vec<WebhookEventType>,
    pub active: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub webhook_id: i64,
    pub event_type: WebhookEventType,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip_lowercases() {
        let a: Address = "0xABCDEF0000000000000000000000000000ABCD".parse().unwrap();
        assert_eq!(a.to_string(), "0xabcdef0000000000000000000000000000abcd");
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>();
        assert!(err.is_err());
    }

    #[test]
    fn ordered_pair_is_stable() {
        let a: Address = "0x0000000000000000000000000000000000aaaa".parse().unwrap();
        let b: Address = "0x0000000000000000000000000000000000bbbb".parse().unwrap();
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
    }

    #[test]
    fn freshness_is_one_at_compute_time() {
        let now = Utc::now();
        let score = sample_score(now, now + chrono::Duration::hours(1));
        assert_eq!(score.freshness(now), 1.0);
    }

    #[test]
    fn freshness_is_zero_past_expiry() {
        let now = Utc::now();
        let score = sample_score(now - chrono::Duration::hours(2), now - chrono::Duration::hours(1));
        assert_eq!(score.freshness(now), 0.0);
    }

    #[test]
    fn freshness_is_monotonically_non_increasing() {
        let start = Utc::now();
        let score = sample_score(start, start + chrono::Duration::hours(1));
        let f1 = score.freshness(start + chrono::Duration::minutes(10));
        let f2 = score.freshness(start + chrono::Duration::minutes(40));
        assert!(f2 <= f1);
    }

    fn sample_score(computed_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Score {
        Score {
            wallet: "0x0000000000000000000000000000000000aaaa".parse().unwrap(),
            composite: 50,
            dimensions: Dimensions {
                reliability: DimensionScore { score: 50, data: vec![] },
                viability: DimensionScore { score: 50, data: vec![] },
                identity: DimensionScore { score: 50, data: vec![] },
                capability: DimensionScore { score: 50, data: vec![] },
                behaviour: DimensionScore { score: 50, data: vec![] },
            },
            tier: Tier::Established,
            raw_snapshot: serde_json::json!({}),
            computed_at,
            expires_at,
            confidence: 0.5,
            recommendation: Recommendation::ProceedWithCaution,
            model_version: "v1".to_string(),
            sybil_flag: false,
            sybil_indicators: vec![],
            gaming_indicators: vec![],
            integrity_multiplier: 1.0,
        }
    }
}
