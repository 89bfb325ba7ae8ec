//! Tunable defaults for the scoring pipeline. Every value here has an
//! environment-variable override surfaced through `ServiceConfig`.

/// Dimension weights, must sum to 1.0 (§4.4 invariant).
pub const WEIGHT_RELIABILITY: f64 = 0.30;
pub const WEIGHT_VIABILITY: f64 = 0.25;
pub const WEIGHT_IDENTITY: f64 = 0.20;
pub const WEIGHT_CAPABILITY: f64 = 0.10;
pub const WEIGHT_BEHAVIOUR: f64 = 0.15;

/// Tier thresholds on the 0-100 composite scale (§3).
pub const TIER_EMERGING_MIN: u8 = 20;
pub const TIER_ESTABLISHED_MIN: u8 = 45;
pub const TIER_TRUSTED_MIN: u8 = 70;
pub const TIER_ELITE_MIN: u8 = 90;

/// How long a computed score stays fresh before recomputation is required.
pub const CACHE_TTL_SECS: i64 = 60 * 60;

/// Hard deadline for a synchronous `get_or_calculate` call before the
/// engine falls back to a stale cached value (§4.5).
pub const COMPUTE_TIMEOUT_SECS: u64 = 75;

/// Per-upstream-call timeout budget, strictly less than `COMPUTE_TIMEOUT_SECS`.
pub const UPSTREAM_CALL_TIMEOUT_SECS: u64 = 60;

/// Delay before retrying after the indexer hits a transient upstream error.
pub const INDEXER_RETRY_DELAY_SECS: u64 = 30;

/// Initial chunk size, in blocks, for indexer backfill; halved on
/// "result window too large" errors down to `INDEXER_MIN_CHUNK_SIZE`.
pub const INDEXER_INITIAL_CHUNK_SIZE: u64 = 2000;
pub const INDEXER_MIN_CHUNK_SIZE: u64 = 16;

/// Maximum upward/downward per-cycle drift applied to a calibrated
/// dimension weight, and the absolute cap off the initial default (§4.8).
pub const CALIBRATION_DRIFT_PER_CYCLE: f64 = 0.02;
pub const CALIBRATION_DRIFT_CAP: f64 = 0.05;

/// Multiplicative dampening applied to a wallet's confidence-weighted
/// contribution to calibration after a confirmed fraud report.
pub const FRAUD_REPORT_DAMPENING: f64 = 0.90;

/// Floor for the sybil/gaming integrity multiplier; it can shrink a
/// composite score but never zero it out silently (§4.3).
pub const INTEGRITY_MULTIPLIER_FLOOR: f64 = 0.10;
pub const INTEGRITY_MULTIPLIER_CEILING: f64 = 1.00;

/// Webhook retry backoff ladder, in seconds, applied per consecutive
/// delivery failure before the webhook auto-disables.
pub const WEBHOOK_BACKOFF_LADDER_SECS: [u64; 5] = [60, 300, 900, 1800, 3600];

/// Bound on the number of rows kept in a wallet's score history.
pub const SCORE_HISTORY_CAP: usize = 50;

/// Pagination `limit` clamp range and default (§6).
pub const LIMIT_MIN: i64 = 1;
pub const LIMIT_MAX: i64 = 100;
pub const LIMIT_DEFAULT: i64 = 50;

/// Minimum production admin-key length (§4 config invariant).
pub const MIN_ADMIN_KEY_LEN: usize = 32;

/// Rolling volume windows used by `WalletStats`.
pub const WINDOW_24H_SECS: i64 = 60 * 60 * 24;
pub const WINDOW_7D_SECS: i64 = WINDOW_24H_SECS * 7;
pub const WINDOW_30D_SECS: i64 = WINDOW_24H_SECS * 30;

/// Job scheduler periods and startup delays, in seconds (§4.7).
pub const JOB_SCORE_REFRESH_PERIOD_SECS: u64 = 300;
pub const JOB_SCORE_REFRESH_STARTUP_DELAY_SECS: u64 = 10;
pub const JOB_INDEXER_TICK_PERIOD_SECS: u64 = 5;
pub const JOB_INDEXER_TICK_STARTUP_DELAY_SECS: u64 = 0;
pub const JOB_CALIBRATION_PERIOD_SECS: u64 = 60 * 60 * 6;
pub const JOB_CALIBRATION_STARTUP_DELAY_SECS: u64 = 120;
pub const JOB_PUBLISHER_PERIOD_SECS: u64 = 60 * 15;
pub const JOB_PUBLISHER_STARTUP_DELAY_SECS: u64 = 30;
pub const JOB_WEBHOOK_RETRY_PERIOD_SECS: u64 = 30;
pub const JOB_WEBHOOK_RETRY_STARTUP_DELAY_SECS: u64 = 5;
pub const JOB_HISTORY_PRUNE_PERIOD_SECS: u64 = 60 * 60;
pub const JOB_HISTORY_PRUNE_STARTUP_DELAY_SECS: u64 = 60;
pub const JOB_EXPIRED_SCORE_SWEEP_PERIOD_SECS: u64 = 60 * 10;
pub const JOB_EXPIRED_SCORE_SWEEP_STARTUP_DELAY_SECS: u64 = 45;
pub const JOB_METRICS_LOG_PERIOD_SECS: u64 = 60;
pub const JOB_METRICS_LOG_STARTUP_DELAY_SECS: u64 = 15;
pub const JOB_OUTCOME_RECONCILE_PERIOD_SECS: u64 = 60 * 60 * 2;
pub const JOB_OUTCOME_RECONCILE_STARTUP_DELAY_SECS: u64 = 90;
pub const JOB_WALLET_STATS_ROLLUP_PERIOD_SECS: u64 = 60 * 5;
pub const JOB_WALLET_STATS_ROLLUP_STARTUP_DELAY_SECS: u64 = 20;

/// Graceful shutdown drain budget before the service forces exit.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Scoring model version stamped onto every computed [`crate::types::Score`].
/// Bump when the dimension formulas or weights change in a way that makes
/// historical scores non-comparable to new ones.
pub const MODEL_VERSION: &str = "trustmesh-v1";

/// Below this many lifetime transactions a wallet is scored
/// `Recommendation::InsufficientHistory` regardless of its dimension scores.
pub const MIN_TX_FOR_SCORING: u64 = 3;

/// Minimum confidence below which the publisher refuses to write a
/// reputation update on-chain (§4.9 gating).
pub const PUBLISH_MIN_CONFIDENCE: f64 = 0.5;

/// Minimum absolute change in composite score required before the
/// publisher bothers spending gas on a republish.
pub const PUBLISH_MIN_SCORE_DELTA: u8 = 3;

/// Fraction of `CACHE_TTL_SECS` remaining-freshness below which a cache hit
/// is served as stale and a background refresh is kicked off (§4.5 step 2).
pub const STALE_REFRESH_THRESHOLD_RATIO: f64 = 0.5;

/// Global concurrency cap on in-flight background score refreshes.
pub const BACKGROUND_REFRESH_CONCURRENCY: usize = 5;

/// Flat Reliability-dimension point penalty applied per confirmed gaming
/// indicator (§4.3).
pub const GAMING_RELIABILITY_PENALTY: i32 = 8;

/// Maximum transfer amount, in minor units, eligible to be counted as a
/// settlement rather than an ordinary transfer (§4.2). Roughly 1 USD-equivalent.
pub const MICRO_PAYMENT_CEILING: u64 = 1_000_000;

/// Above this many authorisation-use events in a single indexed chunk, skip
/// the per-tx facilitator-sender lookup and rely on the ceiling filter alone.
pub const FACILITATOR_AUTH_USE_SHORTCUT_THRESHOLD: usize = 100;

/// Max concurrent per-tx facilitator-sender lookups issued for one chunk.
pub const FACILITATOR_LOOKUP_CONCURRENCY: usize = 8;

/// Blocks before chain tip to seed `last_indexed_block` on first start, so a
/// cold backfill doesn't scan the whole chain history.
pub const INDEXER_BACKFILL_OFFSET_BLOCKS: u64 = 500_000;

/// If a stored checkpoint is older than this many blocks behind tip, skip
/// straight to tip instead of backfilling the gap.
pub const INDEXER_CATCHUP_CEILING_BLOCKS: u64 = 2_000_000;

/// Minimum scored-wallet population before the population-stats calibration
/// loop computes and persists distribution statistics (§4.8).
pub const CALIBRATION_MIN_POPULATION: usize = 200;

/// Minimum total outcomes, and minimum negative outcomes among them, before
/// the outcome-driven weight calibration loop runs a cycle (§4.8).
pub const CALIBRATION_MIN_OUTCOMES: usize = 50;
pub const CALIBRATION_MIN_NEGATIVE_OUTCOMES: usize = 5;

/// Population median composite score a cohort must exceed before breakpoint
/// tables are allowed to shift upward at all (§4.8 maturity baseline).
pub const CALIBRATION_MATURITY_BASELINE_MEDIAN: f64 = 55.0;

/// Maximum fraction a breakpoint table may shift upward in one calibration
/// pass, relative to its default spacing (§4.8).
pub const CALIBRATION_BREAKPOINT_SHIFT_CAP: f64 = 0.30;

/// Target share of the scored population each tier should occupy once tier
/// thresholds are calibrated to the observed score distribution (§4.8).
/// Ordered elite, trusted, established, emerging; the remainder falls to
/// unverified.
pub const TIER_TARGET_PROPORTION_ELITE: f64 = 0.05;
pub const TIER_TARGET_PROPORTION_TRUSTED: f64 = 0.20;
pub const TIER_TARGET_PROPORTION_ESTABLISHED: f64 = 0.35;
pub const TIER_TARGET_PROPORTION_EMERGING: f64 = 0.25;

/// How long a calibrated tier-threshold read from indexer-state is trusted
/// before the next lookup re-reads the store (§4.8).
pub const TIER_THRESHOLD_CACHE_TTL_SECS: u64 = 60;
