//! The scoring engine: combines cached-score freshness logic with the pure
//! detection/dimension scorers in trust-detect, orchestrated against
//! trust-store, the live RPC client, and the enrichment collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tokio::sync::Semaphore;

use trust_core::constants::{
    BACKGROUND_REFRESH_CONCURRENCY, CACHE_TTL_SECS, COMPUTE_TIMEOUT_SECS, MIN_TX_FOR_SCORING,
    MODEL_VERSION, STALE_REFRESH_THRESHOLD_RATIO, TIER_ELITE_MIN, TIER_EMERGING_MIN,
    TIER_ESTABLISHED_MIN, TIER_TRUSTED_MIN, WEIGHT_BEHAVIOUR, WEIGHT_CAPABILITY, WEIGHT_IDENTITY,
    WEIGHT_RELIABILITY, WEIGHT_VIABILITY, WINDOW_24H_SECS,
};
use trust_core::error::{DetectionError, ScoreError};
use trust_core::traits::{BasenameResolver, CodeHostClient, RpcClient};
use trust_core::types::{
    Address, DataSource, Dimensions, DimensionScore, Recommendation, Score, Tier, TrendDirection,
    WalletStats,
};
use trust_detect::dimensions::{
    score_behaviour, score_capability, score_identity, score_reliability, score_viability,
    CapabilityInputs, IdentityInputs, ReliabilityInputs, ViabilityInputs,
};
use trust_detect::gaming::{self, GamingEvidence};
use trust_detect::integrity;
use trust_detect::stats;
use trust_detect::sybil::{self, SybilEvidence};
use trust_store::AsyncDb;

use crate::calibration;

/// Window within which two wallets' first-seen timestamps count as
/// "coordinated" for the sybil coordinated-creation signal.
const COORDINATED_CREATION_WINDOW_SECS: i64 = WINDOW_24H_SECS;

/// A served score plus where it came from, for client transparency.
#[derive(Debug, Clone)]
pub struct ScoreResponse {
    pub score: Score,
    pub source: DataSource,
    /// Set when this response is a cached value past the
    /// `STALE_REFRESH_THRESHOLD_RATIO` freshness threshold, served while a
    /// background recompute is (or was just) kicked off.
    pub stale: bool,
}

struct Inner<R: RpcClient, C: CodeHostClient, B: BasenameResolver> {
    store: AsyncDb,
    rpc: Arc<R>,
    code_host: Arc<C>,
    basename: Arc<B>,
    refreshing: DashSet<Address>,
    refresh_permits: Semaphore,
}

/// Orchestrates score computation and caching for one wallet at a time.
///
/// Generic over the three enrichment collaborators so tests can supply
/// fakes without touching HTTP; the concrete production implementations
/// live alongside this crate. Cheaply `Clone`, so a background refresh task
/// can hold its own handle independent of the request that spawned it.
pub struct ScoringEngine<R: RpcClient + 'static, C: CodeHostClient + 'static, B: BasenameResolver + 'static> {
    inner: Arc<Inner<R, C, B>>,
}

impl<R: RpcClient + 'static, C: CodeHostClient + 'static, B: BasenameResolver + 'static> Clone
    for ScoringEngine<R, C, B>
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R: RpcClient + 'static, C: CodeHostClient + 'static, B: BasenameResolver + 'static> ScoringEngine<R, C, B> {
    pub fn new(store: AsyncDb, rpc: Arc<R>, code_host: Arc<C>, basename: Arc<B>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                rpc,
                code_host,
                basename,
                refreshing: DashSet::new(),
                refresh_permits: Semaphore::new(BACKGROUND_REFRESH_CONCURRENCY),
            }),
        }
    }

    /// Serve a wallet's score, computing it if missing, stale, or `force`d.
    ///
    /// A cached score whose freshness ratio is still above
    /// `STALE_REFRESH_THRESHOLD_RATIO` is returned as-is (dampened for any
    /// fraud reports filed since it was computed). Below that threshold it
    /// is still served immediately, marked `stale`, while a background
    /// recompute is kicked off (de-duplicated per wallet, capped globally
    /// at `BACKGROUND_REFRESH_CONCURRENCY`). With no usable cache at all,
    /// or when `force`d, this blocks on a synchronous recompute bounded by
    /// `COMPUTE_TIMEOUT_SECS`; if that fails or times out, it falls back to
    /// any cache present, or otherwise to an identity-only partial score.
    pub async fn get_or_calculate(&self, wallet: Address, force: bool) -> Result<ScoreResponse, ScoreError> {
        let cached = self.inner.store.get_score(wallet).await?;

        if !force {
            if let Some(score) = &cached {
                let freshness = score.freshness(Utc::now());
                let dampened = self.apply_fraud_dampening(score).await?;
                if freshness >= STALE_REFRESH_THRESHOLD_RATIO {
                    return Ok(ScoreResponse { score: dampened, source: DataSource::Cached, stale: false });
                }
                self.spawn_background_refresh(wallet);
                return Ok(ScoreResponse { score: dampened, source: DataSource::Cached, stale: true });
            }
        }

        let timeout = Duration::from_secs(COMPUTE_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, self.compute(wallet)).await {
            Ok(Ok(score)) => {
                self.inner.store.upsert_score(score.clone()).await?;
                Ok(ScoreResponse { score, source: DataSource::Live, stale: false })
            }
            Ok(Err(err)) => self.fall_back_after_failure(wallet, cached, err).await,
            Err(_elapsed) => self.fall_back_after_failure(wallet, cached, ScoreError::ComputeTimeout).await,
        }
    }

    async fn fall_back_after_failure(
        &self,
        wallet: Address,
        cached: Option<Score>,
        err: ScoreError,
    ) -> Result<ScoreResponse, ScoreError> {
        if let Some(score) = cached {
            tracing::warn!(%wallet, error = %err, "score computation failed, serving stale cache");
            let dampened = self.apply_fraud_dampening(&score).await?;
            return Ok(ScoreResponse { score: dampened, source: DataSource::Cached, stale: true });
        }

        match self.compute_identity_only(wallet).await {
            Ok(partial) => {
                tracing::warn!(%wallet, error = %err, "score computation failed with no cache, serving identity-only partial score");
                if partial.composite > 0 {
                    self.inner.store.upsert_score(partial.clone()).await?;
                }
                Ok(ScoreResponse { score: partial, source: DataSource::Unavailable, stale: false })
            }
            Err(_) => Err(err),
        }
    }

    /// Reapply fraud-report dampening to a cached composite for reports
    /// filed after it was computed, without recomputing the full integrity
    /// multiplier (which would double-penalize indicators already baked
    /// into the cached composite).
    async fn apply_fraud_dampening(&self, score: &Score) -> Result<Score, ScoreError> {
        let reports = self.inner.store.fraud_report_count_since(score.wallet, score.computed_at).await?;
        if reports == 0 {
            return Ok(score.clone());
        }
        let factor = calibration::fraud_dampening_for(reports);
        let mut dampened = score.clone();
        dampened.composite = (score.composite as f64 * factor).round().clamp(0.0, 100.0) as u8;
        Ok(dampened)
    }

    /// Kick off a deduplicated background recompute for `wallet`, unless
    /// one is already in flight or the global concurrency cap is exhausted
    /// — in either case the caller's stale response is simply served as-is.
    fn spawn_background_refresh(&self, wallet: Address) {
        if !self.inner.refreshing.insert(wallet) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = match engine.inner.refresh_permits.try_acquire() {
                Ok(permit) => permit,
                Err(_) => {
                    engine.inner.refreshing.remove(&wallet);
                    return;
                }
            };
            match engine.compute(wallet).await {
                Ok(score) => {
                    if let Err(err) = engine.inner.store.upsert_score(score).await {
                        tracing::warn!(%wallet, error = %err, "background refresh failed to persist score");
                    }
                }
                Err(err) => {
                    tracing::warn!(%wallet, error = %err, "background refresh compute failed");
                }
            }
            engine.inner.refreshing.remove(&wallet);
        });
    }

    /// Run the full pipeline for `wallet`: fetch chain state in parallel,
    /// detect sybil and gaming indicators, score each dimension, and
    /// combine into a composite with an integrity-multiplier penalty
    /// applied.
    async fn compute(&self, wallet: Address) -> Result<Score, ScoreError> {
        let wallet_row = self
            .inner
            .store
            .get_wallet(wallet)
            .await?
            .ok_or_else(|| DetectionError::InsufficientHistory(wallet.to_string()))?;

        let transfers = self.inner.store.get_transfers_for_wallet(wallet, 500).await?;
        let edges = self.inner.store.get_edges_for_wallet(wallet).await?;

        let (native_balance, stablecoin_balance, total_tx_count, rpc_first_seen, basename, code_host_age, code_host_stars) =
            tokio::try_join!(
                self.inner.rpc.native_balance(&wallet),
                self.inner.rpc.stablecoin_balance(&wallet),
                self.inner.rpc.tx_count(&wallet),
                self.inner.rpc.first_seen_at(&wallet),
                self.inner.basename.resolve(&wallet),
                self.inner.code_host.account_age_days(&wallet),
                self.inner.code_host.repo_stars(&wallet),
            )?;
        let basename_resolved = basename.is_some();

        let earliest_first_seen = match rpc_first_seen {
            Some(ts) if ts < wallet_row.first_seen => ts,
            _ => wallet_row.first_seen,
        };
        let wallet_age_days = (Utc::now() - earliest_first_seen).num_days().max(0);

        let ever_drained = native_balance == 0;
        let stats = stats::rollup(wallet, &transfers, &edges, Utc::now(), ever_drained);
        self.inner.store.upsert_wallet_stats(stats.clone()).await?;

        let wallets_created_same_window = self
            .inner
            .store
            .wallets_first_seen_near(earliest_first_seen, COORDINATED_CREATION_WINDOW_SECS, wallet)
            .await?;

        let sybil_evidence =
            SybilEvidence { wallet, edges: &edges, stats: &stats, wallets_created_same_window };
        let sybil_indicators = sybil::detect(&sybil_evidence);

        let gaming_evidence = GamingEvidence { transfers: &transfers };
        let gaming_indicators = gaming::detect(&gaming_evidence);

        let timestamps: Vec<DateTime<Utc>> = transfers.iter().map(|t| t.timestamp).collect();

        let reliability = score_reliability(&ReliabilityInputs {
            wallet_age_days,
            total_tx_count: wallet_row.total_tx_count,
            unique_partners: stats.unique_partners,
        });
        let viability = score_viability(&ViabilityInputs { stats: &stats, native_balance, stablecoin_balance });
        let identity = score_identity(&IdentityInputs {
            basename_resolved,
            code_host_account_age_days: code_host_age,
            code_host_repo_stars: code_host_stars,
        });
        let capability =
            score_capability(&CapabilityInputs { total_tx_count, revenue_30d: stats.inflow_30d });
        let (behaviour, _class) = score_behaviour(&timestamps);

        let (reliability, identity) =
            apply_integrity_caps(reliability, identity, &sybil_indicators, &gaming_indicators);

        let dimensions = Dimensions { reliability, viability, identity, capability, behaviour };
        let weighted = weighted_composite(&dimensions);

        let fraud_reports = self.total_fraud_reports(wallet).await?;
        let integrity_multiplier = integrity::compute_multiplier(&sybil_indicators, &gaming_indicators, fraud_reports);
        let composite = (weighted * integrity_multiplier).round().clamp(0.0, 100.0) as u8;
        let sybil_flag = integrity::should_flag(&sybil_indicators);

        let tier = if wallet_row.total_tx_count < MIN_TX_FOR_SCORING {
            Tier::Unverified
        } else {
            composite_to_tier(composite)
        };

        let confidence = confidence_for(&wallet_row, &stats, basename_resolved);
        let recommendation = recommend(tier, sybil_flag, wallet_row.total_tx_count);

        let raw_snapshot = serde_json::json!({
            "weighted_before_integrity": weighted,
            "unique_partners": stats.unique_partners,
            "wallet_age_days": wallet_age_days,
        });

        let computed_at = Utc::now();
        Ok(Score {
            wallet,
            composite,
            dimensions,
            tier,
            raw_snapshot,
            computed_at,
            expires_at: computed_at + chrono::Duration::seconds(CACHE_TTL_SECS),
            confidence,
            recommendation,
            model_version: MODEL_VERSION.to_string(),
            sybil_flag,
            sybil_indicators,
            gaming_indicators,
            integrity_multiplier,
        })
    }

    /// A reduced-confidence score computed from store-only evidence, used
    /// when the live RPC path failed or timed out and no cache exists to
    /// fall back to. Skips every RPC-derived input (balances, tx count,
    /// basename, code-host linkage) rather than guessing at them.
    async fn compute_identity_only(&self, wallet: Address) -> Result<Score, ScoreError> {
        let wallet_row = self
            .inner
            .store
            .get_wallet(wallet)
            .await?
            .ok_or_else(|| DetectionError::InsufficientHistory(wallet.to_string()))?;

        let stats = self.inner.store.get_wallet_stats(wallet).await?.unwrap_or_else(|| default_wallet_stats(wallet));
        let transfers = self.inner.store.get_transfers_for_wallet(wallet, 500).await?;
        let edges = self.inner.store.get_edges_for_wallet(wallet).await?;

        let wallet_age_days = (Utc::now() - wallet_row.first_seen).num_days().max(0);

        let sybil_evidence =
            SybilEvidence { wallet, edges: &edges, stats: &stats, wallets_created_same_window: 0 };
        let sybil_indicators = sybil::detect(&sybil_evidence);
        let gaming_evidence = GamingEvidence { transfers: &transfers };
        let gaming_indicators = gaming::detect(&gaming_evidence);
        let timestamps: Vec<DateTime<Utc>> = transfers.iter().map(|t| t.timestamp).collect();

        let reliability = score_reliability(&ReliabilityInputs {
            wallet_age_days,
            total_tx_count: wallet_row.total_tx_count,
            unique_partners: stats.unique_partners,
        });
        let viability = score_viability(&ViabilityInputs { stats: &stats, native_balance: 0, stablecoin_balance: 0 });
        let identity =
            score_identity(&IdentityInputs { basename_resolved: false, code_host_account_age_days: None, code_host_repo_stars: None });
        let capability =
            score_capability(&CapabilityInputs { total_tx_count: wallet_row.total_tx_count, revenue_30d: stats.inflow_30d });
        let (behaviour, _class) = score_behaviour(&timestamps);

        let (reliability, identity) =
            apply_integrity_caps(reliability, identity, &sybil_indicators, &gaming_indicators);

        let dimensions = Dimensions { reliability, viability, identity, capability, behaviour };
        let weighted = weighted_composite(&dimensions);

        let integrity_multiplier = integrity::compute_multiplier(&sybil_indicators, &gaming_indicators, 0);
        let composite = (weighted * integrity_multiplier).round().clamp(0.0, 100.0) as u8;
        let sybil_flag = integrity::should_flag(&sybil_indicators);

        let computed_at = Utc::now();
        Ok(Score {
            wallet,
            composite,
            dimensions,
            tier: Tier::Unverified,
            raw_snapshot: serde_json::json!({"partial": true, "reason": "rpc_unavailable"}),
            computed_at,
            expires_at: computed_at + chrono::Duration::seconds(CACHE_TTL_SECS),
            confidence: 0.0,
            recommendation: Recommendation::RpcUnavailable,
            model_version: MODEL_VERSION.to_string(),
            sybil_flag,
            sybil_indicators,
            gaming_indicators,
            integrity_multiplier,
        })
    }

    async fn total_fraud_reports(&self, wallet: Address) -> Result<u32, ScoreError> {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now);
        Ok(self.inner.store.fraud_report_count_since(wallet, epoch).await?)
    }
}

fn default_wallet_stats(wallet: Address) -> WalletStats {
    WalletStats {
        address: wallet,
        unique_partners: 0,
        inflow_24h: 0,
        outflow_24h: 0,
        inflow_7d: 0,
        outflow_7d: 0,
        inflow_30d: 0,
        outflow_30d: 0,
        income_burn_ratio: 0.0,
        trend: TrendDirection::Stable,
        ever_drained: false,
    }
}

/// Apply fired sybil indicators' per-dimension caps and gaming indicators'
/// flat Reliability penalty, before either dimension is weighted into the
/// composite.
fn apply_integrity_caps(
    mut reliability: DimensionScore,
    mut identity: DimensionScore,
    sybil_indicators: &[trust_core::types::SybilIndicator],
    gaming_indicators: &[trust_core::types::GamingIndicator],
) -> (DimensionScore, DimensionScore) {
    let caps = integrity::dimension_caps(sybil_indicators);
    let gaming_penalty = integrity::gaming_reliability_penalty(gaming_indicators).max(0) as u8;

    reliability.score = reliability.score.saturating_sub(gaming_penalty);
    if let Some(cap) = caps.reliability {
        reliability.score = reliability.score.min(cap);
    }
    if let Some(cap) = caps.identity {
        identity.score = identity.score.min(cap);
    }
    (reliability, identity)
}

fn weighted_composite(dimensions: &Dimensions) -> f64 {
    dimensions.reliability.score as f64 * WEIGHT_RELIABILITY
        + dimensions.viability.score as f64 * WEIGHT_VIABILITY
        + dimensions.identity.score as f64 * WEIGHT_IDENTITY
        + dimensions.capability.score as f64 * WEIGHT_CAPABILITY
        + dimensions.behaviour.score as f64 * WEIGHT_BEHAVIOUR
}

fn composite_to_tier(composite: u8) -> Tier {
    if composite >= TIER_ELITE_MIN {
        Tier::Elite
    } else if composite >= TIER_TRUSTED_MIN {
        Tier::Trusted
    } else if composite >= TIER_ESTABLISHED_MIN {
        Tier::Established
    } else if composite >= TIER_EMERGING_MIN {
        Tier::Emerging
    } else {
        Tier::Unverified
    }
}

fn confidence_for(wallet: &trust_core::types::Wallet, stats: &WalletStats, basename_resolved: bool) -> f64 {
    let history_component = (wallet.total_tx_count as f64 / 100.0).min(1.0) * 0.5;
    let diversity_component = (stats.unique_partners as f64 / 20.0).min(1.0) * 0.3;
    let identity_component = if basename_resolved { 0.2 } else { 0.0 };
    (history_component + diversity_component + identity_component).clamp(0.0, 1.0)
}

fn recommend(tier: Tier, sybil_flag: bool, total_tx_count: u64) -> Recommendation {
    if total_tx_count < MIN_TX_FOR_SCORING {
        return Recommendation::InsufficientHistory;
    }
    if sybil_flag {
        return Recommendation::FlaggedForReview;
    }
    match tier {
        Tier::Elite | Tier::Trusted => Recommendation::Proceed,
        Tier::Established => Recommendation::ProceedWithCaution,
        Tier::Emerging => Recommendation::ProceedWithCaution,
        Tier::Unverified => Recommendation::HighRisk,
    }
}
