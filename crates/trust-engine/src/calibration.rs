//! Adaptive calibration: drift the dimension weights toward what recent
//! outcomes actually validated, dampened when a wallet was later reported
//! for fraud.
//!
//! Weights themselves stay in [`trust_core::constants`] as the model's
//! documented defaults; calibration produces a small per-cycle *delta* on
//! top of them that the engine would apply on its next read. Drift is
//! capped per cycle and in total so a bad batch of outcomes can't swing
//! the model sharply in one pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trust_core::constants::{
    CALIBRATION_BREAKPOINT_SHIFT_CAP, CALIBRATION_DRIFT_CAP, CALIBRATION_DRIFT_PER_CYCLE,
    CALIBRATION_MATURITY_BASELINE_MEDIAN, CALIBRATION_MIN_NEGATIVE_OUTCOMES,
    CALIBRATION_MIN_OUTCOMES, CALIBRATION_MIN_POPULATION, FRAUD_REPORT_DAMPENING,
    TIER_ELITE_MIN, TIER_EMERGING_MIN, TIER_ESTABLISHED_MIN, TIER_TRUSTED_MIN,
};
use trust_core::error::StoreError;
use trust_core::types::{Address, Dimensions, OutcomeType};
use trust_store::AsyncDb;

/// Accumulated, clamped adjustment to the five dimension weights. Positive
/// means "reliability mattered more than the static weight assumed."
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightDrift {
    pub reliability: f64,
    pub viability: f64,
    pub identity: f64,
    pub capability: f64,
    pub behaviour: f64,
}

impl WeightDrift {
    fn clamp_all(self) -> Self {
        let clamp = |v: f64| v.clamp(-CALIBRATION_DRIFT_CAP, CALIBRATION_DRIFT_CAP);
        Self {
            reliability: clamp(self.reliability),
            viability: clamp(self.viability),
            identity: clamp(self.identity),
            capability: clamp(self.capability),
            behaviour: clamp(self.behaviour),
        }
    }
}

/// Outcome-to-signal contribution: successful transactions reward the
/// reliability and viability dimensions; fraud reports push weight toward
/// identity and behaviour instead, since those are what would have caught
/// it, and are dampened by [`FRAUD_REPORT_DAMPENING`] to avoid overfitting
/// to a single report.
fn contribution(outcome_type: OutcomeType) -> WeightDrift {
    match outcome_type {
        OutcomeType::SuccessfulTx => WeightDrift { reliability: 1.0, viability: 0.5, ..Default::default() },
        OutcomeType::MultipleSuccessfulTx => WeightDrift { reliability: 1.5, viability: 1.0, behaviour: 0.5, ..Default::default() },
        OutcomeType::FraudReport => WeightDrift {
            identity: FRAUD_REPORT_DAMPENING,
            behaviour: FRAUD_REPORT_DAMPENING,
            reliability: -FRAUD_REPORT_DAMPENING,
            ..Default::default()
        },
        OutcomeType::NoActivity => WeightDrift::default(),
    }
}

/// Run one calibration cycle over outcomes observed since `since`,
/// producing the weight drift to apply on top of the static defaults.
/// Gated by a sample-size floor on both total outcomes and negative
/// outcomes (fraud reports, no-activity) so a handful of early results
/// can't swing the model (§4.8).
pub async fn run_cycle(store: &AsyncDb, since: DateTime<Utc>) -> Result<WeightDrift, StoreError> {
    let outcomes = store.outcomes_since(since).await?;
    if outcomes.is_empty() {
        return Ok(WeightDrift::default());
    }
    let negatives = outcomes
        .iter()
        .filter(|o| matches!(o.outcome_type, OutcomeType::FraudReport | OutcomeType::NoActivity))
        .count();
    if outcomes.len() < CALIBRATION_MIN_OUTCOMES || negatives < CALIBRATION_MIN_NEGATIVE_OUTCOMES {
        return Ok(WeightDrift::default());
    }

    let mut total = WeightDrift::default();
    for outcome in &outcomes {
        let c = contribution(outcome.outcome_type);
        total.reliability += c.reliability;
        total.viability += c.viability;
        total.identity += c.identity;
        total.capability += c.capability;
        total.behaviour += c.behaviour;
    }

    let n = outcomes.len() as f64;
    let scale = CALIBRATION_DRIFT_PER_CYCLE / n.max(1.0);
    let scaled = WeightDrift {
        reliability: total.reliability * scale,
        viability: total.viability * scale,
        identity: total.identity * scale,
        capability: total.capability * scale,
        behaviour: total.behaviour * scale,
    };
    Ok(scaled.clamp_all())
}

/// Dampen future calibration contributions from a wallet with a confirmed
/// fraud report against it, returning the multiplier to apply to any of
/// its future outcome contributions.
pub fn fraud_dampening_for(reports_against: u32) -> f64 {
    if reports_against == 0 {
        1.0
    } else {
        FRAUD_REPORT_DAMPENING.powi(reports_against as i32)
    }
}

/// Mean, stdev, and a handful of percentiles over one dimension's scored
/// population, used both to report distribution health and to decide
/// whether breakpoint tables are allowed to shift (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub mean: f64,
    pub stdev: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

fn dimension_stats(values: &mut [f64]) -> DimensionStats {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let percentile = |p: f64| -> f64 {
        let idx = ((p * (n - 1) as f64).round() as usize).min(n - 1);
        values[idx]
    };
    DimensionStats {
        mean,
        stdev: variance.sqrt(),
        p10: percentile(0.10),
        p25: percentile(0.25),
        p50: percentile(0.50),
        p75: percentile(0.75),
        p90: percentile(0.90),
    }
}

/// Per-dimension and composite distribution statistics across every
/// currently scored wallet, gated by [`CALIBRATION_MIN_POPULATION`] so
/// early-launch noise doesn't drive calibration decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub sample_size: usize,
    pub composite: DimensionStats,
    pub reliability: DimensionStats,
    pub viability: DimensionStats,
    pub identity: DimensionStats,
    pub capability: DimensionStats,
    pub behaviour: DimensionStats,
}

impl PopulationStats {
    /// Ratio, capped at [`CALIBRATION_BREAKPOINT_SHIFT_CAP`], by which
    /// breakpoint tables are allowed to shift upward this cycle. Zero
    /// unless the population has matured past the composite-median
    /// baseline.
    pub fn breakpoint_shift_ratio(&self) -> f64 {
        if self.composite.p50 <= CALIBRATION_MATURITY_BASELINE_MEDIAN {
            return 0.0;
        }
        let overshoot = (self.composite.p50 - CALIBRATION_MATURITY_BASELINE_MEDIAN) / 100.0;
        overshoot.min(CALIBRATION_BREAKPOINT_SHIFT_CAP)
    }
}

/// Compute population statistics from every current score, or `None` if
/// the scored population hasn't yet cleared the sample-size floor.
pub async fn compute_population_stats(store: &AsyncDb) -> Result<Option<PopulationStats>, StoreError> {
    let snapshot = store.calibration_snapshot().await?;
    if snapshot.len() < CALIBRATION_MIN_POPULATION {
        return Ok(None);
    }

    let mut composite: Vec<f64> = Vec::with_capacity(snapshot.len());
    let mut reliability: Vec<f64> = Vec::with_capacity(snapshot.len());
    let mut viability: Vec<f64> = Vec::with_capacity(snapshot.len());
    let mut identity: Vec<f64> = Vec::with_capacity(snapshot.len());
    let mut capability: Vec<f64> = Vec::with_capacity(snapshot.len());
    let mut behaviour: Vec<f64> = Vec::with_capacity(snapshot.len());

    for (score, dims) in &snapshot {
        composite.push(*score as f64);
        reliability.push(dims.reliability.score as f64);
        viability.push(dims.viability.score as f64);
        identity.push(dims.identity.score as f64);
        capability.push(dims.capability.score as f64);
        behaviour.push(dims.behaviour.score as f64);
    }

    Ok(Some(PopulationStats {
        sample_size: snapshot.len(),
        composite: dimension_stats(&mut composite),
        reliability: dimension_stats(&mut reliability),
        viability: dimension_stats(&mut viability),
        identity: dimension_stats(&mut identity),
        capability: dimension_stats(&mut capability),
        behaviour: dimension_stats(&mut behaviour),
    }))
}

/// Composite-score cut points for each tier, calibrated so the scored
/// population's distribution maps to the target tier proportions (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub elite: u8,
    pub trusted: u8,
    pub established: u8,
    pub emerging: u8,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            elite: TIER_ELITE_MIN,
            trusted: TIER_TRUSTED_MIN,
            established: TIER_ESTABLISHED_MIN,
            emerging: TIER_EMERGING_MIN,
        }
    }
}

/// Derive calibrated tier cut points from the composite-score percentiles.
/// `TIER_TARGET_PROPORTION_*` name the desired tier shares (elite,
/// trusted, established, emerging, with the remainder unverified); their
/// cumulative cut points land close enough to the p90/p75/p50/p25 points
/// already captured in [`DimensionStats`] that no extra percentile needs
/// computing for this fit. Thresholds never fall below the static
/// defaults, so calibration can only make tiers harder to reach, never
/// easier, as the population matures.
pub fn calibrate_tier_thresholds(stats: &PopulationStats) -> TierThresholds {
    debug_assert!(
        (trust_core::constants::TIER_TARGET_PROPORTION_ELITE
            + trust_core::constants::TIER_TARGET_PROPORTION_TRUSTED
            + trust_core::constants::TIER_TARGET_PROPORTION_ESTABLISHED
            + trust_core::constants::TIER_TARGET_PROPORTION_EMERGING)
            < 1.0
    );
    let defaults = TierThresholds::default();
    let round_clamped = |v: f64, floor: u8| (v.round() as i64).clamp(floor as i64, 100) as u8;

    let elite = round_clamped(stats.composite.p90, defaults.elite);
    let trusted = round_clamped(stats.composite.p75, defaults.trusted).min(elite.saturating_sub(1));
    let established =
        round_clamped(stats.composite.p50, defaults.established).min(trusted.saturating_sub(1));
    let emerging =
        round_clamped(stats.composite.p25, defaults.emerging).min(established.saturating_sub(1));

    TierThresholds { elite, trusted, established, emerging }
}
