//! The five scored dimensions (§4.4): Reliability, Viability, Identity,
//! Capability, Behaviour. Each scorer is a pure function over a small
//! input struct so it can be unit-tested without touching the store.

use chrono::{DateTime, Timelike, Utc};
use trust_core::types::{BehaviourClass, DimensionScore, SignalBreakdown, TrendDirection, WalletStats};

use crate::breakpoint::{clamp_to_score, interpolate, Breakpoint};

fn signal(name: &str, points: f64) -> SignalBreakdown {
    SignalBreakdown { signal: name.to_string(), points: points.round() as i32 }
}

fn dimension_score(signals: Vec<(&str, f64)>) -> DimensionScore {
    let total: f64 = signals.iter().map(|(_, p)| *p).sum();
    DimensionScore {
        score: clamp_to_score(total),
        data: signals.into_iter().map(|(name, points)| signal(name, points)).collect(),
    }
}

// ---------------------------------------------------------------------
// Reliability (weight 0.30): track record length and consistency.
// ---------------------------------------------------------------------

pub struct ReliabilityInputs {
    pub wallet_age_days: i64,
    pub total_tx_count: u64,
    pub unique_partners: u64,
}

const AGE_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(7.0, 15.0),
    Breakpoint::new(30.0, 35.0),
    Breakpoint::new(180.0, 60.0),
    Breakpoint::new(365.0, 100.0),
];

const TX_COUNT_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(5.0, 10.0),
    Breakpoint::new(50.0, 25.0),
    Breakpoint::new(500.0, 40.0),
];

pub fn score_reliability(inputs: &ReliabilityInputs) -> DimensionScore {
    let age_points = interpolate(AGE_TABLE, inputs.wallet_age_days as f64) * 0.6;
    let tx_points = interpolate(TX_COUNT_TABLE, inputs.total_tx_count as f64) * 0.4;
    let partner_bonus = (inputs.unique_partners.min(20) as f64) * 0.5;
    dimension_score(vec![
        ("wallet_age", age_points),
        ("tx_history", tx_points),
        ("partner_diversity_bonus", partner_bonus),
    ])
}

// ---------------------------------------------------------------------
// Viability (weight 0.25): is the wallet economically active and solvent.
// ---------------------------------------------------------------------

pub struct ViabilityInputs<'a> {
    pub stats: &'a WalletStats,
    pub native_balance: u64,
    pub stablecoin_balance: u64,
}

const INCOME_BURN_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(0.5, 30.0),
    Breakpoint::new(1.0, 60.0),
    Breakpoint::new(3.0, 90.0),
    Breakpoint::new(10.0, 100.0),
];

const VOLUME_30D_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(1_000_000.0, 10.0),
    Breakpoint::new(100_000_000.0, 25.0),
    Breakpoint::new(10_000_000_000.0, 40.0),
];

const NATIVE_BALANCE_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(10_000.0, 20.0),
    Breakpoint::new(1_000_000.0, 60.0),
    Breakpoint::new(100_000_000.0, 100.0),
];

const STABLECOIN_BALANCE_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(1_000_000.0, 25.0),
    Breakpoint::new(100_000_000.0, 65.0),
    Breakpoint::new(10_000_000_000.0, 100.0),
];

/// Penalty applied once a wallet's native balance has ever been observed
/// to bottom out at zero, regardless of how it's recovered since.
const EVER_DRAINED_PENALTY: f64 = -15.0;

pub fn score_viability(inputs: &ViabilityInputs) -> DimensionScore {
    let stats = inputs.stats;
    let ratio_points = interpolate(INCOME_BURN_TABLE, stats.income_burn_ratio) * 0.45;
    let volume_points = interpolate(VOLUME_30D_TABLE, (stats.inflow_30d + stats.outflow_30d) as f64) * 0.25;
    let native_points = interpolate(NATIVE_BALANCE_TABLE, inputs.native_balance as f64) * 0.15;
    let stable_points = interpolate(STABLECOIN_BALANCE_TABLE, inputs.stablecoin_balance as f64) * 0.15;
    let trend_points = match stats.trend {
        TrendDirection::Rising => 10.0,
        TrendDirection::Stable => 5.0,
        TrendDirection::Declining => -5.0,
        TrendDirection::Freefall => -15.0,
    };
    let drained_penalty = if stats.ever_drained { EVER_DRAINED_PENALTY } else { 0.0 };
    dimension_score(vec![
        ("income_burn_ratio", ratio_points),
        ("rolling_volume", volume_points),
        ("native_balance", native_points),
        ("stablecoin_balance", stable_points),
        ("trend", trend_points),
        ("ever_drained", drained_penalty),
    ])
}

// ---------------------------------------------------------------------
// Identity (weight 0.20): linkage to a persistent, verifiable identity.
// ---------------------------------------------------------------------

pub struct IdentityInputs {
    pub basename_resolved: bool,
    pub code_host_account_age_days: Option<u32>,
    pub code_host_repo_stars: Option<u32>,
}

const CODE_HOST_AGE_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(30.0, 20.0),
    Breakpoint::new(365.0, 45.0),
    Breakpoint::new(1825.0, 60.0),
];

const REPO_STARS_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(10.0, 10.0),
    Breakpoint::new(100.0, 20.0),
    Breakpoint::new(1000.0, 25.0),
];

pub fn score_identity(inputs: &IdentityInputs) -> DimensionScore {
    let basename_points = if inputs.basename_resolved { 40.0 } else { 0.0 };
    let code_host_points = inputs
        .code_host_account_age_days
        .map(|age| interpolate(CODE_HOST_AGE_TABLE, age as f64))
        .unwrap_or(0.0);
    let stars_points = inputs
        .code_host_repo_stars
        .map(|stars| interpolate(REPO_STARS_TABLE, stars as f64))
        .unwrap_or(0.0);
    dimension_score(vec![
        ("basename_linked", basename_points),
        ("code_host_account_age", code_host_points),
        ("code_host_repo_stars", stars_points),
    ])
}

// ---------------------------------------------------------------------
// Capability (weight 0.10): demonstrated capacity to run micro-payment
// services, estimated from transaction volume when no code-host linkage
// narrows it further.
// ---------------------------------------------------------------------

pub struct CapabilityInputs {
    /// Lifetime outbound transaction count, used to bucket-estimate the
    /// number of distinct micro-payment services this wallet operates.
    pub total_tx_count: u64,
    /// 30-day inflow, standing in for service revenue.
    pub revenue_30d: u64,
}

const ACTIVE_SERVICES_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(10.0, 20.0),
    Breakpoint::new(100.0, 45.0),
    Breakpoint::new(1_000.0, 70.0),
];

const REVENUE_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(1_000_000.0, 15.0),
    Breakpoint::new(100_000_000.0, 30.0),
    Breakpoint::new(10_000_000_000.0, 30.0),
];

pub fn score_capability(inputs: &CapabilityInputs) -> DimensionScore {
    let services_points = interpolate(ACTIVE_SERVICES_TABLE, inputs.total_tx_count as f64);
    let revenue_points = interpolate(REVENUE_TABLE, inputs.revenue_30d as f64);
    dimension_score(vec![
        ("active_services_estimate", services_points),
        ("revenue", revenue_points),
    ])
}

// ---------------------------------------------------------------------
// Behaviour (weight 0.15): the shape of a wallet's transfer cadence —
// organic human activity reads as irregular and spread across hours;
// scripted/automated activity reads as regular and clustered.
// ---------------------------------------------------------------------

/// Below this many ordered timestamps there isn't enough signal to say
/// anything about cadence; the dimension falls back to a neutral score.
const MIN_TIMESTAMPS_FOR_FULL_SIGNAL: usize = 5;
const INSUFFICIENT_HISTORY_BASELINE: f64 = 50.0;

const INTER_ARRIVAL_CV_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 20.0),
    Breakpoint::new(0.3, 50.0),
    Breakpoint::new(0.8, 80.0),
    Breakpoint::new(2.0, 100.0),
];

const HOUR_ENTROPY_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 0.0),
    Breakpoint::new(0.5, 40.0),
    Breakpoint::new(0.9, 80.0),
    Breakpoint::new(1.0, 100.0),
];

const MAX_GAP_RATIO_TABLE: &[Breakpoint] = &[
    Breakpoint::new(0.0, 100.0),
    Breakpoint::new(0.5, 70.0),
    Breakpoint::new(0.8, 40.0),
    Breakpoint::new(0.95, 10.0),
];

fn organic_signal_points(timestamps: &[DateTime<Utc>]) -> f64 {
    let mut ordered: Vec<DateTime<Utc>> = timestamps.to_vec();
    ordered.sort();

    let gaps: Vec<f64> = ordered.windows(2).map(|w| (w[1] - w[0]).num_seconds() as f64).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let cv = if mean <= 0.0 {
        0.0
    } else {
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
        variance.sqrt() / mean
    };

    let mut hour_counts = [0u32; 24];
    for ts in &ordered {
        hour_counts[ts.hour() as usize] += 1;
    }
    let n = ordered.len() as f64;
    let entropy: f64 = hour_counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();
    let normalized_entropy = entropy / (24f64).log2();

    let span = (*ordered.last().unwrap() - *ordered.first().unwrap()).num_seconds() as f64;
    let max_gap = gaps.iter().cloned().fold(0.0, f64::max);
    let max_gap_ratio = if span <= 0.0 { 0.0 } else { max_gap / span };

    let cv_points = interpolate(INTER_ARRIVAL_CV_TABLE, cv) * 0.40;
    let entropy_points = interpolate(HOUR_ENTROPY_TABLE, normalized_entropy) * 0.35;
    let gap_points = interpolate(MAX_GAP_RATIO_TABLE, max_gap_ratio) * 0.25;
    cv_points + entropy_points + gap_points
}

fn classify(score: u8) -> BehaviourClass {
    if score >= 70 {
        BehaviourClass::Organic
    } else if score >= 45 {
        BehaviourClass::Mixed
    } else if score >= 25 {
        BehaviourClass::Automated
    } else {
        BehaviourClass::Suspicious
    }
}

/// Score a wallet's transfer cadence from its ordered transfer timestamps
/// (order doesn't matter on input; this sorts internally).
pub fn score_behaviour(timestamps: &[DateTime<Utc>]) -> (DimensionScore, BehaviourClass) {
    if timestamps.len() < 2 {
        let score = dimension_score(vec![("insufficient_history", INSUFFICIENT_HISTORY_BASELINE)]);
        let class = classify(score.score);
        return (score, class);
    }

    let full_points = organic_signal_points(timestamps);
    let points = if timestamps.len() >= MIN_TIMESTAMPS_FOR_FULL_SIGNAL {
        dimension_score(vec![("cadence", full_points)])
    } else {
        let blend = (timestamps.len() as f64 - 1.0) / (MIN_TIMESTAMPS_FOR_FULL_SIGNAL as f64 - 1.0);
        let blended = INSUFFICIENT_HISTORY_BASELINE * (1.0 - blend) + full_points * blend;
        dimension_score(vec![("cadence_partial", blended)])
    };
    let class = classify(points.score);
    (points, class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats(unique_partners: u64, income_burn_ratio: f64, trend: TrendDirection) -> WalletStats {
        WalletStats {
            address: trust_core::types::Address::from_bytes([1; 20]),
            unique_partners,
            inflow_24h: 0,
            outflow_24h: 0,
            inflow_7d: 0,
            outflow_7d: 0,
            inflow_30d: 1_000_000,
            outflow_30d: 500_000,
            income_burn_ratio,
            trend,
            ever_drained: false,
        }
    }

    #[test]
    fn reliability_increases_with_age() {
        let young = score_reliability(&ReliabilityInputs { wallet_age_days: 1, total_tx_count: 0, unique_partners: 0 });
        let old = score_reliability(&ReliabilityInputs { wallet_age_days: 400, total_tx_count: 100, unique_partners: 5 });
        assert!(old.score > young.score);
    }

    #[test]
    fn reliability_never_exceeds_100() {
        let maxed = score_reliability(&ReliabilityInputs { wallet_age_days: 10_000, total_tx_count: 100_000, unique_partners: 1_000 });
        assert!(maxed.score <= 100);
    }

    #[test]
    fn viability_rewards_rising_trend() {
        let rising = score_viability(&ViabilityInputs {
            stats: &stats(3, 2.0, TrendDirection::Rising),
            native_balance: 1_000_000,
            stablecoin_balance: 1_000_000,
        });
        let freefall = score_viability(&ViabilityInputs {
            stats: &stats(3, 2.0, TrendDirection::Freefall),
            native_balance: 1_000_000,
            stablecoin_balance: 1_000_000,
        });
        assert!(rising.score > freefall.score);
    }

    #[test]
    fn viability_penalizes_ever_drained_wallets() {
        let mut drained_stats = stats(3, 2.0, TrendDirection::Stable);
        drained_stats.ever_drained = true;
        let clean = score_viability(&ViabilityInputs {
            stats: &stats(3, 2.0, TrendDirection::Stable),
            native_balance: 1_000_000,
            stablecoin_balance: 1_000_000,
        });
        let drained = score_viability(&ViabilityInputs {
            stats: &drained_stats,
            native_balance: 1_000_000,
            stablecoin_balance: 1_000_000,
        });
        assert!(drained.score < clean.score);
    }

    #[test]
    fn identity_rewards_basename_and_code_host() {
        let none = score_identity(&IdentityInputs {
            basename_resolved: false,
            code_host_account_age_days: None,
            code_host_repo_stars: None,
        });
        let both = score_identity(&IdentityInputs {
            basename_resolved: true,
            code_host_account_age_days: Some(400),
            code_host_repo_stars: Some(50),
        });
        assert!(both.score > none.score);
        assert_eq!(none.score, 0);
    }

    #[test]
    fn capability_scales_with_tx_count_and_revenue() {
        let none = score_capability(&CapabilityInputs { total_tx_count: 0, revenue_30d: 0 });
        let many = score_capability(&CapabilityInputs { total_tx_count: 1_000, revenue_30d: 10_000_000_000 });
        assert_eq!(none.score, 0);
        assert_eq!(many.score, 100);
    }

    fn evenly_spread_timestamps(n: usize) -> Vec<DateTime<Utc>> {
        let base = Utc::now();
        (0..n)
            .map(|i| base - Duration::hours((i as i64) * (7 + (i % 5) as i64)))
            .collect()
    }

    fn tight_cron_timestamps(n: usize) -> Vec<DateTime<Utc>> {
        let base = Utc::now();
        (0..n).map(|i| base - Duration::seconds((i as i64) * 3600)).collect()
    }

    #[test]
    fn behaviour_under_two_timestamps_returns_insufficient_baseline() {
        let (score, class) = score_behaviour(&[]);
        assert_eq!(score.score, 50);
        assert_eq!(class, BehaviourClass::Mixed);

        let (score, _) = score_behaviour(&[Utc::now()]);
        assert_eq!(score.score, 50);
    }

    #[test]
    fn behaviour_rewards_irregular_varied_hour_cadence_over_regular_cron() {
        let organic = evenly_spread_timestamps(12);
        let automated = tight_cron_timestamps(12);
        let (organic_score, _) = score_behaviour(&organic);
        let (automated_score, _) = score_behaviour(&automated);
        assert!(organic_score.score >= automated_score.score);
    }

    #[test]
    fn behaviour_blends_toward_baseline_under_five_timestamps() {
        let few = tight_cron_timestamps(3);
        let many = tight_cron_timestamps(20);
        let (few_score, _) = score_behaviour(&few);
        let (many_score, _) = score_behaviour(&many);
        // A sparse history should sit closer to the neutral baseline than
        // a longer one exhibiting the same regular cadence.
        assert!((few_score.score as i32 - 50).abs() <= (many_score.score as i32 - 50).abs() + 1);
    }
}
