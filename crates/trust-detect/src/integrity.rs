//! Combines fired sybil and gaming indicators into per-dimension caps and
//! a single integrity multiplier applied to the composite score.
//!
//! Each sybil indicator carries its own cap on one or two dimensions (so a
//! wallet can't buy back points in a dimension its own evidence
//! contradicts) and its own multiplicative factor; gaming indicators carry
//! only a factor plus a flat Reliability penalty applied earlier, before
//! weighting. The combined multiplier also folds in fraud-report
//! dampening as of the computation, so a wallet with confirmed reports
//! against it never looks fully clean again without new positive
//! evidence. The result is clamped to
//! `[INTEGRITY_MULTIPLIER_FLOOR, INTEGRITY_MULTIPLIER_CEILING]` so
//! detection can suppress a score sharply but never erase it outright
//! (§4.3 invariant — the floor keeps the multiplier legible as a penalty
//! rather than a hard ban, which belongs to a different system).

use trust_core::constants::{
    FRAUD_REPORT_DAMPENING, GAMING_RELIABILITY_PENALTY, INTEGRITY_MULTIPLIER_CEILING,
    INTEGRITY_MULTIPLIER_FLOOR,
};
use trust_core::types::{GamingIndicator, SybilIndicator};

/// Per-dimension ceilings a fired sybil indicator imposes, independent of
/// the multiplicative factor. `None` means the indicator caps no
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DimensionCaps {
    pub reliability: Option<u8>,
    pub identity: Option<u8>,
}

impl DimensionCaps {
    fn merge(self, other: Self) -> Self {
        Self {
            reliability: tighter(self.reliability, other.reliability),
            identity: tighter(self.identity, other.identity),
        }
    }
}

fn tighter(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

struct IndicatorSpec {
    cap: DimensionCaps,
    factor: f64,
}

fn sybil_spec(indicator: SybilIndicator) -> IndicatorSpec {
    use SybilIndicator::*;
    match indicator {
        TightCluster => IndicatorSpec {
            cap: DimensionCaps { reliability: Some(40), identity: None },
            factor: 0.55,
        },
        SymmetricTransactions => IndicatorSpec { cap: DimensionCaps::default(), factor: 0.60 },
        WashTrading => IndicatorSpec {
            cap: DimensionCaps { reliability: Some(30), identity: None },
            factor: 0.50,
        },
        CoordinatedCreation => IndicatorSpec {
            cap: DimensionCaps { reliability: None, identity: Some(35) },
            factor: 0.65,
        },
        FundedByTopPartner => IndicatorSpec {
            cap: DimensionCaps { reliability: Some(50), identity: Some(30) },
            factor: 0.60,
        },
        SingleSourceFunding => IndicatorSpec {
            cap: DimensionCaps { reliability: Some(50), identity: Some(30) },
            factor: 0.75,
        },
        SinglePartner => IndicatorSpec { cap: DimensionCaps::default(), factor: 0.75 },
        VolumeWithoutDiversity => IndicatorSpec { cap: DimensionCaps::default(), factor: 0.80 },
    }
}

/// Gaming indicators don't cap a dimension outright (the flat Reliability
/// subtraction in [`gaming_reliability_penalty`] already does that work)
/// but each still dents the integrity multiplier.
fn gaming_factor(indicator: GamingIndicator) -> f64 {
    use GamingIndicator::*;
    match indicator {
        BalanceWindowDressing => 0.85,
        BurstAndStop => 0.80,
        NonceInflation => 0.80,
        RevenueRecycling => 0.85,
    }
}

/// Combined per-dimension caps from every fired sybil indicator, to be
/// applied as `dim = min(dim, cap)` before dimension weighting.
pub fn dimension_caps(sybil: &[SybilIndicator]) -> DimensionCaps {
    sybil.iter().map(|i| sybil_spec(*i).cap).fold(DimensionCaps::default(), DimensionCaps::merge)
}

/// Flat Reliability-point penalty from confirmed gaming indicators, to be
/// applied as `dim = max(0, dim - penalty)` before dimension weighting.
pub fn gaming_reliability_penalty(gaming: &[GamingIndicator]) -> i32 {
    gaming.len() as i32 * GAMING_RELIABILITY_PENALTY
}

/// The combined integrity multiplier: the product of every fired
/// indicator's own factor, times `FRAUD_REPORT_DAMPENING` once per
/// confirmed fraud report against the wallet as of this computation
/// (§4.5 step i).
pub fn compute_multiplier(
    sybil: &[SybilIndicator],
    gaming: &[GamingIndicator],
    fraud_reports: u32,
) -> f64 {
    let sybil_product: f64 = sybil.iter().map(|i| sybil_spec(*i).factor).product();
    let gaming_product: f64 = gaming.iter().map(|i| gaming_factor(*i)).product();
    let fraud_factor = FRAUD_REPORT_DAMPENING.powi(fraud_reports as i32);
    (sybil_product * gaming_product * fraud_factor)
        .clamp(INTEGRITY_MULTIPLIER_FLOOR, INTEGRITY_MULTIPLIER_CEILING)
}

/// Whether the fired sybil indicator set is severe enough to raise the
/// wallet's `sybil_flag` on its [`trust_core::types::Score`].
pub fn should_flag(sybil: &[SybilIndicator]) -> bool {
    !sybil.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn no_indicators_gives_full_multiplier() {
        assert_eq!(compute_multiplier(&[], &[], 0), 1.0);
    }

    #[test]
    fn tight_cluster_alone_applies_its_own_factor() {
        let m = compute_multiplier(&[SybilIndicator::TightCluster], &[], 0);
        assert!((m - 0.55).abs() < 1e-9);
    }

    #[test]
    fn fraud_reports_dampen_multiplicatively() {
        let m = compute_multiplier(&[], &[], 2);
        assert!((m - FRAUD_REPORT_DAMPENING.powi(2)).abs() < 1e-9);
    }

    #[test]
    fn many_indicators_floor_at_minimum() {
        let sybil = vec![
            SybilIndicator::TightCluster,
            SybilIndicator::SymmetricTransactions,
            SybilIndicator::WashTrading,
            SybilIndicator::CoordinatedCreation,
            SybilIndicator::SinglePartner,
        ];
        let m = compute_multiplier(&sybil, &[], 0);
        assert_eq!(m, INTEGRITY_MULTIPLIER_FLOOR);
    }

    #[test]
    fn flag_requires_at_least_one_sybil_indicator() {
        assert!(!should_flag(&[]));
        assert!(should_flag(&[SybilIndicator::SinglePartner]));
    }

    #[test]
    fn dimension_caps_take_the_tighter_bound_across_indicators() {
        let caps = dimension_caps(&[SybilIndicator::TightCluster, SybilIndicator::WashTrading]);
        assert_eq!(caps.reliability, Some(30));
        assert_eq!(caps.identity, None);
    }

    #[test]
    fn gaming_penalty_scales_with_indicator_count() {
        assert_eq!(gaming_reliability_penalty(&[]), 0);
        assert_eq!(
            gaming_reliability_penalty(&[GamingIndicator::BurstAndStop, GamingIndicator::NonceInflation]),
            2 * GAMING_RELIABILITY_PENALTY
        );
    }

    proptest! {
        #[test]
        fn multiplier_always_within_bounds(sybil_count in 0usize..10, gaming_count in 0usize..10, reports in 0u32..10) {
            let sybil = vec![SybilIndicator::TightCluster; sybil_count];
            let gaming = vec![GamingIndicator::BurstAndStop; gaming_count];
            let m = compute_multiplier(&sybil, &gaming, reports);
            prop_assert!(m >= INTEGRITY_MULTIPLIER_FLOOR);
            prop_assert!(m <= INTEGRITY_MULTIPLIER_CEILING);
        }
    }
}
