//! Pure rollup of a wallet's rolling volume/partner/trend stats from its
//! raw transfer history and relationship edges. Feeds both the scoring
//! engine's live viability input and the periodic wallet-stats refresh job,
//! so the two never drift out of sync with each other.

use chrono::{DateTime, Utc};
use trust_core::constants::{WINDOW_24H_SECS, WINDOW_30D_SECS, WINDOW_7D_SECS};
use trust_core::types::{Address, RawTransfer, RelationshipEdge, TrendDirection, WalletStats};

const RISING_RATIO: f64 = 1.2;
const DECLINING_RATIO: f64 = 0.8;
const FREEFALL_RATIO: f64 = 0.5;

/// Recompute a wallet's rolling stats from scratch against its raw
/// transfer history and relationship edges as of `now`. `ever_drained`
/// is passed through (and OR'd in sticky at the store layer) rather than
/// derived here, since it comes from an observed on-chain balance, not
/// from transfer history.
pub fn rollup(
    wallet: Address,
    transfers: &[RawTransfer],
    edges: &[RelationshipEdge],
    now: DateTime<Utc>,
    ever_drained: bool,
) -> WalletStats {
    let mut inflow_24h = 0u64;
    let mut outflow_24h = 0u64;
    let mut inflow_7d = 0u64;
    let mut outflow_7d = 0u64;
    let mut inflow_30d = 0u64;
    let mut outflow_30d = 0u64;

    for t in transfers {
        let age_secs = (now - t.timestamp).num_seconds();
        if age_secs < 0 || age_secs > WINDOW_30D_SECS {
            continue;
        }
        let inbound = t.to == wallet;
        let outbound = t.from == wallet;

        if age_secs <= WINDOW_24H_SECS {
            if inbound {
                inflow_24h += t.amount;
            }
            if outbound {
                outflow_24h += t.amount;
            }
        }
        if age_secs <= WINDOW_7D_SECS {
            if inbound {
                inflow_7d += t.amount;
            }
            if outbound {
                outflow_7d += t.amount;
            }
        }
        if inbound {
            inflow_30d += t.amount;
        }
        if outbound {
            outflow_30d += t.amount;
        }
    }

    let unique_partners = edges.len() as u64;
    let income_burn_ratio = inflow_30d as f64 / (outflow_30d.max(1) as f64);
    let trend = trend_from_rates(inflow_7d + outflow_7d, inflow_30d + outflow_30d);

    WalletStats {
        address: wallet,
        unique_partners,
        inflow_24h,
        outflow_24h,
        inflow_7d,
        outflow_7d,
        inflow_30d,
        outflow_30d,
        income_burn_ratio,
        trend,
        ever_drained,
    }
}

fn trend_from_rates(volume_7d: u64, volume_30d: u64) -> TrendDirection {
    let daily_30d = volume_30d as f64 / 30.0;
    if daily_30d <= 0.0 {
        return TrendDirection::Stable;
    }
    let daily_7d = volume_7d as f64 / 7.0;
    let ratio = daily_7d / daily_30d;
    if ratio >= RISING_RATIO {
        TrendDirection::Rising
    } else if ratio <= FREEFALL_RATIO {
        TrendDirection::Freefall
    } else if ratio <= DECLINING_RATIO {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}
