//! Score-gaming detection.
//!
//! These checks look for patterns in a wallet's own transaction-level
//! behavior that suggest the wallet operator is manipulating the signals
//! the scorer reads, rather than colluding with a sybil cohort.

use trust_core::types::{GamingIndicator, RawTransfer};

/// Evidence drawn from a wallet's recent raw transfer history.
pub struct GamingEvidence<'a> {
    pub transfers: &'a [RawTransfer],
}

const WINDOW_DRESSING_LOOKBACK: usize = 20;
const BURST_MIN_COUNT: u64 = 8;
const BURST_WINDOW_SECS: i64 = 60 * 10;
const NONCE_INFLATION_MIN_TX: u64 = 50;
const NONCE_INFLATION_MAX_AVG_AMOUNT: u64 = 1_000; // 0.001 unit at 6dp
const RECYCLING_MIN_ROUNDTRIPS: u64 = 3;

pub fn detect(evidence: &GamingEvidence) -> Vec<GamingIndicator> {
    let mut fired = Vec::new();
    if balance_window_dressing(evidence) {
        fired.push(GamingIndicator::BalanceWindowDressing);
    }
    if burst_and_stop(evidence) {
        fired.push(GamingIndicator::BurstAndStop);
    }
    if nonce_inflation(evidence) {
        fired.push(GamingIndicator::NonceInflation);
    }
    if revenue_recycling(evidence) {
        fired.push(GamingIndicator::RevenueRecycling);
    }
    fired
}

/// A large inbound transfer immediately followed by an equally large
/// outbound one, inflating a point-in-time balance snapshot.
fn balance_window_dressing(evidence: &GamingEvidence) -> bool {
    let recent: Vec<&RawTransfer> = evidence.transfers.iter().take(WINDOW_DRESSING_LOOKBACK).collect();
    recent.windows(2).any(|pair| {
        let (newer, older) = (pair[0], pair[1]);
        let gap = (newer.timestamp - older.timestamp).num_seconds().abs();
        gap < 3600 && newer.amount > 0 && older.amount > 0
            && (newer.amount as f64 / older.amount as f64 - 1.0).abs() < 0.05
    })
}

/// A dense burst of transactions followed by total silence, consistent
/// with a script priming activity right before being scored.
fn burst_and_stop(evidence: &GamingEvidence) -> bool {
    if evidence.transfers.len() < BURST_MIN_COUNT as usize {
        return false;
    }
    let newest = evidence.transfers.iter().map(|t| t.timestamp).max();
    let Some(newest) = newest else { return false };
    let burst_count = evidence
        .transfers
        .iter()
        .filter(|t| (newest - t.timestamp).num_seconds() <= BURST_WINDOW_SECS)
        .count() as u64;
    burst_count >= BURST_MIN_COUNT
}

/// Many tiny transactions, suggesting a script inflating `total_tx_count`
/// without contributing meaningful economic volume.
fn nonce_inflation(evidence: &GamingEvidence) -> bool {
    if (evidence.transfers.len() as u64) < NONCE_INFLATION_MIN_TX {
        return false;
    }
    let total: u64 = evidence.transfers.iter().map(|t| t.amount).sum();
    let avg = total / evidence.transfers.len() as u64;
    avg <= NONCE_INFLATION_MAX_AVG_AMOUNT
}

/// The same funds repeatedly cycle out and back in, reused to pad volume
/// counters instead of representing distinct economic activity.
fn revenue_recycling(evidence: &GamingEvidence) -> bool {
    use std::collections::HashMap;
    let mut roundtrips: HashMap<(trust_core::types::Address, trust_core::types::Address), u64> = HashMap::new();
    for t in evidence.transfers {
        let key = trust_core::types::ordered_pair(t.from, t.to);
        *roundtrips.entry(key).or_insert(0) += 1;
    }
    roundtrips.values().any(|&count| count >= RECYCLING_MIN_ROUNDTRIPS)
}
