//! Sybil cluster detection.
//!
//! Each check is independent and pure: given the wallet's relationship
//! edges and stats, it returns whether its indicator fires. The engine
//! combines fired indicators into the integrity multiplier (see
//! [`crate::integrity`]).

use trust_core::types::{Address, RelationshipEdge, SybilIndicator, WalletStats};

/// Evidence gathered about one wallet's neighborhood, enough to run every
/// sybil check without further I/O.
pub struct SybilEvidence<'a> {
    pub wallet: Address,
    pub edges: &'a [RelationshipEdge],
    pub stats: &'a WalletStats,
    /// Number of other wallets first seen within the same short window
    /// (coordinated-creation signal), supplied by the caller's index scan.
    pub wallets_created_same_window: u64,
}

/// A fraction in `[0, 1]` above which a wallet's relationship volume is
/// considered concentrated in its single largest partner.
const TIGHT_CLUSTER_PARTNER_SHARE: f64 = 0.90;
const SYMMETRIC_TX_TOLERANCE_PCT: f64 = 0.05;
const WASH_TRADING_MIN_ROUNDTRIPS: u64 = 5;
const COORDINATED_CREATION_THRESHOLD: u64 = 10;
const SINGLE_PARTNER_MAX_PARTNERS: u64 = 1;
const VOLUME_WITHOUT_DIVERSITY_MIN_VOLUME: u64 = 10_000_000_000; // 10,000 units at 6dp
const VOLUME_WITHOUT_DIVERSITY_MAX_PARTNERS: u64 = 2;

/// Run every sybil check and return the indicators that fired.
pub fn detect(evidence: &SybilEvidence) -> Vec<SybilIndicator> {
    let mut fired = Vec::new();
    if tight_cluster(evidence) {
        fired.push(SybilIndicator::TightCluster);
    }
    if symmetric_transactions(evidence) {
        fired.push(SybilIndicator::SymmetricTransactions);
    }
    if wash_trading(evidence) {
        fired.push(SybilIndicator::WashTrading);
    }
    if coordinated_creation(evidence) {
        fired.push(SybilIndicator::CoordinatedCreation);
    }
    if let Some(indicator) = funding_concentration(evidence) {
        fired.push(indicator);
    }
    if single_partner(evidence) {
        fired.push(SybilIndicator::SinglePartner);
    }
    if volume_without_diversity(evidence) {
        fired.push(SybilIndicator::VolumeWithoutDiversity);
    }
    fired
}

/// A single edge accounts for almost all of this wallet's volume.
fn tight_cluster(evidence: &SybilEvidence) -> bool {
    let total: u64 = evidence.edges.iter().map(RelationshipEdge::total_volume).sum();
    if total == 0 {
        return false;
    }
    let max_edge = evidence.edges.iter().map(RelationshipEdge::total_volume).max().unwrap_or(0);
    (max_edge as f64 / total as f64) >= TIGHT_CLUSTER_PARTNER_SHARE
}

/// Volume flows back and forth with a partner in near-equal amounts.
fn symmetric_transactions(evidence: &SybilEvidence) -> bool {
    evidence
        .edges
        .iter()
        .any(|e| e.total_tx_count() >= 2 && e.is_symmetric(SYMMETRIC_TX_TOLERANCE_PCT))
}

/// Many round trips with the same partner with no net economic transfer.
fn wash_trading(evidence: &SybilEvidence) -> bool {
    evidence.edges.iter().any(|e| {
        e.tx_count_a_to_b >= WASH_TRADING_MIN_ROUNDTRIPS
            && e.tx_count_b_to_a >= WASH_TRADING_MIN_ROUNDTRIPS
            && e.is_symmetric(SYMMETRIC_TX_TOLERANCE_PCT)
    })
}

/// Unusually many wallets first active in the same narrow window as this
/// one, suggesting a batch-created sybil cohort.
fn coordinated_creation(evidence: &SybilEvidence) -> bool {
    evidence.wallets_created_same_window >= COORDINATED_CREATION_THRESHOLD
}

/// This wallet (or its top partner) receives essentially all its inflow
/// from a single source.
fn funding_concentration(evidence: &SybilEvidence) -> Option<SybilIndicator> {
    let inbound: Vec<u64> = evidence
        .edges
        .iter()
        .filter_map(|e| {
            if e.wallet_a == evidence.wallet {
                (e.volume_b_to_a > 0).then_some(e.volume_b_to_a)
            } else {
                (e.volume_a_to_b > 0).then_some(e.volume_a_to_b)
            }
        })
        .collect();
    let total_in: u64 = inbound.iter().sum();
    if total_in == 0 {
        return None;
    }
    let max_in = inbound.iter().copied().max().unwrap_or(0);
    if (max_in as f64 / total_in as f64) >= TIGHT_CLUSTER_PARTNER_SHARE {
        return Some(if inbound.len() == 1 {
            SybilIndicator::SingleSourceFunding
        } else {
            SybilIndicator::FundedByTopPartner
        });
    }
    None
}

fn single_partner(evidence: &SybilEvidence) -> bool {
    !evidence.edges.is_empty() && evidence.stats.unique_partners <= SINGLE_PARTNER_MAX_PARTNERS
}

/// High transaction volume concentrated among very few partners.
fn volume_without_diversity(evidence: &SybilEvidence) -> bool {
    let total: u64 = evidence.edges.iter().map(RelationshipEdge::total_volume).sum();
    total >= VOLUME_WITHOUT_DIVERSITY_MIN_VOLUME
        && evidence.stats.unique_partners <= VOLUME_WITHOUT_DIVERSITY_MAX_PARTNERS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trust_core::types::TrendDirection;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn edge(a: Address, b: Address, vol_a_to_b: u64, vol_b_to_a: u64, cnt_a_to_b: u64, cnt_b_to_a: u64) -> RelationshipEdge {
        RelationshipEdge {
            wallet_a: a,
            wallet_b: b,
            tx_count_a_to_b: cnt_a_to_b,
            volume_a_to_b: vol_a_to_b,
            tx_count_b_to_a: cnt_b_to_a,
            volume_b_to_a: vol_b_to_a,
            first_interaction: Utc::now(),
            last_interaction: Utc::now(),
        }
    }

    fn stats(wallet: Address, unique_partners: u64) -> WalletStats {
        WalletStats {
            address: wallet,
            unique_partners,
            inflow_24h: 0,
            outflow_24h: 0,
            inflow_7d: 0,
            outflow_7d: 0,
            inflow_30d: 0,
            outflow_30d: 0,
            income_burn_ratio: 1.0,
            trend: TrendDirection::Stable,
            ever_drained: false,
        }
    }

    #[test]
    fn tight_cluster_fires_on_single_dominant_edge() {
        let w = addr(1);
        let edges = vec![edge(w, addr(2), 1_000_000, 0, 5, 0)];
        let s = stats(w, 1);
        let evidence = SybilEvidence { wallet: w, edges: &edges, stats: &s, wallets_created_same_window: 0 };
        assert!(tight_cluster(&evidence));
    }

    #[test]
    fn symmetric_transactions_fires_on_equal_flows() {
        let w = addr(1);
        let edges = vec![edge(w, addr(2), 1_000, 980, 3, 3)];
        let s = stats(w, 1);
        let evidence = SybilEvidence { wallet: w, edges: &edges, stats: &s, wallets_created_same_window: 0 };
        assert!(symmetric_transactions(&evidence));
    }

    #[test]
    fn single_partner_requires_edges() {
        let w = addr(1);
        let s = stats(w, 0);
        let evidence = SybilEvidence { wallet: w, edges: &[], stats: &s, wallets_created_same_window: 0 };
        assert!(!single_partner(&evidence));
    }

    #[test]
    fn coordinated_creation_threshold() {
        let w = addr(1);
        let s = stats(w, 3);
        let mut evidence = SybilEvidence { wallet: w, edges: &[], stats: &s, wallets_created_same_window: 9 };
        assert!(!coordinated_creation(&evidence));
        evidence.wallets_created_same_window = 10;
        assert!(coordinated_creation(&evidence));
    }

    #[test]
    fn detect_returns_multiple_indicators_when_several_fire() {
        let w = addr(1);
        let edges = vec![edge(w, addr(2), 1_000, 980, 6, 6)];
        let s = stats(w, 1);
        let evidence = SybilEvidence { wallet: w, edges: &edges, stats: &s, wallets_created_same_window: 0 };
        let fired = detect(&evidence);
        assert!(fired.contains(&SybilIndicator::TightCluster));
        assert!(fired.contains(&SybilIndicator::WashTrading));
        assert!(fired.contains(&SybilIndicator::SinglePartner));
    }

    #[test]
    fn no_edges_means_no_indicators() {
        let w = addr(1);
        let s = stats(w, 0);
        let evidence = SybilEvidence { wallet: w, edges: &[], stats: &s, wallets_created_same_window: 0 };
        assert!(detect(&evidence).is_empty());
    }
}
