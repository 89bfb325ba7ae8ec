//! Reputation publisher: batches confident, meaningfully-changed scores
//! into on-chain writes through [`ChainWriter`], throttled by the
//! publisher job period.

use chrono::Utc;
use trust_core::constants::{PUBLISH_MIN_CONFIDENCE, PUBLISH_MIN_SCORE_DELTA};
use trust_core::error::{PublisherError, ScoreError};
use trust_core::traits::ChainWriter;
use trust_core::types::{Address, ReputationPublication, Score};
use trust_store::AsyncDb;

pub struct Publisher<W: ChainWriter> {
    store: AsyncDb,
    writer: W,
}

impl<W: ChainWriter> Publisher<W> {
    pub fn new(store: AsyncDb, writer: W) -> Self {
        Self { store, writer }
    }

    /// Publish `score` if it clears the confidence floor and has moved
    /// enough from the last on-chain value to be worth the gas; a no-op
    /// otherwise, not an error, since most ticks find nothing to do.
    pub async fn publish_if_due(&self, score: &Score) -> Result<Option<String>, ScoreError> {
        if score.confidence < PUBLISH_MIN_CONFIDENCE {
            return Err(PublisherError::InsufficientConfidence(score.confidence).into());
        }

        let last = self.store.get_reputation_publication(score.wallet).await?;
        if let Some(last) = &last {
            let delta = score.composite.abs_diff(last.last_published_score);
            if delta < PUBLISH_MIN_SCORE_DELTA {
                return Ok(None);
            }
        }

        let tx_hash = self
            .writer
            .publish_reputation(&score.wallet, score.composite, &score.model_version)
            .await
            .map_err(|e| PublisherError::WriteRejected(e.to_string()))?;

        self.store
            .upsert_reputation_publication(ReputationPublication {
                wallet: score.wallet,
                last_published_score: score.composite,
                model_version: score.model_version.clone(),
                tx_hash: tx_hash.clone(),
                published_at: Utc::now(),
            })
            .await?;

        Ok(Some(tx_hash))
    }

    /// Run one publisher cycle over every wallet with a fresh, scored
    /// entry, publishing whichever are due.
    pub async fn run_cycle(&self, candidates: Vec<Address>) -> Vec<Result<Option<String>, ScoreError>> {
        let mut results = Vec::with_capacity(candidates.len());
        for wallet in candidates {
            let result = match self.store.get_score(wallet).await {
                Ok(Some(score)) => self.publish_if_due(&score).await,
                Ok(None) => Ok(None),
                Err(err) => Err(err.into()),
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use trust_core::error::RpcError;
    use trust_core::types::{Dimensions, DimensionScore, Recommendation, Tier};

    struct FakeWriter;

    #[async_trait]
    impl ChainWriter for FakeWriter {
        async fn publish_reputation(&self, wallet: &Address, score: u8, _model_version: &str) -> Result<String, RpcError> {
            Ok(format!("0xtx-{wallet}-{score}"))
        }
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn sample_score(wallet: Address, composite: u8, confidence: f64) -> Score {
        let dim = DimensionScore { score: composite, data: vec![] };
        Score {
            wallet,
            composite,
            dimensions: Dimensions {
                reliability: dim.clone(),
                viability: dim.clone(),
                identity: dim.clone(),
                capability: dim.clone(),
                behaviour: dim,
            },
            tier: Tier::Established,
            raw_snapshot: serde_json::json!({}),
            computed_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            confidence,
            recommendation: Recommendation::Proceed,
            model_version: "v1".to_string(),
            sybil_flag: false,
            sybil_indicators: vec![],
            gaming_indicators: vec![],
            integrity_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn low_confidence_is_rejected() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let publisher = Publisher::new(store, FakeWriter);
        let err = publisher.publish_if_due(&sample_score(addr(1), 80, 0.1)).await.unwrap_err();
        assert_eq!(err.kind(), trust_core::error::ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn first_publish_always_goes_through() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let publisher = Publisher::new(store, FakeWriter);
        let tx = publisher.publish_if_due(&sample_score(addr(2), 80, 0.9)).await.unwrap();
        assert!(tx.is_some());
    }

    #[tokio::test]
    async fn small_delta_is_skipped() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let publisher = Publisher::new(store, FakeWriter);
        publisher.publish_if_due(&sample_score(addr(3), 80, 0.9)).await.unwrap();
        let result = publisher.publish_if_due(&sample_score(addr(3), 81, 0.9)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn large_delta_republishes() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let publisher = Publisher::new(store, FakeWriter);
        publisher.publish_if_due(&sample_score(addr(4), 40, 0.9)).await.unwrap();
        let result = publisher.publish_if_due(&sample_score(addr(4), 70, 0.9)).await.unwrap();
        assert!(result.is_some());
    }
}
