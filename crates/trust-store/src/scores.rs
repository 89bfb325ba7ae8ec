//! Score persistence: the current snapshot plus bounded append-only history.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use trust_core::constants::SCORE_HISTORY_CAP;
use trust_core::error::StoreError;
use trust_core::types::{
    Address, DimensionScore, Dimensions, Recommendation, Score, ScoreHistoryEntry, Tier,
};

use crate::db::AsyncDb;
use crate::wallets::parse_ts;

impl AsyncDb {
    /// Write the new current score, append a history row, and prune the
    /// wallet's history to the most recent `SCORE_HISTORY_CAP` rows, all
    /// in one transaction alongside flipping the wallet's `scored` flag.
    pub async fn upsert_score(&self, score: Score) -> Result<(), StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let wallet = score.wallet.to_string();

            tx.execute(
                "INSERT INTO scores (wallet, composite, dimensions_json, tier, raw_snapshot_json,
                    computed_at, expires_at, confidence, recommendation, model_version,
                    sybil_flag, sybil_indicators_json, gaming_indicators_json, integrity_multiplier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(wallet) DO UPDATE SET
                    composite = ?2, dimensions_json = ?3, tier = ?4, raw_snapshot_json = ?5,
                    computed_at = ?6, expires_at = ?7, confidence = ?8, recommendation = ?9,
                    model_version = ?10, sybil_flag = ?11, sybil_indicators_json = ?12,
                    gaming_indicators_json = ?13, integrity_multiplier = ?14",
                params![
                    wallet,
                    score.composite,
                    serde_json::to_string(&score.dimensions).unwrap_or_default(),
                    score.tier.to_string(),
                    score.raw_snapshot.to_string(),
                    score.computed_at.to_rfc3339(),
                    score.expires_at.to_rfc3339(),
                    score.confidence,
                    score.recommendation.to_string(),
                    score.model_version,
                    score.sybil_flag as i64,
                    serde_json::to_string(&score.sybil_indicators).unwrap_or_default(),
                    serde_json::to_string(&score.gaming_indicators).unwrap_or_default(),
                    score.integrity_multiplier,
                ],
            )?;

            tx.execute(
                "INSERT INTO score_history (wallet, score, computed_at, confidence, model_version)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    wallet,
                    score.composite,
                    score.computed_at.to_rfc3339(),
                    score.confidence,
                    score.model_version,
                ],
            )?;

            tx.execute(
                "DELETE FROM score_history WHERE wallet = ?1 AND id NOT IN (
                    SELECT id FROM score_history WHERE wallet = ?1 ORDER BY computed_at DESC LIMIT ?2
                 )",
                params![wallet, SCORE_HISTORY_CAP as i64],
            )?;

            tx.execute("UPDATE wallets SET scored = 1 WHERE address = ?1", params![wallet])?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_score(&self, wallet: Address) -> Result<Option<Score>, StoreError> {
        let addr = wallet.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT wallet, composite, dimensions_json, tier, raw_snapshot_json, computed_at,
                    expires_at, confidence, recommendation, model_version, sybil_flag,
                    sybil_indicators_json, gaming_indicators_json, integrity_multiplier
                 FROM scores WHERE wallet = ?1",
                params![addr],
                row_to_score,
            )
            .optional()
        })
        .await
    }

    pub async fn get_history(&self, wallet: Address, limit: i64) -> Result<Vec<ScoreHistoryEntry>, StoreError> {
        let addr = wallet.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet, score, computed_at, confidence, model_version
                 FROM score_history WHERE wallet = ?1 ORDER BY computed_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![addr, limit], row_to_history_entry)?;
            rows.collect()
        })
        .await
    }

    pub async fn count_scores(&self) -> Result<u64, StoreError> {
        self.call(|conn| conn.query_row("SELECT COUNT(*) FROM scores", [], |row| row.get(0)))
            .await
    }

    /// Wallets whose score has already expired as of now, used by the
    /// expired-score sweep job.
    pub async fn list_expired(&self, limit: i64) -> Result<Vec<Address>, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet FROM scores WHERE expires_at < ?1 ORDER BY expires_at ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now, limit], |row| {
                let wallet: String = row.get(0)?;
                Ok(wallet)
            })?;
            let mut out = Vec::new();
            for wallet in rows {
                let wallet = wallet?;
                out.push(wallet.parse().map_err(|_| {
                    rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
                })?);
            }
            Ok(out)
        })
        .await
    }

    /// Every current composite and dimension score, unbounded, for the
    /// population-stats and tier-threshold calibration loops. Cheap relative
    /// to the other calibration queries since it's a single table scan over
    /// a column set already held in memory per connection.
    pub async fn calibration_snapshot(&self) -> Result<Vec<(u8, Dimensions)>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT composite, dimensions_json FROM scores")?;
            let rows = stmt.query_map([], |row| {
                let composite: u8 = row.get(0)?;
                let dimensions_json: String = row.get(1)?;
                Ok((composite, dimensions_json))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (composite, dimensions_json) = row?;
                let dimensions = serde_json::from_str::<Dimensions>(&dimensions_json)
                    .unwrap_or_else(|_| empty_dimensions());
                out.push((composite, dimensions));
            }
            Ok(out)
        })
        .await
    }

    /// Highest composite scores, for the leaderboard read endpoint.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<(Address, u8)>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet, composite FROM scores ORDER BY composite DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                let wallet: String = row.get(0)?;
                let composite: u8 = row.get(1)?;
                Ok((wallet, composite))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (wallet, composite) = row?;
                let address = wallet.parse().map_err(|_| {
                    rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
                })?;
                out.push((address, composite));
            }
            Ok(out)
        })
        .await
    }
}

fn row_to_score(row: &rusqlite::Row) -> rusqlite::Result<Score> {
    let wallet: String = row.get(0)?;
    let dimensions_json: String = row.get(2)?;
    let tier: String = row.get(3)?;
    let raw_snapshot_json: String = row.get(4)?;
    let computed_at: String = row.get(5)?;
    let expires_at: String = row.get(6)?;
    let recommendation: String = row.get(8)?;
    let sybil_indicators_json: String = row.get(11)?;
    let gaming_indicators_json: String = row.get(12)?;

    Ok(Score {
        wallet: wallet.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
        })?,
        composite: row.get(1)?,
        dimensions: serde_json::from_str::<Dimensions>(&dimensions_json)
            .unwrap_or_else(|_| empty_dimensions()),
        tier: parse_tier(&tier),
        raw_snapshot: serde_json::from_str(&raw_snapshot_json).unwrap_or(serde_json::Value::Null),
        computed_at: parse_ts(&computed_at)?,
        expires_at: parse_ts(&expires_at)?,
        confidence: row.get(7)?,
        recommendation: parse_recommendation(&recommendation),
        model_version: row.get(9)?,
        sybil_flag: row.get::<_, i64>(10)? != 0,
        sybil_indicators: serde_json::from_str(&sybil_indicators_json).unwrap_or_default(),
        gaming_indicators: serde_json::from_str(&gaming_indicators_json).unwrap_or_default(),
        integrity_multiplier: row.get(13)?,
    })
}

fn row_to_history_entry(row: &rusqlite::Row) -> rusqlite::Result<ScoreHistoryEntry> {
    let wallet: String = row.get(0)?;
    let computed_at: String = row.get(2)?;
    Ok(ScoreHistoryEntry {
        wallet: wallet.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
        })?,
        score: row.get(1)?,
        computed_at: parse_ts(&computed_at)?,
        confidence: row.get(3)?,
        model_version: row.get(4)?,
    })
}

fn empty_dimensions() -> Dimensions {
    let empty = DimensionScore { score: 0, data: vec![] };
    Dimensions {
        reliability: empty.clone(),
        viability: empty.clone(),
        identity: empty.clone(),
        capability: empty.clone(),
        behaviour: empty,
    }
}

fn parse_tier(s: &str) -> Tier {
    match s {
        "emerging" => Tier::Emerging,
        "established" => Tier::Established,
        "trusted" => Tier::Trusted,
        "elite" => Tier::Elite,
        _ => Tier::Unverified,
    }
}

fn parse_recommendation(s: &str) -> Recommendation {
    match s {
        "insufficient_history" => Recommendation::InsufficientHistory,
        "high_risk" => Recommendation::HighRisk,
        "proceed" => Recommendation::Proceed,
        "proceed_with_caution" => Recommendation::ProceedWithCaution,
        "rpc_unavailable" => Recommendation::RpcUnavailable,
        _ => Recommendation::FlaggedForReview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use trust_core::types::{Address as Addr, DimensionScore as DS};

    fn addr(n: u8) -> Addr {
        Addr::from_bytes([n; 20])
    }

    fn sample_score(wallet: Addr, composite: u8) -> Score {
        let dim = DS { score: composite, data: vec![] };
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
            raw_snapshot: serde_json::json!({"v": 1}),
            computed_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            confidence: 0.8,
            recommendation: Recommendation::Proceed,
            model_version: "v1".to_string(),
            sybil_flag: false,
            sybil_indicators: vec![],
            gaming_indicators: vec![],
            integrity_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.upsert_wallet(addr(1), Utc::now(), 0, 0, 0).await.unwrap();
        let score = sample_score(addr(1), 72);
        db.upsert_score(score.clone()).await.unwrap();
        let fetched = db.get_score(addr(1)).await.unwrap().unwrap();
        assert_eq!(fetched.composite, 72);
        assert_eq!(fetched.tier, Tier::Established);
    }

    #[tokio::test]
    async fn upsert_also_marks_wallet_scored() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.upsert_wallet(addr(2), Utc::now(), 0, 0, 0).await.unwrap();
        db.upsert_score(sample_score(addr(2), 50)).await.unwrap();
        let wallet = db.get_wallet(addr(2)).await.unwrap().unwrap();
        assert!(wallet.scored);
    }

    #[tokio::test]
    async fn history_is_capped_at_fifty() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.upsert_wallet(addr(3), Utc::now(), 0, 0, 0).await.unwrap();
        for i in 0..60u8 {
            db.upsert_score(sample_score(addr(3), i % 100)).await.unwrap();
        }
        let history = db.get_history(addr(3), 1000).await.unwrap();
        assert_eq!(history.len(), SCORE_HISTORY_CAP);
    }

    #[tokio::test]
    async fn list_expired_finds_past_scores() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.upsert_wallet(addr(4), Utc::now(), 0, 0, 0).await.unwrap();
        let mut score = sample_score(addr(4), 10);
        score.expires_at = Utc::now() - Duration::hours(1);
        db.upsert_score(score).await.unwrap();
        let expired = db.list_expired(10).await.unwrap();
        assert_eq!(expired, vec![addr(4)]);
    }

    #[tokio::test]
    async fn calibration_snapshot_returns_every_scored_wallet() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        for (n, composite) in [(1, 30), (2, 90)] {
            db.upsert_wallet(addr(n), Utc::now(), 0, 0, 0).await.unwrap();
            db.upsert_score(sample_score(addr(n), composite)).await.unwrap();
        }
        let snapshot = db.calibration_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn leaderboard_orders_descending() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        for (n, composite) in [(1, 30), (2, 90), (3, 60)] {
            db.upsert_wallet(addr(n), Utc::now(), 0, 0, 0).await.unwrap();
            db.upsert_score(sample_score(addr(n), composite)).await.unwrap();
        }
        let board = db.leaderboard(10).await.unwrap();
        assert_eq!(board[0].1, 90);
        assert_eq!(board[1].1, 60);
        assert_eq!(board[2].1, 30);
    }
}
