//! Outcome tracking, fraud reports, and reputation publication records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use trust_core::constants::MAX_REPORTS_PER_REPORTER_PER_TARGET;
use trust_core::error::StoreError;
use trust_core::types::{Address, FraudReport, Outcome, OutcomeType, ReputationPublication};

use crate::db::AsyncDb;
use crate::wallets::parse_ts;

impl AsyncDb {
    pub async fn insert_outcome(&self, outcome: Outcome) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO outcomes (wallet, queried_at, predicted_score, outcome_type, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    outcome.wallet.to_string(),
                    outcome.queried_at.to_rfc3339(),
                    outcome.predicted_score,
                    outcome_type_str(outcome.outcome_type),
                    outcome.observed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Outcomes recorded since `since`, used as calibration input.
    pub async fn outcomes_since(&self, since: chrono::DateTime<Utc>) -> Result<Vec<Outcome>, StoreError> {
        let since = since.to_rfc3339();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet, queried_at, predicted_score, outcome_type, observed_at
                 FROM outcomes WHERE observed_at >= ?1",
            )?;
            let rows = stmt.query_map(params![since], row_to_outcome)?;
            rows.collect()
        })
        .await
    }

    /// Count of reports a reporter has already filed against `target`;
    /// the caller enforces the `MAX_REPORTS_PER_REPORTER_PER_TARGET` cap.
    pub async fn count_reports_by_reporter(
        &self,
        reporter: Address,
        target: Address,
    ) -> Result<u32, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM fraud_reports WHERE reporter = ?1 AND target = ?2",
                params![reporter.to_string(), target.to_string()],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Count of fraud reports filed against `target` after `since`, used to
    /// reapply dampening on a cache-hit score (would double-penalise if
    /// combined with a full integrity-multiplier recompute).
    pub async fn fraud_report_count_since(
        &self,
        target: Address,
        since: chrono::DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM fraud_reports WHERE target = ?1 AND created_at > ?2",
                params![target.to_string(), since.to_rfc3339()],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Insert a fraud report after the caller has verified the reporter's
    /// cap (`MAX_REPORTS_PER_REPORTER_PER_TARGET`) has not been exceeded.
    pub async fn insert_fraud_report(
        &self,
        target: Address,
        reporter: Address,
        reason: String,
        details: String,
    ) -> Result<i64, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO fraud_reports (target, reporter, reason, details, created_at, penalty_applied)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![target.to_string(), reporter.to_string(), reason, details, Utc::now().to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn mark_fraud_report_penalized(&self, id: i64) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute("UPDATE fraud_reports SET penalty_applied = 1 WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn get_fraud_reports_for_target(&self, target: Address) -> Result<Vec<FraudReport>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target, reporter, reason, details, created_at, penalty_applied
                 FROM fraud_reports WHERE target = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![target.to_string()], row_to_fraud_report)?;
            rows.collect()
        })
        .await
    }

    pub async fn upsert_reputation_publication(&self, pub_record: ReputationPublication) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO reputation_publications (wallet, last_published_score, model_version, tx_hash, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(wallet) DO UPDATE SET
                    last_published_score = ?2, model_version = ?3, tx_hash = ?4, published_at = ?5",
                params![
                    pub_record.wallet.to_string(),
                    pub_record.last_published_score,
                    pub_record.model_version,
                    pub_record.tx_hash,
                    pub_record.published_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_reputation_publication(&self, wallet: Address) -> Result<Option<ReputationPublication>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT wallet, last_published_score, model_version, tx_hash, published_at
                 FROM reputation_publications WHERE wallet = ?1",
                params![wallet.to_string()],
                row_to_publication,
            )
            .optional()
        })
        .await
    }
}

fn outcome_type_str(t: OutcomeType) -> &'static str {
    match t {
        OutcomeType::SuccessfulTx => "successful_tx",
        OutcomeType::MultipleSuccessfulTx => "multiple_successful_tx",
        OutcomeType::FraudReport => "fraud_report",
        OutcomeType::NoActivity => "no_activity",
    }
}

fn parse_outcome_type(s: &str) -> OutcomeType {
    match s {
        "multiple_successful_tx" => OutcomeType::MultipleSuccessfulTx,
        "fraud_report" => OutcomeType::FraudReport,
        "no_activity" => OutcomeType::NoActivity,
        _ => OutcomeType::SuccessfulTx,
    }
}

fn row_to_outcome(row: &rusqlite::Row) -> rusqlite::Result<Outcome> {
    let wallet: String = row.get(0)?;
    let queried_at: String = row.get(1)?;
    let outcome_type: String = row.get(3)?;
    let observed_at: String = row.get(4)?;
    Ok(Outcome {
        wallet: wallet.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
        })?,
        queried_at: parse_ts(&queried_at)?,
        predicted_score: row.get(2)?,
        outcome_type: parse_outcome_type(&outcome_type),
        observed_at: parse_ts(&observed_at)?,
    })
}

fn row_to_fraud_report(row: &rusqlite::Row) -> rusqlite::Result<FraudReport> {
    let target: String = row.get(1)?;
    let reporter: String = row.get(2)?;
    let created_at: String = row.get(5)?;
    Ok(FraudReport {
        id: row.get(0)?,
        target: target.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "target".into(), rusqlite::types::Type::Text)
        })?,
        reporter: reporter.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(2, "reporter".into(), rusqlite::types::Type::Text)
        })?,
        reason: row.get(3)?,
        details: row.get(4)?,
        created_at: parse_ts(&created_at)?,
        penalty_applied: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_publication(row: &rusqlite::Row) -> rusqlite::Result<ReputationPublication> {
    let wallet: String = row.get(0)?;
    let published_at: String = row.get(4)?;
    Ok(ReputationPublication {
        wallet: wallet.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "wallet".into(), rusqlite::types::Type::Text)
        })?,
        last_published_score: row.get(1)?,
        model_version: row.get(2)?,
        tx_hash: row.get(3)?,
        published_at: parse_ts(&published_at)?,
    })
}

/// Enforce the per-reporter-per-target report cap and insert if allowed.
pub async fn file_fraud_report_checked(
    db: &AsyncDb,
    target: Address,
    reporter: Address,
    reason: String,
    details: String,
) -> Result<i64, StoreError> {
    let existing = db.count_reports_by_reporter(reporter, target).await?;
    if existing >= MAX_REPORTS_PER_REPORTER_PER_TARGET {
        return Err(StoreError::Sqlite(format!(
            "reporter {reporter} has already filed {existing} reports against {target}"
        )));
    }
    db.insert_fraud_report(target, reporter, reason, details).await
}
