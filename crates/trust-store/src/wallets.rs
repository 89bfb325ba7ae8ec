//! Wallet and rolling-stats persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use trust_core::error::StoreError;
use trust_core::types::{Address, TrendDirection, Wallet, WalletStats};

use crate::db::AsyncDb;

impl AsyncDb {
    /// Insert a wallet on first sight, or bump its `last_seen`/counters if
    /// already known. Idempotent per call.
    pub async fn upsert_wallet(
        &self,
        address: Address,
        seen_at: DateTime<Utc>,
        tx_delta: u64,
        volume_in_delta: u64,
        volume_out_delta: u64,
    ) -> Result<(), StoreError> {
        let addr = address.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO wallets (address, first_seen, last_seen, total_tx_count, volume_in, volume_out, scored)
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5, 0)
                 ON CONFLICT(address) DO UPDATE SET
                    last_seen = ?2,
                    total_tx_count = total_tx_count + ?3,
                    volume_in = volume_in + ?4,
                    volume_out = volume_out + ?5",
                params![addr, seen_at.to_rfc3339(), tx_delta, volume_in_delta, volume_out_delta],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_wallet(&self, address: Address) -> Result<Option<Wallet>, StoreError> {
        let addr = address.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT address, first_seen, last_seen, total_tx_count, volume_in, volume_out, scored
                 FROM wallets WHERE address = ?1",
                params![addr],
                |row| row_to_wallet(row),
            )
            .optional()
        })
        .await
    }

    pub async fn mark_scored(&self, address: Address) -> Result<(), StoreError> {
        let addr = address.to_string();
        self.call(move |conn| {
            conn.execute("UPDATE wallets SET scored = 1 WHERE address = ?1", params![addr])?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_wallet_stats(&self, stats: WalletStats) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO wallet_stats (address, unique_partners, inflow_24h, outflow_24h,
                    inflow_7d, outflow_7d, inflow_30d, outflow_30d, income_burn_ratio, trend, ever_drained)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(address) DO UPDATE SET
                    unique_partners = ?2, inflow_24h = ?3, outflow_24h = ?4,
                    inflow_7d = ?5, outflow_7d = ?6, inflow_30d = ?7, outflow_30d = ?8,
                    income_burn_ratio = ?9, trend = ?10,
                    ever_drained = ever_drained OR ?11",
                params![
                    stats.address.to_string(),
                    stats.unique_partners,
                    stats.inflow_24h,
                    stats.outflow_24h,
                    stats.inflow_7d,
                    stats.outflow_7d,
                    stats.inflow_30d,
                    stats.outflow_30d,
                    stats.income_burn_ratio,
                    trend_str(stats.trend),
                    stats.ever_drained,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_wallet_stats(&self, address: Address) -> Result<Option<WalletStats>, StoreError> {
        let addr = address.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT address, unique_partners, inflow_24h, outflow_24h, inflow_7d, outflow_7d,
                    inflow_30d, outflow_30d, income_burn_ratio, trend, ever_drained
                 FROM wallet_stats WHERE address = ?1",
                params![addr],
                |row| row_to_stats(row),
            )
            .optional()
        })
        .await
    }

    /// Count of wallets whose `first_seen` falls within `window_secs` of
    /// `around`, excluding `exclude` itself. Feeds the coordinated-creation
    /// sybil signal.
    pub async fn wallets_first_seen_near(
        &self,
        around: DateTime<Utc>,
        window_secs: i64,
        exclude: Address,
    ) -> Result<u64, StoreError> {
        let lo = (around - chrono::Duration::seconds(window_secs)).to_rfc3339();
        let hi = (around + chrono::Duration::seconds(window_secs)).to_rfc3339();
        let exclude = exclude.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM wallets WHERE first_seen >= ?1 AND first_seen <= ?2 AND address != ?3",
                params![lo, hi, exclude],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// Wallets seen since `since`, most recently active first. Feeds the
    /// wallet-stats rollup and score-refresh jobs.
    pub async fn recently_active_wallets(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Address>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT address FROM wallets WHERE last_seen >= ?1 ORDER BY last_seen DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![since.to_rfc3339(), limit], |row| {
                let address: String = row.get(0)?;
                Ok(address)
            })?;
            let mut out = Vec::new();
            for address in rows {
                let address = address?;
                out.push(address.parse().map_err(|_| {
                    rusqlite::Error::InvalidColumnType(0, "address".into(), rusqlite::types::Type::Text)
                })?);
            }
            Ok(out)
        })
        .await
    }
}

fn trend_str(t: TrendDirection) -> &'static str {
    match t {
        TrendDirection::Rising => "rising",
        TrendDirection::Stable => "stable",
        TrendDirection::Declining => "declining",
        TrendDirection::Freefall => "freefall",
    }
}

fn parse_trend(s: &str) -> TrendDirection {
    match s {
        "rising" => TrendDirection::Rising,
        "declining" => TrendDirection::Declining,
        "freefall" => TrendDirection::Freefall,
        _ => TrendDirection::Stable,
    }
}

fn row_to_wallet(row: &rusqlite::Row) -> rusqlite::Result<Wallet> {
    let address: String = row.get(0)?;
    let first_seen: String = row.get(1)?;
    let last_seen: String = row.get(2)?;
    Ok(Wallet {
        address: address.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "address".into(), rusqlite::types::Type::Text)
        })?,
        first_seen: parse_ts(&first_seen)?,
        last_seen: parse_ts(&last_seen)?,
        total_tx_count: row.get(3)?,
        volume_in: row.get(4)?,
        volume_out: row.get(5)?,
        scored: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_stats(row: &rusqlite::Row) -> rusqlite::Result<WalletStats> {
    let address: String = row.get(0)?;
    let trend: String = row.get(9)?;
    Ok(WalletStats {
        address: address.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "address".into(), rusqlite::types::Type::Text)
        })?,
        unique_partners: row.get(1)?,
        inflow_24h: row.get(2)?,
        outflow_24h: row.get(3)?,
        inflow_7d: row.get(4)?,
        outflow_7d: row.get(5)?,
        inflow_30d: row.get(6)?,
        outflow_30d: row.get(7)?,
        income_burn_ratio: row.get(8)?,
        trend: parse_trend(&trend),
        ever_drained: row.get::<_, i64>(10)? != 0,
    })
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "timestamp".into(), rusqlite::types::Type::Text))
}
