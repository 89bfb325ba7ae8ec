//! Transfer ingestion and relationship-graph maintenance.
//!
//! A chunk of transfers from the indexer is written atomically: the raw
//! rows, the per-wallet aggregate counters, and the relationship edges all
//! land in one SQLite transaction so a crash mid-chunk never leaves the
//! aggregates ahead of (or behind) the raw log.

use rusqlite::params;
use trust_core::error::StoreError;
use trust_core::types::{ordered_pair, RawTransfer, RelationshipEdge};

use crate::db::AsyncDb;
use crate::wallets::parse_ts;

impl AsyncDb {
    /// Atomically persist a chunk of transfers: raw rows (ignoring
    /// duplicates on `tx_hash`), wallet first/last-seen and volume
    /// counters, and relationship edges for every distinct pair.
    pub async fn index_transfer_batch(&self, transfers: Vec<RawTransfer>) -> Result<usize, StoreError> {
        if transfers.is_empty() {
            return Ok(0);
        }
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            for t in &transfers {
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO raw_transfers (tx_hash, block_number, from_address, to_address, amount, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![t.tx_hash, t.block_number, t.from.to_string(), t.to.to_string(), t.amount, t.timestamp.to_rfc3339()],
                )?;
                if changed == 0 {
                    continue;
                }
                inserted += 1;

                for (address, is_sender, counterpart_volume) in
                    [(t.from, true, t.amount), (t.to, false, t.amount)]
                {
                    let (vol_in, vol_out) = if is_sender { (0, counterpart_volume) } else { (counterpart_volume, 0) };
                    tx.execute(
                        "INSERT INTO wallets (address, first_seen, last_seen, total_tx_count, volume_in, volume_out, scored)
                         VALUES (?1, ?2, ?2, 1, ?3, ?4, 0)
                         ON CONFLICT(address) DO UPDATE SET
                            last_seen = ?2,
                            total_tx_count = total_tx_count + 1,
                            volume_in = volume_in + ?3,
                            volume_out = volume_out + ?4",
                        params![address.to_string(), t.timestamp.to_rfc3339(), vol_in, vol_out],
                    )?;
                }

                let (wallet_a, wallet_b) = ordered_pair(t.from, t.to);
                let (vol_a_to_b, vol_b_to_a) = if t.from == wallet_a {
                    (t.amount, 0)
                } else {
                    (0, t.amount)
                };
                let (cnt_a_to_b, cnt_b_to_a) = if t.from == wallet_a { (1, 0) } else { (0, 1) };
                tx.execute(
                    "INSERT INTO relationship_edges
                        (wallet_a, wallet_b, tx_count_a_to_b, volume_a_to_b, tx_count_b_to_a, volume_b_to_a, first_interaction, last_interaction)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT(wallet_a, wallet_b) DO UPDATE SET
                        tx_count_a_to_b = tx_count_a_to_b + ?3,
                        volume_a_to_b = volume_a_to_b + ?4,
                        tx_count_b_to_a = tx_count_b_to_a + ?5,
                        volume_b_to_a = volume_b_to_a + ?6,
                        last_interaction = ?7",
                    params![
                        wallet_a.to_string(),
                        wallet_b.to_string(),
                        cnt_a_to_b,
                        vol_a_to_b,
                        cnt_b_to_a,
                        vol_b_to_a,
                        t.timestamp.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Transfers touching `wallet` (either side), newest first, capped at
    /// `limit` rows. Used by the dimension scorers to inspect raw history.
    pub async fn get_transfers_for_wallet(
        &self,
        wallet: trust_core::types::Address,
        limit: i64,
    ) -> Result<Vec<RawTransfer>, StoreError> {
        let addr = wallet.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tx_hash, block_number, from_address, to_address, amount, timestamp
                 FROM raw_transfers WHERE from_address = ?1 OR to_address = ?1
                 ORDER BY block_number DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![addr, limit], row_to_transfer)?;
            rows.collect()
        })
        .await
    }

    pub async fn get_relationship_count(&self, wallet: trust_core::types::Address) -> Result<u64, StoreError> {
        let addr = wallet.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM relationship_edges WHERE wallet_a = ?1 OR wallet_b = ?1",
                params![addr],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Every edge touching `wallet`, either side. Feeds the sybil checks.
    pub async fn get_edges_for_wallet(
        &self,
        wallet: trust_core::types::Address,
    ) -> Result<Vec<trust_core::types::RelationshipEdge>, StoreError> {
        let addr = wallet.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wallet_a, wallet_b, tx_count_a_to_b, volume_a_to_b, tx_count_b_to_a,
                    volume_b_to_a, first_interaction, last_interaction
                 FROM relationship_edges WHERE wallet_a = ?1 OR wallet_b = ?1",
            )?;
            let rows = stmt.query_map(params![addr], row_to_edge)?;
            rows.collect()
        })
        .await
    }
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<RelationshipEdge> {
    let wallet_a: String = row.get(0)?;
    let wallet_b: String = row.get(1)?;
    let first_interaction: String = row.get(6)?;
    let last_interaction: String = row.get(7)?;
    Ok(RelationshipEdge {
        wallet_a: wallet_a.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "wallet_a".into(), rusqlite::types::Type::Text)
        })?,
        wallet_b: wallet_b.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "wallet_b".into(), rusqlite::types::Type::Text)
        })?,
        tx_count_a_to_b: row.get(2)?,
        volume_a_to_b: row.get(3)?,
        tx_count_b_to_a: row.get(4)?,
        volume_b_to_a: row.get(5)?,
        first_interaction: parse_ts(&first_interaction)?,
        last_interaction: parse_ts(&last_interaction)?,
    })
}

fn row_to_transfer(row: &rusqlite::Row) -> rusqlite::Result<RawTransfer> {
    let from: String = row.get(2)?;
    let to: String = row.get(3)?;
    let ts: String = row.get(5)?;
    Ok(RawTransfer {
        tx_hash: row.get(0)?,
        block_number: row.get(1)?,
        from: from.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(2, "from_address".into(), rusqlite::types::Type::Text)
        })?,
        to: to.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(3, "to_address".into(), rusqlite::types::Type::Text)
        })?,
        amount: row.get(4)?,
        timestamp: parse_ts(&ts)?,
    })
}
