//! Webhook subscriptions and their delivery attempts.

use rusqlite::{params, OptionalExtension};
use trust_core::error::StoreError;
use trust_core::types::{Address, Delivery, DeliveryStatus, Webhook, WebhookEventType};

use crate::db::AsyncDb;
use crate::wallets::parse_ts;

impl AsyncDb {
    pub async fn create_webhook(
        &self,
        wallet: Address,
        url: String,
        secret: String,
        events: Vec<WebhookEventType>,
    ) -> Result<i64, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO webhooks (wallet, url, secret, events_json, active, consecutive_failures)
                 VALUES (?1, ?2, ?3, ?4, 1, 0)",
                params![wallet.to_string(), url, secret, serde_json::to_string(&events).unwrap_or_default()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_webhook(&self, id: i64) -> Result<Option<Webhook>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, wallet, url, secret, events_json, active, consecutive_failures
                 FROM webhooks WHERE id = ?1",
                params![id],
                row_to_webhook,
            )
            .optional()
        })
        .await
    }

    pub async fn active_webhooks_for_wallet(&self, wallet: Address) -> Result<Vec<Webhook>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, wallet, url, secret, events_json, active, consecutive_failures
                 FROM webhooks WHERE wallet = ?1 AND active = 1",
            )?;
            let rows = stmt.query_map(params![wallet.to_string()], row_to_webhook)?;
            rows.collect()
        })
        .await
    }

    /// Bump or reset the consecutive-failure counter; auto-disables the
    /// webhook once the counter reaches the threshold (§3 invariant).
    pub async fn record_delivery_result(&self, webhook_id: i64, succeeded: bool) -> Result<bool, StoreError> {
        self.call(move |conn| {
            if succeeded {
                conn.execute(
                    "UPDATE webhooks SET consecutive_failures = 0 WHERE id = ?1",
                    params![webhook_id],
                )?;
                return Ok(false);
            }
            conn.execute(
                "UPDATE webhooks SET consecutive_failures = consecutive_failures + 1 WHERE id = ?1",
                params![webhook_id],
            )?;
            let failures: u32 = conn.query_row(
                "SELECT consecutive_failures FROM webhooks WHERE id = ?1",
                params![webhook_id],
                |row| row.get(0),
            )?;
            let disabled = failures >= trust_core::types::WEBHOOK_AUTO_DISABLE_THRESHOLD;
            if disabled {
                conn.execute("UPDATE webhooks SET active = 0 WHERE id = ?1", params![webhook_id])?;
            }
            Ok(disabled)
        })
        .await
    }

    pub async fn enqueue_delivery(
        &self,
        webhook_id: i64,
        event_type: WebhookEventType,
        payload: serde_json::Value,
    ) -> Result<i64, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO deliveries (webhook_id, event_type, payload_json, attempt, next_retry_at, status_code, delivered_at)
                 VALUES (?1, ?2, ?3, 0, NULL, NULL, NULL)",
                params![webhook_id, event_type.to_string(), payload.to_string()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn pending_deliveries(&self, limit: i64) -> Result<Vec<Delivery>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, webhook_id, event_type, payload_json, attempt, next_retry_at, status_code, delivered_at
                 FROM deliveries
                 WHERE delivered_at IS NULL AND (next_retry_at IS NULL OR next_retry_at <= datetime('now'))
                 ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_delivery)?;
            rows.collect()
        })
        .await
    }

    pub async fn update_delivery_attempt(
        &self,
        id: i64,
        status: DeliveryStatus,
        status_code: Option<u16>,
        next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            let delivered_at = matches!(status, DeliveryStatus::Delivered).then(|| chrono::Utc::now().to_rfc3339());
            conn.execute(
                "UPDATE deliveries SET attempt = attempt + 1, status_code = ?2, next_retry_at = ?3, delivered_at = ?4
                 WHERE id = ?1",
                params![id, status_code, next_retry_at.map(|t| t.to_rfc3339()), delivered_at],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_webhook(row: &rusqlite::Row) -> rusqlite::Result<Webhook> {
    let wallet: String = row.get(1)?;
    let events_json: String = row.get(4)?;
    Ok(Webhook {
        id: row.get(0)?,
        wallet: wallet.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "wallet".into(), rusqlite::types::Type::Text)
        })?,
        url: row.get(2)?,
        secret: row.get(3)?,
        events: serde_json::from_str(&events_json).unwrap_or_default(),
        active: row.get::<_, i64>(5)? != 0,
        consecutive_failures: row.get(6)?,
    })
}

fn row_to_delivery(row: &rusqlite::Row) -> rusqlite::Result<Delivery> {
    let payload_json: String = row.get(3)?;
    let next_retry_at: Option<String> = row.get(5)?;
    let delivered_at: Option<String> = row.get(7)?;
    let event_type: String = row.get(2)?;
    Ok(Delivery {
        id: row.get(0)?,
        webhook_id: row.get(1)?,
        event_type: parse_event_type(&event_type),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        attempt: row.get(4)?,
        next_retry_at: next_retry_at.map(|s| parse_ts(&s)).transpose()?,
        status_code: row.get::<_, Option<i64>>(6)?.map(|v| v as u16),
        delivered_at: delivered_at.map(|s| parse_ts(&s)).transpose()?,
    })
}

fn parse_event_type(s: &str) -> WebhookEventType {
    match s {
        "score.sybil_flagged" => WebhookEventType::SybilFlagged,
        "score.fraud_reported" => WebhookEventType::FraudReported,
        "score.tier_changed" => WebhookEventType::TierChanged,
        _ => WebhookEventType::ScoreUpdated,
    }
}
