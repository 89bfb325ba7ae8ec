//! Outbound webhook signing and delivery, plus the retry-with-backoff job
//! that drains the pending delivery queue.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use async_trait::async_trait;
use trust_core::constants::WEBHOOK_BACKOFF_LADDER_SECS;
use trust_core::error::{RpcError, WebhookError};
use trust_core::traits::WebhookTransport;
use trust_core::types::{Delivery, DeliveryStatus, Webhook};
use trust_store::AsyncDb;

type HmacSha256 = Hmac<Sha256>;

/// Sign `body` with the webhook's shared secret, producing the
/// `sha256=<hex>` value sent in the signature header.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MissingSecret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Production [`WebhookTransport`] backed by a shared `reqwest` client.
pub struct HttpWebhookTransport {
    client: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpWebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(&self, url: &str, body: &[u8], signature_header: &str) -> Result<u16, RpcError> {
        let response = self
            .client
            .post(url)
            .header("X-Trustmesh-Signature", signature_header)
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Drain the pending delivery queue once: sign and POST each due delivery,
/// record the outcome, and schedule the next retry on failure using
/// [`WEBHOOK_BACKOFF_LADDER_SECS`] indexed by attempt count.
pub async fn drain_pending<T: WebhookTransport>(
    store: &AsyncDb,
    transport: &T,
    batch_size: i64,
) -> Result<usize, WebhookError> {
    let pending = store.pending_deliveries(batch_size).await.map_err(|e| {
        WebhookError::TransportError(e.to_string())
    })?;

    let mut delivered = 0usize;
    for delivery in pending {
        let Some(webhook) = store.get_webhook(delivery.webhook_id).await.map_err(|e| {
            WebhookError::TransportError(e.to_string())
        })? else {
            continue;
        };
        if !webhook.active {
            continue;
        }
        if attempt_delivery(store, transport, &webhook, &delivery).await? {
            delivered += 1;
        }
    }
    Ok(delivered)
}

async fn attempt_delivery<T: WebhookTransport>(
    store: &AsyncDb,
    transport: &T,
    webhook: &Webhook,
    delivery: &Delivery,
) -> Result<bool, WebhookError> {
    let body = delivery.payload.to_string();
    let signature = sign(&webhook.secret, body.as_bytes())?;

    let outcome = transport.deliver(&webhook.url, body.as_bytes(), &signature).await;
    match outcome {
        Ok(status) if (200..300).contains(&status) => {
            store
                .update_delivery_attempt(delivery.id, DeliveryStatus::Delivered, Some(status), None)
                .await
                .map_err(|e| WebhookError::TransportError(e.to_string()))?;
            store
                .record_delivery_result(webhook.id, true)
                .await
                .map_err(|e| WebhookError::TransportError(e.to_string()))?;
            Ok(true)
        }
        Ok(status) => {
            record_failure(store, webhook, delivery, Some(status)).await?;
            Ok(false)
        }
        Err(_) => {
            record_failure(store, webhook, delivery, None).await?;
            Ok(false)
        }
    }
}

async fn record_failure(
    store: &AsyncDb,
    webhook: &Webhook,
    delivery: &Delivery,
    status: Option<u16>,
) -> Result<(), WebhookError> {
    let attempt = delivery.attempt as usize;
    let backoff_secs = WEBHOOK_BACKOFF_LADDER_SECS[attempt.min(WEBHOOK_BACKOFF_LADDER_SECS.len() - 1)];
    let next_retry_at = Utc::now() + chrono::Duration::seconds(backoff_secs as i64);
    store
        .update_delivery_attempt(delivery.id, DeliveryStatus::Failed, status, Some(next_retry_at))
        .await
        .map_err(|e| WebhookError::TransportError(e.to_string()))?;
    let disabled = store
        .record_delivery_result(webhook.id, false)
        .await
        .map_err(|e| WebhookError::TransportError(e.to_string()))?;
    if disabled {
        tracing::warn!(webhook_id = webhook.id, "webhook auto-disabled after repeated delivery failures");
    }
    Ok(())
}
