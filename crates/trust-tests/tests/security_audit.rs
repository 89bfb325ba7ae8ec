//! Security audit test suite for the wallet trust-scoring pipeline.
//!
//! Each test is annotated with the attack vector or trust boundary it
//! exercises, from an operator's or an attacker's perspective.

use chrono::Utc;
use trust_core::error::ErrorKind;
use trust_core::types::{Address, DeliveryStatus, WebhookEventType};
use trust_engine::webhook::{drain_pending, sign};
use trust_store::AsyncDb;
use trust_tests::helpers::*;

// ======================================================================
// ATTACK 1: a wallet tries to self-certify by reporting fraud against
// itself to poison calibration in its own favor.
// ======================================================================

#[tokio::test]
async fn self_report_is_accepted_but_cannot_target_a_different_wallet_quietly() {
    let store = AsyncDb::open_in_memory().await.unwrap();
    let wallet = addr(1);

    let id = trust_store::outcomes::file_fraud_report_checked(&store, wallet, wallet, "self".into(), "testing".into())
        .await
        .unwrap();
    let reports = store.get_fraud_reports_for_target(wallet).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, id);
    assert_eq!(reports[0].target, reports[0].reporter);
}

// ======================================================================
// ATTACK 2: webhook payload tampering. A forged signature must not
// validate against the receiver's expected HMAC.
// ======================================================================

#[test]
fn tampered_webhook_payload_produces_a_different_signature() {
    let secret = "shared-secret";
    let original = sign(secret, b"{\"composite\":80}").unwrap();
    let tampered = sign(secret, b"{\"composite\":99}").unwrap();
    assert_ne!(original, tampered);
}

// ======================================================================
// ATTACK 3: an attacker without the shared secret cannot forge a valid
// signature even knowing the payload.
// ======================================================================

#[test]
fn wrong_secret_produces_a_different_signature() {
    let payload = b"{\"composite\":80}";
    let legit = sign("real-secret", payload).unwrap();
    let forged = sign("guessed-secret", payload).unwrap();
    assert_ne!(legit, forged);
}

// ======================================================================
// ATTACK 4: a malformed address string must be rejected outright rather
// than silently truncated or zero-padded into a different wallet.
// ======================================================================

#[test]
fn malformed_address_is_rejected_not_coerced() {
    let too_short = "0x1234".parse::<Address>();
    assert!(too_short.is_err());

    let non_hex = "0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse::<Address>();
    assert!(non_hex.is_err());

    let valid_mixed_case = "0xABCDEF0000000000000000000000000000abcd".parse::<Address>().unwrap();
    let valid_lower = "0xabcdef0000000000000000000000000000abcd".parse::<Address>().unwrap();
    assert_eq!(valid_mixed_case, valid_lower);
}

// ======================================================================
// ATTACK 5: an operator-disabled collaborator must fail closed, not
// silently succeed, so a misconfigured deployment can't be mistaken for
// a working publish/enrichment path.
// ======================================================================

#[tokio::test]
async fn disabled_chain_writer_fails_closed_rather_than_silently_succeeding() {
    let writer = trust_engine::disabled::DisabledChainWriter;
    let result = trust_core::traits::ChainWriter::publish_reputation(&writer, &addr(1), 90, "v1").await;
    assert!(result.is_err());
}

// ======================================================================
// ATTACK 6: repeated delivery failures must auto-disable a webhook
// rather than retry it forever and leak the target URL's response
// behavior back into an unbounded delivery loop.
// ======================================================================

#[tokio::test]
async fn persistent_failures_auto_disable_a_webhook() {
    let store = AsyncDb::open_in_memory().await.unwrap();
    let wallet = addr(2);
    let hook_id = store.create_webhook(wallet, "https://down.example".into(), "s".into(), vec![WebhookEventType::ScoreUpdated]).await.unwrap();

    let failing = FakeWebhookTransport::new(503);
    for _ in 0..6 {
        store.enqueue_delivery(hook_id, WebhookEventType::ScoreUpdated, serde_json::json!({})).await.unwrap();
        drain_pending(&store, &failing, 10).await.unwrap();
    }

    let hook = store.get_webhook(hook_id).await.unwrap().unwrap();
    assert!(!hook.active, "webhook should auto-disable after repeated failures");
}

// ======================================================================
// ATTACK 7: an inactive webhook cannot be reactivated by a delivery
// accidentally enqueued against it after disabling.
// ======================================================================

#[tokio::test]
async fn deliveries_to_an_inactive_webhook_are_not_attempted() {
    let store = AsyncDb::open_in_memory().await.unwrap();
    let wallet = addr(3);
    let hook_id = store.create_webhook(wallet, "https://down.example".into(), "s".into(), vec![]).await.unwrap();
    for _ in 0..5 {
        store.record_delivery_result(hook_id, false).await.unwrap();
    }

    let transport = FakeWebhookTransport::new(200);
    store.enqueue_delivery(hook_id, WebhookEventType::ScoreUpdated, serde_json::json!({})).await.unwrap();
    let delivered = drain_pending(&store, &transport, 10).await.unwrap();
    assert_eq!(delivered, 0);
    assert!(transport.calls.lock().unwrap().is_empty(), "an inactive webhook must never be called");
}

// ======================================================================
// ATTACK 8: low-confidence scores must be rejected by the publisher
// gate, not merely discouraged, so a thinly-evidenced wallet can't buy
// on-chain reputation cheaply.
// ======================================================================

#[tokio::test]
async fn low_confidence_publish_attempt_is_a_precondition_error_not_a_silent_skip() {
    use trust_core::types::{Dimensions, DimensionScore, Recommendation, Score, Tier};

    let store = AsyncDb::open_in_memory().await.unwrap();
    let writer = FakeChainWriter::default();
    let publisher = trust_engine::publisher::Publisher::new(store, writer);

    let dim = DimensionScore { score: 90, data: vec![] };
    let score = Score {
        wallet: addr(4),
        composite: 90,
        dimensions: Dimensions {
            reliability: dim.clone(),
            viability: dim.clone(),
            identity: dim.clone(),
            capability: dim.clone(),
            behaviour: dim,
        },
        tier: Tier::Elite,
        raw_snapshot: serde_json::json!({}),
        computed_at: Utc::now(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        confidence: 0.05,
        recommendation: Recommendation::Proceed,
        model_version: "v1".to_string(),
        sybil_flag: false,
        sybil_indicators: vec![],
        gaming_indicators: vec![],
        integrity_multiplier: 1.0,
    };

    let err = publisher.publish_if_due(&score).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

// ======================================================================
// ATTACK 9: a delivery record must not be double-counted as delivered
// if drained twice concurrently-in-sequence (idempotent status update).
// ======================================================================

#[tokio::test]
async fn delivered_status_update_is_idempotent() {
    let store = AsyncDb::open_in_memory().await.unwrap();
    let wallet = addr(5);
    let hook_id = store.create_webhook(wallet, "https://ok.example".into(), "s".into(), vec![]).await.unwrap();
    let delivery_id = store.enqueue_delivery(hook_id, WebhookEventType::ScoreUpdated, serde_json::json!({})).await.unwrap();

    store.update_delivery_attempt(delivery_id, DeliveryStatus::Delivered, Some(200), None).await.unwrap();
    store.update_delivery_attempt(delivery_id, DeliveryStatus::Delivered, Some(200), None).await.unwrap();

    assert!(store.pending_deliveries(10).await.unwrap().is_empty());
}
