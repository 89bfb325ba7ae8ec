//! Polling chain indexer state machine.
//!
//! Both the micro-payment settlement indexer and the generic transfer
//! indexer are one instance of this state machine, parameterized by a
//! distinct checkpoint key so they track independent positions against
//! the same [`RpcClient`]. Progression mirrors a header-first sync
//! manager: discover the tip, backfill in chunks that shrink on
//! upstream pushback, then settle into tailing the tip one tick at a
//! time, backing off on transient errors without wedging the scheduler.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use trust_core::constants::{
    FACILITATOR_AUTH_USE_SHORTCUT_THRESHOLD, FACILITATOR_LOOKUP_CONCURRENCY,
    INDEXER_BACKFILL_OFFSET_BLOCKS, INDEXER_CATCHUP_CEILING_BLOCKS, INDEXER_INITIAL_CHUNK_SIZE,
    INDEXER_MIN_CHUNK_SIZE, INDEXER_RETRY_DELAY_SECS,
};
use trust_core::error::{RpcError, StoreError};
use trust_core::traits::RpcClient;
use trust_core::types::RawTransfer;
use trust_store::AsyncDb;

/// Current phase of one indexer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerPhase {
    Init,
    Backfill,
    Tail,
    RetryWait,
}

/// Outcome of a single [`Indexer::tick`] call, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Caught up to the observed tip; nothing left to index this tick.
    UpToDate,
    /// Indexed a chunk; `transfers_indexed` new rows were inserted and
    /// the checkpoint advanced to `new_checkpoint`.
    Advanced { transfers_indexed: usize, new_checkpoint: u64 },
    /// Upstream rejected the chunk as too wide; the chunk size was
    /// halved and nothing was indexed this tick.
    ChunkShrunk { new_chunk_size: u64 },
    /// A transient upstream error occurred; the caller should wait
    /// `INDEXER_RETRY_DELAY_SECS` before ticking again.
    TransientError(String),
}

/// Settlement-filtering policy applied only by the micro-payment indexer:
/// a transfer is kept only if it also appears in the chunk's
/// authorization-use set and its amount is within `ceiling`.
#[derive(Debug, Clone, Copy)]
pub struct SettlementPolicy {
    pub ceiling: u64,
}

/// One polling indexer, tracking its own checkpoint under `checkpoint_key`.
///
/// `settlement` is `None` for the generic transfer indexer and `Some` for
/// the micro-payment indexer, switching on the extra authorization-use
/// correlation and facilitator-sender filter described in the indexing
/// policy.
pub struct Indexer<R: RpcClient> {
    checkpoint_key: &'static str,
    chunk_size_key: &'static str,
    rpc: Arc<R>,
    store: AsyncDb,
    chunk_size: u64,
    phase: IndexerPhase,
    settlement: Option<SettlementPolicy>,
}

impl<R: RpcClient> Indexer<R> {
    pub fn new(checkpoint_key: &'static str, chunk_size_key: &'static str, rpc: Arc<R>, store: AsyncDb) -> Self {
        Self {
            checkpoint_key,
            chunk_size_key,
            rpc,
            store,
            chunk_size: INDEXER_INITIAL_CHUNK_SIZE,
            phase: IndexerPhase::Init,
            settlement: None,
        }
    }

    /// Construct a micro-payment settlement indexer: same state machine,
    /// plus authorization-use correlation and a ceiling filter on top of
    /// the raw transfer stream.
    pub fn new_micro_payment(
        checkpoint_key: &'static str,
        chunk_size_key: &'static str,
        rpc: Arc<R>,
        store: AsyncDb,
        ceiling: u64,
    ) -> Self {
        let mut indexer = Self::new(checkpoint_key, chunk_size_key, rpc, store);
        indexer.settlement = Some(SettlementPolicy { ceiling });
        indexer
    }

    pub fn phase(&self) -> IndexerPhase {
        self.phase
    }

    /// Advance the indexer by one chunk (or discover its starting
    /// position, in [`IndexerPhase::Init`]).
    pub async fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        let tip = match self.rpc.chain_tip().await {
            Ok(tip) => tip,
            Err(err) => {
                self.phase = IndexerPhase::RetryWait;
                return Ok(TickOutcome::TransientError(err.to_string()));
            }
        };

        if self.phase == IndexerPhase::Init {
            self.restore_chunk_size().await?;
            self.seed_or_catch_up(tip).await?;
        }

        let from = self.current_checkpoint().await? + 1;
        if from > tip {
            self.phase = IndexerPhase::Tail;
            return Ok(TickOutcome::UpToDate);
        }
        self.phase = if tip - from > self.chunk_size { IndexerPhase::Backfill } else { IndexerPhase::Tail };

        let to = (from + self.chunk_size - 1).min(tip);
        match self.rpc.get_transfers(from, to).await {
            Ok(transfers) => match self.apply_settlement_policy(from, to, transfers).await {
                Ok(settlements) => {
                    let inserted = self.store.index_transfer_batch(settlements).await?;
                    self.set_checkpoint(to).await?;
                    Ok(TickOutcome::Advanced { transfers_indexed: inserted, new_checkpoint: to })
                }
                Err(err) => {
                    self.phase = IndexerPhase::RetryWait;
                    Ok(TickOutcome::TransientError(err.to_string()))
                }
            },
            Err(RpcError::ResultWindowTooLarge) => {
                self.chunk_size = (self.chunk_size / 2).max(INDEXER_MIN_CHUNK_SIZE);
                self.persist_chunk_size().await?;
                Ok(TickOutcome::ChunkShrunk { new_chunk_size: self.chunk_size })
            }
            Err(err) => {
                self.phase = IndexerPhase::RetryWait;
                Ok(TickOutcome::TransientError(err.to_string()))
            }
        }
    }

    /// Delay to honor before the next tick when the last one returned
    /// [`TickOutcome::TransientError`].
    pub fn retry_delay() -> std::time::Duration {
        std::time::Duration::from_secs(INDEXER_RETRY_DELAY_SECS)
    }

    /// Narrow `transfers` down to settlements when running with a
    /// [`SettlementPolicy`]; a no-op for the generic indexer.
    async fn apply_settlement_policy(
        &self,
        from: u64,
        to: u64,
        transfers: Vec<RawTransfer>,
    ) -> Result<Vec<RawTransfer>, RpcError> {
        let Some(policy) = self.settlement else {
            return Ok(transfers);
        };

        let auth_uses = self.rpc.authorization_uses(from, to).await?;
        let auth_hashes: HashSet<&str> = auth_uses.iter().map(|a| a.tx_hash.as_str()).collect();
        let ceiling_filtered: Vec<RawTransfer> = transfers
            .into_iter()
            .filter(|t| auth_hashes.contains(t.tx_hash.as_str()) && t.amount <= policy.ceiling)
            .collect();

        if auth_uses.len() > FACILITATOR_AUTH_USE_SHORTCUT_THRESHOLD {
            return Ok(ceiling_filtered);
        }

        self.filter_by_facilitator(ceiling_filtered).await
    }

    /// Keep only transfers whose tx was sent by the configured
    /// facilitator, in bounded-concurrency chunks of
    /// `FACILITATOR_LOOKUP_CONCURRENCY` lookups at a time.
    async fn filter_by_facilitator(&self, candidates: Vec<RawTransfer>) -> Result<Vec<RawTransfer>, RpcError>
    where
        R: 'static,
    {
        let mut settlements = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(FACILITATOR_LOOKUP_CONCURRENCY) {
            let mut lookups = tokio::task::JoinSet::new();
            for transfer in chunk.iter().cloned() {
                let rpc = Arc::clone(&self.rpc);
                lookups.spawn(async move {
                    let sent = rpc.is_facilitator_sent(&transfer.tx_hash).await;
                    (transfer, sent)
                });
            }
            while let Some(joined) = lookups.join_next().await {
                let (transfer, sent) = joined.expect("facilitator lookup task panicked");
                if sent? {
                    settlements.push(transfer);
                }
            }
        }
        Ok(settlements)
    }

    /// On first tick, seed a fresh checkpoint `INDEXER_BACKFILL_OFFSET_BLOCKS`
    /// behind tip rather than scanning from genesis; on a resumed checkpoint
    /// too far behind tip, skip straight to tip instead of backfilling the
    /// whole gap.
    async fn seed_or_catch_up(&self, tip: u64) -> Result<(), StoreError> {
        match self.store.get_indexer_state(self.checkpoint_key).await? {
            None => {
                let seeded = tip.saturating_sub(INDEXER_BACKFILL_OFFSET_BLOCKS);
                info!(checkpoint = seeded, tip, "seeding indexer checkpoint from backfill offset");
                self.set_checkpoint(seeded).await?;
            }
            Some(raw) => {
                let checkpoint: u64 = raw.parse().unwrap_or(0);
                if tip.saturating_sub(checkpoint) > INDEXER_CATCHUP_CEILING_BLOCKS {
                    warn!(checkpoint, tip, "checkpoint far behind tip, skipping straight to tip");
                    self.set_checkpoint(tip).await?;
                }
            }
        }
        Ok(())
    }

    async fn restore_chunk_size(&mut self) -> Result<(), StoreError> {
        if let Some(raw) = self.store.get_indexer_state(self.chunk_size_key).await? {
            if let Ok(size) = raw.parse::<u64>() {
                self.chunk_size = size.max(INDEXER_MIN_CHUNK_SIZE);
            }
        }
        Ok(())
    }

    async fn current_checkpoint(&self) -> Result<u64, StoreError> {
        Ok(self
            .store
            .get_indexer_state(self.checkpoint_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn set_checkpoint(&self, block: u64) -> Result<(), StoreError> {
        self.store.set_indexer_state(self.checkpoint_key, &block.to_string()).await
    }

    async fn persist_chunk_size(&self) -> Result<(), StoreError> {
        self.store.set_indexer_state(self.chunk_size_key, &self.chunk_size.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use trust_core::types::{Address, AuthorizationUse};

    struct FakeRpc {
        tip: u64,
        max_window: u64,
        fail_next: Mutex<bool>,
        facilitator_senders: Mutex<HashSet<String>>,
    }

    impl FakeRpc {
        fn plain(tip: u64, max_window: u64) -> Self {
            Self { tip, max_window, fail_next: Mutex::new(false), facilitator_senders: Mutex::new(HashSet::new()) }
        }
    }

    #[async_trait]
    impl RpcClient for FakeRpc {
        async fn chain_tip(&self) -> Result<u64, RpcError> {
            Ok(self.tip)
        }

        async fn get_transfers(&self, from: u64, to: u64) -> Result<Vec<RawTransfer>, RpcError> {
            if *self.fail_next.lock().unwrap() {
                return Err(RpcError::ConnectionFailed("boom".into()));
            }
            if to - from >= self.max_window {
                return Err(RpcError::ResultWindowTooLarge);
            }
            Ok((from..=to)
                .map(|block| RawTransfer {
                    tx_hash: format!("0x{block}"),
                    block_number: block,
                    from: Address::from_bytes([1; 20]),
                    to: Address::from_bytes([2; 20]),
                    amount: 100,
                    timestamp: Utc::now(),
                })
                .collect())
        }

        async fn is_canonical(&self, block: u64, _hash: &str) -> Result<bool, RpcError> {
            Ok(block <= self.tip)
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

        async fn authorization_uses(&self, from: u64, to: u64) -> Result<Vec<AuthorizationUse>, RpcError> {
            Ok((from..=to)
                .map(|block| AuthorizationUse { tx_hash: format!("0x{block}"), sender: Address::from_bytes([1; 20]) })
                .collect())
        }

        async fn is_facilitator_sent(&self, tx_hash: &str) -> Result<bool, RpcError> {
            Ok(self.facilitator_senders.lock().unwrap().contains(tx_hash))
        }
    }

    #[tokio::test]
    async fn advances_checkpoint_and_indexes_transfers() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = Arc::new(FakeRpc::plain(50, 1_000_000));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store.clone());
        let outcome = indexer.tick().await.unwrap();
        match outcome {
            TickOutcome::Advanced { transfers_indexed, new_checkpoint } => {
                assert_eq!(transfers_indexed, 50);
                assert_eq!(new_checkpoint, 50);
            }
            other => panic!("expected Advanced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shrinks_chunk_on_window_too_large() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = Arc::new(FakeRpc::plain(10_000, 100));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store);
        let outcome = indexer.tick().await.unwrap();
        match outcome {
            TickOutcome::ChunkShrunk { new_chunk_size } => {
                assert_eq!(new_chunk_size, INDEXER_INITIAL_CHUNK_SIZE / 2);
            }
            other => panic!("expected ChunkShrunk, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn up_to_date_when_checkpoint_equals_tip() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        store.set_indexer_state("checkpoint", "50").await.unwrap();
        let rpc = Arc::new(FakeRpc::plain(50, 1_000_000));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store);
        assert_eq!(indexer.tick().await.unwrap(), TickOutcome::UpToDate);
        assert_eq!(indexer.phase(), IndexerPhase::Tail);
    }

    #[tokio::test]
    async fn transient_error_enters_retry_wait() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = Arc::new(FakeRpc { fail_next: Mutex::new(true), ..FakeRpc::plain(50, 1_000_000) });
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store);
        let outcome = indexer.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::TransientError(_)));
        assert_eq!(indexer.phase(), IndexerPhase::RetryWait);
    }

    #[tokio::test]
    async fn checkpoint_survives_across_indexer_instances() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = Arc::new(FakeRpc::plain(5, 1_000_000));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc.clone(), store.clone());
        indexer.tick().await.unwrap();

        let mut resumed = Indexer::new("checkpoint", "chunk_size", rpc, store);
        assert_eq!(resumed.tick().await.unwrap(), TickOutcome::UpToDate);
    }

    #[tokio::test]
    async fn fresh_checkpoint_seeds_from_backfill_offset_not_genesis() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let tip = INDEXER_BACKFILL_OFFSET_BLOCKS + 10;
        let rpc = Arc::new(FakeRpc::plain(tip, 1_000_000_000));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store.clone());
        indexer.tick().await.unwrap();
        let checkpoint: u64 = store.get_indexer_state("checkpoint").await.unwrap().unwrap().parse().unwrap();
        assert!(checkpoint >= INDEXER_BACKFILL_OFFSET_BLOCKS);
    }

    #[tokio::test]
    async fn stale_checkpoint_past_catchup_ceiling_skips_to_tip() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        store.set_indexer_state("checkpoint", "0").await.unwrap();
        let tip = INDEXER_CATCHUP_CEILING_BLOCKS + 1_000;
        let rpc = Arc::new(FakeRpc::plain(tip, 1_000_000_000));
        let mut indexer = Indexer::new("checkpoint", "chunk_size", rpc, store);
        assert_eq!(indexer.tick().await.unwrap(), TickOutcome::UpToDate);
    }

    #[tokio::test]
    async fn micro_payment_indexer_keeps_only_authorized_sub_ceiling_facilitator_sent_transfers() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = FakeRpc::plain(3, 1_000_000);
        rpc.facilitator_senders.lock().unwrap().insert("0x1".to_string());
        rpc.facilitator_senders.lock().unwrap().insert("0x2".to_string());
        let rpc = Arc::new(rpc);
        let mut indexer = Indexer::new_micro_payment("checkpoint", "chunk_size", rpc, store.clone(), 100);
        let outcome = indexer.tick().await.unwrap();
        match outcome {
            TickOutcome::Advanced { transfers_indexed, .. } => assert_eq!(transfers_indexed, 2),
            other => panic!("expected Advanced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn micro_payment_indexer_skips_facilitator_check_above_shortcut_threshold() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let tip = FACILITATOR_AUTH_USE_SHORTCUT_THRESHOLD as u64 + 5;
        // No facilitator_senders populated: if the shortcut weren't applied
        // every transfer would be filtered out by the facilitator check.
        let rpc = Arc::new(FakeRpc::plain(tip, 1_000_000));
        let mut indexer = Indexer::new_micro_payment("checkpoint", "chunk_size", rpc, store, 100);
        let outcome = indexer.tick().await.unwrap();
        match outcome {
            TickOutcome::Advanced { transfers_indexed, .. } => assert_eq!(transfers_indexed, tip as usize),
            other => panic!("expected Advanced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn micro_payment_indexer_drops_transfers_above_ceiling() {
        let store = AsyncDb::open_in_memory().await.unwrap();
        let rpc = FakeRpc::plain(2, 1_000_000);
        rpc.facilitator_senders.lock().unwrap().insert("0x1".to_string());
        rpc.facilitator_senders.lock().unwrap().insert("0x2".to_string());
        let rpc = Arc::new(rpc);
        // Transfer amount is 100 in the fake; a ceiling of 50 excludes all of them.
        let mut indexer = Indexer::new_micro_payment("checkpoint", "chunk_size", rpc, store, 50);
        let outcome = indexer.tick().await.unwrap();
        match outcome {
            TickOutcome::Advanced { transfers_indexed, .. } => assert_eq!(transfers_indexed, 0),
            other => panic!("expected Advanced, got {other:?}"),
        }
    }
}
