//! FollowerLoop: the unbounded sequence-tracking state machine. Batches
//! main-chain reads, validates hash continuity, and drives
//! `LocalBlockStore` mutations. Grounded on `monitor.rs::run_block_monitor`
//! (poll, detect reorg, apply range) generalized to `count+1`-sized
//! batches with explicit parent-hash continuity checking, and on
//! `sync.rs::run_sync_service`'s startup-mode dispatch.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{self, MainChainClient};
use crate::bus::LocalDbBus;
use crate::caught_up::CaughtUpFlag;
use crate::commit_tracker::CommitTracker;
use crate::error::FollowerError;
use crate::filter::ParaTxFilter;
use crate::hash_matcher::{switch_hash_matched_block, MatchOutcome};
use crate::store::LocalBlockStore;
use crate::types::{DeltaType, MainBlockDelta, ParaLocalBlock};

#[derive(Debug, Clone)]
pub struct FollowerConfig {
    pub title: String,
    pub search_hash_match_depth: u64,
    pub empty_block_interval: i64,
    pub batch_fetch_seq_enable: bool,
    pub batch_fetch_seq_num: i64,
    pub block_sec: u64,
}

pub struct FollowerContext {
    pub store: LocalBlockStore,
    pub adapter: Arc<dyn MainChainClient>,
    pub filter: Arc<dyn ParaTxFilter>,
    pub commit_tracker: CommitTracker,
    pub caught_up: Arc<CaughtUpFlag>,
    pub config: FollowerConfig,
}

impl FollowerContext {
    pub fn new(
        bus: Arc<dyn LocalDbBus>,
        adapter: Arc<dyn MainChainClient>,
        filter: Arc<dyn ParaTxFilter>,
        commit_tracker: CommitTracker,
        config: FollowerConfig,
    ) -> Self {
        let caught_up = CaughtUpFlag::new();
        let store = LocalBlockStore::new(bus, caught_up.clone(), config.title.clone());
        FollowerContext { store, adapter, filter, commit_tracker, caught_up, config }
    }
}

enum FetchPlan {
    Count(i64),
    WaitingNewSeq,
    HashNotMatch,
}

enum Action {
    Continue,
    Sleep,
}

/// `getLastLocalBlockSeq`: read the persisted tip, verify its hash is
/// still on the main chain. `None` if the tip is absent or stale.
async fn get_last_local_block_seq(
    store: &LocalBlockStore,
    adapter: &dyn MainChainClient,
) -> Result<Option<(i64, Vec<u8>)>, FollowerError> {
    let Some(height) = store.get_last_local_height().await? else {
        return Ok(None);
    };
    let Some(block) = store.get_local_block_by_height(height).await? else {
        return Ok(None);
    };
    match adapter.get_seq_by_hash_on_main_chain(&block.main_hash).await? {
        Some(seq) => Ok(Some((seq, block.main_hash))),
        None => Ok(None),
    }
}

/// Startup sequence: try the persisted tip first; if it is absent or no
/// longer canonical, align to the main chain's current tip (writing a
/// fresh header-only genesis block).
async fn initialize(ctx: &FollowerContext) -> Result<(i64, Vec<u8>), FollowerError> {
    if let Some((seq, hash)) = get_last_local_block_seq(&ctx.store, ctx.adapter.as_ref()).await? {
        return Ok((seq + 1, hash));
    }

    let chain_block = ctx.adapter.request_last_block().await?;
    let genesis = ParaLocalBlock::from_chain_block(&chain_block);
    ctx.store.add_local_block(chain_block.height, &genesis).await?;
    let seq = ctx
        .adapter
        .get_seq_by_hash_on_main_chain(&chain_block.main_hash)
        .await?
        .ok_or_else(|| FollowerError::NotFound("no seq for main-chain tip".to_string()))?;
    Ok((seq + 1, chain_block.main_hash))
}

/// `getBatchFetchSeqCount`: decide how many additional deltas (beyond the
/// current seq) to fetch this iteration, and update `CaughtUpFlag`.
async fn get_batch_fetch_seq_count(ctx: &FollowerContext, current_seq: i64) -> Result<FetchPlan, FollowerError> {
    let last_seq = ctx.adapter.get_last_seq_on_main_chain().await?;

    if last_seq > current_seq {
        let lag = last_seq - current_seq;
        ctx.caught_up.set(lag <= ctx.config.empty_block_interval);
        crate::metrics::set_seq_lag(lag);
        crate::metrics::set_caught_up(ctx.caught_up.get());
        if ctx.config.batch_fetch_seq_enable && lag > ctx.config.batch_fetch_seq_num {
            return Ok(FetchPlan::Count(ctx.config.batch_fetch_seq_num));
        }
        return Ok(FetchPlan::Count(0));
    }
    if last_seq == current_seq {
        return Ok(FetchPlan::Count(0));
    }
    if last_seq + 1 == current_seq {
        return Ok(FetchPlan::WaitingNewSeq);
    }
    Ok(FetchPlan::HashNotMatch)
}

/// Check chain continuity across a fetched batch, starting from
/// `last_seq_main_hash`. Returns the new trailing hash once every delta
/// in the batch has been verified to chain from its predecessor.
fn verify_continuity(deltas: &[MainBlockDelta], last_seq_main_hash: &[u8]) -> Result<Vec<u8>, FollowerError> {
    let mut prev = last_seq_main_hash.to_vec();
    for delta in deltas {
        let ok = match delta.ty {
            DeltaType::Add => prev == delta.header.parent_hash,
            DeltaType::Del => prev == delta.header.hash,
        };
        if !ok {
            return Err(FollowerError::HashNotMatch { height: delta.header.height.max(0) as u64 });
        }
        prev = delta.header.hash.clone();
    }
    Ok(prev)
}

/// Step D: apply every delta in a verified batch, appending or deleting
/// local para blocks with empty-span coalescing, and notifying
/// `CommitTracker` after each successful append.
async fn apply_deltas(ctx: &FollowerContext, deltas: &[MainBlockDelta]) -> Result<(), FollowerError> {
    let mut last_block = match ctx.store.get_last_local_height().await? {
        Some(h) => ctx.store.get_local_block_by_height(h).await?,
        None => None,
    };

    for delta in deltas {
        let filtered = ctx.filter.filter_txs_for_para(&ctx.config.title, delta);

        match delta.ty {
            DeltaType::Del => {
                let Some(current) = last_block.clone() else { continue };
                if filtered.is_empty() && delta.header.height > current.main_height {
                    crate::metrics::increment_deltas_coalesced();
                    continue;
                }
                ctx.store.del_local_block(current.height).await?;
                crate::metrics::increment_blocks_removed();
                last_block = if current.height > 0 {
                    ctx.store.get_local_block_by_height(current.height - 1).await?
                } else {
                    None
                };
            }
            DeltaType::Add => {
                let current_main_height = last_block.as_ref().map(|b| b.main_height).unwrap_or(0);
                if filtered.is_empty() && delta.header.height - current_main_height < ctx.config.empty_block_interval {
                    crate::metrics::increment_deltas_coalesced();
                    continue;
                }
                let next_height = last_block.as_ref().map(|b| b.height + 1).unwrap_or(0);
                let new_block = ParaLocalBlock {
                    height: next_height,
                    main_height: delta.header.height,
                    main_hash: delta.header.hash.clone(),
                    parent_main_hash: last_block.as_ref().map(|b| b.main_hash.clone()).unwrap_or_default(),
                    block_time: delta.header.block_time,
                    txs: filtered,
                };
                ctx.store.add_local_block(next_height, &new_block).await?;
                crate::metrics::increment_blocks_appended(if new_block.txs.is_empty() { "header_only" } else { "full" });
                ctx.commit_tracker.check_commit_tx_success(&delta.tx_details).await;
                last_block = Some(new_block);
            }
        }
    }
    Ok(())
}

/// One pass of the main loop body (steps A-F). Mutates `current_seq` and
/// `last_seq_main_hash` in place; returns whether the caller should sleep
/// before the next iteration.
async fn run_iteration(
    ctx: &FollowerContext,
    current_seq: &mut i64,
    last_seq_main_hash: &mut Vec<u8>,
) -> Result<Action, FollowerError> {
    match get_batch_fetch_seq_count(ctx, *current_seq).await? {
        FetchPlan::WaitingNewSeq => Ok(Action::Sleep),

        FetchPlan::HashNotMatch => {
            match switch_hash_matched_block(&ctx.store, ctx.adapter.as_ref(), ctx.config.search_hash_match_depth).await {
                Ok(MatchOutcome::Matched { seq, main_hash }) => {
                    *current_seq = seq + 1;
                    *last_seq_main_hash = main_hash;
                    Ok(Action::Continue)
                }
                Ok(MatchOutcome::GenesisSync { seq, chain_block }) => {
                    let genesis = ParaLocalBlock::from_chain_block(&chain_block);
                    ctx.store.add_local_block(chain_block.height, &genesis).await?;
                    *current_seq = seq + 1;
                    *last_seq_main_hash = chain_block.main_hash;
                    Ok(Action::Continue)
                }
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    warn!(error = %e, "hash matcher failed, backing off");
                    Ok(Action::Sleep)
                }
            }
        }

        FetchPlan::Count(count) => {
            // When batching is enabled, every fetch — including the
            // steady-state count==0 case — goes through the batched path,
            // mirroring the Go original's dispatch on batchFetchSeqEnable
            // itself rather than on whether this particular iteration
            // happens to need more than one delta.
            let deltas = if ctx.config.batch_fetch_seq_enable {
                adapter::get_block_range_checked(ctx.adapter.as_ref(), *current_seq, *current_seq + count + 1).await?
            } else {
                vec![ctx.adapter.get_block_on_main_by_seq(*current_seq).await?]
            };

            let expected_len = (count + 1) as usize;
            if deltas.len() != expected_len {
                // Adapter returned a short batch without erroring; discard
                // and retry without advancing state.
                return Ok(Action::Continue);
            }

            let new_hash = match verify_continuity(&deltas, last_seq_main_hash) {
                Ok(hash) => hash,
                Err(e) => return Err(e),
            };

            match apply_deltas(ctx, &deltas).await {
                Ok(()) => {
                    let last = deltas.last().expect("non-empty batch");
                    *last_seq_main_hash = match last.ty {
                        DeltaType::Add => new_hash,
                        DeltaType::Del => last.header.parent_hash.clone(),
                    };
                    *current_seq += count + 1;
                    crate::metrics::set_current_seq(*current_seq);
                    Ok(Action::Continue)
                }
                Err(e) => {
                    last_seq_main_hash.clear();
                    Err(e)
                }
            }
        }
    }
}

/// Runs the follower forever until `cancel` fires. Every suspension point
/// (RPC calls, bus calls, the idle backoff) is cooperative: the loop
/// checks `cancel` between iterations and while sleeping.
pub async fn run_follower_loop(ctx: Arc<FollowerContext>, cancel: CancellationToken) {
    let (mut current_seq, mut last_seq_main_hash) = loop {
        if cancel.is_cancelled() {
            return;
        }
        match initialize(&ctx).await {
            Ok(state) => break state,
            Err(e) if e.is_fatal() => panic!("{}", e.panic_message()),
            Err(e) => {
                error!(error = %e, "follower initialization failed, retrying");
                if sleep_or_cancel(ctx.config.block_sec, &cancel).await {
                    return;
                }
            }
        }
    };

    info!(seq = current_seq, "follower loop starting");

    while !cancel.is_cancelled() {
        match run_iteration(&ctx, &mut current_seq, &mut last_seq_main_hash).await {
            Ok(Action::Continue) => {}
            Ok(Action::Sleep) => {
                if sleep_or_cancel(ctx.config.block_sec, &cancel).await {
                    return;
                }
            }
            Err(e) if e.is_fatal() => panic!("{}", e.panic_message()),
            Err(e) => {
                warn!(error = %e, "follower iteration failed, backing off");
                if sleep_or_cancel(ctx.config.block_sec, &cancel).await {
                    return;
                }
            }
        }
    }
}

/// Sleeps up to `secs`, or returns early (with `true`) if cancelled.
async fn sleep_or_cancel(secs: u64, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_secs(secs)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockMainChainClient;
    use crate::bus::RocksDbBus;
    use crate::commit_tracker::MockCommitMsgSubmitter;
    use crate::filter::PrefixExecNameFilter;
    use crate::types::{ChainBlock, MainBlockHeader, Tx, TxDetail};

    fn test_ctx(adapter: MockMainChainClient) -> (Arc<FollowerContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&opts, dir.path(), ["default"]).unwrap();
        let bus: Arc<dyn LocalDbBus> = Arc::new(RocksDbBus::new(Arc::new(db), "default"));
        let adapter: Arc<dyn MainChainClient> = Arc::new(adapter);

        let mut submitter = MockCommitMsgSubmitter::new();
        submitter.expect_in_flight_tx().returning(|| None);

        let config = FollowerConfig {
            title: "user.p.test.".to_string(),
            search_hash_match_depth: 10,
            empty_block_interval: 6,
            batch_fetch_seq_enable: true,
            batch_fetch_seq_num: 3,
            block_sec: 1,
        };

        let caught_up = CaughtUpFlag::new();
        let commit_tracker = CommitTracker::new(
            Arc::new(submitter),
            adapter.clone(),
            caught_up.clone(),
            config.title.clone(),
        );

        let ctx = Arc::new(FollowerContext {
            store: LocalBlockStore::new(bus, caught_up.clone(), config.title.clone()),
            adapter,
            filter: Arc::new(PrefixExecNameFilter),
            commit_tracker,
            caught_up,
            config,
        });
        (ctx, dir)
    }

    fn test_ctx_no_batch(adapter: MockMainChainClient) -> (Arc<FollowerContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&opts, dir.path(), ["default"]).unwrap();
        let bus: Arc<dyn LocalDbBus> = Arc::new(RocksDbBus::new(Arc::new(db), "default"));
        let adapter: Arc<dyn MainChainClient> = Arc::new(adapter);

        let mut submitter = MockCommitMsgSubmitter::new();
        submitter.expect_in_flight_tx().returning(|| None);

        let config = FollowerConfig {
            title: "user.p.test.".to_string(),
            search_hash_match_depth: 10,
            empty_block_interval: 6,
            batch_fetch_seq_enable: false,
            batch_fetch_seq_num: 3,
            block_sec: 1,
        };

        let caught_up = CaughtUpFlag::new();
        let commit_tracker = CommitTracker::new(
            Arc::new(submitter),
            adapter.clone(),
            caught_up.clone(),
            config.title.clone(),
        );

        let ctx = Arc::new(FollowerContext {
            store: LocalBlockStore::new(bus, caught_up.clone(), config.title.clone()),
            adapter,
            filter: Arc::new(PrefixExecNameFilter),
            commit_tracker,
            caught_up,
            config,
        });
        (ctx, dir)
    }

    fn delta(ty: DeltaType, height: i64, hash: u8, parent_hash: u8, txs: Vec<TxDetail>) -> MainBlockDelta {
        MainBlockDelta {
            ty,
            header: MainBlockHeader { height, hash: vec![hash; 32], parent_hash: vec![parent_hash; 32], block_time: height },
            tx_details: txs,
        }
    }

    fn tx_detail(execer: &str) -> TxDetail {
        TxDetail {
            tx: Tx { hash: vec![1], execer: execer.to_string(), payload: vec![] },
            receipt: crate::types::Receipt { tx_hash: vec![1], ty: crate::types::ExecReceiptTy::ExecOk },
        }
    }

    // Steady add: lastSeq=100, CurrentSeq=95, batchFetchSeqNum=3 ->
    // count=3, fetch 4 deltas, all ADD with non-empty para txs.
    #[tokio::test]
    async fn steady_add_advances_by_count_plus_one() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_get_last_seq_on_main_chain().returning(|| Ok(100));
        adapter.expect_get_block_on_main_by_seq_range().returning(|start, end| {
            Ok((start..end)
                .map(|seq| {
                    delta(
                        DeltaType::Add,
                        seq,
                        seq as u8,
                        (seq - 1) as u8,
                        vec![tx_detail("user.p.test.coins")],
                    )
                })
                .collect())
        });

        let (ctx, _dir) = test_ctx(adapter);
        let mut current_seq = 95i64;
        let mut last_hash = vec![94u8; 32];

        let action = run_iteration(&ctx, &mut current_seq, &mut last_hash).await.unwrap();
        assert!(matches!(action, Action::Continue));
        assert_eq!(current_seq, 99);
        assert!(ctx.caught_up.get());
        assert_eq!(ctx.store.get_last_local_height().await.unwrap(), Some(3));
    }

    // Empty-coalesce: ADD with empty filtered txs and a small main
    // height gap produces no local block, but still advances current_seq.
    #[tokio::test]
    async fn empty_delta_within_interval_is_coalesced() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_get_last_seq_on_main_chain().returning(|| Ok(10));
        adapter
            .expect_get_block_on_main_by_seq_range()
            .returning(|_start, _end| Ok(vec![delta(DeltaType::Add, 5, 9, 4, vec![])]));

        let (ctx, _dir) = test_ctx(adapter);

        let genesis = ParaLocalBlock { height: 0, main_height: 3, main_hash: vec![4; 32], parent_main_hash: vec![], block_time: 0, txs: vec![] };
        ctx.store.add_local_block(0, &genesis).await.unwrap();

        let mut current_seq = 10i64;
        let mut last_hash = vec![4u8; 32];
        let action = run_iteration(&ctx, &mut current_seq, &mut last_hash).await.unwrap();
        assert!(matches!(action, Action::Continue));
        assert_eq!(current_seq, 11);
        // still at height 0: the empty delta was coalesced, not appended.
        assert_eq!(ctx.store.get_last_local_height().await.unwrap(), Some(0));
    }

    // DEL rewinds the tip by exactly one height and passes continuity
    // via prev == header.hash.
    #[tokio::test]
    async fn del_rewinds_tip_by_one() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_get_last_seq_on_main_chain().returning(|| Ok(10));
        adapter
            .expect_get_block_on_main_by_seq_range()
            .returning(|_start, _end| Ok(vec![delta(DeltaType::Del, 5, 5, 4, vec![tx_detail("user.p.test.coins")])]));

        let (ctx, _dir) = test_ctx(adapter);
        let genesis = ParaLocalBlock { height: 0, main_height: 3, main_hash: vec![4; 32], parent_main_hash: vec![], block_time: 0, txs: vec![] };
        let tip = ParaLocalBlock { height: 1, main_height: 5, main_hash: vec![5; 32], parent_main_hash: vec![4; 32], block_time: 0, txs: vec![tx_detail("user.p.test.coins").tx] };
        ctx.store.add_local_block(0, &genesis).await.unwrap();
        ctx.store.add_local_block(1, &tip).await.unwrap();

        let mut current_seq = 10i64;
        let mut last_hash = vec![5u8; 32];
        let action = run_iteration(&ctx, &mut current_seq, &mut last_hash).await.unwrap();
        assert!(matches!(action, Action::Continue));
        assert_eq!(ctx.store.get_last_local_height().await.unwrap(), Some(0));
        assert_eq!(last_hash, vec![4u8; 32]);
    }

    #[tokio::test]
    async fn initializes_fresh_genesis_when_no_local_tip_exists() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_request_last_block().returning(|| {
            Ok(ChainBlock { height: 0, main_height: 0, main_hash: vec![9; 32], parent_main_hash: vec![], block_time: 0 })
        });
        adapter.expect_get_seq_by_hash_on_main_chain().returning(|_| Ok(Some(1)));

        let (ctx, _dir) = test_ctx(adapter);
        let (seq, hash) = initialize(&ctx).await.unwrap();
        assert_eq!(seq, 2);
        assert_eq!(hash, vec![9; 32]);
        assert_eq!(ctx.store.get_last_local_height().await.unwrap(), Some(0));
    }

    // A node that already has committed para blocks reports a non-zero
    // RequestLastBlock height; initialize must write the genesis-equivalent
    // realigned block at that real height, not reset it to 0.
    #[tokio::test]
    async fn initializes_at_the_chain_blocks_real_height_when_nonzero() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_request_last_block().returning(|| {
            Ok(ChainBlock { height: 77, main_height: 8077, main_hash: vec![9; 32], parent_main_hash: vec![8; 32], block_time: 0 })
        });
        adapter.expect_get_seq_by_hash_on_main_chain().returning(|_| Ok(Some(1)));

        let (ctx, _dir) = test_ctx(adapter);
        let (seq, hash) = initialize(&ctx).await.unwrap();
        assert_eq!(seq, 2);
        assert_eq!(hash, vec![9; 32]);
        assert_eq!(ctx.store.get_last_local_height().await.unwrap(), Some(77));
        let block = ctx.store.get_local_block_by_height(77).await.unwrap().unwrap();
        assert_eq!(block.main_height, 8077);
        assert_eq!(block.parent_main_hash, vec![8; 32]);
    }

    // With batching disabled, every fetch (including a lagging one) uses
    // the single-seq RPC rather than the batched range.
    #[tokio::test]
    async fn batching_disabled_uses_single_fetch_for_every_count() {
        let mut adapter = MockMainChainClient::new();
        adapter.expect_get_last_seq_on_main_chain().returning(|| Ok(11));
        adapter
            .expect_get_block_on_main_by_seq()
            .returning(|seq| Ok(delta(DeltaType::Add, seq, seq as u8, (seq - 1) as u8, vec![tx_detail("user.p.test.coins")])));

        let (ctx, _dir) = test_ctx_no_batch(adapter);
        let mut current_seq = 10i64;
        let mut last_hash = vec![9u8; 32];

        let action = run_iteration(&ctx, &mut current_seq, &mut last_hash).await.unwrap();
        assert!(matches!(action, Action::Continue));
        assert_eq!(current_seq, 11);
    }
}
