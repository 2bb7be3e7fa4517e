//! HashMatcher: reorg-recovery procedure that finds the highest locally or
//! remotely known main-chain hash still present on the canonical main
//! chain. Grounded step-for-step on `paracreate.go`'s
//! `switchHashMatchedBlock`/`switchLocalHashMatchedBlock`/
//! `switchMatchedBlockOnChain`, and on `reorg.rs::find_fork_point`'s
//! descend-by-height walk for the general shape of the search.

use tracing::{info, warn};

use crate::adapter::MainChainClient;
use crate::error::FollowerError;
use crate::store::LocalBlockStore;
use crate::types::{ChainBlock, ParaLocalBlock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A common ancestor was found, either locally or on-chain. The local
    /// store's tip has already been rewound (or realigned) to match.
    Matched { seq: i64, main_hash: Vec<u8> },
    /// No ancestor match exists at all; the follower should treat this as
    /// a fresh start from the main chain's current tip. No local write
    /// has happened yet — the caller is responsible for writing the
    /// genesis block.
    GenesisSync { seq: i64, chain_block: ChainBlock },
}

/// `switchHashMatchedBlock`: local walk takes precedence over the
/// chain-side fallback because it is cheaper and more likely to succeed
/// for small reorgs.
pub async fn switch_hash_matched_block(
    store: &LocalBlockStore,
    adapter: &dyn MainChainClient,
    search_hash_match_depth: u64,
) -> Result<MatchOutcome, FollowerError> {
    crate::metrics::increment_reorg_events();
    warn!("hash mismatch detected, searching for common ancestor");
    if let Some(matched) = switch_local_hash_matched_block(store, adapter).await? {
        crate::metrics::increment_reorg_local_walk_hits();
        info!(seq = matched_seq(&matched), "reorg resolved via local walk");
        return Ok(matched);
    }
    let outcome = switch_matched_block_on_chain(store, adapter, search_hash_match_depth).await?;
    info!(seq = matched_seq(&outcome), "reorg resolved via chain-side fallback");
    Ok(outcome)
}

fn matched_seq(outcome: &MatchOutcome) -> i64 {
    match outcome {
        MatchOutcome::Matched { seq, .. } => *seq,
        MatchOutcome::GenesisSync { seq, .. } => *seq,
    }
}

/// `switchLocalHashMatchedBlock`: descend `height = last .. 0`, probing
/// each local block's `mainHash` against the main chain. On the first
/// hit, truncate the tip pointer to that height via `remove_local_blocks`
/// (bodies above are left as stale entries a later `add_local_block` will
/// overwrite).
async fn switch_local_hash_matched_block(
    store: &LocalBlockStore,
    adapter: &dyn MainChainClient,
) -> Result<Option<MatchOutcome>, FollowerError> {
    let Some(last_height) = store.get_last_local_height().await? else {
        return Ok(None);
    };

    let mut height = last_height;
    loop {
        if let Some(block) = store.get_local_block_by_height(height).await? {
            if let Some(seq) = adapter.get_seq_by_hash_on_main_chain(&block.main_hash).await? {
                store.remove_local_blocks(height).await?;
                return Ok(Some(MatchOutcome::Matched { seq, main_hash: block.main_hash }));
            }
        }
        if height == 0 {
            return Ok(None);
        }
        height -= 1;
    }
}

/// `switchMatchedBlockOnChain`: fall back to the node's own chain DB,
/// descending from `RequestLastBlock()` up to `search_hash_match_depth`
/// blocks. On a hit, realign the local store to a header-only tip at the
/// matched `ChainBlock`'s own committed height (`alignLocalBlock2ChainBlock`
/// writes `addLocalBlock(chainBlock.Height, ...)`, never a fixed height).
/// Depth exhaustion without a hit is fatal; reaching height 1 without a hit
/// falls back to genesis sync, same as reaching height 0 immediately.
async fn switch_matched_block_on_chain(
    store: &LocalBlockStore,
    adapter: &dyn MainChainClient,
    search_hash_match_depth: u64,
) -> Result<MatchOutcome, FollowerError> {
    let last_block = adapter.request_last_block().await?;
    if last_block.height == 0 {
        return genesis_sync(adapter).await;
    }

    let mut height = last_block.height;
    let mut searched: u64 = 0;
    loop {
        let block = if height == last_block.height {
            last_block.clone()
        } else {
            adapter.get_block_by_height(height).await?
        };

        if let Some(seq) = adapter.get_seq_by_hash_on_main_chain(&block.main_hash).await? {
            let realigned = ParaLocalBlock::from_chain_block(&block);
            store.add_local_block(block.height, &realigned).await?;
            return Ok(MatchOutcome::Matched { seq, main_hash: block.main_hash });
        }

        if height <= 1 {
            return genesis_sync(adapter).await;
        }

        searched += 1;
        if searched >= search_hash_match_depth {
            return Err(FollowerError::DepthExhausted { searched, max: search_hash_match_depth });
        }
        height -= 1;
    }
}

/// Obtain the main chain's current tip and its seq, with no local writes.
/// The caller (`FollowerLoop` initialization) writes the genesis para
/// block itself.
async fn genesis_sync(adapter: &dyn MainChainClient) -> Result<MatchOutcome, FollowerError> {
    let chain_block = adapter.request_last_block().await?;
    let seq = adapter
        .get_seq_by_hash_on_main_chain(&chain_block.main_hash)
        .await?
        .ok_or_else(|| FollowerError::NotFound("no seq for main-chain tip".to_string()))?;
    Ok(MatchOutcome::GenesisSync { seq, chain_block })
}
