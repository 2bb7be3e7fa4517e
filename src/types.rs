//! Wire and storage types for the follower engine.
//!
//! Encoded with `bincode`, the same role chain33's protobuf-generated
//! `types.Encode`/`Decode` plays in `paracreate.go` — a flat,
//! schema-stable byte encoding for both RPC payloads and LocalDb values.

use serde::{Deserialize, Serialize};

/// A single transaction as seen on the main chain, already narrowed to
/// this para's title by the filter contract (`filter::ParaTxFilter`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub hash: Vec<u8>,
    pub execer: String,
    pub payload: Vec<u8>,
}

/// Outcome of a transaction once it executes on the main chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecReceiptTy {
    ExecOk,
    ExecFail,
}

/// Receipt backing `QueryTxOnMainByHash` and `checkCommitTxSuccess`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Vec<u8>,
    pub ty: ExecReceiptTy,
}

/// One transaction's inclusion detail inside a `MainBlockDelta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDetail {
    pub tx: Tx,
    pub receipt: Receipt,
}

/// A main-chain block header, used for `MainBlockDelta::header` — the
/// main chain's own hash-chain linkage (`hash`/`parent_hash`) for a
/// single sequenced delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainBlockHeader {
    pub height: i64,
    pub hash: Vec<u8>,
    pub parent_hash: Vec<u8>,
    pub block_time: i64,
}

/// The node's own authoritative chain block, as returned by
/// `RequestLastBlock`/`GetBlockByHeight` (the node's own committed chain
/// DB, populated by a non-follower path, distinct from both
/// `MainBlockHeader` and `LocalBlockStore`). It carries its own committed
/// `height` *and* the main-chain height/hash it derives from — chain33's
/// `types.Block` carries both `Height` and `MainHeight`/`MainHash`, and
/// `alignLocalBlock2ChainBlock` writes at the block's own height, never a
/// fixed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub height: i64,
    pub main_height: i64,
    pub main_hash: Vec<u8>,
    pub parent_main_hash: Vec<u8>,
    pub block_time: i64,
}

/// Whether a `MainBlockDelta` represents a block being added to, or
/// removed from, the main chain's committed sequence log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaType {
    Add,
    Del,
}

/// One entry in the main chain's sequenced delta log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainBlockDelta {
    pub ty: DeltaType,
    pub header: MainBlockHeader,
    pub tx_details: Vec<TxDetail>,
}

/// A locally persisted para block, derived from one `MainBlockDelta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParaLocalBlock {
    pub height: i64,
    pub main_height: i64,
    pub main_hash: Vec<u8>,
    pub parent_main_hash: Vec<u8>,
    pub block_time: i64,
    pub txs: Vec<Tx>,
}

impl ParaLocalBlock {
    /// Derives a `ParaLocalBlock` from a `ChainBlock` the node already
    /// considers authoritative — used both for true genesis (a `ChainBlock`
    /// at height 0 with no parent) and for chain-side realignment, where the
    /// block's own `height`/`main_height`/`main_hash`/`parent_main_hash`
    /// carry over unchanged rather than being reset.
    pub fn from_chain_block(block: &ChainBlock) -> Self {
        ParaLocalBlock {
            height: block.height,
            main_height: block.main_height,
            main_hash: block.main_hash.clone(),
            parent_main_hash: block.parent_main_hash.clone(),
            block_time: block.block_time,
            txs: Vec::new(),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}
