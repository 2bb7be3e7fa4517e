//! LocalBlockStore: persists derived para blocks keyed by `(title, height)`
//! plus a `lastHeight` pointer, with atomic multi-key writes over the bus.
//!
//! Grounded on `atomic_writer.rs`'s `AtomicBatchWriter` (all keys committed
//! together or not at all) and `reorg.rs`'s height-keyed layout
//! (`height.to_le_bytes()`), generalized from "all column families in one
//! batch" to "the two LocalDb key families per title in one bus call" so
//! that a tip pointer and its block body always land together.

use std::sync::Arc;

use crate::bus::{self, KeyValue, LocalDbBus};
use crate::caught_up::CaughtUpFlag;
use crate::error::BusError;
use crate::types::{self, ParaLocalBlock};

const HEIGHT_KEY_PREFIX: u8 = b'h';
const LAST_HEIGHT_KEY_PREFIX: u8 = b'l';

fn title_height_key(title: &str, height: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + title.len() + 8);
    key.push(HEIGHT_KEY_PREFIX);
    key.extend_from_slice(title.as_bytes());
    key.extend_from_slice(&height.to_le_bytes());
    key
}

fn title_last_height_key(title: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + title.len());
    key.push(LAST_HEIGHT_KEY_PREFIX);
    key.extend_from_slice(title.as_bytes());
    key
}

fn note_bus_err<T>(result: Result<T, BusError>) -> Result<T, BusError> {
    if let Err(e) = &result {
        crate::metrics::increment_bus_errors(e.kind());
    }
    result
}

pub struct LocalBlockStore {
    bus: Arc<dyn LocalDbBus>,
    caught_up: Arc<CaughtUpFlag>,
    title: String,
}

impl LocalBlockStore {
    pub fn new(bus: Arc<dyn LocalDbBus>, caught_up: Arc<CaughtUpFlag>, title: impl Into<String>) -> Self {
        LocalBlockStore {
            bus,
            caught_up,
            title: title.into(),
        }
    }

    /// Writes `TitleHeightKey(title,height) -> Encode(block)` and sets
    /// `TitleLastHeightKey` to `height`, in one atomic two-key set.
    pub async fn add_local_block(&self, height: i64, block: &ParaLocalBlock) -> Result<(), BusError> {
        let encoded = types::encode(block).map_err(|e| BusError::Transport(e.to_string()))?;
        let kvs = vec![
            KeyValue { key: title_height_key(&self.title, height), value: encoded },
            KeyValue {
                key: title_last_height_key(&self.title),
                value: height.to_le_bytes().to_vec(),
            },
        ];
        note_bus_err(bus::set_values(self.bus.as_ref(), kvs, self.caught_up.get()).await)
    }

    /// Writes a tombstone (empty value) at `TitleHeightKey(title,height)`
    /// and sets `TitleLastHeightKey` to `height-1`, atomically.
    pub async fn del_local_block(&self, height: i64) -> Result<(), BusError> {
        let kvs = vec![
            KeyValue { key: title_height_key(&self.title, height), value: Vec::new() },
            KeyValue {
                key: title_last_height_key(&self.title),
                value: (height - 1).to_le_bytes().to_vec(),
            },
        ];
        note_bus_err(bus::set_values(self.bus.as_ref(), kvs, self.caught_up.get()).await)
    }

    /// Sets `TitleLastHeightKey` to `cur_height` without touching block
    /// keys; relies on future `add_local_block` calls to overwrite stale
    /// entries above `cur_height`.
    pub async fn remove_local_blocks(&self, cur_height: i64) -> Result<(), BusError> {
        let kvs = vec![KeyValue {
            key: title_last_height_key(&self.title),
            value: cur_height.to_le_bytes().to_vec(),
        }];
        note_bus_err(bus::set_values(self.bus.as_ref(), kvs, self.caught_up.get()).await)
    }

    /// Returns the persisted `TitleLastHeightKey`, or `None` if absent.
    pub async fn get_last_local_height(&self) -> Result<Option<i64>, BusError> {
        let key = title_last_height_key(&self.title);
        let bytes = note_bus_err(bus::get_values_checked(self.bus.as_ref(), vec![key]).await)?.remove(0);
        match bytes {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| BusError::Transport("malformed lastHeight value".into()))?;
                Ok(Some(i64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Returns the decoded block, or `None` if the value at that key is
    /// null (never created, or a tombstone left by `del_local_block`).
    pub async fn get_local_block_by_height(&self, height: i64) -> Result<Option<ParaLocalBlock>, BusError> {
        let key = title_height_key(&self.title, height);
        let bytes = note_bus_err(bus::get_values_checked(self.bus.as_ref(), vec![key]).await)?.remove(0);
        match bytes {
            Some(bytes) if !bytes.is_empty() => {
                let block = types::decode(&bytes).map_err(|e| BusError::Transport(e.to_string()))?;
                Ok(Some(block))
            }
            _ => Ok(None),
        }
    }
}
