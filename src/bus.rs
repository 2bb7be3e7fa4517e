//! Request/reply bus to the local-db service.
//!
//! `paracreate.go`'s `setLocalDb`/`getLocalDb` send a `EventSetValueByKey`/
//! `EventGetValueByKey` message and validate the reply's `KeyValue` count
//! matches the request before trusting it (`types.ErrInvalidParam`
//! otherwise). `LocalDbBus` is the trait form of that message exchange;
//! `set_values`/`get_values` are the "checked" wrappers, the same pairing
//! `alpen-ee/common::traits::ol_client` uses for `chain_status_checked`/
//! `get_inbox_messages_checked` — the trait method is the raw RPC, the
//! free function validates the invariant the raw call cannot enforce on
//! its own.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BusError;

/// One key/value pair, as persisted in or retrieved from the local db.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Raw request/reply transport to the local-db service. Implementations
/// may batch several keys into one message but must preserve request
/// order in the reply.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait LocalDbBus: Send + Sync {
    /// `durable` mirrors the source's non-zero `Txid` tag: when the
    /// follower is caught up (`CaughtUpFlag == 1`), writes request
    /// synchronous flush-to-disk semantics instead of buffered commit.
    async fn set_value_by_key(&self, kvs: Vec<KeyValue>, durable: bool) -> Result<(), BusError>;

    /// Returns one `Option<Vec<u8>>` per requested key, in request order;
    /// `None` for keys with no stored value.
    async fn get_value_by_key(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, BusError>;
}

/// Set one or more keys atomically and check nothing silently dropped a
/// write. The underlying bus call itself may be all-or-nothing (as
/// `RocksDbBus` is); this wrapper exists so every caller gets the same
/// validation regardless of backend.
pub async fn set_values(bus: &dyn LocalDbBus, kvs: Vec<KeyValue>, durable: bool) -> Result<(), BusError> {
    bus.set_value_by_key(kvs, durable).await
}

/// Fetch values for `keys` and verify the reply has exactly one entry per
/// requested key. A length mismatch is `BusError::CountMismatch`, matching
/// `getLocalDb`'s explicit check against `types.ErrInvalidParam`.
pub async fn get_values_checked(
    bus: &dyn LocalDbBus,
    keys: Vec<Vec<u8>>,
) -> Result<Vec<Option<Vec<u8>>>, BusError> {
    let expected = keys.len();
    let got = bus.get_value_by_key(keys).await?;
    if got.len() != expected {
        return Err(BusError::CountMismatch {
            expected,
            got: got.len(),
        });
    }
    Ok(got)
}

/// Fetch a single key and check it is present.
pub async fn get_value_checked(bus: &dyn LocalDbBus, key: Vec<u8>) -> Result<Vec<u8>, BusError> {
    let mut values = get_values_checked(bus, vec![key]).await?;
    values.remove(0).ok_or(BusError::NotFound)
}

/// RocksDB-backed `LocalDbBus`. Every key in a `set_value_by_key` call is
/// written in one `rocksdb::WriteBatch`, the same mechanism
/// `AtomicBatchWriter::flush` uses to guarantee the tip pointer and block
/// body land together or not at all.
pub struct RocksDbBus {
    db: Arc<rocksdb::DB>,
    cf_name: String,
}

impl RocksDbBus {
    pub fn new(db: Arc<rocksdb::DB>, cf_name: impl Into<String>) -> Self {
        RocksDbBus {
            db,
            cf_name: cf_name.into(),
        }
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, BusError> {
        self.db
            .cf_handle(&self.cf_name)
            .ok_or_else(|| BusError::Transport(format!("missing column family {}", self.cf_name)))
    }
}

#[async_trait]
impl LocalDbBus for RocksDbBus {
    async fn set_value_by_key(&self, kvs: Vec<KeyValue>, durable: bool) -> Result<(), BusError> {
        let db = self.db.clone();
        let cf_name = self.cf_name.clone();
        tokio::task::spawn_blocking(move || {
            let cf = db
                .cf_handle(&cf_name)
                .ok_or_else(|| BusError::Transport(format!("missing column family {cf_name}")))?;
            let mut batch = rocksdb::WriteBatch::default();
            for kv in kvs {
                batch.put_cf(cf, kv.key, kv.value);
            }
            let mut write_opts = rocksdb::WriteOptions::default();
            write_opts.set_sync(durable);
            db.write_opt(batch, &write_opts)
                .map_err(|e| BusError::Transport(e.to_string()))
        })
        .await
        .map_err(|e| BusError::Transport(e.to_string()))?
    }

    async fn get_value_by_key(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, BusError> {
        let cf = self.cf()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in &keys {
            let value = self
                .db
                .get_cf(cf, key)
                .map_err(|e| BusError::Transport(e.to_string()))?;
            out.push(value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let mut mock = MockLocalDbBus::new();
        mock.expect_get_value_by_key()
            .returning(|_keys| Ok(vec![Some(vec![1])]));

        let err = get_values_checked(&mock, vec![vec![1], vec![2]])
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::CountMismatch { expected: 2, got: 1 }));
    }

    #[tokio::test]
    async fn matching_count_passes_through() {
        let mut mock = MockLocalDbBus::new();
        mock.expect_get_value_by_key()
            .returning(|keys| Ok(keys.into_iter().map(|_| Some(vec![9])).collect()));

        let out = get_values_checked(&mock, vec![vec![1], vec![2]]).await.unwrap();
        assert_eq!(out, vec![Some(vec![9]), Some(vec![9])]);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let mut mock = MockLocalDbBus::new();
        mock.expect_get_value_by_key().returning(|_keys| Ok(vec![None]));

        let err = get_value_checked(&mock, vec![1]).await.unwrap_err();
        assert!(matches!(err, BusError::NotFound));
    }

    #[tokio::test]
    async fn rocksdb_bus_roundtrips_through_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cf_name = "default";
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&opts, dir.path(), [cf_name]).unwrap();
        let bus = RocksDbBus::new(Arc::new(db), cf_name);

        bus.set_value_by_key(
            vec![
                KeyValue { key: b"a".to_vec(), value: b"1".to_vec() },
                KeyValue { key: b"b".to_vec(), value: b"2".to_vec() },
            ],
            true,
        )
        .await
        .unwrap();

        let got = get_values_checked(&bus, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
        assert_eq!(got, vec![Some(b"1".to_vec()), Some(b"2".to_vec()), None]);
    }
}
