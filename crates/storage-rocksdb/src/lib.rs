// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

pub mod keys;
pub mod reservation_table;
pub mod usage_table;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::BytesMut;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBPinnableSlice,
    DBRawIteratorWithThreadMode, ErrorKind, MultiThreaded, OptimisticTransactionOptions,
    PrefixRange, ReadOptions, WriteOptions,
};
use tracing::debug;

use quota_storage_api::{IsolationLevel, Storage, StorageError, Transaction};
use quota_types::storage::{StorageCodec, StorageDecode, StorageEncode};

use crate::keys::TableKey;

pub type DB = rocksdb::OptimisticTransactionDB<MultiThreaded>;
pub type DBIteratorTransaction<'b, 'a> =
    DBRawIteratorWithThreadMode<'b, rocksdb::Transaction<'a, DB>>;

const RESERVATIONS_TABLE_NAME: &str = "reservations";
const USAGE_TABLE_NAME: &str = "usage";

pub(crate) type Result<T> = std::result::Result<T, StorageError>;

pub enum TableScanIterationDecision<R> {
    Emit(Result<R>),
    Continue,
    Break,
    BreakWith(Result<R>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TableKind {
    /// Reservations keyed by tenant and id plus the id to tenant index
    Reservation,
    /// Usage rows keyed by tenant and resource
    Usage,
}

impl TableKind {
    pub const fn cf_name(&self) -> &'static str {
        match self {
            TableKind::Reservation => RESERVATIONS_TABLE_NAME,
            TableKind::Usage => USAGE_TABLE_NAME,
        }
    }

    pub fn all() -> core::slice::Iter<'static, TableKind> {
        static VARIANTS: &[TableKind] = &[TableKind::Reservation, TableKind::Usage];
        VARIANTS.iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),
    #[error("failed to create the data directory: {0}")]
    DataDir(#[from] std::io::Error),
    #[error("opening the database was interrupted")]
    Shutdown,
}

/// Maps rocksdb errors to storage errors. Optimistic transactions report write conflicts as
/// `Busy` or `TryAgain`.
fn storage_error(err: rocksdb::Error) -> StorageError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => StorageError::Conflict(err.into()),
        ErrorKind::TimedOut => StorageError::TransactionTimeout,
        ErrorKind::ShutdownInProgress => StorageError::OperationalError,
        _ => StorageError::Generic(err.into()),
    }
}

pub struct RocksDBStorage {
    db: Arc<DB>,
    key_buffer: BytesMut,
    value_buffer: BytesMut,
}

impl std::fmt::Debug for RocksDBStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDBStorage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Clone for RocksDBStorage {
    fn clone(&self) -> Self {
        RocksDBStorage {
            db: self.db.clone(),
            key_buffer: BytesMut::default(),
            value_buffer: BytesMut::default(),
        }
    }
}

fn db_options() -> rocksdb::Options {
    let mut db_options = rocksdb::Options::default();
    db_options.create_if_missing(true);
    db_options.create_missing_column_families(true);
    // no need to retain 1000 log files by default.
    db_options.set_keep_log_file_num(1);

    db_options
}

fn cf_options() -> rocksdb::Options {
    let mut cf_options = rocksdb::Options::default();
    // Reservations are short-lived, delay flushing to increase the chances to observe their
    // deletion in the memtable.
    cf_options.set_max_write_buffer_number(3);
    cf_options.set_min_write_buffer_number_to_merge(2);
    cf_options.set_num_levels(7);
    cf_options.set_compression_per_level(&[
        DBCompressionType::None,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Zstd,
    ]);

    cf_options
}

impl RocksDBStorage {
    /// Returns the raw rocksdb handle, this should only be used for operations that require
    /// direct access to rocksdb.
    pub fn inner(&self) -> Arc<DB> {
        self.db.clone()
    }

    pub async fn open(data_dir: PathBuf) -> std::result::Result<Self, BuildError> {
        let db = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&data_dir)?;
            let cfs = TableKind::all()
                .map(|kind| ColumnFamilyDescriptor::new(kind.cf_name(), cf_options()));
            debug!("Opening reservation store at {}", data_dir.display());
            Ok::<_, BuildError>(DB::open_cf_descriptors(&db_options(), &data_dir, cfs)?)
        })
        .await
        .map_err(|_| BuildError::Shutdown)??;

        Ok(Self {
            db: Arc::new(db),
            key_buffer: BytesMut::default(),
            value_buffer: BytesMut::default(),
        })
    }

    pub fn transaction_with_isolation(&mut self, isolation: IsolationLevel) -> RocksDBTransaction {
        let mut txn_options = OptimisticTransactionOptions::new();
        // validate written keys against the snapshot taken at the start of the transaction
        txn_options.set_snapshot(isolation == IsolationLevel::Serializable);

        RocksDBTransaction {
            txn: self
                .db
                .transaction_opt(&WriteOptions::default(), &txn_options),
            db: &self.db,
            key_buffer: &mut self.key_buffer,
            value_buffer: &mut self.value_buffer,
        }
    }
}

impl Storage for RocksDBStorage {
    type TransactionType<'a> = RocksDBTransaction<'a>;

    fn transaction_with_isolation(
        &mut self,
        isolation: IsolationLevel,
    ) -> Self::TransactionType<'_> {
        RocksDBStorage::transaction_with_isolation(self, isolation)
    }
}

pub struct RocksDBTransaction<'a> {
    txn: rocksdb::Transaction<'a, DB>,
    db: &'a DB,
    key_buffer: &'a mut BytesMut,
    value_buffer: &'a mut BytesMut,
}

impl<'a> RocksDBTransaction<'a> {
    fn table_handle(&self, table_kind: TableKind) -> Result<Arc<BoundColumnFamily<'a>>> {
        self.db.cf_handle(table_kind.cf_name()).ok_or_else(|| {
            StorageError::Generic(anyhow!(
                "column family '{}' is missing",
                table_kind.cf_name()
            ))
        })
    }

    fn prefix_iterator(
        &self,
        table: TableKind,
        prefix: Vec<u8>,
    ) -> Result<DBIteratorTransaction<'_, 'a>> {
        let table = self.table_handle(table)?;
        let mut opts = ReadOptions::default();
        opts.set_iterate_range(PrefixRange(prefix.clone()));

        let mut it = self.txn.raw_iterator_cf_opt(&table, opts);
        it.seek(prefix);
        Ok(it)
    }

    #[inline]
    fn cleared_key_buffer_mut(&mut self, min_size: usize) -> &mut BytesMut {
        self.key_buffer.clear();
        self.key_buffer.reserve(min_size);
        self.key_buffer
    }

    #[inline]
    fn cleared_value_buffer_mut(&mut self, min_size: usize) -> &mut BytesMut {
        self.value_buffer.clear();
        self.value_buffer.reserve(min_size);
        self.value_buffer
    }

    #[inline]
    fn get<K: AsRef<[u8]>>(&self, table: TableKind, key: K) -> Result<Option<DBPinnableSlice>> {
        let table = self.table_handle(table)?;
        self.txn.get_pinned_cf(&table, key).map_err(storage_error)
    }

    #[inline]
    fn put_cf(
        &mut self,
        table: TableKind,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let table = self.table_handle(table)?;
        self.txn.put_cf(&table, key, value).map_err(storage_error)
    }

    #[inline]
    fn delete_cf(&mut self, table: TableKind, key: impl AsRef<[u8]>) -> Result<()> {
        let table = self.table_handle(table)?;
        self.txn.delete_cf(&table, key).map_err(storage_error)
    }

    #[inline]
    fn put_kv_raw<K: TableKey, V: AsRef<[u8]>>(&mut self, key: K, value: V) -> Result<()> {
        let key_buffer = self.cleared_key_buffer_mut(key.serialized_length());
        key.serialize_to(key_buffer);
        let key_buffer = key_buffer.split();

        self.put_cf(K::table(), key_buffer, value)
    }

    #[inline]
    fn put_kv<K: TableKey, V: StorageEncode>(&mut self, key: K, value: &V) -> Result<()> {
        let key_buffer = self.cleared_key_buffer_mut(key.serialized_length());
        key.serialize_to(key_buffer);
        let key_buffer = key_buffer.split();

        let value_buffer = self.cleared_value_buffer_mut(0);
        StorageCodec::encode(value, value_buffer)
            .map_err(|err| StorageError::Conversion(err.into()))?;
        let value_buffer = value_buffer.split();

        self.put_cf(K::table(), key_buffer, value_buffer)
    }

    #[inline]
    fn delete_key<K: TableKey>(&mut self, key: &K) -> Result<()> {
        let buffer = self.cleared_key_buffer_mut(key.serialized_length());
        key.serialize_to(buffer);
        let buffer = buffer.split();

        self.delete_cf(K::table(), buffer)
    }

    #[inline]
    fn get_value<K, V>(&mut self, key: K) -> Result<Option<V>>
    where
        K: TableKey,
        V: StorageDecode,
    {
        self.get_kv_raw(key, |_k, v| v.map(decode_value).transpose())
    }

    #[inline]
    fn get_kv_raw<K, F, R>(&mut self, key: K, f: F) -> Result<R>
    where
        K: TableKey,
        F: FnOnce(&[u8], Option<&[u8]>) -> Result<R>,
    {
        let buf = self.cleared_key_buffer_mut(key.serialized_length());
        key.serialize_to(buf);
        let buf = buf.split();

        let value = self.get(K::table(), &buf)?;
        f(&buf, value.as_deref())
    }

    fn for_each_key_value_in_place<K, F, R>(&self, prefix: K, mut op: F) -> Vec<Result<R>>
    where
        K: TableKey,
        F: FnMut(&[u8], &[u8]) -> TableScanIterationDecision<R>,
    {
        let mut res = Vec::new();

        let mut iterator = match self.prefix_iterator(K::table(), prefix.serialize().to_vec()) {
            Ok(iterator) => iterator,
            Err(err) => return vec![Err(err)],
        };

        while let Some((k, v)) = iterator.item() {
            match op(k, v) {
                TableScanIterationDecision::Emit(result) => {
                    res.push(result);
                    iterator.next();
                }
                TableScanIterationDecision::BreakWith(result) => {
                    res.push(result);
                    break;
                }
                TableScanIterationDecision::Continue => {
                    iterator.next();
                    continue;
                }
                TableScanIterationDecision::Break => {
                    break;
                }
            };
        }

        if let Err(err) = iterator.status() {
            res.push(Err(storage_error(err)));
        }

        res
    }
}

fn decode_value<V: StorageDecode>(mut slice: &[u8]) -> Result<V> {
    StorageCodec::decode::<V, _>(&mut slice).map_err(|err| StorageError::Conversion(err.into()))
}

impl Transaction for RocksDBTransaction<'_> {
    async fn commit(self) -> Result<()> {
        self.txn.commit().map_err(storage_error)
    }
}
