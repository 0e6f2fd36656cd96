//! The transactional store behind all column families.
//!
//! # Transaction Model
//!
//! State mutation is single-writer per partition: at most one transaction is open
//! on a [`StateDb`] at a time. Writes of the open transaction go to a write buffer
//! layered over the committed keyspace, so the transaction reads its own writes
//! while nothing outside it sees them. Commit applies the buffer atomically;
//! rollback (explicit, on error, or on drop) discards it.
//!
//! ```text
//!   ColumnFamily::get ──► write buffer ──(miss)──► committed keyspace
//!   ColumnFamily::put ──► write buffer
//!   Transaction::commit ──► buffer applied to committed keyspace (flush point)
//! ```
//!
//! Operations issued while no transaction is open run in an implicit
//! single-operation transaction that commits immediately.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::column_family::{ColumnFamily, ColumnFamilyName, SCHEMA_VERSION};
use super::key::{DbKey, DbValue};
use crate::config::ConsistencyChecks;
use crate::error::{StateError, StateResult};
use crate::metrics::StoreMetrics;

/// The committed, ordered keyspace shared by all families.
pub(crate) type Keyspace = BTreeMap<Vec<u8>, Vec<u8>>;

/// Uncommitted writes; `None` marks a deletion.
type WriteBuffer = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

struct DbInner {
    committed: Keyspace,
    open: Option<WriteBuffer>,
    metrics: Option<Arc<StoreMetrics>>,
}

impl DbInner {
    fn commit(&mut self, buffer: WriteBuffer) {
        let metrics = self.metrics.clone();
        let _timer = metrics.as_ref().map(|m| m.observe_commit());
        let writes = buffer.len();

        for (key, value) in buffer {
            match value {
                Some(value) => {
                    self.committed.insert(key, value);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }

        if let Some(metrics) = metrics {
            metrics.record_committed_writes(writes);
        }
    }

    fn rollback(&mut self) -> bool {
        let rolled_back = self.open.take().is_some();
        if rolled_back && let Some(metrics) = &self.metrics {
            metrics.record_rollback();
        }
        rolled_back
    }
}

/// Read access to the keyspace as seen from inside the open transaction.
pub(crate) struct ReadView<'a> {
    committed: &'a Keyspace,
    buffer: Option<&'a WriteBuffer>,
}

impl ReadView<'_> {
    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(entry) = self.buffer.and_then(|b| b.get(key)) {
            return entry.clone();
        }
        self.committed.get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        if let Some(entry) = self.buffer.and_then(|b| b.get(key)) {
            return entry.is_some();
        }
        self.committed.contains_key(key)
    }

    /// Entries whose key starts with `prefix`, in key order, merged from the
    /// write buffer and the committed keyspace.
    pub(crate) fn scan(&self, prefix: &[u8], limit: Option<usize>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut committed = self
            .committed
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .peekable();
        let mut buffered = self
            .buffer
            .into_iter()
            .flat_map(|b| b.range(prefix.to_vec()..))
            .take_while(|(k, _)| k.starts_with(prefix))
            .peekable();

        let mut out = Vec::new();
        while limit.is_none_or(|limit| out.len() < limit) {
            let order = match (committed.peek(), buffered.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((ck, _)), Some((bk, _))) => ck.cmp(bk),
            };
            match order {
                Ordering::Less => {
                    if let Some((k, v)) = committed.next() {
                        out.push((k.clone(), v.clone()));
                    }
                }
                Ordering::Equal => {
                    committed.next();
                    if let Some((k, Some(v))) = buffered.next() {
                        out.push((k.clone(), v.clone()));
                    }
                }
                Ordering::Greater => {
                    if let Some((k, Some(v))) = buffered.next() {
                        out.push((k.clone(), v.clone()));
                    }
                }
            }
        }
        out
    }
}

/// Write access to the open transaction's buffer.
pub(crate) struct TxnView<'a> {
    committed: &'a Keyspace,
    buffer: &'a mut WriteBuffer,
}

impl TxnView<'_> {
    fn reader(&self) -> ReadView<'_> {
        ReadView {
            committed: self.committed,
            buffer: Some(&*self.buffer),
        }
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.reader().contains(key)
    }

    pub(crate) fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.buffer.insert(key, Some(value));
    }

    /// Remove `key`, returning whether it existed.
    pub(crate) fn remove(&mut self, key: &[u8]) -> bool {
        let existed = self.contains(key);
        if existed {
            self.buffer.insert(key.to_vec(), None);
        }
        existed
    }
}

/// The shared handle through which column families join the open transaction.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<Mutex<DbInner>>,
    checks: ConsistencyChecks,
}

impl TransactionContext {
    fn lock(&self) -> MutexGuard<'_, DbInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn checks(&self) -> ConsistencyChecks {
        self.checks
    }

    /// Returns true if a transaction is currently open.
    pub fn is_in_transaction(&self) -> bool {
        self.lock().open.is_some()
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&ReadView<'_>) -> T) -> T {
        let inner = self.lock();
        let view = ReadView {
            committed: &inner.committed,
            buffer: inner.open.as_ref(),
        };
        f(&view)
    }

    pub(crate) fn read_committed<T>(&self, f: impl FnOnce(&Keyspace) -> T) -> T {
        f(&self.lock().committed)
    }

    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&mut TxnView<'_>) -> StateResult<T>,
    ) -> StateResult<T> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.open.as_mut() {
            Some(buffer) => f(&mut TxnView {
                committed: &inner.committed,
                buffer,
            }),
            None => {
                let mut buffer = WriteBuffer::new();
                let result = f(&mut TxnView {
                    committed: &inner.committed,
                    buffer: &mut buffer,
                });
                if result.is_ok() {
                    inner.commit(buffer);
                }
                result
            }
        }
    }

    /// Run `f` as one atomic unit.
    ///
    /// Joins the open transaction if there is one. Otherwise `f` runs in its
    /// own transaction, committed if it succeeds and rolled back if it fails.
    pub fn atomically<T>(&self, f: impl FnOnce() -> StateResult<T>) -> StateResult<T> {
        if self.is_in_transaction() {
            return f();
        }
        self.begin()?.run(f)
    }

    /// Open a transaction. Fails if one is already open.
    pub fn begin(&self) -> StateResult<Transaction> {
        let mut inner = self.lock();
        if inner.open.is_some() {
            return Err(StateError::Transaction(
                "a transaction is already open".into(),
            ));
        }
        inner.open = Some(WriteBuffer::new());
        Ok(Transaction {
            context: self.clone(),
            finished: false,
        })
    }
}

/// An open transaction. Rolled back on drop unless committed.
pub struct Transaction {
    context: TransactionContext,
    finished: bool,
}

impl Transaction {
    /// Apply all buffered writes atomically.
    pub fn commit(mut self) -> StateResult<()> {
        self.finished = true;
        let mut inner = self.context.lock();
        let buffer = inner
            .open
            .take()
            .ok_or_else(|| StateError::Transaction("no open transaction to commit".into()))?;
        inner.commit(buffer);
        Ok(())
    }

    /// Discard all buffered writes.
    pub fn rollback(mut self) {
        self.finished = true;
        self.context.lock().rollback();
    }

    fn run<T>(self, f: impl FnOnce() -> StateResult<T>) -> StateResult<T> {
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.context.lock().rollback() {
            warn!("Transaction dropped without commit, rolled back");
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    schema_version: u16,
    entries: Keyspace,
}

/// A partition's columnar transactional store.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct StateDb {
    context: TransactionContext,
}

impl StateDb {
    /// Create an empty store with the given consistency checks.
    pub fn new(checks: ConsistencyChecks) -> Self {
        Self {
            context: TransactionContext {
                inner: Arc::new(Mutex::new(DbInner {
                    committed: Keyspace::new(),
                    open: None,
                    metrics: None,
                })),
                checks,
            },
        }
    }

    /// Create a typed handle to a column family.
    pub fn create_column_family<K: DbKey, V: DbValue>(
        &self,
        name: ColumnFamilyName,
    ) -> ColumnFamily<K, V> {
        ColumnFamily::new(name, self.context.clone())
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn checks(&self) -> ConsistencyChecks {
        self.context.checks
    }

    /// Open a transaction. Fails if one is already open.
    pub fn begin(&self) -> StateResult<Transaction> {
        self.context.begin()
    }

    /// Run `f` in a transaction: commit if it succeeds, roll back if it fails.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce() -> StateResult<T>) -> StateResult<T> {
        self.begin()?.run(f)
    }

    /// Attach or detach commit metrics.
    pub fn set_metrics(&self, metrics: Option<Arc<StoreMetrics>>) {
        self.context.lock().metrics = metrics;
    }

    pub fn has_metrics(&self) -> bool {
        self.context.lock().metrics.is_some()
    }

    /// Serialize the committed state.
    pub fn snapshot(&self) -> StateResult<Vec<u8>> {
        let inner = self.context.lock();
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            entries: inner.committed.clone(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Replace the committed state with a snapshot. Fails while a transaction is open.
    pub fn restore(&self, bytes: &[u8]) -> StateResult<()> {
        let snapshot: Snapshot = bincode::deserialize(bytes)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(StateError::Serialization(format!(
                "snapshot schema version {} does not match {}",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }

        let mut inner = self.context.lock();
        if inner.open.is_some() {
            return Err(StateError::Transaction(
                "cannot restore while a transaction is open".into(),
            ));
        }
        inner.committed = snapshot.entries;
        debug!(entries = inner.committed.len(), "Restored state from snapshot");
        Ok(())
    }

    /// Committed entry count per column family, for migration tooling.
    pub fn column_family_sizes(&self) -> BTreeMap<ColumnFamilyName, usize> {
        let inner = self.context.lock();
        let mut sizes: BTreeMap<ColumnFamilyName, usize> = ColumnFamilyName::all()
            .iter()
            .map(|cf| (*cf, 0))
            .collect();
        for key in inner.committed.keys() {
            let id = key
                .get(..2)
                .and_then(|p| p.try_into().ok())
                .map(u16::from_be_bytes);
            if let Some(cf) = id.and_then(ColumnFamilyName::from_id) {
                *sizes.entry(cf).or_default() += 1;
            }
        }
        sizes
    }

    /// Returns true if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.context.lock().committed.is_empty()
    }
}

impl Default for StateDb {
    fn default() -> Self {
        Self::new(ConsistencyChecks::default())
    }
}
