//! Column family registry and typed column family handles.
//!
//! Every family lives in the same ordered keyspace under a 2-byte big-endian
//! prefix (its stable id). Ids are part of the persisted format: never reuse or
//! renumber one. Adding a family is a schema change and bumps
//! [`SCHEMA_VERSION`].

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::key::{DbKey, DbValue, ForeignKeyRef};
use super::store::{TransactionContext, TxnView};
use crate::error::{StateError, StateResult, ViolationKind};

/// Version of the column family layout.
pub const SCHEMA_VERSION: u16 = 1;

/// The closed set of column families used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum ColumnFamilyName {
    /// Next-key counter of the key generator.
    Key = 1,
    /// Users by user key.
    Users = 2,
    /// Secondary index: username to user key.
    UserKeyByUsername = 3,
    /// Command distribution records by distribution key.
    CommandDistributionRecord = 4,
    /// (distribution key, partition) pairs still owing an acknowledgment.
    PendingDistribution = 5,
    /// (queue, partition, insertion key) to distribution key.
    QueuedDistribution = 6,
}

impl ColumnFamilyName {
    /// All registered families, in id order.
    pub fn all() -> &'static [ColumnFamilyName] {
        &[
            ColumnFamilyName::Key,
            ColumnFamilyName::Users,
            ColumnFamilyName::UserKeyByUsername,
            ColumnFamilyName::CommandDistributionRecord,
            ColumnFamilyName::PendingDistribution,
            ColumnFamilyName::QueuedDistribution,
        ]
    }

    /// The stable persisted id.
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::all().iter().copied().find(|cf| cf.id() == id)
    }

    /// The keyspace prefix of this family.
    pub fn prefix(self) -> [u8; 2] {
        self.id().to_be_bytes()
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnFamilyName::Key => "KEY",
            ColumnFamilyName::Users => "USERS",
            ColumnFamilyName::UserKeyByUsername => "USER_KEY_BY_USERNAME",
            ColumnFamilyName::CommandDistributionRecord => "COMMAND_DISTRIBUTION_RECORD",
            ColumnFamilyName::PendingDistribution => "PENDING_DISTRIBUTION",
            ColumnFamilyName::QueuedDistribution => "QUEUED_DISTRIBUTION",
        }
    }

    pub(crate) fn full_key(self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(2 + key.len());
        full.extend_from_slice(&self.prefix());
        full.extend_from_slice(key);
        full
    }
}

impl fmt::Display for ColumnFamilyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed handle to one column family.
///
/// All operations join the transaction currently open on the shared
/// [`TransactionContext`]. Outside of one, each operation commits on its own.
pub struct ColumnFamily<K, V> {
    name: ColumnFamilyName,
    context: TransactionContext,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for ColumnFamily<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            context: self.context.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K: DbKey, V: DbValue> ColumnFamily<K, V> {
    pub(crate) fn new(name: ColumnFamilyName, context: TransactionContext) -> Self {
        Self {
            name,
            context,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> ColumnFamilyName {
        self.name
    }

    /// Get the value stored for `key`.
    pub fn get(&self, key: &K) -> StateResult<Option<V>> {
        let full = self.name.full_key(&key.encode());
        self.context
            .read(|view| view.get(&full))
            .map(|bytes| V::from_bytes(&bytes))
            .transpose()
    }

    /// Get the committed value for `key`, ignoring any open transaction.
    pub fn get_committed(&self, key: &K) -> StateResult<Option<V>> {
        let full = self.name.full_key(&key.encode());
        self.context
            .read_committed(|committed| committed.get(&full).cloned())
            .map(|bytes| V::from_bytes(&bytes))
            .transpose()
    }

    pub fn exists(&self, key: &K) -> StateResult<bool> {
        let full = self.name.full_key(&key.encode());
        Ok(self.context.read(|view| view.contains(&full)))
    }

    /// Insert a new entry. Fails if `key` already exists.
    pub fn insert(&self, key: &K, value: &V) -> StateResult<()> {
        let checks = self.context.checks();
        self.write(key, value, |view, full| {
            if checks.preconditions && view.contains(full) {
                return Err(ViolationKind::KeyExists);
            }
            Ok(())
        })
    }

    /// Replace an existing entry. Fails if `key` does not exist.
    pub fn update(&self, key: &K, value: &V) -> StateResult<()> {
        let checks = self.context.checks();
        self.write(key, value, |view, full| {
            if checks.preconditions && !view.contains(full) {
                return Err(ViolationKind::KeyMissing);
            }
            Ok(())
        })
    }

    /// Insert or replace.
    pub fn upsert(&self, key: &K, value: &V) -> StateResult<()> {
        self.write(key, value, |_, _| Ok(()))
    }

    /// Delete an existing entry. Fails if `key` does not exist.
    pub fn delete_existing(&self, key: &K) -> StateResult<()> {
        let preconditions = self.context.checks().preconditions;
        let full = self.name.full_key(&key.encode());
        let existed = self.context.write(|view| Ok(view.remove(&full)))?;
        if preconditions && !existed {
            return Err(self.violation(key, ViolationKind::KeyMissing));
        }
        Ok(())
    }

    /// Delete an entry if present. Returns whether it existed.
    pub fn delete(&self, key: &K) -> StateResult<bool> {
        let full = self.name.full_key(&key.encode());
        self.context.write(|view| Ok(view.remove(&full)))
    }

    /// Visit all entries in key order until `visitor` returns `false`.
    pub fn for_each(&self, visitor: impl FnMut(K, V) -> bool) -> StateResult<()> {
        self.scan(&[], None, visitor)
    }

    /// Visit entries whose key starts with `prefix`, in key order, until
    /// `visitor` returns `false`.
    ///
    /// `P` must be a leading component of `K`, e.g. `u64` for `(u64, i32)`.
    pub fn while_prefix<P: DbKey>(
        &self,
        prefix: &P,
        visitor: impl FnMut(K, V) -> bool,
    ) -> StateResult<()> {
        self.scan(&prefix.encode(), None, visitor)
    }

    /// The lowest entry whose key starts with `prefix`.
    pub fn first_with_prefix<P: DbKey>(&self, prefix: &P) -> StateResult<Option<(K, V)>> {
        let mut first = None;
        self.scan(&prefix.encode(), Some(1), |k, v| {
            first = Some((k, v));
            false
        })?;
        Ok(first)
    }

    /// Returns true if any entry's key starts with `prefix`.
    pub fn exists_with_prefix<P: DbKey>(&self, prefix: &P) -> StateResult<bool> {
        let full = self.name.full_key(&prefix.encode());
        Ok(!self
            .context
            .read(|view| view.scan(&full, Some(1)))
            .is_empty())
    }

    /// Visit committed entries with `prefix`, ignoring any open transaction.
    ///
    /// For readers running outside the partition's processing loop.
    pub fn while_prefix_committed<P: DbKey>(
        &self,
        prefix: &P,
        visitor: impl FnMut(K, V) -> bool,
    ) -> StateResult<()> {
        self.scan_committed(&prefix.encode(), visitor)
    }

    /// Visit all committed entries, ignoring any open transaction.
    pub fn for_each_committed(&self, visitor: impl FnMut(K, V) -> bool) -> StateResult<()> {
        self.scan_committed(&[], visitor)
    }

    fn scan_committed(
        &self,
        prefix: &[u8],
        mut visitor: impl FnMut(K, V) -> bool,
    ) -> StateResult<()> {
        let full = self.name.full_key(prefix);
        let entries = self.context.read_committed(|committed| {
            committed
                .range(full.clone()..)
                .take_while(|(k, _)| k.starts_with(&full))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>()
        });
        for (k, v) in entries {
            let (key, value) = self.decode_entry(&k, &v)?;
            if !visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    pub fn count(&self) -> StateResult<usize> {
        let full = self.name.full_key(&[]);
        Ok(self.context.read(|view| view.scan(&full, None).len()))
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        let full = self.name.full_key(&[]);
        Ok(self.context.read(|view| view.scan(&full, Some(1))).is_empty())
    }

    fn scan(
        &self,
        prefix: &[u8],
        limit: Option<usize>,
        mut visitor: impl FnMut(K, V) -> bool,
    ) -> StateResult<()> {
        let full = self.name.full_key(prefix);
        let entries = self.context.read(|view| view.scan(&full, limit));
        for (k, v) in entries {
            let (key, value) = self.decode_entry(&k, &v)?;
            if !visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn decode_entry(&self, full_key: &[u8], value: &[u8]) -> StateResult<(K, V)> {
        let key = K::decode(&full_key[2..]).ok_or_else(|| {
            StateError::Serialization(format!("malformed key in column family {}", self.name))
        })?;
        Ok((key, V::from_bytes(value)?))
    }

    fn write(
        &self,
        key: &K,
        value: &V,
        precondition: impl FnOnce(&TxnView<'_>, &[u8]) -> Result<(), ViolationKind>,
    ) -> StateResult<()> {
        let full = self.name.full_key(&key.encode());
        let bytes = value.to_bytes()?;

        let mut refs = Vec::new();
        if self.context.checks().foreign_keys {
            key.foreign_keys(&mut refs);
            value.foreign_keys(&mut refs);
        }

        let outcome = self.context.write(|view| {
            if let Err(kind) = precondition(view, &full) {
                return Ok(Err(kind));
            }
            if let Some(missing) = first_missing_reference(view, &refs) {
                return Ok(Err(ViolationKind::ForeignKeyMissing {
                    referenced: missing.column_family,
                }));
            }
            view.put(full, bytes);
            Ok(Ok(()))
        })?;

        outcome.map_err(|kind| self.violation(key, kind))
    }

    fn violation(&self, key: &K, kind: ViolationKind) -> StateError {
        error!(column_family = %self.name, key = ?key, %kind, "Consistency violation");
        StateError::violation(self.name, kind, format!("{:?}", key))
    }
}

fn first_missing_reference<'r>(
    view: &TxnView<'_>,
    refs: &'r [ForeignKeyRef],
) -> Option<&'r ForeignKeyRef> {
    refs.iter()
        .find(|r| !view.contains(&r.column_family.full_key(&r.key)))
}
