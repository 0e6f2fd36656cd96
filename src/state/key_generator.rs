//! Partition-encoded key generation.
//!
//! Keys embed the partition id in the upper [`PARTITION_BITS`] bits and a
//! per-partition counter in the lower [`KEY_BITS`] bits, so keys are unique
//! across the cluster without coordination. The counter is persisted in the
//! `Key` column family inside the enclosing transaction, which makes key
//! assignment part of deterministic replay.
//!
//! [`PARTITION_BITS`]: crate::constants::PARTITION_BITS

use crate::constants::{KEY_BITS, MAX_KEY_COUNTER};
use crate::db::{ColumnFamily, ColumnFamilyName, StateDb};
use crate::error::{StateError, StateResult};

const NEXT_KEY: &str = "NEXT";

/// Combine a partition id and a counter into a key.
pub fn encode_partition_id(partition_id: i32, counter: u64) -> u64 {
    ((partition_id as u64) << KEY_BITS) | (counter & MAX_KEY_COUNTER)
}

/// The partition id a key was generated on.
pub fn decode_partition_id(key: u64) -> i32 {
    (key >> KEY_BITS) as i32
}

/// The counter part of a key.
pub fn decode_counter(key: u64) -> u64 {
    key & MAX_KEY_COUNTER
}

/// Monotonic key source for one partition.
#[derive(Clone)]
pub struct KeyGenerator {
    partition_id: i32,
    next_key: ColumnFamily<String, u64>,
}

impl KeyGenerator {
    pub fn new(db: &StateDb, partition_id: i32) -> Self {
        Self {
            partition_id,
            next_key: db.create_column_family(ColumnFamilyName::Key),
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    /// Allocate the next key.
    pub fn next_key(&self) -> StateResult<u64> {
        let current = self.current_key()?;
        if decode_counter(current) >= MAX_KEY_COUNTER {
            return Err(StateError::Transaction(format!(
                "key space of partition {} is exhausted",
                self.partition_id
            )));
        }
        let next = current + 1;
        self.next_key.upsert(&NEXT_KEY.to_string(), &next)?;
        Ok(next)
    }

    /// The last allocated key, or the partition's start key if none was allocated.
    pub fn current_key(&self) -> StateResult<u64> {
        Ok(self
            .next_key
            .get(&NEXT_KEY.to_string())?
            .unwrap_or_else(|| encode_partition_id(self.partition_id, 0)))
    }

    /// Move the counter forward to at least `key`, e.g. after importing records.
    pub fn set_key_if_higher(&self, key: u64) -> StateResult<()> {
        if decode_partition_id(key) == self.partition_id && key > self.current_key()? {
            self.next_key.upsert(&NEXT_KEY.to_string(), &key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let key = encode_partition_id(3, 17);
        assert_eq!(decode_partition_id(key), 3);
        assert_eq!(decode_counter(key), 17);
        assert_eq!(decode_partition_id(encode_partition_id(8191, MAX_KEY_COUNTER)), 8191);
    }

    #[test]
    fn test_keys_are_monotonic_and_partition_encoded() {
        let db = StateDb::default();
        let generator = KeyGenerator::new(&db, 2);

        let first = generator.next_key().unwrap();
        let second = generator.next_key().unwrap();
        assert_eq!(first, encode_partition_id(2, 1));
        assert_eq!(second, first + 1);
        assert_eq!(decode_partition_id(second), 2);
    }

    #[test]
    fn test_counter_survives_new_handle() {
        let db = StateDb::default();
        KeyGenerator::new(&db, 1).next_key().unwrap();
        let key = KeyGenerator::new(&db, 1).next_key().unwrap();
        assert_eq!(decode_counter(key), 2);
    }

    #[test]
    fn test_rolled_back_keys_are_reissued() {
        let db = StateDb::default();
        let generator = KeyGenerator::new(&db, 1);

        let txn = db.begin().unwrap();
        let discarded = generator.next_key().unwrap();
        txn.rollback();

        assert_eq!(generator.next_key().unwrap(), discarded);
    }

    #[test]
    fn test_set_key_if_higher() {
        let db = StateDb::default();
        let generator = KeyGenerator::new(&db, 1);

        generator.set_key_if_higher(encode_partition_id(1, 100)).unwrap();
        generator.set_key_if_higher(encode_partition_id(1, 50)).unwrap();
        generator.set_key_if_higher(encode_partition_id(2, 500)).unwrap();
        assert_eq!(decode_counter(generator.next_key().unwrap()), 101);
    }
}
