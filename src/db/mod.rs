//! Columnar transactional key-value store.
//!
//! A [`StateDb`] holds one ordered keyspace divided into named column families.
//! Each family is a typed map ([`ColumnFamily`]) with order-preserving key
//! encoding, prefix iteration, and optional consistency checks:
//!
//! - **Preconditions**: `insert` requires absence, `update`/`delete_existing` require
//!   presence.
//! - **Foreign keys**: every [`DbForeignKey`] inside a written key or value must exist in
//!   its referenced family at write time.
//!
//! All writes join the single open [`Transaction`]; see [`store`] for the model.

pub mod column_family;
pub mod key;
pub mod store;

pub use column_family::{ColumnFamily, ColumnFamilyName, SCHEMA_VERSION};
pub use key::{
    DbForeignKey, DbKey, DbNil, DbValue, ForeignKeyRef, decode_bincode, encode_bincode,
};
pub use store::{StateDb, Transaction, TransactionContext};
