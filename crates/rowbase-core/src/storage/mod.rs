//! Row storage.
//!
//! A sled-backed entity-attribute-value store: row headers in one tree,
//! values split across scalar, multiple, range and media sub-stores, plus
//! the entity, unique and link indexes. [`RowStore`] is the typed,
//! permission-checked surface over [`StorageEngine`].

mod config;
mod engine;
mod record;
mod retry;
mod row;
mod row_store;

pub mod key;

pub use config::{EngineConfig, RetryPolicy, StorageConfig};
pub use engine::{LinkDirection, RowDelete, RowWrite, StorageEngine, StoredRow, UniqueClaim};
pub use record::{LinkList, LinkRecord, LinkRef, RowRecord};
pub use retry::with_retry;
pub use row::Row;
pub use row_store::{ImportReport, JsonMap, RowStore, MAX_CASCADE_DEPTH};
