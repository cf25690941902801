//! Storage backends for the catalogue
//!
//! Every backend implements the transactional `GraphStore` trait.
//! The primary implementation is `SqliteStore` for persistent storage.

mod sqlite;
mod traits;

pub use sqlite::{SqliteStore, StoreOptions};
pub use traits::{
    GraphStore, OpenStore, StorageError, StorageResult, StoreReader, StoreSnapshot,
    StoreTransaction,
};
