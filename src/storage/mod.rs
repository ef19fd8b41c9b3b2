//! storage layer for DriftDB
//!
//! this module provides a complete abstraction over git for database storage.
//! The upper layers (diff engine, virtual relations) use this API and never
//! touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VersionStore                           │
//! │  (High-level API: roots, tables, rows, branches, history)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │  (tables)   │       │   (rows)    │       │ (branches)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use driftdb::storage::{VersionStore, TableName};
//!
//! // Initialize or open
//! let store = VersionStore::open_or_init("./my_database")?;
//!
//! // Create a table, insert a row under a generated key
//! let head = store.create_table(&schema)?;
//! let (key, head) = store.insert_row(&table, json!({"name": "Alice", "age": 30}))?;
//!
//! // Snapshot a root for diffing
//! let root = store.root_at(head)?;
//! ```

mod blob;
mod commit;
mod errors;
mod refs;
mod repository;
mod tree;
mod types;

// Re-export public API
pub use blob::{content_id, Row};
pub use commit::{CommitInfo, CommitMessage};
pub use errors::{StorageError, StorageResult};
pub use repository::{RootSnapshot, TableInfo, VersionStore};
pub use types::{
    BlobId, BranchName, CommitId, GitSignature, InvalidNameError, RowKey, TableName, TreeId,
};
