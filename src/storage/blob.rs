//! Blob operations for row storage.
//!
//! Each row is stored as a separate JSON file under its table's `rows/`
//! subtree, with a consistent byte layout so identical rows hash to the
//! same blob ID across commits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::errors::{StorageError, StorageResult};
pub(crate) use crate::storage::types::{BlobId, RowKey};

/// a table row: primary key plus column values
///
/// The internal format stored in Git:
/// ```text
/// {
///   "_pk": "abc123",
///   "name": "abc",
///   "email": "abc@example.com"
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// row key (must match filename without .json extension)
    pub key: RowKey,
    /// column values, keyed by column name
    pub data: BTreeMap<String, Value>,
}

impl Row {
    /// creates a new row with key & data
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        Self { key, data }
    }

    /// create a new row from a JSON value (typically from INSERT)
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => {
                return Err(StorageError::SchemaViolation(
                    "row data must be a JSON object".to_string(),
                ))
            }
        };
        Ok(Self::new(key, data))
    }

    /// get a column value by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// check if the row has a column
    pub fn has_column(&self, column: &str) -> bool {
        self.data.contains_key(column)
    }
}

/// internal format for JSON serialization
///
/// uses `_` prefix for metadata fields to avoid conflicts with user columns
#[derive(Serialize, Deserialize)]
struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

/// serialize a row to JSON bytes
///
/// uses BTreeMap for consistent key ordering (important for git deduplication:
/// identical rows must produce identical blob IDs)
pub fn serialize_row(row: &Row) -> StorageResult<Vec<u8>> {
    let json = RowJson {
        pk: row.key.as_str().to_string(),
        data: row.data.clone(),
    };

    let bytes = serde_json::to_vec_pretty(&json)?;
    Ok(bytes)
}

/// deserialize a row from JSON bytes
///
/// validates that the primary key in the JSON matches the expected key
pub fn deserialize_row(bytes: &[u8], expected_key: &RowKey) -> StorageResult<Row> {
    let json: RowJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected_key).into(),
            reason: format!(
                "primary key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.pk
            ),
        });
    }

    Ok(Row {
        key: expected_key.clone(),
        data: json.data,
    })
}

/// identity hash of a row's column data alone, `_pk` left out
///
/// keyless tables match rows across diff sides by this hash, so the
/// generated storage key never decides whether two rows are the same row.
/// Computed without writing anything to the object store.
pub fn content_id(row: &Row) -> StorageResult<BlobId> {
    let bytes = serde_json::to_vec_pretty(&row.data)?;
    let oid = git2::Oid::hash_object(git2::ObjectType::Blob, &bytes)?;
    Ok(BlobId::new(oid))
}

/// write a row as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn write_blob(repo: &git2::Repository, row: &Row) -> StorageResult<BlobId> {
    let bytes = serialize_row(row)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

/// read and deserialize a row blob
pub fn read_row(repo: &git2::Repository, blob_id: BlobId, key: &RowKey) -> StorageResult<Row> {
    let bytes = read_blob(repo, blob_id)?;
    deserialize_row(&bytes, key)
}
