//! Per-table history materialization.
//!
//! Walks first-parent ancestry and turns every commit that touched a table
//! into a diff partition. The subtree hash comparison makes "touched" cheap:
//! a commit whose table subtree equals its parent's is skipped without
//! reading a single row.

use serde_json::Value;

use crate::catalog::{ColumnDef, DataType, TableSchema};
use crate::diff::errors::DiffResult;
use crate::diff::partition::DiffPartition;
use crate::diff::resolver::{EMPTY_LABEL, WORKING_REF};
use crate::storage::{BlobId, CommitId, RowKey, TableName, TreeId, VersionStore};

/// Partitions of one table's history, newest commit first, terminated by a
/// synthetic partition comparing head to the live working root.
///
/// The working partition is always present, even when head and working root
/// are identical; callers that only want committed history filter it out.
pub struct HistoryPartitions {
    partitions: std::vec::IntoIter<DiffPartition>,
}

impl HistoryPartitions {
    pub fn new(
        store: &VersionStore,
        table: &TableName,
        head: CommitId,
        working_root: TreeId,
    ) -> DiffResult<Self> {
        let mut partitions = Vec::new();

        for info in store.first_parent_history(head)? {
            let to_root = store.root_of_tree(info.tree_id)?;
            let to_info = to_root.table(table).cloned();

            let (from_info, parent) = match info.first_parent() {
                Some(parent_id) => {
                    let parent = store.get_commit(parent_id)?;
                    let from_root = store.root_of_tree(parent.tree_id)?;
                    (from_root.table(table).cloned(), Some(parent))
                }
                None => (None, None),
            };

            let from_subtree = from_info.as_ref().map(|t| t.subtree);
            let to_subtree = to_info.as_ref().map(|t| t.subtree);
            if from_subtree == to_subtree {
                continue;
            }

            // absent from-side means the table was created here
            let (from_label, from_date) = match (&from_info, &parent) {
                (Some(_), Some(parent)) => (parent.id.to_string(), Some(parent.timestamp)),
                _ => (EMPTY_LABEL.to_string(), None),
            };

            partitions.push(DiffPartition {
                from: from_info,
                to: to_info,
                from_label,
                to_label: info.id.to_string(),
                from_date,
                to_date: Some(info.timestamp),
            });
        }

        let head_info = store.get_commit(head)?;
        let head_root = store.root_of_tree(head_info.tree_id)?;
        let working = store.root_of_tree(working_root)?;
        partitions.push(DiffPartition {
            from: head_root.table(table).cloned(),
            to: working.table(table).cloned(),
            from_label: head.to_string(),
            to_label: WORKING_REF.to_string(),
            from_date: Some(head_info.timestamp),
            to_date: None,
        });

        Ok(Self {
            partitions: partitions.into_iter(),
        })
    }
}

impl Iterator for HistoryPartitions {
    type Item = DiffPartition;

    fn next(&mut self) -> Option<Self::Item> {
        self.partitions.next()
    }
}

/// Schema of a history relation: the base table's columns plus trailing
/// commit metadata.
pub fn history_schema(base: &TableSchema) -> Vec<ColumnDef> {
    let mut columns = base.columns.clone();
    columns.push(ColumnDef::new("commit_hash", DataType::Text, false));
    columns.push(ColumnDef::new("committer", DataType::Text, true));
    columns.push(ColumnDef::new("commit_date", DataType::Timestamp, true));
    columns
}

/// Streams a history partition's to-side rows, each projected into the
/// `history_schema` column order.
pub struct HistoryRowIter {
    store: VersionStore,
    rows: Vec<(RowKey, BlobId)>,
    idx: usize,
    columns: Vec<ColumnDef>,
    commit_hash: Value,
    committer: Value,
    commit_date: Value,
}

impl HistoryRowIter {
    pub fn open(store: &VersionStore, partition: &DiffPartition) -> DiffResult<Self> {
        let (rows, columns) = match &partition.to {
            Some(info) => (store.list_rows(info.subtree)?, info.schema.columns.clone()),
            // to-side absent (the table was dropped here): nothing to emit
            None => (Vec::new(), Vec::new()),
        };

        let committer = if partition.to_label == WORKING_REF {
            Value::Null
        } else {
            let commit_id = store.resolve(&partition.to_label)?;
            Value::String(store.get_commit(commit_id)?.author_name)
        };

        let commit_date = match partition.to_date {
            Some(date) => Value::String(date.to_rfc3339()),
            None => Value::Null,
        };

        Ok(Self {
            store: store.clone(),
            rows,
            idx: 0,
            columns,
            commit_hash: Value::String(partition.to_label.clone()),
            committer,
            commit_date,
        })
    }
}

impl Iterator for HistoryRowIter {
    type Item = DiffResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, blob) = self.rows.get(self.idx).cloned()?;
        self.idx += 1;

        let row = match self.store.read_row_blob(blob, &key) {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };

        let mut values: Vec<Value> = self
            .columns
            .iter()
            .map(|col| row.get(&col.name).cloned().unwrap_or(Value::Null))
            .collect();
        values.push(self.commit_hash.clone());
        values.push(self.committer.clone());
        values.push(self.commit_date.clone());

        Some(Ok(values))
    }
}
