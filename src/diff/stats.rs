//! Diff statistics aggregation.
//!
//! A walker thread streams over one table's diff and hands partial counts to
//! the consumer over a bounded channel; the consumer accumulates by simple
//! addition. `thread::scope` joins both sides, propagating the first error
//! and cancelling the other side by dropping its channel endpoint. Each
//! table is walked at most once.

use std::sync::mpsc;
use std::thread;

use crate::diff::delta::TableDelta;
use crate::diff::errors::{DiffError, DiffResult};
use crate::storage::{StorageError, VersionStore};

/// partial counts flushed after this many merged entries
const STAT_CHUNK: usize = 64;

/// Running counts produced by the diff walker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStatProgress {
    pub adds: u64,
    pub removes: u64,
    pub changes: u64,
    pub cell_changes: u64,
    pub new_row_count: u64,
    pub old_row_count: u64,
    pub new_cell_count: u64,
    pub old_cell_count: u64,
}

impl DiffStatProgress {
    fn accumulate(&mut self, other: &DiffStatProgress) {
        self.adds += other.adds;
        self.removes += other.removes;
        self.changes += other.changes;
        self.cell_changes += other.cell_changes;
        self.new_row_count += other.new_row_count;
        self.old_row_count += other.old_row_count;
        self.new_cell_count += other.new_cell_count;
        self.old_cell_count += other.old_cell_count;
    }

    fn is_empty(&self) -> bool {
        *self == DiffStatProgress::default()
    }
}

/// One table's diff statistics row.
///
/// Keyless tables only know adds and removes; all other fields report
/// absent, not zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffStatistics {
    pub table_name: String,
    pub rows_unmodified: Option<u64>,
    pub rows_added: u64,
    pub rows_deleted: u64,
    pub rows_modified: Option<u64>,
    pub cells_added: Option<u64>,
    pub cells_deleted: Option<u64>,
    pub cells_modified: Option<u64>,
    pub old_row_count: Option<u64>,
    pub new_row_count: Option<u64>,
    pub old_cell_count: Option<u64>,
    pub new_cell_count: Option<u64>,
}

/// Compute one table's diff statistics.
///
/// Returns `None` when the walk finds no net change; such tables are
/// excluded from DIFF_STAT output. The caller is responsible for checking
/// diffability first.
pub fn table_diff_stat(store: &VersionStore, delta: &TableDelta) -> DiffResult<Option<DiffStatistics>> {
    let progress = walk_with_channel(store, delta)?;

    if progress.is_empty() {
        return Ok(None);
    }

    let table_name = delta.curr_name().to_string();

    if delta.is_keyless() {
        if progress.adds == 0 && progress.removes == 0 {
            return Ok(None);
        }
        return Ok(Some(DiffStatistics {
            table_name,
            rows_unmodified: None,
            rows_added: progress.adds,
            rows_deleted: progress.removes,
            rows_modified: None,
            cells_added: None,
            cells_deleted: None,
            cells_modified: None,
            old_row_count: None,
            new_row_count: None,
            old_cell_count: None,
            new_cell_count: None,
        }));
    }

    if progress.adds == 0
        && progress.removes == 0
        && progress.changes == 0
        && progress.new_cell_count == progress.old_cell_count
    {
        return Ok(None);
    }

    let new_cols = delta
        .to_schema()
        .map(|s| s.columns.len() as u64)
        .unwrap_or(0);

    let (cells_added, cells_deleted) = reconcile_cells(&progress, new_cols);

    Ok(Some(DiffStatistics {
        table_name,
        rows_unmodified: Some(
            progress
                .old_row_count
                .saturating_sub(progress.changes)
                .saturating_sub(progress.removes),
        ),
        rows_added: progress.adds,
        rows_deleted: progress.removes,
        rows_modified: Some(progress.changes),
        cells_added: Some(cells_added),
        cells_deleted: Some(cells_deleted),
        cells_modified: Some(progress.cell_changes),
        old_row_count: Some(progress.old_row_count),
        new_row_count: Some(progress.new_row_count),
        old_cell_count: Some(progress.old_cell_count),
        new_cell_count: Some(progress.new_cell_count),
    }))
}

/// Reconcile added/deleted cell counts from the walk totals.
///
/// The walker only knows aggregate cell counts per side; the shape of the
/// net change determines how adds and removes split into cell additions and
/// deletions.
// TODO: extend coverage for simultaneous add+drop column shapes; the branch
// on the sign of the net cell delta has only been validated for uniform
// schemas.
fn reconcile_cells(progress: &DiffStatProgress, new_cols: u64) -> (u64, u64) {
    let delta = progress.new_cell_count as i64 - progress.old_cell_count as i64;

    if delta > 0 {
        let deleted = progress.removes * new_cols;
        (delta as u64 + deleted, deleted)
    } else if delta < 0 {
        let added = progress.adds * new_cols;
        (added, (-delta) as u64 + added)
    } else {
        let added = progress.adds * new_cols;
        let deleted = progress.removes * new_cols;
        if added != deleted {
            let both = added.max(deleted);
            (both, both)
        } else {
            (added, deleted)
        }
    }
}

/// Run the walker thread and accumulate its partials.
fn walk_with_channel(store: &VersionStore, delta: &TableDelta) -> DiffResult<DiffStatProgress> {
    let (tx, rx) = mpsc::sync_channel::<DiffStatProgress>(8);

    thread::scope(|scope| {
        let walker = scope.spawn(move || walk_table(store, delta, tx));

        let mut total = DiffStatProgress::default();
        for partial in rx {
            total.accumulate(&partial);
        }

        match walker.join() {
            Ok(Ok(())) => Ok(total),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DiffError::Storage(StorageError::Internal(
                "stat walker panicked".to_string(),
            ))),
        }
    })
}

/// Walk the full merge of both sides, unchanged rows included, flushing
/// partial counts per chunk. A closed receiver means the consumer gave up;
/// the walker stops quietly.
fn walk_table(
    store: &VersionStore,
    delta: &TableDelta,
    tx: mpsc::SyncSender<DiffStatProgress>,
) -> DiffResult<()> {
    let mut from_rows = match &delta.from {
        Some(info) => store.list_rows(info.subtree)?,
        None => Vec::new(),
    };
    let mut to_rows = match &delta.to {
        Some(info) => store.list_rows(info.subtree)?,
        None => Vec::new(),
    };

    let from_cols = delta.from_schema().map(|s| s.columns.len() as u64).unwrap_or(0);
    let to_cols = delta.to_schema().map(|s| s.columns.len() as u64).unwrap_or(0);
    let keyless = delta.is_keyless();

    if keyless {
        // keyless identity is the content hash of the column data, so the
        // generated storage key never turns a re-insert into an add+remove
        for entry in from_rows.iter_mut().chain(to_rows.iter_mut()) {
            entry.1 = store.row_content_id(entry.1, &entry.0)?;
        }
        from_rows.sort_by_key(|(_, id)| *id);
        to_rows.sort_by_key(|(_, id)| *id);
    }

    let mut partial = DiffStatProgress::default();
    let mut since_flush = 0usize;

    let mut fi = 0usize;
    let mut ti = 0usize;

    loop {
        let from = from_rows.get(fi);
        let to = to_rows.get(ti);

        let step_removed = |p: &mut DiffStatProgress| {
            p.removes += 1;
            p.old_row_count += 1;
            p.old_cell_count += from_cols;
        };
        let step_added = |p: &mut DiffStatProgress| {
            p.adds += 1;
            p.new_row_count += 1;
            p.new_cell_count += to_cols;
        };

        match (from, to) {
            (None, None) => break,
            (Some(_), None) => {
                step_removed(&mut partial);
                fi += 1;
            }
            (None, Some(_)) => {
                step_added(&mut partial);
                ti += 1;
            }
            (Some((from_key, from_blob)), Some((to_key, to_blob))) => {
                let order = if keyless {
                    from_blob.cmp(to_blob)
                } else {
                    from_key.cmp(to_key)
                };

                match order {
                    std::cmp::Ordering::Less => {
                        step_removed(&mut partial);
                        fi += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        step_added(&mut partial);
                        ti += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        partial.old_row_count += 1;
                        partial.new_row_count += 1;
                        partial.old_cell_count += from_cols;
                        partial.new_cell_count += to_cols;

                        if from_blob != to_blob && !keyless {
                            partial.changes += 1;
                            partial.cell_changes +=
                                changed_cells(store, delta, from_key, from_blob, to_key, to_blob)?;
                        }
                        fi += 1;
                        ti += 1;
                    }
                }
            }
        }

        since_flush += 1;
        if since_flush >= STAT_CHUNK {
            if tx.send(partial).is_err() {
                return Ok(()); // consumer cancelled
            }
            partial = DiffStatProgress::default();
            since_flush = 0;
        }
    }

    if !partial.is_empty() {
        let _ = tx.send(partial);
    }

    Ok(())
}

/// Count columns whose value differs between the two images of a modified
/// row. Only called when the blob hashes already differ.
fn changed_cells(
    store: &VersionStore,
    delta: &TableDelta,
    from_key: &crate::storage::RowKey,
    from_blob: &crate::storage::BlobId,
    to_key: &crate::storage::RowKey,
    to_blob: &crate::storage::BlobId,
) -> DiffResult<u64> {
    let from_row = store.read_row_blob(*from_blob, from_key)?;
    let to_row = store.read_row_blob(*to_blob, to_key)?;

    let schema = match delta.to_schema() {
        Some(s) => s,
        None => return Ok(0),
    };

    let mut changed = 0u64;
    for col in &schema.columns {
        if from_row.get(&col.name) != to_row.get(&col.name) {
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, TableSchema};
    use crate::diff::delta::table_deltas;
    use crate::session::Session;
    use crate::storage::{CommitId, Row, RowKey, TableName};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn session() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        let session = Session::open(dir.path().join("db")).unwrap();
        (dir, session)
    }

    fn people_schema() -> TableSchema {
        TableSchema::new("people")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_column(ColumnDef::new("name", DataType::Text, true))
            .with_primary_key(vec!["id".to_string()])
    }

    fn person(key: &str, id: i64, name: &str) -> Row {
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(id));
        data.insert("name".to_string(), serde_json::json!(name));
        Row::new(RowKey::new(key).unwrap(), data)
    }

    fn delta_between(session: &Session, a: CommitId, b: CommitId) -> TableDelta {
        let from = session.store().root_at(a).unwrap();
        let to = session.store().root_at(b).unwrap();
        let mut deltas = table_deltas(&from, &to);
        assert_eq!(deltas.len(), 1);
        deltas.remove(0)
    }

    #[test]
    fn test_people_scenario_stats() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        store.create_table(&people_schema()).unwrap();
        store.upsert_row(&table, person("p1", 1, "Ada")).unwrap();
        store.upsert_row(&table, person("p2", 2, "Brian")).unwrap();
        let r1 = store.upsert_row(&table, person("p3", 3, "Cleo")).unwrap();

        store.upsert_row(&table, person("p2", 2, "Bryan")).unwrap();
        let r2 = store.upsert_row(&table, person("p4", 4, "Dina")).unwrap();

        let delta = delta_between(&session, r1, r2);
        let stat = table_diff_stat(store, &delta).unwrap().unwrap();

        assert_eq!(stat.rows_added, 1);
        assert_eq!(stat.rows_deleted, 0);
        assert_eq!(stat.rows_modified, Some(1));
        assert_eq!(stat.rows_unmodified, Some(2));
        assert_eq!(stat.old_row_count, Some(3));
        assert_eq!(stat.new_row_count, Some(4));
        // one changed cell in the modified row
        assert_eq!(stat.cells_modified, Some(1));
    }

    #[test]
    fn test_all_add_reconciliation() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        let r0 = store.create_table(&people_schema()).unwrap();
        store.upsert_row(&table, person("p1", 1, "Ada")).unwrap();
        let r1 = store.upsert_row(&table, person("p2", 2, "Brian")).unwrap();

        let delta = delta_between(&session, r0, r1);
        let stat = table_diff_stat(store, &delta).unwrap().unwrap();

        let added = stat.cells_added.unwrap();
        let deleted = stat.cells_deleted.unwrap();
        let net = (stat.new_cell_count.unwrap() as i64 - stat.old_cell_count.unwrap() as i64).unsigned_abs();
        assert_eq!(added + deleted, net + 2 * deleted);
        assert_eq!(deleted, 0);
        assert_eq!(added, 4); // 2 rows x 2 columns
    }

    #[test]
    fn test_all_remove_reconciliation() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        store.create_table(&people_schema()).unwrap();
        store.upsert_row(&table, person("p1", 1, "Ada")).unwrap();
        let r1 = store.upsert_row(&table, person("p2", 2, "Brian")).unwrap();
        let r2 = store.delete_row(&table, &RowKey::new("p1").unwrap()).unwrap();

        let delta = delta_between(&session, r1, r2);
        let stat = table_diff_stat(store, &delta).unwrap().unwrap();

        assert_eq!(stat.rows_deleted, 1);
        assert_eq!(stat.cells_added, Some(0));
        assert_eq!(stat.cells_deleted, Some(2)); // 1 row x 2 columns
        assert_eq!(
            stat.cells_added.unwrap() + stat.cells_deleted.unwrap(),
            (stat.new_cell_count.unwrap() as i64 - stat.old_cell_count.unwrap() as i64).unsigned_abs()
        );
    }

    #[test]
    fn test_keyless_reinsert_not_counted() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("log").unwrap();

        let keyless = TableSchema::new("log").with_column(ColumnDef::new("msg", DataType::Text, true));
        store.create_table(&keyless).unwrap();

        let (key, r1) = store
            .insert_row(&table, serde_json::json!({"msg": "hi"}))
            .unwrap();
        store.delete_row(&table, &key).unwrap();
        let (_, r2) = store
            .insert_row(&table, serde_json::json!({"msg": "hi"}))
            .unwrap();

        // identical content under a fresh generated key is no net change
        let delta = delta_between(&session, r1, r2);
        assert!(table_diff_stat(store, &delta).unwrap().is_none());
    }

    #[test]
    fn test_keyless_stats_absent_not_zero() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("log").unwrap();

        let keyless = TableSchema::new("log").with_column(ColumnDef::new("msg", DataType::Text, true));
        let r0 = store.create_table(&keyless).unwrap();

        let entry = |key: &str, msg: &str| {
            let mut data = BTreeMap::new();
            data.insert("msg".to_string(), serde_json::json!(msg));
            Row::new(RowKey::new(key).unwrap(), data)
        };
        store.upsert_row(&table, entry("a", "hello")).unwrap();
        let r1 = store.upsert_row(&table, entry("b", "world")).unwrap();

        let delta = delta_between(&session, r0, r1);
        let stat = table_diff_stat(store, &delta).unwrap().unwrap();

        assert_eq!(stat.rows_added, 2);
        assert_eq!(stat.rows_deleted, 0);
        assert_eq!(stat.rows_modified, None);
        assert_eq!(stat.cells_added, None);
        assert_eq!(stat.cells_deleted, None);
        assert_eq!(stat.old_row_count, None);
    }

    #[test]
    fn test_no_net_change_excluded() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        store.create_table(&people_schema()).unwrap();
        let r1 = store.upsert_row(&table, person("p1", 1, "Ada")).unwrap();

        // same root on both sides never even yields a delta; construct the
        // no-change case through an identical re-insert instead
        let r2 = store.upsert_row(&table, person("p1", 1, "Ada")).unwrap();

        let from = store.root_at(r1).unwrap();
        let to = store.root_at(r2).unwrap();
        assert!(table_deltas(&from, &to).is_empty());
    }

    #[test]
    fn test_chunked_walk_matches_single_pass() {
        // more rows than one chunk, to exercise partial flushing
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        let r0 = store.create_table(&people_schema()).unwrap();
        let mut head = r0;
        for i in 0..(STAT_CHUNK as i64 + 10) {
            head = store
                .upsert_row(&table, person(&format!("p{:04}", i), i, "x"))
                .unwrap();
        }

        let delta = delta_between(&session, r0, head);
        let stat = table_diff_stat(store, &delta).unwrap().unwrap();
        assert_eq!(stat.rows_added, STAT_CHUNK as u64 + 10);
    }
}
