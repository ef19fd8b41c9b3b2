//! The diff table functions.
//!
//! `DIFF`, `DIFF_STAT`, and `DIFF_PATCH` bind SQL-expression arguments to
//! resolved endpoints and expose diff output as relations. `HISTORY` is the
//! per-table variant walking ancestry rather than a single range.

use serde_json::Value;

use crate::catalog::{ColumnDef, DataType};
use crate::diff::{
    can_diff_data, diff_schema, history_schema, patch_rows, table_deltas, table_diff_stat,
    DiffError, DiffPartition, DiffPartitionRowIter, DiffResult, HistoryPartitions, HistoryRowIter,
    PatchRow, RefDetails, TableDelta,
};
use crate::session::Session;
use crate::storage::TableName;
use crate::surface::bind::BoundDiff;
use crate::surface::relation::{DiffRelation, RowStream};

fn delta_of(partition: &DiffPartition) -> TableDelta {
    TableDelta {
        from: partition.from.clone(),
        to: partition.to.clone(),
    }
}

fn partitions_between(
    from: &RefDetails,
    to: &RefDetails,
    table: Option<&TableName>,
) -> Vec<DiffPartition> {
    table_deltas(&from.root, &to.root)
        .into_iter()
        .filter(|d| table.map_or(true, |t| d.curr_name() == t))
        .map(|d| DiffPartition::from_delta(&d, from, to))
        .collect()
}

fn opt_u64(v: Option<u64>) -> Value {
    match v {
        Some(n) => Value::from(n),
        None => Value::Null,
    }
}

/// `DIFF(fromRef, toRef, tableName)` / `DIFF(rangeExpr, tableName)`.
///
/// One partition per changed table state; rows are the streamed row diff in
/// `[to_*.., from_*.., diff_type]` projection order. A table whose schemas
/// are not diff-compatible produces a warning and no rows.
pub struct DiffTableFunction<'a> {
    session: &'a Session,
    bound: BoundDiff,
    table: TableName,
}

impl<'a> DiffTableFunction<'a> {
    pub fn bind(session: &'a Session, args: &[&str]) -> DiffResult<Self> {
        let bound = BoundDiff::bind(session, args)?;
        let table = bound
            .table
            .clone()
            .ok_or_else(|| DiffError::InvalidArgument {
                argument: "table_name".to_string(),
                reason: "a table name is required".to_string(),
            })?;
        Ok(Self {
            session,
            bound,
            table,
        })
    }
}

impl DiffRelation for DiffTableFunction<'_> {
    fn schema(&self) -> Vec<ColumnDef> {
        let from = self.bound.from.root.table(&self.table).map(|t| &t.schema);
        let to = self.bound.to.root.table(&self.table).map(|t| &t.schema);
        diff_schema(from, to)
    }

    fn partitions(&self) -> DiffResult<Vec<DiffPartition>> {
        Ok(partitions_between(
            &self.bound.from,
            &self.bound.to,
            Some(&self.table),
        ))
    }

    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream> {
        if !can_diff_data(self.session, &delta_of(partition)) {
            return Ok(Box::new(std::iter::empty()));
        }

        let from_schema = partition.from_schema().cloned();
        let to_schema = partition.to_schema().cloned();
        let iter = DiffPartitionRowIter::open(self.session.store(), partition)?;

        Ok(Box::new(iter.map(move |item| {
            item.map(|row| row.project(from_schema.as_ref(), to_schema.as_ref()))
        })))
    }
}

/// `DIFF_STAT(fromRef, toRef[, tableName])`: one row per changed table.
///
/// Tables whose primary key sets are not comparable degrade to a name-only
/// row; the incompatibility is recorded as a session warning.
pub struct DiffStatTableFunction<'a> {
    session: &'a Session,
    bound: BoundDiff,
}

impl<'a> DiffStatTableFunction<'a> {
    pub fn bind(session: &'a Session, args: &[&str]) -> DiffResult<Self> {
        let bound = BoundDiff::bind(session, args)?;
        Ok(Self { session, bound })
    }

    fn stat_row(&self, partition: &DiffPartition) -> DiffResult<Option<Vec<Value>>> {
        let delta = delta_of(partition);
        let name = delta.curr_name().to_string();

        if !can_diff_data(self.session, &delta) && !delta.is_drop() {
            // name-only degradation for incomparable schemas
            let mut row = vec![Value::String(name)];
            row.extend(std::iter::repeat(Value::Null).take(11));
            return Ok(Some(row));
        }

        let stat = match table_diff_stat(self.session.store(), &delta)? {
            Some(stat) => stat,
            None => return Ok(None),
        };

        Ok(Some(vec![
            Value::String(stat.table_name),
            opt_u64(stat.rows_unmodified),
            Value::from(stat.rows_added),
            Value::from(stat.rows_deleted),
            opt_u64(stat.rows_modified),
            opt_u64(stat.cells_added),
            opt_u64(stat.cells_deleted),
            opt_u64(stat.cells_modified),
            opt_u64(stat.old_row_count),
            opt_u64(stat.new_row_count),
            opt_u64(stat.old_cell_count),
            opt_u64(stat.new_cell_count),
        ]))
    }
}

impl DiffRelation for DiffStatTableFunction<'_> {
    fn schema(&self) -> Vec<ColumnDef> {
        let mut columns = vec![ColumnDef::new("table_name", DataType::Text, false)];
        for name in [
            "rows_unmodified",
            "rows_added",
            "rows_deleted",
            "rows_modified",
            "cells_added",
            "cells_deleted",
            "cells_modified",
            "old_row_count",
            "new_row_count",
            "old_cell_count",
            "new_cell_count",
        ] {
            columns.push(ColumnDef::new(name, DataType::Integer, true));
        }
        columns
    }

    fn partitions(&self) -> DiffResult<Vec<DiffPartition>> {
        Ok(partitions_between(
            &self.bound.from,
            &self.bound.to,
            self.bound.table.as_ref(),
        ))
    }

    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream> {
        let row = self.stat_row(partition)?;
        Ok(Box::new(row.into_iter().map(Ok)))
    }
}

/// `DIFF_PATCH(fromRef, toRef[, tableName])`: replayable SQL statements.
///
/// The whole patch is generated at bind so `statement_order` can span the
/// full result; partitions then slice it by table.
pub struct PatchTableFunction {
    patch: Vec<PatchRow>,
    partitions: Vec<DiffPartition>,
}

impl PatchTableFunction {
    pub fn bind(session: &Session, args: &[&str]) -> DiffResult<Self> {
        let bound = BoundDiff::bind(session, args)?;
        let deltas: Vec<TableDelta> = table_deltas(&bound.from.root, &bound.to.root)
            .into_iter()
            .filter(|d| bound.table.as_ref().map_or(true, |t| d.curr_name() == t))
            .collect();

        let patch = patch_rows(session, &bound.from, &bound.to, &deltas)?;
        let partitions = deltas
            .iter()
            .map(|d| DiffPartition::from_delta(d, &bound.from, &bound.to))
            .collect();

        Ok(Self { patch, partitions })
    }

    fn project(row: &PatchRow) -> Vec<Value> {
        vec![
            Value::from(row.statement_order),
            Value::String(row.from_commit_hash.clone()),
            Value::String(row.to_commit_hash.clone()),
            Value::String(row.table_name.clone()),
            Value::String(row.diff_type.to_string()),
            Value::String(row.statement.clone()),
        ]
    }
}

impl DiffRelation for PatchTableFunction {
    fn schema(&self) -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("statement_order", DataType::Integer, false),
            ColumnDef::new("from_commit_hash", DataType::Text, false),
            ColumnDef::new("to_commit_hash", DataType::Text, false),
            ColumnDef::new("table_name", DataType::Text, false),
            ColumnDef::new("diff_type", DataType::Text, false),
            ColumnDef::new("statement", DataType::Text, false),
        ]
    }

    fn partitions(&self) -> DiffResult<Vec<DiffPartition>> {
        Ok(self.partitions.clone())
    }

    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream> {
        let table = partition.curr_name().to_string();
        let rows: Vec<Vec<Value>> = self
            .patch
            .iter()
            .filter(|r| r.table_name == table)
            .map(Self::project)
            .collect();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

/// Per-table history relation: the table's own columns plus trailing
/// `commit_hash`, `committer`, `commit_date`.
pub struct HistoryTable<'a> {
    session: &'a Session,
    table: TableName,
    base: crate::catalog::TableSchema,
}

impl<'a> HistoryTable<'a> {
    pub fn new(session: &'a Session, table_name: &str) -> DiffResult<Self> {
        let table = TableName::new(table_name).map_err(|e| DiffError::InvalidArgument {
            argument: "table_name".to_string(),
            reason: e.to_string(),
        })?;

        let store = session.store();
        let working = store.root_of_tree(store.working_root()?)?;
        let base = working
            .table(&table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| DiffError::TableNotFound(table_name.to_string()))?;

        Ok(Self {
            session,
            table,
            base,
        })
    }
}

impl DiffRelation for HistoryTable<'_> {
    fn schema(&self) -> Vec<ColumnDef> {
        history_schema(&self.base)
    }

    fn partitions(&self) -> DiffResult<Vec<DiffPartition>> {
        let store = self.session.store();
        let head = store.head()?;
        let working = store.working_root()?;
        Ok(HistoryPartitions::new(store, &self.table, head, working)?.collect())
    }

    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream> {
        Ok(Box::new(HistoryRowIter::open(
            self.session.store(),
            partition,
        )?))
    }
}
