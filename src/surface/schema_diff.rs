//! Schema-level diff relation.
//!
//! One row per table whose definition changed between the endpoints, each
//! side rendered as a CREATE TABLE fragment. Data-only changes never appear
//! here; the delta must touch the schema itself.

use serde_json::Value;

use crate::catalog::{schemas_equal, ColumnDef, DataType, TableSchema};
use crate::diff::{table_deltas, DiffPartition, DiffResult, DiffType};
use crate::session::Session;
use crate::surface::bind::BoundDiff;
use crate::surface::relation::{DiffRelation, RowStream};

/// `SCHEMA_DIFF(fromRef, toRef[, tableName])`.
///
/// Fixed 15-column layout: seven `to_*` columns, seven matching `from_*`
/// columns, and a trailing `diff_type`. Rows are keyed by
/// `(to_type, to_name)`.
pub struct SchemaDiffTable {
    partitions: Vec<DiffPartition>,
}

impl SchemaDiffTable {
    pub fn bind(session: &Session, args: &[&str]) -> DiffResult<Self> {
        let bound = BoundDiff::bind(session, args)?;

        let partitions = table_deltas(&bound.from.root, &bound.to.root)
            .into_iter()
            .filter(|d| bound.table.as_ref().map_or(true, |t| d.curr_name() == t))
            .filter(|d| match (d.from_schema(), d.to_schema()) {
                (Some(from), Some(to)) => !schemas_equal(from, to),
                _ => true,
            })
            .map(|d| DiffPartition::from_delta(&d, &bound.from, &bound.to))
            .collect();

        Ok(Self { partitions })
    }

    fn side_values(schema: Option<&TableSchema>, label: &str, date: &Value) -> Vec<Value> {
        match schema {
            Some(schema) => vec![
                Value::String("table".to_string()),
                Value::String(schema.name.clone()),
                Value::String(schema.create_table_sql()),
                Value::Null,
                Value::Null,
                Value::String(label.to_string()),
                date.clone(),
            ],
            None => vec![Value::Null; 7],
        }
    }

    fn row(&self, partition: &DiffPartition) -> Vec<Value> {
        let diff_type = match (&partition.from, &partition.to) {
            (None, Some(_)) => DiffType::Added,
            (Some(_), None) => DiffType::Removed,
            _ => DiffType::Modified,
        };

        let from_date = match partition.from_date {
            Some(d) => Value::String(d.to_rfc3339()),
            None => Value::Null,
        };
        let to_date = match partition.to_date {
            Some(d) => Value::String(d.to_rfc3339()),
            None => Value::Null,
        };

        let mut values =
            Self::side_values(partition.to_schema(), &partition.to_label, &to_date);
        values.extend(Self::side_values(
            partition.from_schema(),
            &partition.from_label,
            &from_date,
        ));
        values.push(Value::String(diff_type.as_str().to_string()));
        values
    }
}

impl DiffRelation for SchemaDiffTable {
    fn schema(&self) -> Vec<ColumnDef> {
        let mut columns = Vec::with_capacity(15);
        for prefix in ["to", "from"] {
            columns.push(ColumnDef::new(format!("{}_type", prefix), DataType::Text, true));
            columns.push(ColumnDef::new(format!("{}_name", prefix), DataType::Text, true));
            columns.push(ColumnDef::new(format!("{}_fragment", prefix), DataType::Text, true));
            columns.push(ColumnDef::new(format!("{}_extra", prefix), DataType::Json, true));
            columns.push(ColumnDef::new(format!("{}_sql_mode", prefix), DataType::Text, true));
            columns.push(ColumnDef::new(format!("{}_commit", prefix), DataType::Text, true));
            columns.push(ColumnDef::new(
                format!("{}_commit_date", prefix),
                DataType::Timestamp,
                true,
            ));
        }
        columns.push(ColumnDef::new("diff_type", DataType::Text, true));
        columns
    }

    fn partitions(&self) -> DiffResult<Vec<DiffPartition>> {
        Ok(self.partitions.clone())
    }

    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream> {
        let row = self.row(partition);
        Ok(Box::new(std::iter::once(Ok(row))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Row, RowKey, TableName};
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

    #[test]
    fn test_schema_layout() {
        let (_dir, session) = session();
        session.store().create_table(&people_schema()).unwrap();

        let table = SchemaDiffTable::bind(&session, &["'main'", "'main'"]).unwrap();
        let columns = table.schema();
        assert_eq!(columns.len(), 15);
        assert_eq!(columns[0].name, "to_type");
        assert_eq!(columns[7].name, "from_type");
        assert_eq!(columns[14].name, "diff_type");
    }

    #[test]
    fn test_added_table_row() {
        let (_dir, session) = session();
        let store = session.store();

        let r0 = store.head().unwrap();
        let r1 = store.create_table(&people_schema()).unwrap();

        let from_arg = format!("'{}'", r0);
        let to_arg = format!("'{}'", r1);
        let table =
            SchemaDiffTable::bind(&session, &[from_arg.as_str(), to_arg.as_str()]).unwrap();

        let rows: Vec<Vec<Value>> = table
            .rows()
            .unwrap()
            .collect::<DiffResult<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], serde_json::json!("table"));
        assert_eq!(rows[0][1], serde_json::json!("people"));
        assert!(rows[0][2].as_str().unwrap().starts_with("CREATE TABLE"));
        // from-side is entirely absent
        assert!(rows[0][7..14].iter().all(|v| v.is_null()));
        assert_eq!(rows[0][14], serde_json::json!("added"));
    }

    #[test]
    fn test_data_only_change_excluded() {
        let (_dir, session) = session();
        let store = session.store();
        let table = TableName::new("people").unwrap();

        store.create_table(&people_schema()).unwrap();
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(1));
        store
            .upsert_row(&table, Row::new(RowKey::new("p1").unwrap(), data))
            .unwrap();

        let diff = SchemaDiffTable::bind(&session, &["'main~1'", "'main'"]).unwrap();
        assert!(diff.partitions().unwrap().is_empty());
    }
}
