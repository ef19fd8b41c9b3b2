//! Table-level change detection between two roots.
//!
//! A delta pairs a table's state on the from side with its state on the to
//! side. Tables whose subtree content hash is identical on both sides are
//! omitted entirely; callers never see a delta for an unchanged table.
//! Identity is by name: there are no content-similarity rename heuristics.

use crate::catalog::{primary_key_sets_diffable, schemas_equal, TableSchema};
use crate::session::{Session, PRIMARY_KEY_CHANGE_WARNING_CODE, SCHEMA_CHANGE_WARNING_CODE};
use crate::storage::{RootSnapshot, TableInfo, TableName};

/// One table's change between two roots. Exactly one of `from`/`to` may be
/// absent (table added or dropped).
#[derive(Debug, Clone)]
pub struct TableDelta {
    pub from: Option<TableInfo>,
    pub to: Option<TableInfo>,
}

impl TableDelta {
    /// table added on the to side
    pub fn is_add(&self) -> bool {
        self.from.is_none()
    }

    /// table dropped on the to side
    pub fn is_drop(&self) -> bool {
        self.to.is_none()
    }

    /// true when neither side's schema declares a primary key
    pub fn is_keyless(&self) -> bool {
        let from_keyless = self.from.as_ref().map_or(true, |t| t.schema.is_keyless());
        let to_keyless = self.to.as_ref().map_or(true, |t| t.schema.is_keyless());
        from_keyless && to_keyless
    }

    /// the table's current name: to-name, falling back to from-name for drops
    pub fn curr_name(&self) -> &TableName {
        match (&self.to, &self.from) {
            (Some(to), _) => &to.name,
            (None, Some(from)) => &from.name,
            (None, None) => unreachable!("delta with neither side"),
        }
    }

    pub fn from_name(&self) -> Option<&TableName> {
        self.from.as_ref().map(|t| &t.name)
    }

    pub fn to_name(&self) -> Option<&TableName> {
        self.to.as_ref().map(|t| &t.name)
    }

    pub fn from_schema(&self) -> Option<&TableSchema> {
        self.from.as_ref().map(|t| &t.schema)
    }

    pub fn to_schema(&self) -> Option<&TableSchema> {
        self.to.as_ref().map(|t| &t.schema)
    }
}

/// Compute the changed tables between two roots.
///
/// Takes the union of table names on both sides, drops every pair whose
/// subtree hashes match, and sorts the result by current name.
pub fn table_deltas(from_root: &RootSnapshot, to_root: &RootSnapshot) -> Vec<TableDelta> {
    let mut names: Vec<&TableName> = from_root.table_names().collect();
    for name in to_root.table_names() {
        if !from_root.tables.contains_key(name) {
            names.push(name);
        }
    }

    let mut deltas: Vec<TableDelta> = names
        .into_iter()
        .filter_map(|name| {
            let from = from_root.table(name).cloned();
            let to = to_root.table(name).cloned();

            // unchanged content hash: not a delta at all
            if let (Some(f), Some(t)) = (&from, &to) {
                if f.subtree == t.subtree {
                    return None;
                }
            }

            Some(TableDelta { from, to })
        })
        .collect();

    deltas.sort_by(|a, b| a.curr_name().cmp(b.curr_name()));
    deltas
}

/// Decide whether row-level data diffing is possible for a delta.
///
/// Drops never produce data rows. A primary key change or any other schema
/// change degrades the diff to schema-only output and records a session
/// warning; neither is an error.
pub fn can_diff_data(session: &Session, delta: &TableDelta) -> bool {
    if delta.is_drop() {
        return false;
    }

    if !primary_key_sets_diffable(delta.from_schema(), delta.to_schema()) {
        session.add_warning(
            PRIMARY_KEY_CHANGE_WARNING_CODE,
            format!(
                "primary key set changed for table {}, data diff unavailable",
                delta.curr_name()
            ),
        );
        return false;
    }

    match (delta.from_schema(), delta.to_schema()) {
        // table added: every row is an add against the to schema
        (None, Some(_)) => true,
        (Some(from), Some(to)) => {
            if schemas_equal(from, to) {
                true
            } else {
                session.add_warning(
                    SCHEMA_CHANGE_WARNING_CODE,
                    format!(
                        "schema changed for table {}, data diff unavailable",
                        delta.curr_name()
                    ),
                );
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType};
    use crate::storage::{Row, RowKey, VersionStore};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn session() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        let session = Session::open(dir.path().join("db")).unwrap();
        (dir, session)
    }

    fn users_schema() -> TableSchema {
        TableSchema::new("users")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_column(ColumnDef::new("name", DataType::Text, true))
            .with_primary_key(vec!["id".to_string()])
    }

    fn row(key: &str, name: &str) -> Row {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), serde_json::json!(name));
        Row::new(RowKey::new(key).unwrap(), data)
    }

    fn roots_at(store: &VersionStore, a: crate::storage::CommitId, b: crate::storage::CommitId) -> (RootSnapshot, RootSnapshot) {
        (store.root_at(a).unwrap(), store.root_at(b).unwrap())
    }

    #[test]
    fn test_equal_roots_empty_delta_set() {
        let (_dir, session) = session();
        let head = session.store().create_table(&users_schema()).unwrap();

        let (from, to) = roots_at(session.store(), head, head);
        assert!(table_deltas(&from, &to).is_empty());
    }

    #[test]
    fn test_unchanged_table_omitted() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        let orders = TableSchema::new("orders")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_primary_key(vec!["id".to_string()]);
        store.create_table(&orders).unwrap();
        let c3 = store
            .upsert_row(&TableName::new("orders").unwrap(), row("o1", "x"))
            .unwrap();

        let (from, to) = roots_at(store, c1, c3);
        let deltas = table_deltas(&from, &to);

        // users is byte-identical on both sides, only orders shows up
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].curr_name().as_str(), "orders");
    }

    #[test]
    fn test_add_and_drop_shapes() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        let c2 = store.drop_table(&TableName::new("users").unwrap()).unwrap();

        let (from, to) = roots_at(store, c1, c2);
        let deltas = table_deltas(&from, &to);
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].is_drop());
        assert!(!deltas[0].is_add());

        // reversed direction: an add
        let (from, to) = roots_at(store, c2, c1);
        let deltas = table_deltas(&from, &to);
        assert!(deltas[0].is_add());
    }

    #[test]
    fn test_deltas_sorted_by_current_name() {
        let (_dir, session) = session();
        let store = session.store();

        let empty = store.head().unwrap();
        let mk = |name: &str| {
            TableSchema::new(name)
                .with_column(ColumnDef::new("id", DataType::Integer, false))
                .with_primary_key(vec!["id".to_string()])
        };
        store.create_table(&mk("zebra")).unwrap();
        store.create_table(&mk("apple")).unwrap();
        let head = store.create_table(&mk("mango")).unwrap();

        let (from, to) = roots_at(store, empty, head);
        let deltas = table_deltas(&from, &to);
        let names: Vec<&str> = deltas.iter().map(|d| d.curr_name().as_str()).collect();
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_drop_not_diffable_without_warning() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        let c2 = store.drop_table(&TableName::new("users").unwrap()).unwrap();

        let (from, to) = roots_at(store, c1, c2);
        let deltas = table_deltas(&from, &to);

        assert!(!can_diff_data(&session, &deltas[0]));
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn test_pk_change_warns_1105() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        store.drop_table(&TableName::new("users").unwrap()).unwrap();
        let rekeyed = TableSchema::new("users")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_column(ColumnDef::new("name", DataType::Text, false))
            .with_primary_key(vec!["name".to_string()]);
        let c3 = store.create_table(&rekeyed).unwrap();

        let (from, to) = roots_at(store, c1, c3);
        let deltas = table_deltas(&from, &to);

        assert!(!can_diff_data(&session, &deltas[0]));
        let warnings = session.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, PRIMARY_KEY_CHANGE_WARNING_CODE);
    }

    #[test]
    fn test_schema_change_degrades_with_warning() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        store.drop_table(&TableName::new("users").unwrap()).unwrap();
        let widened = users_schema().with_column(ColumnDef::new("age", DataType::Integer, true));
        let c3 = store.create_table(&widened).unwrap();

        let (from, to) = roots_at(store, c1, c3);
        let deltas = table_deltas(&from, &to);

        assert!(!can_diff_data(&session, &deltas[0]));
        let warnings = session.take_warnings();
        assert_eq!(warnings[0].code, SCHEMA_CHANGE_WARNING_CODE);
    }

    #[test]
    fn test_pure_data_change_is_diffable() {
        let (_dir, session) = session();
        let store = session.store();

        let c1 = store.create_table(&users_schema()).unwrap();
        let c2 = store
            .upsert_row(&TableName::new("users").unwrap(), row("u1", "Ada"))
            .unwrap();

        let (from, to) = roots_at(store, c1, c2);
        let deltas = table_deltas(&from, &to);

        assert!(can_diff_data(&session, &deltas[0]));
        assert!(session.warnings().is_empty());
    }
}
