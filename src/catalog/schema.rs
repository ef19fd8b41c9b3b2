//! Table schema definitions and comparison.
//!
//! Schemas serialize to JSON blobs inside each table subtree. The
//! serialization carries no timestamps or counters, so a schema that does
//! not change keeps an identical blob hash across commits.

use serde::{Deserialize, Serialize};

use super::types::{ColumnDef, ForeignKey};

/// Table schema definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key column names, in key order. Empty means keyless.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    /// Foreign key references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Create a new table schema with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Get a column definition by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// True when the table has no declared primary key.
    pub fn is_keyless(&self) -> bool {
        self.primary_key.is_empty()
    }

    /// Primary key column definitions, in key order.
    pub fn pk_columns(&self) -> Vec<&ColumnDef> {
        self.primary_key
            .iter()
            .filter_map(|name| self.get_column(name))
            .collect()
    }

    /// Render the schema as a CREATE TABLE statement.
    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();

        if !self.primary_key.is_empty() {
            let cols: Vec<String> = self.primary_key.iter().map(|c| format!("`{}`", c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        for fk in &self.foreign_keys {
            parts.push(fk.to_sql());
        }

        format!("CREATE TABLE `{}` (\n  {}\n);", self.name, parts.join(",\n  "))
    }
}

/// Structural schema equality: columns, primary key, and foreign keys.
///
/// Table names are ignored so that a renamed but otherwise unchanged table
/// still compares equal.
pub fn schemas_equal(a: &TableSchema, b: &TableSchema) -> bool {
    a.columns == b.columns && a.primary_key == b.primary_key && a.foreign_keys == b.foreign_keys
}

/// Key compatibility between two table states.
///
/// Row-level diffing requires row identity to mean the same thing on both
/// sides: either both states are keyless, or their primary key columns match
/// in name and type, position by position. An absent side is compatible with
/// anything.
pub fn primary_key_sets_diffable(from: Option<&TableSchema>, to: Option<&TableSchema>) -> bool {
    let (from, to) = match (from, to) {
        (Some(f), Some(t)) => (f, t),
        _ => return true,
    };

    if from.is_keyless() && to.is_keyless() {
        return true;
    }

    let from_pk = from.pk_columns();
    let to_pk = to.pk_columns();

    if from_pk.len() != to_pk.len() {
        return false;
    }

    from_pk
        .iter()
        .zip(to_pk.iter())
        .all(|(f, t)| f.name == t.name && f.data_type == t.data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::DataType;

    fn people() -> TableSchema {
        TableSchema::new("people")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_column(ColumnDef::new("name", DataType::Text, true))
            .with_primary_key(vec!["id".to_string()])
    }

    #[test]
    fn test_serde_round_trip() {
        let schema = people();
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn test_deterministic_serialization() {
        let a = serde_json::to_vec_pretty(&people()).unwrap();
        let b = serde_json::to_vec_pretty(&people()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_create_table_sql() {
        let schema = people().with_foreign_key(ForeignKey {
            column: "name".to_string(),
            parent_table: "names".to_string(),
            parent_column: "value".to_string(),
        });

        let sql = schema.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE `people` ("));
        assert!(sql.contains("`id` INTEGER NOT NULL"));
        assert!(sql.contains("`name` TEXT"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
        assert!(sql.contains("FOREIGN KEY (`name`) REFERENCES `names` (`value`)"));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn test_schemas_equal_ignores_name() {
        let mut renamed = people();
        renamed.name = "persons".to_string();
        assert!(schemas_equal(&people(), &renamed));

        let widened = people().with_column(ColumnDef::new("age", DataType::Integer, true));
        assert!(!schemas_equal(&people(), &widened));
    }

    #[test]
    fn test_pk_sets_diffable() {
        // identical keys
        assert!(primary_key_sets_diffable(Some(&people()), Some(&people())));

        // absent side is always compatible
        assert!(primary_key_sets_diffable(None, Some(&people())));
        assert!(primary_key_sets_diffable(Some(&people()), None));

        // both keyless
        let keyless = TableSchema::new("log").with_column(ColumnDef::new("msg", DataType::Text, true));
        assert!(primary_key_sets_diffable(Some(&keyless), Some(&keyless)));

        // keyed vs keyless
        assert!(!primary_key_sets_diffable(Some(&people()), Some(&keyless)));

        // same name, different type
        let retyped = TableSchema::new("people")
            .with_column(ColumnDef::new("id", DataType::Text, false))
            .with_primary_key(vec!["id".to_string()]);
        assert!(!primary_key_sets_diffable(Some(&people()), Some(&retyped)));
    }
}
