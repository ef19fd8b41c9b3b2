//! SQL patch generation.
//!
//! Turns a diff into replayable SQL: schema statements first, then one DML
//! statement per changed row in key order. Every statement stands alone;
//! UPDATEs carry full column context so a patch can be applied partially.

use serde_json::Value;

use crate::catalog::{ColumnDef, TableSchema};
use crate::diff::delta::{can_diff_data, TableDelta};
use crate::diff::errors::DiffResult;
use crate::diff::partition::{DiffPartition, DiffPartitionRowIter, DiffType};
use crate::diff::resolver::RefDetails;
use crate::session::Session;
use crate::storage::Row;

/// Identifier and value quoting for generated SQL.
pub mod sqlfmt {
    use serde_json::Value;

    /// Backtick-quote an identifier.
    pub fn ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// Render a JSON value as a SQL literal.
    pub fn value(v: &Value) -> String {
        match v {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote_str(s),
            Value::Array(_) | Value::Object(_) => quote_str(&v.to_string()),
        }
    }

    fn quote_str(s: &str) -> String {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }
}

/// One patch statement with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRow {
    /// 1-based position across the whole patch
    pub statement_order: u64,
    pub from_commit_hash: String,
    pub to_commit_hash: String,
    pub table_name: String,
    /// `"schema"` or `"data"`
    pub diff_type: &'static str,
    pub statement: String,
}

/// Schema statements for one delta, in emission order: column changes, then
/// foreign key drops and adds.
pub fn schema_statements(delta: &TableDelta) -> Vec<String> {
    if delta.is_drop() {
        // one DROP, regardless of how many rows the table held
        let from = delta.from_schema().map(|s| s.name.as_str()).unwrap_or("");
        return vec![format!("DROP TABLE {};", sqlfmt::ident(from))];
    }

    if delta.is_add() {
        let to = match delta.to_schema() {
            Some(s) => s,
            None => return Vec::new(),
        };
        return vec![to.create_table_sql()];
    }

    let (from, to) = match (delta.from_schema(), delta.to_schema()) {
        (Some(f), Some(t)) => (f, t),
        _ => return Vec::new(),
    };

    let mut statements = Vec::new();
    let table = sqlfmt::ident(&to.name);

    // dropped columns
    for col in &from.columns {
        if to.get_column(&col.name).is_none() {
            statements.push(format!("ALTER TABLE {} DROP COLUMN {};", table, sqlfmt::ident(&col.name)));
        }
    }

    // added and modified columns
    for col in &to.columns {
        match from.get_column(&col.name) {
            None => statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {};",
                table,
                col.to_sql()
            )),
            Some(old) if old != col => statements.push(format!(
                "ALTER TABLE {} MODIFY COLUMN {};",
                table,
                col.to_sql()
            )),
            Some(_) => {}
        }
    }

    // foreign key drops, then adds
    for fk in &from.foreign_keys {
        if !to.foreign_keys.contains(fk) {
            statements.push(format!(
                "ALTER TABLE {} DROP FOREIGN KEY ({});",
                table,
                sqlfmt::ident(&fk.column)
            ));
        }
    }
    for fk in &to.foreign_keys {
        if !from.foreign_keys.contains(fk) {
            statements.push(format!("ALTER TABLE {} ADD {};", table, fk.to_sql()));
        }
    }

    statements
}

fn column_value(row: &Row, col: &ColumnDef) -> Value {
    row.get(&col.name).cloned().unwrap_or(Value::Null)
}

/// WHERE clause identifying a row: primary key columns for keyed tables,
/// every column for keyless ones.
fn where_clause(schema: &TableSchema, row: &Row) -> String {
    let key_cols: Vec<&ColumnDef> = if schema.is_keyless() {
        schema.columns.iter().collect()
    } else {
        schema.pk_columns()
    };

    let conditions: Vec<String> = key_cols
        .iter()
        .map(|col| {
            let v = column_value(row, col);
            if v == Value::Null {
                format!("{} IS NULL", sqlfmt::ident(&col.name))
            } else {
                format!("{} = {}", sqlfmt::ident(&col.name), sqlfmt::value(&v))
            }
        })
        .collect();

    conditions.join(" AND ")
}

fn insert_statement(schema: &TableSchema, row: &Row) -> String {
    let cols: Vec<String> = schema.columns.iter().map(|c| sqlfmt::ident(&c.name)).collect();
    let vals: Vec<String> = schema
        .columns
        .iter()
        .map(|c| sqlfmt::value(&column_value(row, c)))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        sqlfmt::ident(&schema.name),
        cols.join(", "),
        vals.join(", ")
    )
}

fn delete_statement(schema: &TableSchema, row: &Row) -> String {
    format!(
        "DELETE FROM {} WHERE {};",
        sqlfmt::ident(&schema.name),
        where_clause(schema, row)
    )
}

fn update_statement(schema: &TableSchema, from_row: &Row, to_row: &Row) -> String {
    // full column context: set every non-key column, not just changed ones
    let assignments: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| !schema.primary_key.contains(&c.name))
        .map(|c| {
            format!(
                "{} = {}",
                sqlfmt::ident(&c.name),
                sqlfmt::value(&column_value(to_row, c))
            )
        })
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {};",
        sqlfmt::ident(&schema.name),
        assignments.join(", "),
        where_clause(schema, from_row)
    )
}

/// Data statements for one delta, in row-stream key order. Empty when the
/// delta is not data-diffable.
pub fn data_statements(session: &Session, delta: &TableDelta) -> DiffResult<Vec<String>> {
    if !can_diff_data(session, delta) {
        return Ok(Vec::new());
    }

    let schema = match delta.to_schema() {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };

    let partition = DiffPartition {
        from: delta.from.clone(),
        to: delta.to.clone(),
        from_label: String::new(),
        to_label: String::new(),
        from_date: None,
        to_date: None,
    };

    let mut statements = Vec::new();
    for item in DiffPartitionRowIter::open(session.store(), &partition)? {
        let diff_row = item?;
        let statement = match diff_row.diff_type {
            DiffType::Added => {
                let row = diff_row.to.as_ref().ok_or_else(missing_image)?;
                insert_statement(schema, row)
            }
            DiffType::Removed => {
                let row = diff_row.from.as_ref().ok_or_else(missing_image)?;
                delete_statement(schema, row)
            }
            DiffType::Modified => {
                let from_row = diff_row.from.as_ref().ok_or_else(missing_image)?;
                let to_row = diff_row.to.as_ref().ok_or_else(missing_image)?;
                update_statement(schema, from_row, to_row)
            }
        };
        statements.push(statement);
    }

    Ok(statements)
}

fn missing_image() -> crate::diff::errors::DiffError {
    crate::storage::StorageError::Internal("diff row missing expected image".to_string()).into()
}

/// Generate the full patch between two resolved endpoints.
///
/// Schema statements come first per table, then data statements;
/// `statement_order` spans the whole result.
pub fn patch_rows(
    session: &Session,
    from: &RefDetails,
    to: &RefDetails,
    deltas: &[TableDelta],
) -> DiffResult<Vec<PatchRow>> {
    let mut rows = Vec::new();
    let mut order = 0u64;

    for delta in deltas {
        let table_name = delta.curr_name().to_string();

        for statement in schema_statements(delta) {
            order += 1;
            rows.push(PatchRow {
                statement_order: order,
                from_commit_hash: from.hash_label.clone(),
                to_commit_hash: to.hash_label.clone(),
                table_name: table_name.clone(),
                diff_type: "schema",
                statement,
            });
        }

        for statement in data_statements(session, delta)? {
            order += 1;
            rows.push(PatchRow {
                statement_order: order,
                from_commit_hash: from.hash_label.clone(),
                to_commit_hash: to.hash_label.clone(),
                table_name: table_name.clone(),
                diff_type: "data",
                statement,
            });
        }
    }

    Ok(rows)
}
