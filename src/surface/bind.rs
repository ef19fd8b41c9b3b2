//! Bind-time argument validation for the diff table functions.
//!
//! Arguments arrive as SQL expression strings. Only single literal values
//! bind; anything else is rejected up front with an error naming the
//! offending argument. Refs and table names are resolved here too, so an
//! unknown ref or table fails the query before any row streams.

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use crate::diff::{
    resolve_endpoints, resolve_range_expr, DiffError, DiffResult, RefDetails, RefRange,
};
use crate::session::Session;
use crate::storage::TableName;

/// Evaluate one argument expression down to a literal string.
pub fn literal_arg(raw: &str, argument: &str) -> DiffResult<String> {
    let dialect = GenericDialect {};
    let expr = SqlParser::new(&dialect)
        .try_with_sql(raw)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| DiffError::InvalidArgument {
            argument: argument.to_string(),
            reason: format!("not a valid expression: {}", e),
        })?;

    match expr {
        sp::Expr::Value(v) => match v.value {
            sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => Ok(s),
            sp::Value::Number(n, _) => Ok(n),
            other => Err(DiffError::InvalidArgument {
                argument: argument.to_string(),
                reason: format!("literal value required, got {}", other),
            }),
        },
        other => Err(DiffError::InvalidArgument {
            argument: argument.to_string(),
            reason: format!("literal value required, got expression `{}`", other),
        }),
    }
}

/// Fully resolved diff arguments: both endpoints plus an optional table
/// restriction.
pub struct BoundDiff {
    pub from: RefDetails,
    pub to: RefDetails,
    pub table: Option<TableName>,
}

impl BoundDiff {
    /// Bind either calling convention:
    /// - dotted: `(rangeExpr [, tableName])`
    /// - explicit: `(fromRef, toRef [, tableName])`
    pub fn bind(session: &Session, args: &[&str]) -> DiffResult<Self> {
        if args.is_empty() {
            return Err(DiffError::WrongArgumentCount {
                expected: "1 to 3".to_string(),
                got: 0,
            });
        }

        let first = literal_arg(args[0], "from_revision")?;

        let (from, to, table_arg) = if RefRange::is_range_expr(&first) {
            if args.len() > 2 {
                return Err(DiffError::WrongArgumentCount {
                    expected: "1 or 2 with a range expression".to_string(),
                    got: args.len(),
                });
            }
            let (from, to) = resolve_range_expr(session, &first)?;
            (from, to, args.get(1))
        } else {
            if args.len() < 2 || args.len() > 3 {
                return Err(DiffError::WrongArgumentCount {
                    expected: "2 or 3".to_string(),
                    got: args.len(),
                });
            }
            let second = literal_arg(args[1], "to_revision")?;
            let (from, to) = resolve_endpoints(session, &first, &second)?;
            (from, to, args.get(2))
        };

        let table = match table_arg {
            Some(raw) => {
                let name = literal_arg(raw, "table_name")?;
                let table = TableName::new(&name).map_err(|e| DiffError::InvalidArgument {
                    argument: "table_name".to_string(),
                    reason: e.to_string(),
                })?;
                // the table must exist on at least one side
                if from.root.table(&table).is_none() && to.root.table(&table).is_none() {
                    return Err(DiffError::TableNotFound(name));
                }
                Some(table)
            }
            None => None,
        };

        Ok(Self { from, to, table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, TableSchema};
    use tempfile::TempDir;

    fn session() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        let session = Session::open(dir.path().join("db")).unwrap();
        (dir, session)
    }

    fn seeded_session() -> (TempDir, Session) {
        let (dir, session) = session();
        let schema = TableSchema::new("people")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_primary_key(vec!["id".to_string()]);
        session.store().create_table(&schema).unwrap();
        (dir, session)
    }

    #[test]
    fn test_literal_args() {
        assert_eq!(literal_arg("'main'", "x").unwrap(), "main");
        assert_eq!(literal_arg("42", "x").unwrap(), "42");

        // non-literals are rejected with the argument's name
        for bad in ["1 + 1", "some_column", "(SELECT 1)", "NOW()"] {
            match literal_arg(bad, "from_revision") {
                Err(DiffError::InvalidArgument { argument, .. }) => {
                    assert_eq!(argument, "from_revision");
                }
                other => panic!("expected InvalidArgument for {:?}, got {:?}", bad, other.err()),
            }
        }
    }

    #[test]
    fn test_bind_explicit_form() {
        let (_dir, session) = seeded_session();

        let bound = BoundDiff::bind(&session, &["'main'", "'main'", "'people'"]).unwrap();
        assert_eq!(bound.table.as_ref().map(|t| t.as_str()), Some("people"));
        assert_eq!(bound.from.root.tree_id, bound.to.root.tree_id);
    }

    #[test]
    fn test_bind_dotted_form() {
        let (_dir, session) = seeded_session();
        let store = session.store();
        let schema = TableSchema::new("extra")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_primary_key(vec!["id".to_string()]);
        store.create_table(&schema).unwrap();

        let bound = BoundDiff::bind(&session, &["'main~1..main'", "'extra'"]).unwrap();
        assert!(bound.table.is_some());
        assert_ne!(bound.from.root.tree_id, bound.to.root.tree_id);
    }

    #[test]
    fn test_bind_arity_errors() {
        let (_dir, session) = seeded_session();

        assert!(matches!(
            BoundDiff::bind(&session, &[]),
            Err(DiffError::WrongArgumentCount { got: 0, .. })
        ));
        assert!(matches!(
            BoundDiff::bind(&session, &["'main'"]),
            Err(DiffError::WrongArgumentCount { got: 1, .. })
        ));
        assert!(matches!(
            BoundDiff::bind(&session, &["'main..main'", "'people'", "'x'"]),
            Err(DiffError::WrongArgumentCount { got: 3, .. })
        ));
    }

    #[test]
    fn test_bind_unknown_table_and_ref_fail_early() {
        let (_dir, session) = seeded_session();

        assert!(matches!(
            BoundDiff::bind(&session, &["'main'", "'main'", "'ghost'"]),
            Err(DiffError::TableNotFound(_))
        ));
        assert!(matches!(
            BoundDiff::bind(&session, &["'nope'", "'main'"]),
            Err(DiffError::RefNotFound(_))
        ));
    }
}
