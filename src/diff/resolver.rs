//! Commit and range resolution for diff endpoints.
//!
//! A diff runs between two resolved refs. Refs arrive either as an explicit
//! pair or as a range expression: `a..b` diffs the two commits directly,
//! `a...b` substitutes `merge_base(a, b)` for the from side. The literal
//! `WORKING` resolves to the session's live working root, which has no
//! backing commit and therefore no hash or timestamp.

use chrono::{DateTime, Utc};

use crate::diff::errors::{DiffError, DiffResult};
use crate::session::Session;
use crate::storage::{CommitId, RootSnapshot};

/// Sentinel ref naming the uncommitted working root.
pub const WORKING_REF: &str = "WORKING";

/// Label used for the absent side of a creation partition.
pub const EMPTY_LABEL: &str = "EMPTY";

/// A parsed range expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefRange {
    /// `a..b`: diff the two refs directly.
    Direct { from: String, to: String },
    /// `a...b`: diff from `merge_base(a, b)` to `b`.
    MergeBase { from: String, to: String },
}

impl RefRange {
    /// Parse a range expression. Both sides must be non-empty and the
    /// separator must appear exactly once.
    pub fn parse(expr: &str) -> DiffResult<Self> {
        let (separator, three_dot) = if expr.contains("...") {
            ("...", true)
        } else if expr.contains("..") {
            ("..", false)
        } else {
            return Err(DiffError::InvalidRange(expr.to_string()));
        };

        let mut parts = expr.splitn(2, separator);
        let from = parts.next().unwrap_or("");
        let to = parts.next().unwrap_or("");

        if from.is_empty() || to.is_empty() || to.contains("..") {
            return Err(DiffError::InvalidRange(expr.to_string()));
        }

        if three_dot {
            Ok(RefRange::MergeBase {
                from: from.to_string(),
                to: to.to_string(),
            })
        } else {
            Ok(RefRange::Direct {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// true for an expression containing a range separator
    pub fn is_range_expr(expr: &str) -> bool {
        expr.contains("..")
    }
}

/// One resolved diff endpoint: a materialized root plus display metadata.
#[derive(Debug, Clone)]
pub struct RefDetails {
    /// backing commit; None for the working root
    pub commit: Option<CommitId>,
    /// the root this endpoint denotes
    pub root: RootSnapshot,
    /// full hash string, or the `WORKING` sentinel
    pub hash_label: String,
    /// commit timestamp; None for the working root
    pub timestamp: Option<DateTime<Utc>>,
}

/// Resolve a single ref expression against a session.
pub fn resolve_ref(session: &Session, refstr: &str) -> DiffResult<RefDetails> {
    if refstr == WORKING_REF {
        let store = session.store();
        let tree_id = store.working_root()?;
        let root = store.root_of_tree(tree_id)?;
        return Ok(RefDetails {
            commit: None,
            root,
            hash_label: WORKING_REF.to_string(),
            timestamp: None,
        });
    }

    // relative specs resolve against the session's current branch
    let expr = if refstr.starts_with('~') || refstr.starts_with('^') {
        format!("{}{}", session.current_branch(), refstr)
    } else {
        refstr.to_string()
    };

    let store = session.store();
    let commit_id = store
        .resolve(&expr)
        .map_err(|_| DiffError::RefNotFound(refstr.to_string()))?;
    let info = store.get_commit(commit_id)?;
    let root = store.root_at(commit_id)?;

    Ok(RefDetails {
        commit: Some(commit_id),
        root,
        hash_label: commit_id.to_string(),
        timestamp: Some(info.timestamp),
    })
}

/// Resolve an explicit endpoint pair.
pub fn resolve_endpoints(session: &Session, from: &str, to: &str) -> DiffResult<(RefDetails, RefDetails)> {
    Ok((resolve_ref(session, from)?, resolve_ref(session, to)?))
}

/// Resolve a parsed range to its two endpoints.
///
/// For the three-dot form the from side becomes `merge_base(a, b)`. A
/// `WORKING` endpoint contributes the current head commit to the merge-base
/// computation.
pub fn resolve_range(session: &Session, range: &RefRange) -> DiffResult<(RefDetails, RefDetails)> {
    match range {
        RefRange::Direct { from, to } => resolve_endpoints(session, from, to),
        RefRange::MergeBase { from, to } => {
            let from_details = resolve_ref(session, from)?;
            let to_details = resolve_ref(session, to)?;

            let store = session.store();
            let from_commit = match from_details.commit {
                Some(id) => id,
                None => store.head()?,
            };
            let to_commit = match to_details.commit {
                Some(id) => id,
                None => store.head()?,
            };

            let base = store
                .merge_base(from_commit, to_commit)?
                .ok_or_else(|| DiffError::NoMergeBase(from.clone(), to.clone()))?;

            let base_info = store.get_commit(base)?;
            let base_details = RefDetails {
                commit: Some(base),
                root: store.root_at(base)?,
                hash_label: base.to_string(),
                timestamp: Some(base_info.timestamp),
            };

            Ok((base_details, to_details))
        }
    }
}

/// Parse and resolve a range expression in one step.
pub fn resolve_range_expr(session: &Session, expr: &str) -> DiffResult<(RefDetails, RefDetails)> {
    let range = RefRange::parse(expr)?;
    resolve_range(session, &range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType, TableSchema};
    use crate::storage::{Row, RowKey, TableName};
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
            .with_primary_key(vec!["id".to_string()])
    }

    #[test]
    fn test_range_parse() {
        assert_eq!(
            RefRange::parse("main~1..main").unwrap(),
            RefRange::Direct {
                from: "main~1".to_string(),
                to: "main".to_string()
            }
        );
        assert_eq!(
            RefRange::parse("feature...main").unwrap(),
            RefRange::MergeBase {
                from: "feature".to_string(),
                to: "main".to_string()
            }
        );
    }

    #[test]
    fn test_range_parse_rejects_malformed() {
        for expr in ["a..", "..b", "a..b..c", "..", "...", "plain"] {
            assert!(
                matches!(RefRange::parse(expr), Err(DiffError::InvalidRange(_))),
                "expected InvalidRange for {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_resolve_commit_ref() {
        let (_dir, session) = session();
        let head = session.store().create_table(&users_schema()).unwrap();

        let details = resolve_ref(&session, "main").unwrap();
        assert_eq!(details.commit, Some(head));
        assert_eq!(details.hash_label, head.to_string());
        assert!(details.timestamp.is_some());
        assert_eq!(details.root.tables.len(), 1);
    }

    #[test]
    fn test_resolve_working_ref() {
        let (_dir, session) = session();
        session.store().create_table(&users_schema()).unwrap();

        let table = TableName::new("users").unwrap();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), serde_json::json!("Ada"));
        session
            .store()
            .stage_upsert_row(&table, &Row::new(RowKey::new("u1").unwrap(), data))
            .unwrap();

        let details = resolve_ref(&session, WORKING_REF).unwrap();
        assert_eq!(details.commit, None);
        assert_eq!(details.hash_label, "WORKING");
        assert!(details.timestamp.is_none());

        // the staged row is visible through the working root
        let info = details.root.table(&table).unwrap();
        let rows = session.store().list_rows(info.subtree).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_unknown_ref_is_plan_time_fatal() {
        let (_dir, session) = session();
        let err = resolve_ref(&session, "no_such_branch").unwrap_err();
        assert!(matches!(err, DiffError::RefNotFound(_)));
        assert!(err.is_plan_time());
    }

    #[test]
    fn test_three_dot_uses_merge_base() {
        let (_dir, session) = session();
        let store = session.store();

        let base = store.create_table(&users_schema()).unwrap();

        // diverge: main gains a table, feature stays at base
        let feature = crate::storage::BranchName::new("feature").unwrap();
        store.create_branch(&feature, base).unwrap();

        let other = TableSchema::new("orders")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_primary_key(vec!["id".to_string()]);
        store.create_table(&other).unwrap();

        let (from, to) = resolve_range_expr(&session, "feature...main").unwrap();
        assert_eq!(from.commit, Some(base));
        assert_eq!(to.commit, Some(store.head().unwrap()));
    }
}
