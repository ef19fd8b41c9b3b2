//!   Core Git repository wrapper.
//!
//!  This is the central component of the storage layer.  It wraps `git2::Repository`
//!   with thread-safe access and provides high-level operations that the rest of
//!  the system uses.
//!
//! All other storage modules use this for Git access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::{Mutex, RwLock};

use crate::catalog::TableSchema;
use crate::storage::blob::{self, Row};
use crate::storage::commit::{self, CommitBuilder, CommitInfo, CommitMessage};
use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::{self, TreeHandle, TreeMutator};
use crate::storage::types::{BlobId, BranchName, CommitId, GitSignature, RowKey, TableName, TreeId};

/// A table's state within one root: its content hash and schema.
///
/// Two roots hold the same table state exactly when the `subtree` IDs match.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: TableName,
    pub subtree: TreeId,
    pub schema: TableSchema,
}

/// A materialized view of one root tree: table names, content hashes, and
/// schemas. Row data stays behind `subtree` IDs until a caller lists or
/// reads it.
#[derive(Debug, Clone)]
pub struct RootSnapshot {
    pub tree_id: TreeId,
    pub tables: BTreeMap<TableName, TableInfo>,
}

impl RootSnapshot {
    pub fn table(&self, name: &TableName) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }
}

/// staged working-set state: a root tree built on top of a base commit
#[derive(Debug, Clone, Copy)]
struct WorkingState {
    base: CommitId,
    root: TreeId,
}

/// The main Git repository wrapper.
///
/// This provides thread-safe access to all Git operations.
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct VersionStore {
    inner: Arc<VersionStoreInner>,
}

struct VersionStoreInner {
    // Mutex, not RwLock: git2::Repository is Send but not Sync, and the
    // stats walker hands store clones to scoped threads
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
    /// uncommitted working root, if any writes have been staged
    working: RwLock<Option<WorkingState>>,
}

impl VersionStore {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        Ok(Self {
            inner: Arc::new(VersionStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: GitSignature::driftdb(),
                working: RwLock::new(None),
            }),
        })
    }

    /// Initialize a new repository.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;

        let store = Self {
            inner: Arc::new(VersionStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: GitSignature::driftdb(),
                working: RwLock::new(None),
            }),
        };

        store.with_repo(|repo| {
            let commit_id = commit::create_initial_commit(repo, &store.inner.signature)?;
            RefManager::init_main_branch(repo, commit_id)?;
            Ok(())
        })?;

        Ok(store)
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with read access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Execute a function with write access to the repository.
    pub fn with_repo_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    // ==================== Ref Resolution ====================

    /// Get the current HEAD commit (tip of main branch).
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::head_commit(repo))
    }

    /// Get the commit ID for a branch.
    pub fn resolve_branch(&self, branch: &BranchName) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, branch))
    }

    /// Resolve a revision expression to a commit.
    ///
    /// Accepts branch names, full or abbreviated commit hashes, `HEAD`, and
    /// git ancestry suffixes such as `main~1` or `HEAD^`.
    pub fn resolve(&self, refstr: &str) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let object = repo
                .revparse_single(refstr)
                .map_err(|_| StorageError::RefNotFound(refstr.to_string()))?;
            let commit = object
                .peel_to_commit()
                .map_err(|_| StorageError::RefNotFound(refstr.to_string()))?;
            Ok(CommitId::new(commit.id()))
        })
    }

    /// Get information about a commit.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// Find the merge base of two commits.
    pub fn merge_base(&self, a: CommitId, b: CommitId) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| commit::find_merge_base(repo, a, b))
    }

    /// Walk first-parent ancestry starting from a commit, newest first.
    pub fn first_parent_history(&self, from: CommitId) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            commit::history(repo, from)?
                .first_parent_only()
                .collect::<Result<Vec<_>, _>>()
        })
    }

    // ==================== Root Snapshots ====================

    /// Materialize the root tree of a commit: table names, subtree content
    /// hashes, and schemas.
    pub fn root_at(&self, commit_id: CommitId) -> StorageResult<RootSnapshot> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, commit_id)?;
            Self::snapshot_tree(repo, &tree)
        })
    }

    /// Materialize a root tree by ID. Used for working roots, which have no
    /// backing commit.
    pub fn root_of_tree(&self, tree_id: TreeId) -> StorageResult<RootSnapshot> {
        self.with_repo(|repo| {
            let tree = TreeHandle::from_id(repo, tree_id)?;
            Self::snapshot_tree(repo, &tree)
        })
    }

    fn snapshot_tree(repo: &Repository, tree: &TreeHandle<'_>) -> StorageResult<RootSnapshot> {
        let mut tables = BTreeMap::new();
        for (name, subtree) in tree.list_tables() {
            let schema_blob = tree::schema_blob_id(repo, subtree)?.ok_or_else(|| {
                StorageError::CorruptedData {
                    path: name.as_str().into(),
                    reason: "table subtree has no schema blob".to_string(),
                }
            })?;
            let bytes = blob::read_blob(repo, schema_blob)?;
            let schema: TableSchema = serde_json::from_slice(&bytes)?;
            tables.insert(
                name.clone(),
                TableInfo {
                    name,
                    subtree,
                    schema,
                },
            );
        }
        Ok(RootSnapshot {
            tree_id: tree.id(),
            tables,
        })
    }

    /// List `(key, blob)` pairs of a table subtree in key order.
    pub fn list_rows(&self, subtree: TreeId) -> StorageResult<Vec<(RowKey, BlobId)>> {
        self.with_repo(|repo| tree::ordered_rows(repo, subtree))
    }

    /// Read and deserialize one row blob.
    pub fn read_row_blob(&self, blob_id: BlobId, key: &RowKey) -> StorageResult<Row> {
        self.with_repo(|repo| blob::read_row(repo, blob_id, key))
    }

    /// Identity hash of a stored row's column data, storage key excluded.
    pub fn row_content_id(&self, blob_id: BlobId, key: &RowKey) -> StorageResult<BlobId> {
        let row = self.read_row_blob(blob_id, key)?;
        blob::content_id(&row)
    }

    /// Read a row from a table at a commit.
    pub fn read_row(&self, table: &TableName, key: &RowKey, at: CommitId) -> StorageResult<Option<Row>> {
        let root = self.root_at(at)?;
        let info = match root.table(table) {
            Some(info) => info,
            None => return Err(StorageError::TableNotFound(table.clone())),
        };
        let rows = self.list_rows(info.subtree)?;
        match rows.iter().find(|(k, _)| k == key) {
            Some((_, blob_id)) => Ok(Some(self.read_row_blob(*blob_id, key)?)),
            None => Ok(None),
        }
    }

    // ==================== Working Root ====================

    /// The current working root tree. Falls back to the head commit's tree
    /// when no writes are staged.
    pub fn working_root(&self) -> StorageResult<TreeId> {
        if let Some(state) = *self.inner.working.read() {
            return Ok(state.root);
        }
        let head = self.head()?;
        Ok(self.get_commit(head)?.tree_id)
    }

    /// True when staged writes exist that no commit holds yet.
    pub fn has_staged_changes(&self) -> StorageResult<bool> {
        Ok(self.inner.working.read().is_some())
    }

    /// apply a mutation to the working root, initializing it from head on
    /// first write
    fn stage<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&Repository, &mut TreeMutator<'_>) -> StorageResult<()>,
    {
        let mut working = self.inner.working.write();

        let state = match *working {
            Some(state) => state,
            None => {
                let base = self.with_repo(RefManager::head_commit)?;
                let root = self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, base)?.id()))?;
                WorkingState { base, root }
            }
        };

        let new_root = self.with_repo_mut(|repo| {
            let tree = TreeHandle::from_id(repo, state.root)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            f(repo, &mut mutator)?;
            mutator.write()
        })?;

        *working = Some(WorkingState {
            base: state.base,
            root: new_root,
        });

        Ok(())
    }

    /// Stage a CREATE TABLE in the working root.
    pub fn stage_create_table(&self, schema: &TableSchema) -> StorageResult<()> {
        let table = TableName::new(schema.name.as_str()).map_err(StorageError::InvalidTableName)?;
        let bytes = serde_json::to_vec_pretty(schema)?;
        self.stage(|_repo, mutator| mutator.create_table(&table, &bytes))
    }

    /// Stage a DROP TABLE in the working root.
    pub fn stage_drop_table(&self, table: &TableName) -> StorageResult<()> {
        self.stage(|_repo, mutator| mutator.drop_table(table))
    }

    /// Stage a row insert or update in the working root.
    pub fn stage_upsert_row(&self, table: &TableName, row: &Row) -> StorageResult<()> {
        self.stage(|repo, mutator| {
            let blob_id = blob::write_blob(repo, row)?;
            mutator.upsert_row(table, &row.key, blob_id)
        })
    }

    /// Stage a row insert under a freshly generated ulid key, returning it.
    /// This is the write path for keyless tables, where no caller-supplied
    /// key exists and the storage key is an opaque generated name.
    pub fn stage_insert_row(&self, table: &TableName, value: serde_json::Value) -> StorageResult<RowKey> {
        let key = RowKey::generate();
        let row = Row::from_value(key.clone(), value)?;
        self.stage_upsert_row(table, &row)?;
        Ok(key)
    }

    /// Stage a row delete in the working root.
    pub fn stage_delete_row(&self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        self.stage(|_repo, mutator| mutator.delete_row(table, key))
    }

    /// Commit the staged working root to main.
    ///
    /// Fails with `ConcurrentModification` if main moved past the base the
    /// working root was staged from.
    pub fn commit_working(&self, message: &str) -> StorageResult<CommitId> {
        let mut working = self.inner.working.write();

        let state = working.ok_or_else(|| {
            StorageError::Internal("no staged changes to commit".to_string())
        })?;

        let commit_id = self.with_repo_mut(|repo| {
            let new_commit = CommitBuilder::new(repo)
                .tree(state.root)
                .parent(state.base)
                .message(message)
                .signature(self.inner.signature.clone())
                .commit()?;

            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), state.base, new_commit)?;

            Ok(new_commit)
        })?;

        *working = None;
        Ok(commit_id)
    }

    /// Discard the staged working root.
    pub fn discard_working(&self) {
        *self.inner.working.write() = None;
    }

    // ==================== Committed Writes ====================
    //
    // one-shot operations that stage and commit in a single step; used to
    // build histories

    /// Create a table and commit.
    pub fn create_table(&self, schema: &TableSchema) -> StorageResult<CommitId> {
        self.stage_create_table(schema)?;
        self.commit_working(&CommitMessage::create_table(&schema.name))
    }

    /// Drop a table and commit.
    pub fn drop_table(&self, table: &TableName) -> StorageResult<CommitId> {
        self.stage_drop_table(table)?;
        self.commit_working(&CommitMessage::drop_table(table.as_str()))
    }

    /// Insert or update a row and commit.
    pub fn upsert_row(&self, table: &TableName, row: Row) -> StorageResult<CommitId> {
        let key = row.key.clone();
        self.stage_upsert_row(table, &row)?;
        self.commit_working(&CommitMessage::update(table.as_str(), key.as_str()))
    }

    /// Insert a row under a generated key and commit.
    pub fn insert_row(&self, table: &TableName, value: serde_json::Value) -> StorageResult<(RowKey, CommitId)> {
        let key = self.stage_insert_row(table, value)?;
        let commit = self.commit_working(&CommitMessage::update(table.as_str(), key.as_str()))?;
        Ok((key, commit))
    }

    /// Delete a row and commit.
    pub fn delete_row(&self, table: &TableName, key: &RowKey) -> StorageResult<CommitId> {
        self.stage_delete_row(table, key)?;
        self.commit_working(&CommitMessage::delete(table.as_str(), key.as_str()))
    }

    // ==================== Branch Operations ====================

    /// Create a new branch at the given commit.
    pub fn create_branch(&self, branch: &BranchName, at: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::create_branch(repo, branch, at))
    }

    /// Update a branch to point to a new commit.
    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::update_branch(repo, branch, target))
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, branch: &BranchName) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(RefManager::branch_exists(repo, branch)))
    }

    /// List all branches.
    pub fn list_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, DataType};
    use tempfile::TempDir;

    fn setup() -> (TempDir, VersionStore) {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::init(dir.path()).unwrap();
        (dir, store)
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

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();

        let store = VersionStore::init(dir.path()).unwrap();
        let head1 = store.head().unwrap();

        drop(store);
        let store = VersionStore::open(dir.path()).unwrap();
        let head2 = store.head().unwrap();

        assert_eq!(head1, head2);
    }

    #[test]
    fn test_create_table_and_snapshot() {
        let (_dir, store) = setup();

        let head = store.create_table(&users_schema()).unwrap();

        let root = store.root_at(head).unwrap();
        assert_eq!(root.tables.len(), 1);
        let info = root.table(&TableName::new("users").unwrap()).unwrap();
        assert_eq!(info.schema.name, "users");
        assert_eq!(info.schema.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn test_list_rows_sorted_by_key() {
        // git orders tree entries by full file name, where `a-b.json` lands
        // before `a.json`; the listing must still come back in key order
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        store.create_table(&users_schema()).unwrap();
        store.upsert_row(&table, row("a-b", "Bea")).unwrap();
        let head = store.upsert_row(&table, row("a", "Al")).unwrap();

        let root = store.root_at(head).unwrap();
        let info = root.table(&table).unwrap();
        let rows = store.list_rows(info.subtree).unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "a-b"]);
    }

    #[test]
    fn test_insert_row_generates_key() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();
        store.create_table(&users_schema()).unwrap();

        let (key, head) = store
            .insert_row(&table, serde_json::json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(key.as_str().len(), 26);

        let read = store.read_row(&table, &key, head).unwrap().unwrap();
        assert_eq!(read.get("name"), Some(&serde_json::json!("Ada")));
    }

    #[test]
    fn test_row_write_and_read() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        store.create_table(&users_schema()).unwrap();
        let head = store.upsert_row(&table, row("u1", "Alice")).unwrap();

        let read = store
            .read_row(&table, &RowKey::new("u1").unwrap(), head)
            .unwrap()
            .unwrap();
        assert_eq!(read.get("name"), Some(&serde_json::json!("Alice")));
    }

    #[test]
    fn test_working_root_tracks_staged_writes() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        let head = store.create_table(&users_schema()).unwrap();
        let committed_root = store.get_commit(head).unwrap().tree_id;

        // nothing staged: working root is the head tree
        assert_eq!(store.working_root().unwrap(), committed_root);

        store.stage_upsert_row(&table, &row("u1", "Alice")).unwrap();
        assert!(store.has_staged_changes().unwrap());
        assert_ne!(store.working_root().unwrap(), committed_root);

        // head is untouched until commit_working
        assert_eq!(store.head().unwrap(), head);

        let new_head = store.commit_working("add u1").unwrap();
        assert_eq!(store.head().unwrap(), new_head);
        assert!(!store.has_staged_changes().unwrap());
    }

    #[test]
    fn test_discard_working() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        let head = store.create_table(&users_schema()).unwrap();
        store.stage_upsert_row(&table, &row("u1", "Alice")).unwrap();
        store.discard_working();

        assert!(!store.has_staged_changes().unwrap());
        assert_eq!(store.head().unwrap(), head);
    }

    #[test]
    fn test_resolve_revision_expressions() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        let c1 = store.create_table(&users_schema()).unwrap();
        let c2 = store.upsert_row(&table, row("u1", "Alice")).unwrap();

        assert_eq!(store.resolve("main").unwrap(), c2);
        assert_eq!(store.resolve("main~1").unwrap(), c1);
        assert_eq!(store.resolve(&c1.to_string()).unwrap(), c1);
        assert_eq!(store.resolve("HEAD").unwrap(), c2);

        assert!(matches!(
            store.resolve("no_such_ref"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_merge_base_across_branches() {
        let (_dir, store) = setup();
        let table = TableName::new("users").unwrap();

        let base = store.create_table(&users_schema()).unwrap();

        let branch = BranchName::new("feature").unwrap();
        store.create_branch(&branch, base).unwrap();

        let main_tip = store.upsert_row(&table, row("u1", "Alice")).unwrap();

        let found = store.merge_base(main_tip, base).unwrap();
        assert_eq!(found, Some(base));
    }

    #[test]
    fn test_unchanged_table_keeps_subtree_hash() {
        let (_dir, store) = setup();

        store.create_table(&users_schema()).unwrap();
        let other = TableSchema::new("orders")
            .with_column(ColumnDef::new("id", DataType::Integer, false))
            .with_primary_key(vec!["id".to_string()]);
        let c2 = store.create_table(&other).unwrap();

        let users = TableName::new("users").unwrap();
        let before = store.root_at(c2).unwrap().table(&users).unwrap().subtree;

        let c3 = store
            .upsert_row(&TableName::new("orders").unwrap(), row("o1", "x"))
            .unwrap();
        let after = store.root_at(c3).unwrap().table(&users).unwrap().subtree;

        assert_eq!(before, after);
    }
}
