//! tree operations for table snapshots.
//!
//! in Git, a tree is a directory. In DriftDB:
//! - the root tree contains one directory per table
//! - a table directory holds `schema.json` plus a `rows/` subtree of row blobs
//!
//! Because a table's schema and rows live under one subtree, the subtree's
//! ID doubles as the table's content hash: two roots hold the same table
//! state exactly when the subtree IDs are equal. The delta detector relies
//! on this for its no-op short-circuit.
//!
//! Git trees keep entries sorted by name, so iterating a `rows/` subtree
//! yields rows in key order for free. That ordered listing is the primitive
//! the diff stream merges against.

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey, TableName, TreeId};

/// name of the schema blob inside a table subtree
pub(crate) const SCHEMA_FILE: &str = "schema.json";

/// name of the row subtree inside a table subtree
pub(crate) const ROWS_DIR: &str = "rows";

/// A read only handle to a git tree at a specific commit.
///
/// this provides safe, immutable access to the tree structure.
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    /// create a TreeHandle from a git2::Tree
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// look up a tree by ID
    pub(crate) fn from_id(repo: &'repo Repository, id: TreeId) -> StorageResult<Self> {
        Ok(Self::new(repo.find_tree(id.raw())?))
    }

    /// get the tree ID
    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    /// get the underlying git2::Tree (for internal use)
    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// list all tables with their subtree content hashes, in name order
    pub fn list_tables(&self) -> Vec<(TableName, TreeId)> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }

                let name = entry.name()?;

                // skip metadata directories
                if name.starts_with('_') {
                    return None;
                }

                let table = TableName::new(name).ok()?;
                Some((table, TreeId::new(entry.id())))
            })
            .collect()
    }

    /// get the subtree content hash for a table, if present
    pub fn table_id(&self, table: &TableName) -> Option<TreeId> {
        let entry = self.tree.get_name(table.as_str())?;
        if entry.kind() != Some(ObjectType::Tree) {
            return None;
        }
        Some(TreeId::new(entry.id()))
    }

    /// check if a table exists
    pub fn table_exists(&self, table: &TableName) -> bool {
        self.table_id(table).is_some()
    }
}

/// get the schema blob ID of a table subtree
pub(crate) fn schema_blob_id(repo: &Repository, table_tree: TreeId) -> StorageResult<Option<BlobId>> {
    let tree = repo.find_tree(table_tree.raw())?;
    let id = match tree.get_name(SCHEMA_FILE) {
        Some(entry) => {
            if entry.kind() != Some(ObjectType::Blob) {
                return Err(StorageError::UnexpectedEntryType {
                    path: SCHEMA_FILE.into(),
                    expected: "blob (file)".to_string(),
                    found: format!("{:?}", entry.kind()),
                });
            }
            Some(BlobId::new(entry.id()))
        }
        None => None,
    };
    Ok(id)
}

/// list all `(key, blob)` pairs of a table subtree, sorted by `RowKey`.
/// git orders entries by full file name, and the `.json` suffix makes that
/// order disagree with key order for prefix pairs (`a-b.json` sorts before
/// `a.json` while `a` < `a-b`), so we re-sort after stripping the suffix.
/// Only IDs are touched, row contents stay unread until a caller asks.
pub(crate) fn ordered_rows(repo: &Repository, table_tree: TreeId) -> StorageResult<Vec<(RowKey, BlobId)>> {
    let tree = repo.find_tree(table_tree.raw())?;
    let rows_tree = match tree.get_name(ROWS_DIR) {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => repo.find_tree(entry.id())?,
        _ => return Ok(Vec::new()),
    };

    let mut rows = Vec::with_capacity(rows_tree.len());
    for entry in rows_tree.iter() {
        if entry.kind() != Some(ObjectType::Blob) {
            continue;
        }
        let name = match entry.name() {
            Some(n) => n,
            None => continue,
        };
        let key_str = match name.strip_suffix(".json") {
            Some(k) => k,
            None => continue,
        };
        if let Ok(key) = RowKey::new(key_str) {
            rows.push((key, BlobId::new(entry.id())));
        }
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(rows)
}

/// a mutable tree builder for producing new roots
///
/// accumulates changes and writes a new tree when finalized;
/// the original tree is never modified
///
/// # Usage Pattern
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_row(&table, &key, blob_id)?;
/// mutator.delete_row(&table, &other_key)?;
/// let new_root = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// table name -> (schema blob, rows builder) for tables touched so far
    modified_tables: std::collections::HashMap<String, (BlobId, Git2TreeBuilder<'repo>)>,
    /// table subtree IDs for tables we haven't touched
    original_tables: std::collections::HashMap<String, git2::Oid>,
}

impl<'repo> TreeMutator<'repo> {
    /// create a new TreeMutator from an existing tree
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let mut original_tables = std::collections::HashMap::new();
        for entry in tree.inner().iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original_tables.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified_tables: std::collections::HashMap::new(),
            original_tables,
        })
    }

    /// create a new TreeMutator for an empty root
    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(None)?;
        Ok(Self {
            repo,
            root_builder,
            modified_tables: std::collections::HashMap::new(),
            original_tables: std::collections::HashMap::new(),
        })
    }

    fn table_known(&self, table: &str) -> bool {
        self.modified_tables.contains_key(table) || self.original_tables.contains_key(table)
    }

    /// get or create the rows builder for a table, loading the original
    /// subtree on first touch
    fn get_table_state(&mut self, table: &TableName) -> StorageResult<&mut (BlobId, Git2TreeBuilder<'repo>)> {
        let table_str = table.as_str();
        if !self.modified_tables.contains_key(table_str) {
            let original_id = self
                .original_tables
                .get(table_str)
                .copied()
                .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;

            let table_tree = self.repo.find_tree(original_id)?;

            let schema_id = schema_blob_id(self.repo, TreeId::new(original_id))?.ok_or_else(|| {
                StorageError::CorruptedData {
                    path: format!("{}/{}", table_str, SCHEMA_FILE).into(),
                    reason: "table subtree has no schema blob".to_string(),
                }
            })?;

            let rows_builder = match table_tree.get_name(ROWS_DIR) {
                Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                    let rows_tree = self.repo.find_tree(entry.id())?;
                    self.repo.treebuilder(Some(&rows_tree))?
                }
                _ => self.repo.treebuilder(None)?,
            };

            self.modified_tables
                .insert(table_str.to_string(), (schema_id, rows_builder));
        }
        Ok(self.modified_tables.get_mut(table_str).unwrap())
    }

    /// create a new table with the given serialized schema
    pub fn create_table(&mut self, table: &TableName, schema_bytes: &[u8]) -> StorageResult<()> {
        if self.table_known(table.as_str()) {
            return Err(StorageError::TableAlreadyExists(table.clone()));
        }

        let schema_id = BlobId::new(self.repo.blob(schema_bytes)?);
        let rows_builder = self.repo.treebuilder(None)?;
        self.modified_tables
            .insert(table.as_str().to_string(), (schema_id, rows_builder));

        Ok(())
    }

    /// replace the schema blob of an existing table
    pub fn set_schema(&mut self, table: &TableName, schema_bytes: &[u8]) -> StorageResult<()> {
        let schema_id = BlobId::new(self.repo.blob(schema_bytes)?);
        let state = self.get_table_state(table)?;
        state.0 = schema_id;
        Ok(())
    }

    /// drop a table (remove its subtree)
    pub fn drop_table(&mut self, table: &TableName) -> StorageResult<()> {
        let table_str = table.as_str();

        if !self.table_known(table_str) {
            return Err(StorageError::TableNotFound(table.clone()));
        }

        let was_original = self.original_tables.remove(table_str).is_some();
        self.modified_tables.remove(table_str);

        if was_original {
            self.root_builder.remove(table_str)?;
        }

        Ok(())
    }

    /// insert or update a row in a table
    pub fn upsert_row(&mut self, table: &TableName, key: &RowKey, blob_id: BlobId) -> StorageResult<()> {
        let state = self.get_table_state(table)?;
        let filename = format!("{}.json", key);
        state.1.insert(&filename, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// delete a row from a table
    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        let table_clone = table.clone();
        let key_clone = key.clone();
        let state = self.get_table_state(table)?;
        let filename = format!("{}.json", key);

        state.1.remove(&filename).map_err(|_| StorageError::RowNotFound {
            table: table_clone,
            key: key_clone,
        })?;

        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        // rebuild each touched table subtree: schema blob + rows subtree
        for (table_name, (schema_id, rows_builder)) in self.modified_tables {
            let rows_tree_id = rows_builder.write()?;

            let mut table_builder = self.repo.treebuilder(None)?;
            table_builder.insert(SCHEMA_FILE, schema_id.raw(), FileMode::Blob.into())?;
            table_builder.insert(ROWS_DIR, rows_tree_id, FileMode::Tree.into())?;
            let table_tree_id = table_builder.write()?;

            self.root_builder
                .insert(&table_name, table_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// create the initial empty root tree
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}
