//!  Commit creation and history traversal
//!
//!  commits are the atomic units of change in Git. In DriftDB:
//! - each write operation creates a commit
//! - diff endpoints are resolved to commits, then to root trees
//! - history surfaces walk first-parent ancestry
//!
//! this module handles commit creation, ancestry walking, and merge bases

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Revwalk, Sort};

use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::tree::TreeHandle;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// information about a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// builder for creating commits with a fluent interface
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
    update_ref: Option<String>,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::driftdb(),
            update_ref: None,
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author/committer signature
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// update a ref (branch) to point to this commit
    pub fn update_ref(mut self, refname: impl Into<String>) -> Self {
        self.update_ref = Some(refname.into());
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2_signature()?;

        // collect parent commits
        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<_, _>>()?;

        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            self.update_ref.as_deref(),
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;

        Ok(CommitId::new(oid))
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

/// get the tree snapshot at a specific commit
pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    let tree = commit.tree()?;
    Ok(TreeHandle::new(tree))
}

/// create the initial commit for a new repository
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    let tree_id = crate::storage::tree::create_initial_tree(repo)?;

    CommitBuilder::new(repo)
        .tree(tree_id)
        .message("[driftdb] Initialize repository")
        .signature(signature.clone())
        .update_ref("HEAD")
        .commit()
}

/// find the merge base (common ancestor) of two commits
///
/// returns None if there is no common ancestor
pub fn find_merge_base(repo: &Repository, a: CommitId, b: CommitId) -> StorageResult<Option<CommitId>> {
    match repo.merge_base(a.raw(), b.raw()) {
        Ok(oid) => Ok(Some(CommitId::new(oid))),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(StorageError::Git(e)),
    }
}

/// check whether `ancestor` is reachable from `descendant`
pub fn is_ancestor(repo: &Repository, ancestor: CommitId, descendant: CommitId) -> StorageResult<bool> {
    Ok(repo.graph_descendant_of(descendant.raw(), ancestor.raw())? || ancestor == descendant)
}

/// iterate over commit history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    /// create a new history iterator
    pub fn new(repo: &'repo Repository, start: CommitId) -> StorageResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

        Ok(Self { repo, revwalk })
    }

    /// only follow first parents (linear history through merges)
    pub fn first_parent_only(mut self) -> Self {
        self.revwalk.simplify_first_parent().ok();
        self
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(Ok(CommitInfo::from_git2(&commit))),
                Err(e) => Some(Err(StorageError::Git(e))),
            },
            Err(e) => Some(Err(StorageError::Git(e))),
        }
    }
}

/// get history for a commit
pub fn history(repo: &Repository, start: CommitId) -> StorageResult<HistoryIterator<'_>> {
    HistoryIterator::new(repo, start)
}

/// message formatting for database operations
pub struct CommitMessage;

impl CommitMessage {
    /// format a message for an INSERT operation
    pub fn insert(table: &str, key: &str) -> String {
        format!("[INSERT] {}/{}", table, key)
    }

    /// format a message for an UPDATE operation
    pub fn update(table: &str, key: &str) -> String {
        format!("[UPDATE] {}/{}", table, key)
    }

    /// format a message for a DELETE operation
    pub fn delete(table: &str, key: &str) -> String {
        format!("[DELETE] {}/{}", table, key)
    }

    /// format a message for a CREATE TABLE operation
    pub fn create_table(table: &str) -> String {
        format!("[CREATE TABLE] {}", table)
    }

    /// format a message for a DROP TABLE operation
    pub fn drop_table(table: &str) -> String {
        format!("[DROP TABLE] {}", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::create_initial_tree;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_initial_commit() {
        let (_dir, repo) = setup_repo();
        let sig = GitSignature::driftdb();

        let commit_id = create_initial_commit(&repo, &sig).unwrap();
        let info = get_commit(&repo, commit_id).unwrap();

        assert!(info.message.contains("Initialize"));
        assert!(info.parent_ids.is_empty()); // initial commit has no parents
    }

    #[test]
    fn test_commit_builder() {
        let (_dir, repo) = setup_repo();
        let sig = GitSignature::driftdb();

        let initial = create_initial_commit(&repo, &sig).unwrap();

        let tree_id = create_initial_tree(&repo).unwrap();
        let second = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(initial)
            .message("Second commit")
            .commit()
            .unwrap();

        let info = get_commit(&repo, second).unwrap();
        assert_eq!(info.parent_ids.len(), 1);
        assert_eq!(info.parent_ids[0], initial);
        assert_eq!(info.summary(), "Second commit");
    }

    #[test]
    fn test_history_iteration() {
        let (_dir, repo) = setup_repo();
        let sig = GitSignature::driftdb();

        let c1 = create_initial_commit(&repo, &sig).unwrap();

        let tree_id = create_initial_tree(&repo).unwrap();
        let c2 = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(c1)
            .message("Second")
            .commit()
            .unwrap();

        let c3 = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(c2)
            .message("Third")
            .commit()
            .unwrap();

        let commits: Vec<_> = history(&repo, c3).unwrap().collect::<Result<_, _>>().unwrap();

        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].id, c3);
        assert_eq!(commits[1].id, c2);
        assert_eq!(commits[2].id, c1);
    }

    #[test]
    fn test_first_parent_walk_skips_merged_branch() {
        let (_dir, repo) = setup_repo();
        let sig = GitSignature::driftdb();

        let base = create_initial_commit(&repo, &sig).unwrap();
        let tree_id = create_initial_tree(&repo).unwrap();

        let mainline = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(base)
            .message("Mainline")
            .commit()
            .unwrap();

        let side = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(base)
            .message("Side branch")
            .commit()
            .unwrap();

        let merge = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(mainline)
            .parent(side)
            .message("Merge side")
            .commit()
            .unwrap();

        let commits: Vec<_> = history(&repo, merge)
            .unwrap()
            .first_parent_only()
            .collect::<Result<_, _>>()
            .unwrap();

        let ids: Vec<CommitId> = commits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![merge, mainline, base]);
        assert!(!ids.contains(&side));
    }

    #[test]
    fn test_merge_base() {
        let (_dir, repo) = setup_repo();
        let sig = GitSignature::driftdb();

        let base = create_initial_commit(&repo, &sig).unwrap();
        let tree_id = create_initial_tree(&repo).unwrap();

        // create two branches from base
        let branch_a = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(base)
            .message("Branch A")
            .commit()
            .unwrap();

        let branch_b = CommitBuilder::new(&repo)
            .tree(tree_id)
            .parent(base)
            .message("Branch B")
            .commit()
            .unwrap();

        let merge_base = find_merge_base(&repo, branch_a, branch_b).unwrap();
        assert_eq!(merge_base, Some(base));
    }

    #[test]
    fn test_commit_messages() {
        assert_eq!(CommitMessage::insert("users", "123"), "[INSERT] users/123");
        assert_eq!(CommitMessage::drop_table("users"), "[DROP TABLE] users");
    }
}
