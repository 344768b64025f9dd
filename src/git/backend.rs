//! The version-control primitives the patch stack engine is built on.
//!
//! [`VcsBackend`] is implemented by [`crate::git::GitRepository`] on top of
//! libgit2. Expected outcomes (a ref that moved, a diff that does not apply)
//! are modelled as plain return values; only unexpected failures are errors.

use crate::errors::Result;
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name, email and timestamp of an author or committer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    /// Seconds since the epoch
    pub time: i64,
    /// Timezone offset in minutes
    pub offset_minutes: i32,
}

impl Identity {
    pub fn from_signature(sig: &git2::Signature<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(sig.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(sig.email_bytes()).into_owned(),
            time: sig.when().seconds(),
            offset_minutes: sig.when().offset_minutes(),
        }
    }

    pub fn to_signature(&self) -> Result<git2::Signature<'static>> {
        let when = git2::Time::new(self.time, self.offset_minutes);
        Ok(git2::Signature::new(&self.name, &self.email, &when)?)
    }
}

/// A commit as read from the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub id: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Identity,
    pub committer: Identity,
    pub message: String,
}

/// Result of a compare-and-swap on a ref
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdate {
    Updated,
    /// The ref did not hold the expected value
    Race { actual: Option<Oid> },
}

/// One side of a conflicted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEntry {
    pub path: String,
    pub id: Oid,
    pub mode: u32,
}

/// A path the tree merge could not resolve on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    /// Path the conflict is reported under (ours, then theirs, then ancestor)
    pub path: String,
    pub ancestor: Option<StageEntry>,
    pub ours: Option<StageEntry>,
    pub theirs: Option<StageEntry>,
}

impl ConflictEntry {
    /// Every distinct path mentioned by the three stages
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = [&self.ancestor, &self.ours, &self.theirs]
            .into_iter()
            .flatten()
            .map(|stage| stage.path.as_str())
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

/// Result of a three-way tree merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Tree holding every cleanly merged path; conflicted paths are absent
    pub tree: Oid,
    pub conflicts: Vec<ConflictEntry>,
}

/// Result of applying a patch text onto a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied(Oid),
    Rejected(String),
}

/// Edit to a tree, addressed by slash-separated path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeUpdate {
    Upsert { path: String, blob: Oid, mode: u32 },
    Remove { path: String },
}

/// One entry of a ref's log, newest first when listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefLogEntry {
    pub old: Option<Oid>,
    pub new: Oid,
    pub committer: Identity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Conflicted,
    /// Untracked
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: FileStatus,
}

/// Object store, ref and working-copy primitives used by the engine
pub trait VcsBackend {
    /// Fails with `UnknownObject` if `id` does not name a commit.
    fn read_commit(&self, id: Oid) -> Result<CommitData>;

    fn create_commit(
        &self,
        tree: Oid,
        parents: &[Oid],
        message: &str,
        author: &Identity,
        committer: &Identity,
    ) -> Result<Oid>;

    fn read_ref(&self, name: &str) -> Result<Option<Oid>>;

    /// Point `name` at `new` if it currently holds `expected` (`None`: must not exist).
    fn compare_and_swap_ref(
        &self,
        name: &str,
        expected: Option<Oid>,
        new: Oid,
        log_message: &str,
    ) -> Result<RefUpdate>;

    /// Unconditionally point `name` at `target`.
    fn set_ref(&self, name: &str, target: Oid, log_message: &str) -> Result<()>;

    /// Make sure updates of `name` are recorded in its log, even outside `refs/heads`.
    fn ensure_ref_log(&self, name: &str) -> Result<()>;

    /// Logged updates of `name`, newest first.
    fn ref_log(&self, name: &str) -> Result<Vec<RefLogEntry>>;

    fn merge_trees(&self, base: Oid, ours: Oid, theirs: Oid, find_renames: bool)
        -> Result<MergeOutcome>;

    /// Update index and working copy to `tree`, optionally limited to `paths`.
    fn checkout_tree(&self, tree: Oid, paths: Option<&[String]>, force: bool) -> Result<()>;

    /// Patch text from `tree_a` to `tree_b`. Bytes, since file content need not be UTF-8.
    fn diff_paths(&self, tree_a: Oid, tree_b: Oid, paths: Option<&[String]>) -> Result<Vec<u8>>;

    /// Apply patch text onto a tree. Rejected unless every touched path in
    /// `onto_tree` still matches the patch preimage.
    fn apply_patch(&self, patch: &[u8], onto_tree: Oid) -> Result<ApplyResult>;

    fn working_tree_status(&self) -> Result<Vec<StatusEntry>>;

    fn read_blob(&self, id: Oid) -> Result<Vec<u8>>;

    fn write_blob(&self, content: &[u8]) -> Result<Oid>;

    fn empty_tree(&self) -> Result<Oid>;

    fn update_tree(&self, tree: Oid, updates: &[TreeUpdate]) -> Result<Oid>;

    /// Blob id at `path` inside `tree`, if any.
    fn tree_entry(&self, tree: Oid, path: &str) -> Result<Option<Oid>>;

    /// Register unmerged stages in the index for the given paths.
    fn record_conflicts(&self, conflicts: &[ConflictEntry]) -> Result<()>;

    /// Write the index as a tree, staging tracked working-copy changes first if asked.
    fn write_index_tree(&self, stage_tracked: bool) -> Result<Oid>;

    /// Commits reachable from `to` but not from `from`, oldest first.
    /// `None` if `from` is not an ancestor of `to`.
    fn commits_between(&self, from: Oid, to: Oid) -> Result<Option<Vec<Oid>>>;

    /// Identity used for new commits
    fn signature(&self) -> Result<Identity>;

    /// Short name of the checked-out branch
    fn head_branch(&self) -> Result<String>;

    fn git_dir(&self) -> &Path;
}

/// Serde helpers storing [`Oid`] as its hex string
pub mod oid_format {
    use git2::Oid;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Oid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Oid, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
