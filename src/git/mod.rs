pub mod backend;
pub mod merge_file;
pub mod repository;

pub use backend::{
    ApplyResult, CommitData, ConflictEntry, FileStatus, Identity, MergeOutcome, RefLogEntry,
    RefUpdate, StageEntry, StatusEntry, TreeUpdate, VcsBackend,
};
pub use merge_file::{merge_file, FileMerge, FileMergeInput, FileVersion};
pub use repository::GitRepository;

use crate::errors::{StackError, Result};
use std::path::{Path, PathBuf};

/// Find the root of the Git repository
pub fn find_repository_root(start_path: &Path) -> Result<PathBuf> {
    let repo = git2::Repository::discover(start_path).map_err(StackError::Git)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| StackError::config("Repository has no working directory (bare repo?)"))?;

    Ok(workdir.to_path_buf())
}

/// Get the current working directory as a Git repository
pub fn get_current_repository() -> Result<GitRepository> {
    let current_dir = std::env::current_dir()
        .map_err(|e| StackError::config(format!("Could not get current directory: {e}")))?;

    let repo_root = find_repository_root(&current_dir)?;
    GitRepository::open(&repo_root)
}
