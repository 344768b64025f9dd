use crate::errors::{StackError, Result};
use crate::git::backend::{oid_format, CommitData, Identity};
use chrono::{DateTime, Utc};
use git2::Oid;
use serde::{Deserialize, Serialize};

/// Longest name generated from a commit message
const MAX_GENERATED_NAME_LEN: usize = 30;

/// A named unit of change with its own commit on top of a recorded base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Unique name, stable across pushes and pops
    pub name: String,
    /// Commit holding the patch content
    #[serde(with = "oid_format")]
    pub commit_id: Oid,
    /// Parent the patch was last merged against
    #[serde(with = "oid_format")]
    pub base_commit_id: Oid,
    pub message: String,
    pub author: Identity,
    pub committer: Identity,
    /// The patch tree equals its base tree
    pub is_empty: bool,
    /// When the patch was last realized as a commit
    pub updated_at: DateTime<Utc>,
}

impl Patch {
    /// Describe an existing commit as a patch. The commit's first parent becomes the base.
    pub fn from_commit(name: impl Into<String>, commit: &CommitData, base_tree: Oid) -> Result<Self> {
        let name = name.into();
        let base_commit_id = *commit.parents.first().ok_or_else(|| {
            StackError::validation(format!(
                "Commit {} has no parent and cannot become patch '{}'",
                commit.id, name
            ))
        })?;

        Ok(Self {
            name,
            commit_id: commit.id,
            base_commit_id,
            message: commit.message.clone(),
            author: commit.author.clone(),
            committer: commit.committer.clone(),
            is_empty: commit.tree == base_tree,
            updated_at: Utc::now(),
        })
    }

    /// The same patch realized by a different commit
    pub fn realized_as(&self, commit: &CommitData, base_tree: Oid) -> Result<Self> {
        Self::from_commit(self.name.clone(), commit, base_tree)
    }

    /// First line of the message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default().trim()
    }
}

/// Check that `name` can be used as a patch name
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StackError::validation(format!(
            "Invalid patch name '{name}': {reason}"
        )))
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.starts_with('-') || name.starts_with('.') {
        return invalid("name may not start with '-' or '.'");
    }
    if name.ends_with(".lock") || name.contains("..") {
        return invalid("name may not contain '..' or end with '.lock'");
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "/\\~^:?*[".contains(*c))
    {
        return invalid(&format!("character {c:?} is not allowed"));
    }

    Ok(())
}

/// Derive a patch name from the subject line of `message`, unique among `taken`
pub fn name_from_message(message: &str, taken: impl Fn(&str) -> bool) -> String {
    let subject = message.lines().next().unwrap_or_default();

    let mut base = String::new();
    for c in subject.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            base.push(c);
        } else if !base.is_empty() && !base.ends_with('-') {
            base.push('-');
        }
        if base.len() >= MAX_GENERATED_NAME_LEN {
            break;
        }
    }
    let base = base.trim_end_matches('-');
    let base = if base.is_empty() { "patch" } else { base };

    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
