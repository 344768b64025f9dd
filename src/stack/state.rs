//! Immutable snapshot of a patch stack.
//!
//! A [`StackState`] partitions every patch of a branch into the applied chain
//! (bottom to top), the unapplied set and the hidden set. Transitions never
//! modify a state; they build a new one through [`StackState::new`], which
//! checks the invariants below.
//!
//! - every patch name appears in exactly one partition and has a [`Patch`] entry;
//! - each applied patch is based on the commit of the patch below it, and the
//!   bottom one on `base`;
//! - at most one patch is conflicted and it is the top of the applied chain.

use super::patch::Patch;
use crate::errors::{StackError, Result};
use crate::git::backend::oid_format;
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A push that stopped on conflicts, left for the user to resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub patch: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    branch: String,
    /// Commit below the first applied patch
    #[serde(with = "oid_format")]
    base: Oid,
    /// Commit of the last cleanly applied patch, or `base`
    #[serde(with = "oid_format")]
    head: Oid,
    applied: Vec<String>,
    unapplied: Vec<String>,
    hidden: Vec<String>,
    patches: BTreeMap<String, Patch>,
    conflict: Option<ConflictRecord>,
}

/// The three partitions of a stack, by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub applied: Vec<String>,
    pub unapplied: Vec<String>,
    pub hidden: Vec<String>,
}

impl StackState {
    /// A stack with no patches on top of `head`
    pub fn empty(branch: impl Into<String>, head: Oid) -> Self {
        Self {
            branch: branch.into(),
            base: head,
            head,
            applied: Vec::new(),
            unapplied: Vec::new(),
            hidden: Vec::new(),
            patches: BTreeMap::new(),
            conflict: None,
        }
    }

    /// Assemble a state and check its invariants.
    pub fn new(
        branch: impl Into<String>,
        base: Oid,
        head: Oid,
        partition: Partition,
        patches: BTreeMap<String, Patch>,
        conflict: Option<ConflictRecord>,
    ) -> Result<Self> {
        let state = Self {
            branch: branch.into(),
            base,
            head,
            applied: partition.applied,
            unapplied: partition.unapplied,
            hidden: partition.hidden,
            patches,
            conflict,
        };
        state.validate()?;
        Ok(state)
    }

    /// Check the partition, chain and conflict invariants
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self.all_patches() {
            if !seen.insert(name) {
                return Err(StackError::validation(format!(
                    "Patch '{name}' appears more than once in the stack"
                )));
            }
            if !self.patches.contains_key(name) {
                return Err(StackError::validation(format!(
                    "Patch '{name}' has no recorded commit"
                )));
            }
        }
        if let Some(extra) = self.patches.keys().find(|name| !seen.contains(name.as_str())) {
            return Err(StackError::validation(format!(
                "Patch '{extra}' is not part of any series"
            )));
        }

        if let Some(conflict) = &self.conflict {
            if self.top() != Some(conflict.patch.as_str()) {
                return Err(StackError::validation(format!(
                    "Conflicted patch '{}' is not the top applied patch",
                    conflict.patch
                )));
            }
        }

        let mut expected_base = self.base;
        for name in &self.applied {
            let patch = &self.patches[name];
            if self.is_conflicted(name) {
                break;
            }
            if patch.base_commit_id != expected_base {
                return Err(StackError::validation(format!(
                    "Patch '{name}' is based on {} instead of {}",
                    patch.base_commit_id, expected_base
                )));
            }
            expected_base = patch.commit_id;
        }
        if expected_base != self.head {
            return Err(StackError::validation(format!(
                "Stack head {} does not match the applied chain ({expected_base})",
                self.head
            )));
        }

        Ok(())
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base(&self) -> Oid {
        self.base
    }

    /// Commit the branch should point at
    pub fn head(&self) -> Oid {
        self.head
    }

    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    pub fn unapplied(&self) -> &[String] {
        &self.unapplied
    }

    pub fn hidden(&self) -> &[String] {
        &self.hidden
    }

    /// Every patch name: applied, then unapplied, then hidden
    pub fn all_patches(&self) -> impl Iterator<Item = &str> {
        self.applied
            .iter()
            .chain(&self.unapplied)
            .chain(&self.hidden)
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patches.contains_key(name)
    }

    pub fn patch(&self, name: &str) -> Result<&Patch> {
        self.patches
            .get(name)
            .ok_or_else(|| StackError::unknown_patch(name))
    }

    pub fn patches(&self) -> &BTreeMap<String, Patch> {
        &self.patches
    }

    pub fn top(&self) -> Option<&str> {
        self.applied.last().map(String::as_str)
    }

    pub fn conflict(&self) -> Option<&ConflictRecord> {
        self.conflict.as_ref()
    }

    pub fn is_conflicted(&self, name: &str) -> bool {
        self.conflict.as_ref().is_some_and(|c| c.patch == name)
    }

    pub fn partition(&self) -> Partition {
        Partition {
            applied: self.applied.clone(),
            unapplied: self.unapplied.clone(),
            hidden: self.hidden.clone(),
        }
    }

    /// Same patches in a different arrangement; chain invariants are checked.
    pub fn with_partition(&self, partition: Partition) -> Result<Self> {
        Self::new(
            self.branch.clone(),
            self.base,
            self.head,
            partition,
            self.patches.clone(),
            self.conflict.clone(),
        )
    }
}
