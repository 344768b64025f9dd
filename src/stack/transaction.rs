//! Moves a stack from its current arrangement to a target one.
//!
//! A transaction pops the applied patches that are not shared with the
//! target's applied chain, pushes the target's remaining patches in order and
//! publishes the resulting state with a compare-and-swap on the state ref. The
//! stack lock is held for the whole run. Nothing outside the object store is
//! modified before the publish succeeds.

use super::engine::{PushConflict, PushResult};
use super::state::{ConflictRecord, Partition, StackState};
use super::store::{state_ref, BranchStatus, Publication, StackSnapshot, StackStore};
use crate::config::ConflictPolicy;
use crate::errors::{StackError, Result};
use crate::git::backend::{FileStatus, StatusEntry, VcsBackend};
use crate::utils::short_id;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Overwrite local modifications instead of refusing to run
    pub discard_local_changes: bool,
}

/// How a transaction ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        state: StackState,
        publication: Publication,
    },
    /// A push stopped on conflicts. `state` is the published partial state,
    /// or `None` when the conflict policy discarded the transaction.
    Conflict {
        patch: String,
        files: Vec<String>,
        state: Option<StackState>,
    },
    /// The stack changed since it was loaded; nothing was written
    Race,
}

impl Outcome {
    /// Turn a race into a hard error
    pub fn into_result(self, stack: &str) -> Result<Self> {
        match self {
            Outcome::Race => Err(StackError::Race {
                stack: stack.to_string(),
            }),
            outcome => Ok(outcome),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

pub struct StackTransaction<'s, 'a, B: VcsBackend + ?Sized> {
    store: &'s StackStore<'a, B>,
    snapshot: StackSnapshot,
    reason: String,
    target: Option<Partition>,
    options: TransactionOptions,
}

impl<'s, 'a, B: VcsBackend + ?Sized> StackTransaction<'s, 'a, B> {
    /// Start a transaction on `snapshot`. `reason` is recorded in the stack log.
    pub fn open(store: &'s StackStore<'a, B>, snapshot: StackSnapshot, reason: &str) -> Self {
        Self {
            store,
            snapshot,
            reason: reason.to_string(),
            target: None,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// The state the transaction started from
    pub fn current(&self) -> &StackState {
        &self.snapshot.state
    }

    pub fn all_patches(&self) -> Vec<String> {
        self.current().all_patches().map(str::to_string).collect()
    }

    pub fn applied(&self) -> &[String] {
        self.current().applied()
    }

    pub fn unapplied(&self) -> &[String] {
        self.current().unapplied()
    }

    pub fn hidden(&self) -> &[String] {
        self.current().hidden()
    }

    /// Set the arrangement to reach. Every current patch must appear exactly once.
    pub fn set_target(
        &mut self,
        applied: Vec<String>,
        unapplied: Vec<String>,
        hidden: Vec<String>,
    ) -> Result<()> {
        let current = self.current();
        let mut seen = HashSet::new();

        for name in applied.iter().chain(&unapplied).chain(&hidden) {
            if !current.contains(name) {
                return Err(StackError::unknown_patch(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(StackError::DuplicatePatch(name.clone()));
            }
        }

        let missing: Vec<String> = current
            .all_patches()
            .filter(|name| !seen.contains(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(StackError::IncompleteTarget(missing));
        }

        self.target = Some(Partition {
            applied,
            unapplied,
            hidden,
        });
        Ok(())
    }

    /// Execute the transaction.
    pub fn run(self) -> Result<Outcome> {
        let txn_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "transaction",
            id = %txn_id,
            reason = %self.reason,
            stack = %self.store.branch()
        );
        let _enter = span.enter();

        let backend = self.store.backend();
        let current = &self.snapshot.state;
        let target = self.target.clone().unwrap_or_else(|| current.partition());

        let _lock = self
            .store
            .lock(&format!("{} ({})", txn_id, self.reason))?;

        let live = backend.read_ref(&state_ref(self.store.branch()))?;
        if live != Some(self.snapshot.ref_value) {
            tracing::warn!(
                "Stack moved from {} to {:?} since it was loaded",
                short_id(&self.snapshot.ref_value),
                live
            );
            return Ok(Outcome::Race);
        }

        match self.store.branch_status(&self.snapshot)? {
            BranchStatus::InSync => {}
            status => {
                return Err(StackError::validation(format!(
                    "Branch '{}' does not match the stack ({status:?}); run `pstk repair`",
                    self.store.branch()
                )))
            }
        }

        let prefix = common_prefix_len(current, &target.applied);
        let chain_changes = prefix < current.applied().len() || prefix < target.applied.len();
        tracing::debug!(
            "Common prefix {} of {} applied, {} to push",
            prefix,
            current.applied().len(),
            target.applied.len() - prefix
        );

        if chain_changes {
            self.check_worktree(current)?;
        }

        let engine = self.store.engine();
        let mut top = current.head();
        for name in current.applied()[prefix..].iter().rev() {
            if current.is_conflicted(name) {
                tracing::debug!("Dropping the pending conflict of '{}'", name);
                continue;
            }
            top = engine.pop(current.patch(name)?, top);
        }

        let mut patches = current.patches().clone();
        let mut applied: Vec<String> = target.applied[..prefix].to_vec();
        let mut conflict: Option<(PushConflict, Vec<String>)> = None;
        for (i, name) in target.applied.iter().enumerate().skip(prefix) {
            match engine.push(current.patch(name)?, top)? {
                PushResult::Applied {
                    patch,
                    new_top,
                    path,
                } => {
                    tracing::debug!("Pushed '{}' ({:?}) as {}", name, path, short_id(&new_top));
                    patches.insert(name.clone(), patch);
                    applied.push(name.clone());
                    top = new_top;
                }
                PushResult::Conflict(pushed) => {
                    let remaining = target.applied[i + 1..].to_vec();
                    conflict = Some((pushed, remaining));
                    break;
                }
            }
        }

        let policy = self.store.settings().transaction.conflict_policy;
        if let (Some((pushed, _)), ConflictPolicy::Abort) = (&conflict, policy) {
            tracing::info!(
                "Push of '{}' conflicts; discarding the transaction",
                pushed.patch.name
            );
            return Ok(Outcome::Conflict {
                patch: pushed.patch.name.clone(),
                files: pushed.files.clone(),
                state: None,
            });
        }

        let (partition, record) = match &conflict {
            Some((pushed, remaining)) => {
                applied.push(pushed.patch.name.clone());
                let unapplied = remaining
                    .iter()
                    .chain(&target.unapplied)
                    .cloned()
                    .collect();
                (
                    Partition {
                        applied,
                        unapplied,
                        hidden: target.hidden.clone(),
                    },
                    Some(ConflictRecord {
                        patch: pushed.patch.name.clone(),
                        files: pushed.files.clone(),
                    }),
                )
            }
            // An untouched chain keeps its pending conflict
            None => (
                target.clone(),
                current.conflict().filter(|_| !chain_changes).cloned(),
            ),
        };

        let state = StackState::new(
            current.branch(),
            current.base(),
            top,
            partition,
            patches,
            record,
        )?;

        let publication = self.store.publish(&self.snapshot, &state, &self.reason)?;
        if let Publication::Race { .. } = publication {
            return Ok(Outcome::Race);
        }

        if chain_changes || conflict.is_some() {
            self.store
                .sync_worktree(top, conflict.as_ref().map(|(pushed, _)| pushed))?;
        }

        Ok(match conflict {
            Some((pushed, _)) => Outcome::Conflict {
                patch: pushed.patch.name,
                files: pushed.files,
                state: Some(state),
            },
            None => Outcome::Success { state, publication },
        })
    }

    /// Refuse to run over local modifications of tracked files.
    ///
    /// Files of a pending conflict may be overwritten only while they are still conflicted.
    fn check_worktree(&self, current: &StackState) -> Result<()> {
        if self.options.discard_local_changes {
            return Ok(());
        }

        let pending: HashSet<&str> = current
            .conflict()
            .map(|c| c.files.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let (touched, dirty): (Vec<StatusEntry>, Vec<StatusEntry>) = self
            .store
            .backend()
            .working_tree_status()?
            .into_iter()
            .filter(|entry| entry.status != FileStatus::Unknown)
            .filter(|entry| {
                !(entry.status == FileStatus::Conflicted && pending.contains(entry.path.as_str()))
            })
            .partition(|entry| pending.contains(entry.path.as_str()));

        if let (Some(conflict), false) = (current.conflict(), touched.is_empty()) {
            let files: Vec<&str> = touched.iter().map(|e| e.path.as_str()).collect();
            return Err(StackError::validation(format!(
                "Patch '{}' has a conflict resolution in progress ({}); run `pstk refresh` first",
                conflict.patch,
                files.join(", ")
            )));
        }

        if dirty.is_empty() {
            Ok(())
        } else {
            Err(StackError::DirtyWorkingTree(
                dirty.into_iter().map(|entry| entry.path).collect(),
            ))
        }
    }
}

/// Length of the applied chain shared by the current state and the target.
///
/// A conflicted patch is never shared unless the chain is left as it is.
pub fn common_prefix_len(current: &StackState, target_applied: &[String]) -> usize {
    if current.applied() == target_applied {
        return target_applied.len();
    }

    current
        .applied()
        .iter()
        .zip(target_applied)
        .take_while(|(a, b)| a == b && !current.is_conflicted(a))
        .count()
}
