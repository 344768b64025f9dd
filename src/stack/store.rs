use super::engine::{MergeEngine, PushConflict, PushResult};
use super::state::StackState;
use crate::config::{self, LockSettings, Settings};
use crate::errors::{StackError, Result};
use crate::git::backend::{RefUpdate, TreeUpdate, VcsBackend};
use crate::utils::file_locking::FileLock;
use crate::utils::short_id;
use chrono::{DateTime, TimeZone, Utc};
use git2::Oid;

/// File inside a metadata commit holding the serialized state
pub const STATE_FILE: &str = "stack.json";

pub fn state_ref(branch: &str) -> String {
    format!("refs/patchstack/{branch}")
}

pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

/// A loaded state together with the ref value it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub state: StackState,
    /// Metadata commit the state ref pointed at
    pub ref_value: Oid,
}

/// Result of publishing a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    /// A new metadata commit was published
    Updated(Oid),
    /// The state did not change; the ref was rewritten with its own value
    Unchanged(Oid),
    /// The ref no longer held the expected value; nothing was written
    Race { actual: Option<Oid> },
}

impl Publication {
    pub fn ref_value(&self) -> Option<Oid> {
        match self {
            Publication::Updated(id) | Publication::Unchanged(id) => Some(*id),
            Publication::Race { .. } => None,
        }
    }
}

/// How the branch relates to the published stack head
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStatus {
    InSync,
    /// Commits were added on top of the stack head outside of a transaction
    ExtraCommits(Vec<Oid>),
    /// The branch still points at the previous head: a transaction stopped after publishing
    Interrupted,
    /// The branch points somewhere unrelated
    Diverged(Option<Oid>),
}

/// One entry of the stack's transaction log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub old: Option<Oid>,
    pub new: Oid,
    pub reason: String,
    pub time: DateTime<Utc>,
}

/// Persists [`StackState`]s of one branch under `refs/patchstack/<branch>`
pub struct StackStore<'a, B: VcsBackend + ?Sized> {
    backend: &'a B,
    branch: String,
    settings: Settings,
}

impl<'a, B: VcsBackend + ?Sized> StackStore<'a, B> {
    pub fn new(backend: &'a B, branch: impl Into<String>, settings: Settings) -> Self {
        Self {
            backend,
            branch: branch.into(),
            settings,
        }
    }

    /// Store for the checked-out branch, with the repository's settings
    pub fn for_current_branch(backend: &'a B) -> Result<Self> {
        let branch = backend.head_branch()?;
        let settings = config::load_settings(backend.git_dir())?;
        Ok(Self::new(backend, branch, settings))
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> MergeEngine<'a, B> {
        MergeEngine::new(self.backend, self.settings.merge.clone())
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.backend.read_ref(&state_ref(&self.branch))?.is_some())
    }

    /// Start tracking a stack on the branch, with no patches on top of its head
    pub fn init(&self) -> Result<StackSnapshot> {
        let name = state_ref(&self.branch);
        if self.backend.read_ref(&name)?.is_some() {
            return Err(StackError::validation(format!(
                "Branch '{}' is already initialized",
                self.branch
            )));
        }

        let head = self.branch_head()?;
        let state = StackState::empty(self.branch.clone(), head);

        self.backend.ensure_ref_log(&name)?;
        let ref_value = self.write_state(&state, None, "init")?;
        match self
            .backend
            .compare_and_swap_ref(&name, None, ref_value, "init")?
        {
            RefUpdate::Updated => {
                tracing::info!("Initialized stack for '{}' at {}", self.branch, short_id(&head));
                Ok(StackSnapshot { state, ref_value })
            }
            RefUpdate::Race { .. } => Err(StackError::Race {
                stack: self.branch.clone(),
            }),
        }
    }

    /// Read the published state, finishing an interrupted transaction first if needed
    pub fn load(&self) -> Result<StackSnapshot> {
        let snapshot = self.read_snapshot()?;

        match self.branch_status(&snapshot)? {
            BranchStatus::InSync => Ok(snapshot),
            BranchStatus::Interrupted => {
                let quick = LockSettings {
                    timeout_ms: 0,
                    ..self.settings.lock.clone()
                };
                match FileLock::acquire(&self.lock_path(), "recovery", &quick) {
                    Ok(_lock) => {
                        tracing::warn!(
                            "Finishing an interrupted transaction on '{}'",
                            self.branch
                        );
                        self.recover(&snapshot)?;
                        Ok(snapshot)
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::debug!("Skipping recovery, a transaction is running: {}", e);
                        Ok(snapshot)
                    }
                    Err(e) => Err(e),
                }
            }
            status => {
                tracing::debug!("Branch '{}' is out of sync: {:?}", self.branch, status);
                Ok(snapshot)
            }
        }
    }

    /// Read the published state without any consistency checks
    pub fn read_snapshot(&self) -> Result<StackSnapshot> {
        let ref_value = self
            .backend
            .read_ref(&state_ref(&self.branch))?
            .ok_or_else(|| StackError::NotInitialized(self.branch.clone()))?;

        let state = self.read_state_at(ref_value)?;
        Ok(StackSnapshot { state, ref_value })
    }

    /// Decode the state stored in a metadata commit
    pub fn read_state_at(&self, metadata_commit: Oid) -> Result<StackState> {
        let commit = self.backend.read_commit(metadata_commit)?;
        let blob = self
            .backend
            .tree_entry(commit.tree, STATE_FILE)?
            .ok_or_else(|| {
                StackError::backend(format!(
                    "Metadata commit {metadata_commit} has no {STATE_FILE}"
                ))
            })?;

        let state: StackState = serde_json::from_slice(&self.backend.read_blob(blob)?)?;
        state.validate()?;
        Ok(state)
    }

    /// Compare-and-swap the state ref from `previous.ref_value` to a commit holding `state`.
    ///
    /// An unchanged state rewrites the ref with its own value so the transaction
    /// still shows up in the log.
    pub fn publish(
        &self,
        previous: &StackSnapshot,
        state: &StackState,
        reason: &str,
    ) -> Result<Publication> {
        let name = state_ref(&self.branch);
        let unchanged = *state == previous.state;

        let new_value = if unchanged {
            previous.ref_value
        } else {
            self.write_state(state, Some(previous.ref_value), reason)?
        };

        self.backend.ensure_ref_log(&name)?;
        let update =
            self.backend
                .compare_and_swap_ref(&name, Some(previous.ref_value), new_value, reason)?;

        let publication = match update {
            RefUpdate::Race { actual } => {
                tracing::warn!(
                    "Stack '{}' moved to {:?} while publishing '{}'",
                    self.branch,
                    actual,
                    reason
                );
                return Ok(Publication::Race { actual });
            }
            RefUpdate::Updated if unchanged => Publication::Unchanged(new_value),
            RefUpdate::Updated => Publication::Updated(new_value),
        };

        tracing::info!(
            "Published '{}' for '{}' ({} -> {})",
            reason,
            self.branch,
            short_id(&previous.ref_value),
            short_id(&new_value)
        );
        Ok(publication)
    }

    /// Transaction log of the stack, newest first
    pub fn history(&self) -> Result<Vec<LogEntry>> {
        let entries = self.backend.ref_log(&state_ref(&self.branch))?;
        Ok(entries
            .into_iter()
            .map(|entry| LogEntry {
                old: entry.old,
                new: entry.new,
                reason: entry.message,
                time: Utc
                    .timestamp_opt(entry.committer.time, 0)
                    .single()
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Take the stack's advisory lock for the duration of a transaction
    pub fn lock(&self, owner: &str) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path(), owner, &self.settings.lock)
    }

    pub fn lock_path(&self) -> std::path::PathBuf {
        config::get_repo_config_dir(self.backend.git_dir()).join(format!("{}.lock", self.branch))
    }

    pub fn branch_head(&self) -> Result<Oid> {
        self.backend
            .read_ref(&branch_ref(&self.branch))?
            .ok_or_else(|| {
                StackError::validation(format!("Branch '{}' has no commits", self.branch))
            })
    }

    pub fn branch_status(&self, snapshot: &StackSnapshot) -> Result<BranchStatus> {
        let head = snapshot.state.head();
        let Some(branch) = self.backend.read_ref(&branch_ref(&self.branch))? else {
            return Ok(BranchStatus::Diverged(None));
        };
        if branch == head {
            return Ok(BranchStatus::InSync);
        }

        let previous = self.backend.read_commit(snapshot.ref_value)?.parents;
        if let Some(parent) = previous.first() {
            if self.read_state_at(*parent)?.head() == branch {
                return Ok(BranchStatus::Interrupted);
            }
        }

        match self.backend.commits_between(head, branch)? {
            Some(extra) => Ok(BranchStatus::ExtraCommits(extra)),
            None => Ok(BranchStatus::Diverged(Some(branch))),
        }
    }

    /// Make the working tree, index and branch match a published state.
    ///
    /// A recorded conflict is rebuilt by pushing the conflicted patch again.
    pub fn recover(&self, snapshot: &StackSnapshot) -> Result<()> {
        let state = &snapshot.state;
        let conflict = match state.conflict() {
            Some(record) => {
                let patch = state.patch(&record.patch)?;
                match self.engine().push(patch, state.head())? {
                    PushResult::Conflict(conflict) => Some(conflict),
                    PushResult::Applied { .. } => {
                        tracing::warn!(
                            "Patch '{}' no longer conflicts; run `pstk refresh` to record it",
                            record.patch
                        );
                        None
                    }
                }
            }
            None => None,
        };

        self.sync_worktree(state.head(), conflict.as_ref())?;
        tracing::info!(
            "Recovered '{}' at {}",
            self.branch,
            short_id(&state.head())
        );
        Ok(())
    }

    /// Check out `head` (or a conflicted merge on top of it) and move the branch there
    pub fn sync_worktree(&self, head: Oid, conflict: Option<&PushConflict>) -> Result<()> {
        let tree = match conflict {
            Some(conflict) => conflict.tree,
            None => self.backend.read_commit(head)?.tree,
        };

        self.backend.checkout_tree(tree, None, true)?;
        if let Some(conflict) = conflict {
            self.backend.record_conflicts(&conflict.stages)?;
        }
        self.backend
            .set_ref(&branch_ref(&self.branch), head, "patchstack: update head")
    }

    fn write_state(&self, state: &StackState, parent: Option<Oid>, reason: &str) -> Result<Oid> {
        let json = serde_json::to_string_pretty(state)?;
        let blob = self.backend.write_blob(json.as_bytes())?;
        let tree = self.backend.update_tree(
            self.backend.empty_tree()?,
            &[TreeUpdate::Upsert {
                path: STATE_FILE.to_string(),
                blob,
                mode: 0o100644,
            }],
        )?;

        let signature = self.backend.signature()?;
        let parents: Vec<Oid> = parent.into_iter().collect();
        let message = format!("{reason}\n");
        let id = self
            .backend
            .create_commit(tree, &parents, &message, &signature, &signature)?;

        tracing::debug!("Wrote state for '{}' as {}", self.branch, short_id(&id));
        Ok(id)
    }
}
