//! Operations that create or rewrite patches rather than rearranging them.

use super::patch::{self, Patch};
use super::state::{Partition, StackState};
use super::store::{branch_ref, BranchStatus, Publication, StackSnapshot, StackStore};
use crate::errors::{StackError, Result};
use crate::git::backend::{FileStatus, VcsBackend};
use crate::utils::short_id;
use git2::Oid;

/// What `repair` had to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairReport {
    /// Branch and stack already agree
    Consistent,
    /// An interrupted transaction was finished
    Recovered,
    /// Commits made on top of the stack became new applied patches
    Adopted(Vec<String>),
    /// The branch was moved back to the stack head
    Reset { previous: Option<Oid> },
}

/// Result of a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    pub patch: Patch,
    /// The refresh concluded a conflicted push
    pub resolved_conflict: bool,
}

fn require_in_sync<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    snapshot: &StackSnapshot,
) -> Result<()> {
    match store.branch_status(snapshot)? {
        BranchStatus::InSync => Ok(()),
        status => Err(StackError::validation(format!(
            "Branch '{}' does not match the stack ({status:?}); run `pstk repair`",
            store.branch()
        ))),
    }
}

fn publish_or_race<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    snapshot: &StackSnapshot,
    state: &StackState,
    reason: &str,
) -> Result<Oid> {
    match store.publish(snapshot, state, reason)? {
        Publication::Race { .. } => Err(StackError::Race {
            stack: store.branch().to_string(),
        }),
        publication => publication
            .ref_value()
            .ok_or_else(|| StackError::backend("Publication without a ref value")),
    }
}

/// Add an empty patch on top of the stack. Local changes stay in the working
/// tree, ready to be recorded with [`refresh_top`].
pub fn new_patch<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    name: Option<&str>,
    message: &str,
) -> Result<Patch> {
    let snapshot = store.load()?;
    let _lock = store.lock("new")?;
    let state = &snapshot.state;
    require_in_sync(store, &snapshot)?;

    if let Some(conflict) = state.conflict() {
        return Err(StackError::validation(format!(
            "Patch '{}' has unresolved conflicts; resolve them and run `pstk refresh`",
            conflict.patch
        )));
    }

    let name = match name {
        Some(name) => {
            patch::validate_name(name)?;
            if state.contains(name) {
                return Err(StackError::DuplicatePatch(name.to_string()));
            }
            name.to_string()
        }
        None => patch::name_from_message(message, |n| state.contains(n)),
    };

    let backend = store.backend();
    let top = state.head();
    let top_tree = backend.read_commit(top)?.tree;
    let message = if message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{message}\n")
    };
    let signature = backend.signature()?;
    let id = backend.create_commit(top_tree, &[top], &message, &signature, &signature)?;
    let new = Patch::from_commit(name.clone(), &backend.read_commit(id)?, top_tree)?;

    let mut partition = state.partition();
    partition.applied.push(name.clone());
    let mut patches = state.patches().clone();
    patches.insert(name.clone(), new.clone());
    let next = StackState::new(state.branch(), state.base(), id, partition, patches, None)?;

    publish_or_race(store, &snapshot, &next, &format!("new {name}"))?;
    backend.set_ref(&branch_ref(store.branch()), id, "patchstack: new patch")?;

    tracing::info!("Created patch '{}' as {}", name, short_id(&id));
    Ok(new)
}

/// Record the index and tracked working-tree changes in the top patch.
///
/// On a conflicted stack this concludes the conflicted push once every file is
/// resolved.
pub fn refresh_top<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    message: Option<&str>,
) -> Result<Refreshed> {
    let snapshot = store.load()?;
    let _lock = store.lock("refresh")?;
    let state = &snapshot.state;
    require_in_sync(store, &snapshot)?;

    let top_name = state
        .top()
        .ok_or_else(|| StackError::validation("No patches applied"))?
        .to_string();
    let top = state.patch(&top_name)?;
    let backend = store.backend();

    let unresolved: Vec<String> = backend
        .working_tree_status()?
        .into_iter()
        .filter(|entry| entry.status == FileStatus::Conflicted)
        .map(|entry| entry.path)
        .collect();
    if !unresolved.is_empty() {
        return Err(StackError::validation(format!(
            "Unresolved conflicts in {}; resolve them and `git add` the files",
            unresolved.join(", ")
        )));
    }

    let tree = backend.write_index_tree(true)?;
    let resolved_conflict = state.is_conflicted(&top_name);
    // A conflicted patch is not in the chain yet; it goes on top of the head
    let parent = if resolved_conflict {
        state.head()
    } else {
        top.base_commit_id
    };

    let refreshed = store.engine().refresh(top, parent, tree, message)?;
    let mut patches = state.patches().clone();
    patches.insert(top_name.clone(), refreshed.clone());
    let next = StackState::new(
        state.branch(),
        state.base(),
        refreshed.commit_id,
        state.partition(),
        patches,
        None,
    )?;

    publish_or_race(store, &snapshot, &next, &format!("refresh {top_name}"))?;
    backend.set_ref(
        &branch_ref(store.branch()),
        refreshed.commit_id,
        "patchstack: refresh",
    )?;

    tracing::info!(
        "Refreshed '{}' as {}",
        top_name,
        short_id(&refreshed.commit_id)
    );
    Ok(Refreshed {
        patch: refreshed,
        resolved_conflict,
    })
}

/// Bring the branch and the stack back in agreement.
///
/// Commits made on top of the stack with plain git are adopted as patches. A
/// branch that was rewritten is only moved back to the stack head with `force`.
pub fn repair<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    force: bool,
) -> Result<RepairReport> {
    let _lock = store.lock("repair")?;
    let snapshot = store.read_snapshot()?;

    match store.branch_status(&snapshot)? {
        BranchStatus::InSync => Ok(RepairReport::Consistent),
        BranchStatus::Interrupted => {
            store.recover(&snapshot)?;
            Ok(RepairReport::Recovered)
        }
        BranchStatus::ExtraCommits(commits) => adopt(store, &snapshot, &commits),
        BranchStatus::Diverged(previous) if force => {
            store.recover(&snapshot)?;
            Ok(RepairReport::Reset { previous })
        }
        BranchStatus::Diverged(previous) => Err(StackError::validation(format!(
            "Branch '{}' was rewritten outside of the stack (now at {}); \
             rerun with --force to move it back to {}",
            store.branch(),
            previous.map_or_else(|| "nothing".to_string(), |id| short_id(&id)),
            short_id(&snapshot.state.head())
        ))),
    }
}

fn adopt<B: VcsBackend + ?Sized>(
    store: &StackStore<'_, B>,
    snapshot: &StackSnapshot,
    commits: &[Oid],
) -> Result<RepairReport> {
    let state = &snapshot.state;
    if let Some(conflict) = state.conflict() {
        return Err(StackError::validation(format!(
            "Patch '{}' has unresolved conflicts; refresh it before adopting commits",
            conflict.patch
        )));
    }

    let backend = store.backend();
    let mut partition: Partition = state.partition();
    let mut patches = state.patches().clone();
    let mut adopted = Vec::new();
    let mut head = state.head();

    for id in commits {
        let commit = backend.read_commit(*id)?;
        if commit.parents.len() != 1 {
            return Err(StackError::validation(format!(
                "Commit {} is a merge and cannot become a patch",
                short_id(id)
            )));
        }

        let name = patch::name_from_message(&commit.message, |n| patches.contains_key(n));
        let base_tree = backend.read_commit(commit.parents[0])?.tree;
        let adopted_patch = Patch::from_commit(name.clone(), &commit, base_tree)?;

        tracing::debug!("Adopting {} as '{}'", short_id(id), name);
        patches.insert(name.clone(), adopted_patch);
        partition.applied.push(name.clone());
        adopted.push(name);
        head = *id;
    }

    let next = StackState::new(state.branch(), state.base(), head, partition, patches, None)?;
    publish_or_race(store, snapshot, &next, "repair")?;

    tracing::info!("Adopted {} commits as patches", adopted.len());
    Ok(RepairReport::Adopted(adopted))
}
