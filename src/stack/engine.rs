//! Single-patch transitions: push a patch onto the live top, or pop it off.
//!
//! A push tries, in order:
//! 1. reuse: the patch is already based on the top, nothing to do;
//! 2. fast path: the top tree equals the patch's base tree, so the patch tree
//!    can be committed as is;
//! 3. direct apply: the patch diff applies cleanly onto the top tree;
//! 4. full three-way merge, with a per-file merge for every path the tree
//!    merge could not settle.
//!
//! A push that leaves conflicts creates no commit. The merged tree, with
//! markers in the conflicted files, is returned so it can be checked out.

use super::patch::Patch;
use crate::config::MergeSettings;
use crate::errors::Result;
use crate::git::backend::{
    ApplyResult, ConflictEntry, Identity, StageEntry, TreeUpdate, VcsBackend,
};
use crate::git::merge_file::{merge_file, FileMergeInput, FileVersion};
use crate::utils::short_id;
use git2::Oid;

/// Label of the live top in conflict markers
const CURRENT_LABEL: &str = "current";
const GITLINK_MODE: u32 = 0o160000;

/// Which strategy produced a pushed patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPath {
    /// Already based on the top; the existing commit was reused
    Unchanged,
    FastForward,
    DirectApply,
    Merged,
}

/// A push that could not be completed automatically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConflict {
    /// The patch as it was before the push
    pub patch: Patch,
    pub files: Vec<String>,
    /// Merged tree with conflict markers
    pub tree: Oid,
    /// Unmerged stages to record in the index
    pub stages: Vec<ConflictEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    Applied {
        patch: Patch,
        new_top: Oid,
        path: PushPath,
    },
    Conflict(PushConflict),
}

pub struct MergeEngine<'a, B: VcsBackend + ?Sized> {
    backend: &'a B,
    settings: MergeSettings,
}

impl<'a, B: VcsBackend + ?Sized> MergeEngine<'a, B> {
    pub fn new(backend: &'a B, settings: MergeSettings) -> Self {
        Self { backend, settings }
    }

    /// Push `patch` onto `top`.
    pub fn push(&self, patch: &Patch, top: Oid) -> Result<PushResult> {
        if patch.base_commit_id == top {
            tracing::debug!("Push '{}': already on {}", patch.name, short_id(&top));
            return Ok(PushResult::Applied {
                patch: patch.clone(),
                new_top: patch.commit_id,
                path: PushPath::Unchanged,
            });
        }

        let base_tree = self.backend.read_commit(patch.base_commit_id)?.tree;
        let top_tree = self.backend.read_commit(top)?.tree;
        let patch_tree = self.backend.read_commit(patch.commit_id)?.tree;

        if base_tree == top_tree {
            tracing::debug!("Push '{}': fast path", patch.name);
            return self.commit(patch, top, top_tree, patch_tree, PushPath::FastForward);
        }

        if self.settings.direct_apply {
            let diff = self.backend.diff_paths(base_tree, patch_tree, None)?;
            match self.backend.apply_patch(&diff, top_tree)? {
                ApplyResult::Applied(tree) => {
                    tracing::debug!("Push '{}': diff applied directly", patch.name);
                    return self.commit(patch, top, top_tree, tree, PushPath::DirectApply);
                }
                ApplyResult::Rejected(reason) => {
                    tracing::debug!(
                        "Push '{}': direct apply failed ({}), merging",
                        patch.name,
                        reason.trim()
                    );
                }
            }
        }

        let outcome = self.backend.merge_trees(
            base_tree,
            top_tree,
            patch_tree,
            self.settings.find_renames,
        )?;

        let mut updates = Vec::new();
        let mut files = Vec::new();
        let mut stages = Vec::new();
        for entry in &outcome.conflicts {
            let (update, conflicted) = self.resolve(entry, &patch.name)?;
            updates.extend(update);
            if conflicted {
                files.push(entry.path.clone());
                stages.push(entry.clone());
            }
        }
        let tree = self.backend.update_tree(outcome.tree, &updates)?;

        if !files.is_empty() {
            tracing::debug!(
                "Push '{}': conflicts in {}",
                patch.name,
                files.join(", ")
            );
            return Ok(PushResult::Conflict(PushConflict {
                patch: patch.clone(),
                files,
                tree,
                stages,
            }));
        }

        tracing::debug!("Push '{}': merged cleanly", patch.name);
        self.commit(patch, top, top_tree, tree, PushPath::Merged)
    }

    /// Pop `patch` off `top`. The new top is the patch's recorded base.
    pub fn pop(&self, patch: &Patch, top: Oid) -> Oid {
        tracing::debug!(
            "Pop '{}': {} -> {}",
            patch.name,
            short_id(&top),
            short_id(&patch.base_commit_id)
        );
        patch.base_commit_id
    }

    /// Record `tree` as the new content of `patch` on top of `top`.
    pub fn refresh(
        &self,
        patch: &Patch,
        top: Oid,
        tree: Oid,
        message: Option<&str>,
    ) -> Result<Patch> {
        let top_tree = self.backend.read_commit(top)?.tree;
        let committer = self.committer(patch);
        let id = self.backend.create_commit(
            tree,
            &[top],
            message.unwrap_or(&patch.message),
            &patch.author,
            &committer,
        )?;

        tracing::debug!("Refreshed '{}' as {}", patch.name, short_id(&id));
        patch.realized_as(&self.backend.read_commit(id)?, top_tree)
    }

    fn commit(
        &self,
        patch: &Patch,
        top: Oid,
        top_tree: Oid,
        tree: Oid,
        path: PushPath,
    ) -> Result<PushResult> {
        let committer = self.committer(patch);
        let id =
            self.backend
                .create_commit(tree, &[top], &patch.message, &patch.author, &committer)?;

        let pushed = patch.realized_as(&self.backend.read_commit(id)?, top_tree)?;
        Ok(PushResult::Applied {
            patch: pushed,
            new_top: id,
            path,
        })
    }

    fn committer(&self, patch: &Patch) -> Identity {
        self.backend
            .signature()
            .unwrap_or_else(|_| patch.committer.clone())
    }

    /// Per-file merge of one conflicted path. Returns the tree edit and whether
    /// the path is still conflicted.
    fn resolve(
        &self,
        entry: &ConflictEntry,
        patch_name: &str,
    ) -> Result<(Option<TreeUpdate>, bool)> {
        let stages = [&entry.ancestor, &entry.ours, &entry.theirs];
        if stages
            .iter()
            .any(|stage| stage.as_ref().is_some_and(|s| s.mode == GITLINK_MODE))
        {
            let kept = entry.ours.as_ref().map(|ours| TreeUpdate::Upsert {
                path: entry.path.clone(),
                blob: ours.id,
                mode: ours.mode,
            });
            return Ok((kept, true));
        }

        let base = self.version(entry.ancestor.as_ref())?;
        let ours = self.version(entry.ours.as_ref())?;
        let theirs = self.version(entry.theirs.as_ref())?;

        let merged = merge_file(&FileMergeInput {
            base: base.as_ref(),
            ours: ours.as_ref(),
            theirs: theirs.as_ref(),
            ours_label: CURRENT_LABEL,
            theirs_label: patch_name,
        });

        // Conflicted paths are already absent from the merged tree
        let update = match merged.content {
            Some(content) => Some(TreeUpdate::Upsert {
                path: entry.path.clone(),
                blob: self.backend.write_blob(&content)?,
                mode: merged.mode,
            }),
            None => None,
        };
        Ok((update, merged.conflicted))
    }

    fn version(&self, stage: Option<&StageEntry>) -> Result<Option<FileVersion>> {
        stage
            .map(|s| {
                Ok(FileVersion {
                    content: self.backend.read_blob(s.id)?,
                    mode: s.mode,
                })
            })
            .transpose()
    }
}
