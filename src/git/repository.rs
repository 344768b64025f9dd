use crate::errors::{StackError, Result};
use crate::git::backend::{
    ApplyResult, CommitData, ConflictEntry, FileStatus, Identity, MergeOutcome, RefLogEntry,
    RefUpdate, StageEntry, StatusEntry, TreeUpdate, VcsBackend,
};
use git2::{build::CheckoutBuilder, ErrorCode, FileMode, Oid, Repository};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Wrapper around git2::Repository implementing [`VcsBackend`]
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
    /// Resolved refs; dropped whenever this handle moves a ref
    ref_cache: RefCell<HashMap<String, Oid>>,
    /// Commits are immutable, so entries never go stale
    commit_cache: RefCell<HashMap<Oid, CommitData>>,
}

impl GitRepository {
    /// Open a Git repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| StackError::config(format!("Not a git repository: {e}")))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| StackError::config("Repository has no working directory"))?
            .to_path_buf();

        Ok(Self {
            repo,
            path: workdir,
            ref_cache: RefCell::new(HashMap::new()),
            commit_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Get repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the HEAD commit id
    pub fn head_commit(&self) -> Result<Oid> {
        let head = self
            .repo
            .head()
            .map_err(|e| StackError::validation(format!("Could not get HEAD: {e}")))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| StackError::validation(format!("Could not get HEAD commit: {e}")))?;
        Ok(commit.id())
    }

    /// Get list of conflicted files in the index
    pub fn conflicted_files(&self) -> Result<Vec<String>> {
        let index = self.index()?;
        let mut conflicts = Vec::new();

        for conflict in index.conflicts()? {
            if let Some(entry) = conflict_entry(conflict?) {
                conflicts.push(entry.path);
            }
        }

        Ok(conflicts)
    }

    /// The repository index, reloaded if it changed on disk
    fn index(&self) -> Result<git2::Index> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        Ok(index)
    }

    fn invalidate_ref(&self, name: &str) {
        self.ref_cache.borrow_mut().remove(name);
    }

    fn find_commit(&self, id: Oid) -> Result<git2::Commit<'_>> {
        self.repo.find_commit(id).map_err(|e| match e.code() {
            ErrorCode::NotFound => StackError::UnknownObject(id.to_string()),
            _ => StackError::Git(e),
        })
    }

    fn find_tree(&self, id: Oid) -> Result<git2::Tree<'_>> {
        self.repo.find_tree(id).map_err(|e| match e.code() {
            ErrorCode::NotFound => StackError::UnknownObject(id.to_string()),
            _ => StackError::Git(e),
        })
    }

    /// Signature for reflog entries written by hand
    fn log_signature(&self) -> Result<git2::Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(git2::Signature::now("patchstack", "patchstack@localhost")?),
        }
    }

    /// Why `diff` cannot be applied verbatim to `onto_tree`, if it cannot.
    ///
    /// Every path the diff reads must hold exactly the blob the diff was taken
    /// from, and every path it creates must be absent.
    fn preimage_mismatch(&self, diff: &git2::Diff<'_>, onto_tree: Oid) -> Result<Option<String>> {
        let tree = self.find_tree(onto_tree)?;
        let entry_id = |path: &Path| tree.get_path(path).ok().map(|entry| entry.id());

        for delta in diff.deltas() {
            let creates = matches!(
                delta.status(),
                git2::Delta::Added | git2::Delta::Copied | git2::Delta::Renamed
            );
            if creates {
                if let Some(path) = delta.new_file().path() {
                    if entry_id(path).is_some() {
                        return Ok(Some(format!("{} already exists", path.display())));
                    }
                }
            }
            if delta.status() != git2::Delta::Added {
                if let Some(path) = delta.old_file().path() {
                    if entry_id(path) != Some(delta.old_file().id()) {
                        return Ok(Some(format!("{} does not match the patch", path.display())));
                    }
                }
            }
        }

        Ok(None)
    }
}

impl VcsBackend for GitRepository {
    fn read_commit(&self, id: Oid) -> Result<CommitData> {
        if let Some(data) = self.commit_cache.borrow().get(&id) {
            return Ok(data.clone());
        }

        let commit = self.find_commit(id)?;
        let data = CommitData {
            id,
            tree: commit.tree_id(),
            parents: commit.parent_ids().collect(),
            author: Identity::from_signature(&commit.author()),
            committer: Identity::from_signature(&commit.committer()),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        };

        self.commit_cache.borrow_mut().insert(id, data.clone());
        Ok(data)
    }

    fn create_commit(
        &self,
        tree: Oid,
        parents: &[Oid],
        message: &str,
        author: &Identity,
        committer: &Identity,
    ) -> Result<Oid> {
        let tree = self.find_tree(tree)?;
        let parents = parents
            .iter()
            .map(|id| self.find_commit(*id))
            .collect::<Result<Vec<_>>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let id = self.repo.commit(
            None,
            &author.to_signature()?,
            &committer.to_signature()?,
            message,
            &tree,
            &parent_refs,
        )?;

        tracing::debug!("Created commit {}", id);
        Ok(id)
    }

    fn read_ref(&self, name: &str) -> Result<Option<Oid>> {
        if let Some(id) = self.ref_cache.borrow().get(name) {
            return Ok(Some(*id));
        }

        match self.repo.refname_to_id(name) {
            Ok(id) => {
                self.ref_cache.borrow_mut().insert(name.to_string(), id);
                Ok(Some(id))
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn compare_and_swap_ref(
        &self,
        name: &str,
        expected: Option<Oid>,
        new: Oid,
        log_message: &str,
    ) -> Result<RefUpdate> {
        self.invalidate_ref(name);

        let same_value = expected == Some(new);
        let logged_before = if same_value {
            self.repo.reflog(name)?.len()
        } else {
            0
        };

        let result = match expected {
            Some(old) => self
                .repo
                .reference_matching(name, new, true, old, log_message),
            None => self.repo.reference(name, new, false, log_message),
        };

        match result {
            Ok(_) => {
                // libgit2 skips the log entry when the value does not change
                if same_value {
                    let mut reflog = self.repo.reflog(name)?;
                    if reflog.len() == logged_before {
                        let sig = self.log_signature()?;
                        reflog.append(new, &sig, Some(log_message))?;
                        reflog.write()?;
                    }
                }
                Ok(RefUpdate::Updated)
            }
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Modified | ErrorCode::Exists | ErrorCode::NotFound
                ) =>
            {
                let actual = self.read_ref(name)?;
                tracing::debug!(
                    "Ref {} expected {:?} but holds {:?}",
                    name,
                    expected,
                    actual
                );
                Ok(RefUpdate::Race { actual })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_ref(&self, name: &str, target: Oid, log_message: &str) -> Result<()> {
        self.invalidate_ref(name);
        self.repo.reference(name, target, true, log_message)?;
        Ok(())
    }

    fn ensure_ref_log(&self, name: &str) -> Result<()> {
        // libgit2 only appends to logs of refs outside refs/heads once the file exists
        let path = self.repo.path().join("logs").join(name);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
        }
        Ok(())
    }

    fn ref_log(&self, name: &str) -> Result<Vec<RefLogEntry>> {
        let reflog = self.repo.reflog(name)?;
        Ok(reflog
            .iter()
            .map(|entry| RefLogEntry {
                old: Some(entry.id_old()).filter(|id| !id.is_zero()),
                new: entry.id_new(),
                committer: Identity::from_signature(&entry.committer()),
                message: entry.message().unwrap_or_default().to_string(),
            })
            .collect())
    }

    fn merge_trees(
        &self,
        base: Oid,
        ours: Oid,
        theirs: Oid,
        find_renames: bool,
    ) -> Result<MergeOutcome> {
        let base = self.find_tree(base)?;
        let ours = self.find_tree(ours)?;
        let theirs = self.find_tree(theirs)?;

        let mut opts = git2::MergeOptions::new();
        opts.find_renames(find_renames);
        let mut index = self.repo.merge_trees(&base, &ours, &theirs, Some(&opts))?;

        let mut conflicts = Vec::new();
        if index.has_conflicts() {
            for conflict in index.conflicts()? {
                if let Some(entry) = conflict_entry(conflict?) {
                    conflicts.push(entry);
                }
            }

            let paths: BTreeSet<String> = conflicts
                .iter()
                .flat_map(|c| c.paths().into_iter().map(str::to_string))
                .collect();
            for path in &paths {
                index.conflict_remove(Path::new(path))?;
            }
        }

        let tree = index.write_tree_to(&self.repo)?;
        Ok(MergeOutcome { tree, conflicts })
    }

    fn checkout_tree(&self, tree: Oid, paths: Option<&[String]>, force: bool) -> Result<()> {
        let tree = self.find_tree(tree)?;

        let mut builder = CheckoutBuilder::new();
        if force {
            builder.force();
        } else {
            builder.safe();
        }
        if let Some(paths) = paths {
            for path in paths {
                builder.path(path);
            }
        }

        self.repo
            .checkout_tree(tree.as_object(), Some(&mut builder))
            .map_err(|e| StackError::backend(format!("Checkout of {} failed: {e}", tree.id())))?;

        // Leftover unmerged entries survive a checkout; a full checkout resets them.
        let mut index = self.index()?;
        if paths.is_none() && index.has_conflicts() {
            index.read_tree(&tree)?;
            index.write()?;
        }

        tracing::debug!("Checked out tree {}", tree.id());
        Ok(())
    }

    fn diff_paths(&self, tree_a: Oid, tree_b: Oid, paths: Option<&[String]>) -> Result<Vec<u8>> {
        let a = self.find_tree(tree_a)?;
        let b = self.find_tree(tree_b)?;

        let mut opts = git2::DiffOptions::new();
        opts.show_binary(true).id_abbrev(40);
        if let Some(paths) = paths {
            for path in paths {
                opts.pathspec(path);
            }
        }

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&a), Some(&b), Some(&mut opts))?;

        let mut text = Vec::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                text.push(line.origin() as u8);
            }
            text.extend_from_slice(line.content());
            true
        })?;

        Ok(text)
    }

    fn apply_patch(&self, patch: &[u8], onto_tree: Oid) -> Result<ApplyResult> {
        if patch.is_empty() {
            return Ok(ApplyResult::Applied(onto_tree));
        }

        let tree = self.find_tree(onto_tree)?;
        let diff = match git2::Diff::from_buffer(patch) {
            Ok(diff) => diff,
            Err(e) => return Ok(ApplyResult::Rejected(e.message().to_string())),
        };

        if let Some(reason) = self.preimage_mismatch(&diff, onto_tree)? {
            return Ok(ApplyResult::Rejected(reason));
        }

        match self.repo.apply_to_tree(&tree, &diff, None) {
            Ok(mut index) => Ok(ApplyResult::Applied(index.write_tree_to(&self.repo)?)),
            Err(e) if matches!(e.class(), git2::ErrorClass::Patch) => {
                Ok(ApplyResult::Rejected(e.message().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn working_tree_status(&self) -> Result<Vec<StatusEntry>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut entries = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let flags = entry.status();

            let status = if flags.contains(git2::Status::CONFLICTED) {
                FileStatus::Conflicted
            } else if flags.intersects(git2::Status::INDEX_DELETED | git2::Status::WT_DELETED) {
                FileStatus::Deleted
            } else if flags.contains(git2::Status::INDEX_NEW) {
                FileStatus::Added
            } else if flags.intersects(
                git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_RENAMED
                    | git2::Status::WT_TYPECHANGE,
            ) {
                FileStatus::Modified
            } else if flags.contains(git2::Status::WT_NEW) {
                FileStatus::Unknown
            } else {
                continue;
            };

            entries.push(StatusEntry {
                path: path.to_string(),
                status,
            });
        }

        Ok(entries)
    }

    fn read_blob(&self, id: Oid) -> Result<Vec<u8>> {
        let blob = self.repo.find_blob(id).map_err(|e| match e.code() {
            ErrorCode::NotFound => StackError::UnknownObject(id.to_string()),
            _ => StackError::Git(e),
        })?;
        Ok(blob.content().to_vec())
    }

    fn write_blob(&self, content: &[u8]) -> Result<Oid> {
        Ok(self.repo.blob(content)?)
    }

    fn empty_tree(&self) -> Result<Oid> {
        Ok(self.repo.treebuilder(None)?.write()?)
    }

    fn update_tree(&self, tree: Oid, updates: &[TreeUpdate]) -> Result<Oid> {
        if updates.is_empty() {
            return Ok(tree);
        }

        let baseline = self.find_tree(tree)?;
        let mut builder = git2::build::TreeUpdateBuilder::new();
        for update in updates {
            match update {
                TreeUpdate::Upsert { path, blob, mode } => {
                    builder.upsert(path.as_str(), *blob, file_mode(*mode));
                }
                TreeUpdate::Remove { path } => {
                    builder.remove(path.as_str());
                }
            }
        }

        Ok(builder.create_updated(&self.repo, &baseline)?)
    }

    fn tree_entry(&self, tree: Oid, path: &str) -> Result<Option<Oid>> {
        let tree = self.find_tree(tree)?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(entry.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn record_conflicts(&self, conflicts: &[ConflictEntry]) -> Result<()> {
        let mut index = self.index()?;

        for conflict in conflicts {
            for path in conflict.paths() {
                index.remove_path(Path::new(path))?;
            }
            let stages = [&conflict.ancestor, &conflict.ours, &conflict.theirs];
            for (stage, entry) in (1u16..).zip(stages) {
                if let Some(entry) = entry {
                    index.add(&index_entry(entry, stage))?;
                }
            }
        }

        index.write()?;
        tracing::debug!("Recorded {} conflicted paths in the index", conflicts.len());
        Ok(())
    }

    fn write_index_tree(&self, stage_tracked: bool) -> Result<Oid> {
        let mut index = self.index()?;

        if stage_tracked {
            index.update_all(["*"].iter(), None)?;
            index.write()?;
        }

        if index.has_conflicts() {
            return Err(StackError::validation(
                "The index has unresolved conflicts; resolve them and `git add` the files",
            ));
        }

        Ok(index.write_tree()?)
    }

    fn commits_between(&self, from: Oid, to: Oid) -> Result<Option<Vec<Oid>>> {
        if from == to {
            return Ok(Some(Vec::new()));
        }
        if !self.repo.graph_descendant_of(to, from)? {
            return Ok(None);
        }

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
        revwalk.push(to)?;
        revwalk.hide(from)?;

        let commits = revwalk.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(commits))
    }

    fn signature(&self) -> Result<Identity> {
        // Try to get signature from Git config
        if let Ok(sig) = self.repo.signature() {
            return Ok(Identity::from_signature(&sig));
        }

        let sig = git2::Signature::now("patchstack", "patchstack@localhost")?;
        Ok(Identity::from_signature(&sig))
    }

    fn head_branch(&self) -> Result<String> {
        let head = self
            .repo
            .head()
            .map_err(|e| StackError::validation(format!("Could not get HEAD: {e}")))?;

        if !head.is_branch() {
            return Err(StackError::validation(
                "HEAD is detached; check out a branch first",
            ));
        }

        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| StackError::validation("Branch name is not valid UTF-8"))
    }

    fn git_dir(&self) -> &Path {
        self.repo.path()
    }
}

fn stage_entry(entry: git2::IndexEntry) -> StageEntry {
    StageEntry {
        path: String::from_utf8_lossy(&entry.path).into_owned(),
        id: entry.id,
        mode: entry.mode,
    }
}

fn conflict_entry(conflict: git2::IndexConflict) -> Option<ConflictEntry> {
    let ancestor = conflict.ancestor.map(stage_entry);
    let ours = conflict.our.map(stage_entry);
    let theirs = conflict.their.map(stage_entry);

    let path = ours
        .as_ref()
        .or(theirs.as_ref())
        .or(ancestor.as_ref())?
        .path
        .clone();

    Some(ConflictEntry {
        path,
        ancestor,
        ours,
        theirs,
    })
}

/// Index entry for one side of a conflict; the stage number lives in bits 12-13 of the flags
fn index_entry(stage: &StageEntry, number: u16) -> git2::IndexEntry {
    git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: stage.mode,
        uid: 0,
        gid: 0,
        file_size: 0,
        id: stage.id,
        flags: (number & 0x3) << 12,
        flags_extended: 0,
        path: stage.path.as_bytes().to_vec(),
    }
}

fn file_mode(mode: u32) -> FileMode {
    match mode {
        0o100755 => FileMode::BlobExecutable,
        0o120000 => FileMode::Link,
        0o160000 => FileMode::Commit,
        _ => FileMode::Blob,
    }
}
