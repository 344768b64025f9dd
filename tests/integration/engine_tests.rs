use super::test_helpers::*;
use patchstack::config::MergeSettings;
use patchstack::git::{GitRepository, VcsBackend};
use patchstack::stack::{MergeEngine, PushPath, PushResult, StackState};

fn applied(result: PushResult) -> (patchstack::stack::Patch, git2::Oid, PushPath) {
    match result {
        PushResult::Applied {
            patch,
            new_top,
            path,
        } => (patch, new_top, path),
        PushResult::Conflict(conflict) => panic!("unexpected conflict: {:?}", conflict.files),
    }
}

/// Stack with `a` and `b` applied, each adding its own file
fn two_patches(repo: &GitRepository, path: &std::path::Path) -> StackState {
    let store = open_store(repo);
    store.init().unwrap();
    add_patch(&store, path, "a", "a.txt", "a\n");
    add_patch(&store, path, "b", "b.txt", "b\n");
    store.load().unwrap().state
}

#[test]
fn test_push_onto_own_base_reuses_commit() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let state = two_patches(&repo, &path);
    let counting = CountingBackend::new(&repo);
    let engine = MergeEngine::new(&counting, MergeSettings::default());

    let b = state.patch("b").unwrap();
    let (pushed, new_top, path_taken) = applied(engine.push(b, b.base_commit_id).unwrap());

    assert_eq!(path_taken, PushPath::Unchanged);
    assert_eq!(new_top, b.commit_id);
    assert_eq!(&pushed, b);
    assert_eq!(counting.total(), 0);
}

#[test]
fn test_push_onto_same_tree_takes_fast_path() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let state = two_patches(&repo, &path);
    let b = state.patch("b").unwrap();

    // A different commit carrying exactly the base tree of `b`
    let a_commit = repo.read_commit(b.base_commit_id).unwrap();
    let signature = repo.signature().unwrap();
    let twin = repo
        .create_commit(
            a_commit.tree,
            &a_commit.parents,
            "Same tree, new message\n",
            &signature,
            &signature,
        )
        .unwrap();

    let counting = CountingBackend::new(&repo);
    let engine = MergeEngine::new(&counting, MergeSettings::default());
    let (pushed, new_top, path_taken) = applied(engine.push(b, twin).unwrap());

    assert_eq!(path_taken, PushPath::FastForward);
    assert_eq!(pushed.base_commit_id, twin);
    assert_eq!(pushed.commit_id, new_top);
    assert_eq!(pushed.message, b.message);
    assert_eq!(pushed.author, b.author);
    assert_eq!(
        repo.read_commit(new_top).unwrap().tree,
        repo.read_commit(b.commit_id).unwrap().tree
    );
    assert_eq!(counting.merges.get(), 0);
    assert_eq!(counting.applies.get(), 0);
    assert_eq!(counting.commits.get(), 1);
}

#[test]
fn test_push_past_skipped_patch_applies_directly() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let state = two_patches(&repo, &path);
    let a = state.patch("a").unwrap();
    let b = state.patch("b").unwrap();

    let counting = CountingBackend::new(&repo);
    let engine = MergeEngine::new(&counting, MergeSettings::default());
    let (pushed, new_top, path_taken) = applied(engine.push(b, a.base_commit_id).unwrap());

    assert_eq!(path_taken, PushPath::DirectApply);
    assert_eq!(pushed.base_commit_id, a.base_commit_id);
    assert_eq!(counting.merges.get(), 0);

    let tree = repo.read_commit(new_top).unwrap().tree;
    assert!(repo.tree_entry(tree, "b.txt").unwrap().is_some());
    assert!(repo.tree_entry(tree, "a.txt").unwrap().is_none());
}

#[test]
fn test_push_without_direct_apply_merges() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let state = two_patches(&repo, &path);
    let a = state.patch("a").unwrap();
    let b = state.patch("b").unwrap();

    let counting = CountingBackend::new(&repo);
    let settings = MergeSettings {
        direct_apply: false,
        ..MergeSettings::default()
    };
    let engine = MergeEngine::new(&counting, settings);
    let (_, new_top, path_taken) = applied(engine.push(b, a.base_commit_id).unwrap());

    assert_eq!(path_taken, PushPath::Merged);
    assert_eq!(counting.merges.get(), 1);
    assert_eq!(counting.applies.get(), 0);

    let tree = repo.read_commit(new_top).unwrap().tree;
    let blob = repo.tree_entry(tree, "b.txt").unwrap().unwrap();
    assert_eq!(repo.read_blob(blob).unwrap(), b"b\n");
}

#[test]
fn test_conflicting_push_creates_no_commit() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();
    add_patch(&store, &path, "a", "file.txt", "line 1\nours\nline 3\nline 4\nline 5\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "file.txt", "line 1\ntheirs\nline 3\nline 4\nline 5\n");
    let state = store.load().unwrap().state;
    let a = state.patch("a").unwrap();
    let e = state.patch("e").unwrap();

    let counting = CountingBackend::new(&repo);
    let engine = MergeEngine::new(&counting, MergeSettings::default());
    let PushResult::Conflict(conflict) = engine.push(e, a.commit_id).unwrap() else {
        panic!("expected a conflict");
    };

    assert_eq!(counting.commits.get(), 0);
    assert_eq!(counting.merges.get(), 1);
    assert_eq!(conflict.patch, *e);
    assert_eq!(conflict.files, names(&["file.txt"]));
    assert_eq!(conflict.stages.len(), 1);
    assert!(conflict.stages[0].ancestor.is_some());

    let blob = repo.tree_entry(conflict.tree, "file.txt").unwrap().unwrap();
    let content = String::from_utf8(repo.read_blob(blob).unwrap()).unwrap();
    assert_eq!(
        content,
        "line 1\n<<<<<<< current\nours\n=======\ntheirs\n>>>>>>> e\nline 3\nline 4\nline 5\n"
    );
}

#[test]
fn test_refresh_keeps_identity_and_moves_base() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let state = two_patches(&repo, &path);
    let b = state.patch("b").unwrap();

    let engine = MergeEngine::new(&repo, MergeSettings::default());
    assert_eq!(engine.pop(b, b.commit_id), b.base_commit_id);

    let tree = repo.read_commit(b.commit_id).unwrap().tree;
    let refreshed = engine
        .refresh(b, b.base_commit_id, tree, Some("Reworded\n"))
        .unwrap();
    assert_eq!(refreshed.name, "b");
    assert_eq!(refreshed.base_commit_id, b.base_commit_id);
    assert_eq!(refreshed.message, "Reworded\n");
    assert_ne!(refreshed.commit_id, b.commit_id);
    assert!(!refreshed.is_empty);
}

#[test]
fn test_push_adding_existing_file_conflicts() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();
    add_patch(&store, &path, "a", "new.txt", "from A\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "new.txt", "from E\n");
    let state = store.load().unwrap().state;
    let a = state.patch("a").unwrap();
    let e = state.patch("e").unwrap();

    let counting = CountingBackend::new(&repo);
    let engine = MergeEngine::new(&counting, MergeSettings::default());
    let PushResult::Conflict(conflict) = engine.push(e, a.commit_id).unwrap() else {
        panic!("both patches add new.txt; the push must conflict");
    };

    assert_eq!(counting.applies.get(), 1);
    assert_eq!(counting.merges.get(), 1);
    assert_eq!(counting.commits.get(), 0);
    assert_eq!(conflict.files, names(&["new.txt"]));
    assert!(conflict.stages[0].ancestor.is_none());

    let blob = repo.tree_entry(conflict.tree, "new.txt").unwrap().unwrap();
    let content = String::from_utf8(repo.read_blob(blob).unwrap()).unwrap();
    assert!(content.contains("<<<<<<< current"), "{content}");
    assert!(content.contains("from A") && content.contains("from E"), "{content}");
}

#[test]
fn test_push_non_utf8_patch() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();
    add_patch(&store, &path, "a", "a.txt", "a\n");
    run_target(&store, "pop", &[], &["a"], &[]);

    patchstack::stack::new_patch(&store, Some("menu"), "Latin-1 menu").unwrap();
    std::fs::write(path.join("menu.txt"), b"caf\xe9\n").unwrap();
    git(&path, &["add", "menu.txt"]);
    patchstack::stack::refresh_top(&store, None).unwrap();

    let state = store.load().unwrap().state;
    let a = state.patch("a").unwrap();
    let menu = state.patch("menu").unwrap();

    let engine = MergeEngine::new(&repo, MergeSettings::default());
    let (pushed, new_top, path_taken) = applied(engine.push(menu, a.commit_id).unwrap());

    assert_eq!(path_taken, PushPath::DirectApply);
    assert_eq!(pushed.base_commit_id, a.commit_id);
    let tree = repo.read_commit(new_top).unwrap().tree;
    let blob = repo.tree_entry(tree, "menu.txt").unwrap().unwrap();
    assert_eq!(repo.read_blob(blob).unwrap(), b"caf\xe9\n");
    assert!(repo.tree_entry(tree, "a.txt").unwrap().is_some());
}
