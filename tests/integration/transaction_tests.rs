use super::test_helpers::*;
use patchstack::config::ConflictPolicy;
use patchstack::git::GitRepository;
use patchstack::stack::series;
use patchstack::stack::{Outcome, Publication, StackStore, StackTransaction, TransactionOptions};
use patchstack::StackError;
use std::path::Path;

/// Initialize the stack and create patches `a`, `b` and `c`, each adding its own file
fn three_patches<B: patchstack::git::VcsBackend + ?Sized>(store: &StackStore<'_, B>, path: &Path) {
    store.init().unwrap();
    add_patch(store, path, "a", "a.txt", "a\n");
    add_patch(store, path, "b", "b.txt", "b\n");
    add_patch(store, path, "c", "c.txt", "c\n");
}

#[test]
fn test_hide_applied_top_only_pops() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let counting = CountingBackend::new(&repo);
    let store = open_store(&counting);
    three_patches(&store, &path);

    let before = store.load().unwrap().state;
    let c_before = before.patch("c").unwrap().clone();
    let b_commit = before.patch("b").unwrap().commit_id;
    counting.reset();

    let snapshot = store.load().unwrap();
    let request = series::hide(&snapshot.state, &names(&["c"])).unwrap();
    assert!(request.satisfied.is_empty());
    let mut transaction = StackTransaction::open(&store, snapshot, "hide");
    let target = request.target;
    transaction
        .set_target(target.applied, target.unapplied, target.hidden)
        .unwrap();
    let outcome = transaction.run().unwrap();

    let Outcome::Success { state, publication } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(matches!(publication, Publication::Updated(_)));
    assert_eq!(state.applied(), names(&["a", "b"]).as_slice());
    assert_eq!(state.hidden(), names(&["c"]).as_slice());
    assert_eq!(state.head(), b_commit);
    assert_eq!(state.patch("c").unwrap(), &c_before);

    // Only the state commit was written
    assert_eq!(counting.merges.get(), 0);
    assert_eq!(counting.applies.get(), 0);
    assert_eq!(counting.commits.get(), 1);

    assert_eq!(head(&path), b_commit);
    assert!(!path.join("c.txt").exists());
}

#[test]
fn test_hide_already_hidden_is_a_noop() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let counting = CountingBackend::new(&repo);
    let store = open_store(&counting);
    three_patches(&store, &path);
    run_target(&store, "hide", &["a", "b"], &[], &["c"]);

    let snapshot = store.load().unwrap();
    let ref_before = snapshot.ref_value;
    let history_before = store.history().unwrap().len();
    counting.reset();

    let request = series::hide(&snapshot.state, &names(&["c"])).unwrap();
    assert_eq!(request.satisfied, names(&["c"]));
    assert_eq!(request.target, snapshot.state.partition());

    let mut transaction = StackTransaction::open(&store, snapshot, "hide");
    let target = request.target;
    transaction
        .set_target(target.applied, target.unapplied, target.hidden)
        .unwrap();
    let outcome = transaction.run().unwrap();

    assert!(outcome.is_success());
    let Outcome::Success { publication, .. } = outcome else {
        unreachable!()
    };
    assert_eq!(publication, Publication::Unchanged(ref_before));
    assert_eq!(counting.total(), 0);

    assert_eq!(store.load().unwrap().ref_value, ref_before);
    let history = store.history().unwrap();
    assert_eq!(history.len(), history_before + 1);
    assert_eq!(history[0].old, Some(ref_before));
    assert_eq!(history[0].new, ref_before);
}

#[test]
fn test_hide_repeated_name() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    three_patches(&store, &path);

    let snapshot = store.load().unwrap();
    let request = series::hide(&snapshot.state, &names(&["c", "c"])).unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "hide");
    let target = request.target;
    transaction
        .set_target(target.applied, target.unapplied, target.hidden)
        .unwrap();

    let Outcome::Success { state, .. } = transaction.run().unwrap() else {
        panic!("hiding a repeated name should succeed");
    };
    assert_eq!(state.hidden(), names(&["c"]).as_slice());
    assert_eq!(state.applied(), names(&["a", "b"]).as_slice());
}

#[test]
fn test_push_onto_changed_file_conflicts() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();

    let conflicting = "line 1\nline 2\nchanged by A\nline 4\nline 5\n";
    add_patch(&store, &path, "a", "file.txt", conflicting);
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(
        &store,
        &path,
        "e",
        "file.txt",
        "line 1\nline 2\nchanged by E\nline 4\nline 5\n",
    );
    run_target(&store, "pop", &[], &["a", "e"], &[]);

    let current = store.load().unwrap().state;
    assert_eq!(
        current.patch("e").unwrap().base_commit_id,
        current.patch("a").unwrap().base_commit_id
    );

    let outcome = run_target(&store, "push", &["a", "e"], &[], &[]);
    let Outcome::Conflict {
        patch,
        files,
        state,
    } = outcome
    else {
        panic!("expected a conflict, got {outcome:?}");
    };
    assert_eq!(patch, "e");
    assert_eq!(files, names(&["file.txt"]));

    let state = state.expect("partial state is published");
    assert_eq!(state.applied(), names(&["a", "e"]).as_slice());
    assert!(state.unapplied().is_empty());
    assert!(state.is_conflicted("e"));
    assert_eq!(state.head(), state.patch("a").unwrap().commit_id);
    assert_eq!(store.load().unwrap().state, state);

    let content = std::fs::read_to_string(path.join("file.txt")).unwrap();
    assert!(content.contains("<<<<<<< current"));
    assert!(content.contains("changed by A"));
    assert!(content.contains("changed by E"));
    assert!(content.contains(">>>>>>> e"));

    let status = git(&path, &["status", "--porcelain"]);
    assert!(status.contains("UU file.txt"), "status was {status}");
}

#[test]
fn test_conflict_leaves_remaining_patches_unapplied() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();

    add_patch(&store, &path, "a", "file.txt", "line 1\nA\nline 3\nline 4\nline 5\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "file.txt", "line 1\nE\nline 3\nline 4\nline 5\n");
    add_patch(&store, &path, "f", "f.txt", "f\n");
    add_patch(&store, &path, "g", "g.txt", "g\n");
    run_target(&store, "pop", &[], &["a", "e", "f", "g"], &[]);

    let outcome = run_target(&store, "push", &["a", "e", "f", "g"], &[], &[]);
    let Outcome::Conflict { patch, state, .. } = outcome else {
        panic!("expected a conflict, got {outcome:?}");
    };
    assert_eq!(patch, "e");
    let state = state.unwrap();
    assert_eq!(state.applied(), names(&["a", "e"]).as_slice());
    assert_eq!(state.unapplied(), names(&["f", "g"]).as_slice());
    assert!(!path.join("f.txt").exists());

    // Popping the conflicted patch gives back a clean stack
    let outcome = run_target(&store, "pop", &["a"], &["e", "f", "g"], &[]);
    let Outcome::Success { state, .. } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(state.conflict().is_none());
    assert_eq!(state.head(), state.patch("a").unwrap().commit_id);
    assert_eq!(git(&path, &["status", "--porcelain"]), "");
}

#[test]
fn test_push_of_same_new_file_conflicts() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();

    add_patch(&store, &path, "a", "new.txt", "from A\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "new.txt", "from E\n");
    run_target(&store, "pop", &[], &["a", "e"], &[]);

    let outcome = run_target(&store, "push", &["a", "e"], &[], &[]);
    let Outcome::Conflict { patch, files, .. } = outcome else {
        panic!("expected a conflict, got {outcome:?}");
    };
    assert_eq!(patch, "e");
    assert_eq!(files, names(&["new.txt"]));

    let content = std::fs::read_to_string(path.join("new.txt")).unwrap();
    assert!(content.contains("<<<<<<< current"), "{content}");
}

#[test]
fn test_resolved_conflict_survives_chain_changes() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    store.init().unwrap();

    add_patch(&store, &path, "a", "file.txt", "line 1\nA\nline 3\nline 4\nline 5\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "file.txt", "line 1\nE\nline 3\nline 4\nline 5\n");
    add_patch(&store, &path, "f", "f.txt", "f\n");
    run_target(&store, "pop", &[], &["a", "e", "f"], &[]);

    let outcome = run_target(&store, "push", &["a", "e"], &["f"], &[]);
    assert!(matches!(outcome, Outcome::Conflict { .. }), "{outcome:?}");

    let resolved = "line 1\nRESOLVED\nline 3\nline 4\nline 5\n";
    std::fs::write(path.join("file.txt"), resolved).unwrap();
    git(&path, &["add", "file.txt"]);
    let before = store.load().unwrap();

    for (applied, unapplied) in [(&["a", "e", "f"][..], &[][..]), (&["a"][..], &["e", "f"][..])] {
        let snapshot = store.load().unwrap();
        let mut transaction = StackTransaction::open(&store, snapshot, "push");
        transaction
            .set_target(names(applied), names(unapplied), vec![])
            .unwrap();
        let err = transaction.run().unwrap_err();
        assert!(
            matches!(err, StackError::Validation(ref msg) if msg.contains("'e'") && msg.contains("file.txt")),
            "{err:?}"
        );
        assert_eq!(std::fs::read_to_string(path.join("file.txt")).unwrap(), resolved);
        assert_eq!(store.load().unwrap().ref_value, before.ref_value);
    }

    // Discarding gives up the resolution on request
    let snapshot = store.load().unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "pop").with_options(
        TransactionOptions {
            discard_local_changes: true,
        },
    );
    transaction
        .set_target(names(&["a"]), names(&["e", "f"]), vec![])
        .unwrap();
    let Outcome::Success { state, .. } = transaction.run().unwrap() else {
        panic!("discarding pop should succeed");
    };
    assert!(state.conflict().is_none());
    assert_eq!(
        std::fs::read_to_string(path.join("file.txt")).unwrap(),
        "line 1\nA\nline 3\nline 4\nline 5\n"
    );
}

#[test]
fn test_abort_policy_discards_conflicting_transaction() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let mut settings = test_settings();
    settings.transaction.conflict_policy = ConflictPolicy::Abort;
    let store = StackStore::new(&repo, BRANCH, settings);
    store.init().unwrap();

    add_patch(&store, &path, "a", "file.txt", "line 1\nA\nline 3\nline 4\nline 5\n");
    run_target(&store, "pop", &[], &["a"], &[]);
    add_patch(&store, &path, "e", "file.txt", "line 1\nE\nline 3\nline 4\nline 5\n");
    run_target(&store, "pop", &[], &["a", "e"], &[]);

    let before = store.load().unwrap();
    let outcome = run_target(&store, "push", &["a", "e"], &[], &[]);
    assert_eq!(
        outcome,
        Outcome::Conflict {
            patch: "e".to_string(),
            files: names(&["file.txt"]),
            state: None,
        }
    );

    let after = store.load().unwrap();
    assert_eq!(after.ref_value, before.ref_value);
    assert_eq!(head(&path), before.state.head());
    assert_eq!(git(&path, &["status", "--porcelain"]), "");
}

#[test]
fn test_pop_then_push_reuses_commits() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let counting = CountingBackend::new(&repo);
    let store = open_store(&counting);
    three_patches(&store, &path);
    let original = store.load().unwrap().state;

    run_target(&store, "pop", &["a"], &["b", "c"], &[]);
    assert!(!path.join("b.txt").exists());
    counting.reset();

    let outcome = run_target(&store, "push", &["a", "b", "c"], &[], &[]);
    let Outcome::Success { state, .. } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    for name in ["a", "b", "c"] {
        assert_eq!(
            state.patch(name).unwrap().commit_id,
            original.patch(name).unwrap().commit_id
        );
    }
    assert_eq!(state.head(), original.head());
    assert_eq!(counting.merges.get(), 0);
    assert_eq!(counting.applies.get(), 0);
    assert_eq!(head(&path), original.head());
    assert!(path.join("c.txt").exists());
}

#[test]
fn test_reorder_rewrites_moved_patches() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    three_patches(&store, &path);
    let original = store.load().unwrap().state;

    let outcome = run_target(&store, "reorder", &["a", "c", "b"], &[], &[]);
    let Outcome::Success { state, .. } = outcome else {
        panic!("expected success, got {outcome:?}");
    };

    let a = state.patch("a").unwrap();
    let b = state.patch("b").unwrap();
    let c = state.patch("c").unwrap();
    assert_eq!(a.commit_id, original.patch("a").unwrap().commit_id);
    assert_eq!(c.base_commit_id, a.commit_id);
    assert_eq!(b.base_commit_id, c.commit_id);
    assert_eq!(state.head(), b.commit_id);
    assert_eq!(
        git(&path, &["log", "--format=%s", "-3"]),
        "Patch b\nPatch c\nPatch a"
    );
}

#[test]
fn test_target_must_cover_every_patch() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    three_patches(&store, &path);

    let snapshot = store.load().unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "test");

    let err = transaction
        .set_target(names(&["a", "b"]), vec![], vec![])
        .unwrap_err();
    assert!(matches!(err, StackError::IncompleteTarget(ref missing) if missing == &names(&["c"])));

    let err = transaction
        .set_target(names(&["a", "b", "c"]), names(&["a"]), vec![])
        .unwrap_err();
    assert!(matches!(err, StackError::DuplicatePatch(ref name) if name == "a"));

    let err = transaction
        .set_target(names(&["a", "b", "c", "zzz"]), vec![], vec![])
        .unwrap_err();
    assert!(matches!(err, StackError::UnknownPatch(ref name) if name == "zzz"));
}

#[test]
fn test_local_changes_block_chain_changes() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    three_patches(&store, &path);
    let before = store.load().unwrap();

    std::fs::write(path.join("a.txt"), "edited\n").unwrap();
    // Untracked files never block
    std::fs::write(path.join("scratch.txt"), "notes\n").unwrap();

    let snapshot = store.load().unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "pop");
    transaction
        .set_target(names(&["a", "b"]), names(&["c"]), vec![])
        .unwrap();
    let err = transaction.run().unwrap_err();
    assert!(matches!(err, StackError::DirtyWorkingTree(ref files) if files == &names(&["a.txt"])));
    assert_eq!(store.load().unwrap().ref_value, before.ref_value);

    // Leaving the chain alone never looks at the working tree
    assert!(run_target(&store, "noop", &["a", "b", "c"], &[], &[]).is_success());

    let snapshot = store.load().unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "pop").with_options(
        TransactionOptions {
            discard_local_changes: true,
        },
    );
    transaction
        .set_target(names(&["a", "b"]), names(&["c"]), vec![])
        .unwrap();
    assert!(transaction.run().unwrap().is_success());
    assert_eq!(std::fs::read_to_string(path.join("a.txt")).unwrap(), "a\n");
    assert!(path.join("scratch.txt").exists());
}

#[test]
fn test_second_publisher_loses_the_race() {
    let (_tmp, path) = create_test_repo();
    {
        let repo = GitRepository::open(&path).unwrap();
        let store = open_store(&repo);
        three_patches(&store, &path);
    }

    let repo_one = GitRepository::open(&path).unwrap();
    let repo_two = GitRepository::open(&path).unwrap();
    let store_one = open_store(&repo_one);
    let store_two = open_store(&repo_two);

    let snapshot_one = store_one.load().unwrap();
    let snapshot_two = store_two.load().unwrap();
    assert_eq!(snapshot_one, snapshot_two);

    let mut first = StackTransaction::open(&store_one, snapshot_one, "pop");
    first
        .set_target(names(&["a"]), names(&["b", "c"]), vec![])
        .unwrap();
    let mut second = StackTransaction::open(&store_two, snapshot_two, "hide");
    second
        .set_target(names(&["a", "b"]), vec![], names(&["c"]))
        .unwrap();

    let Outcome::Success { state: won, .. } = first.run().unwrap() else {
        panic!("first transaction should publish");
    };
    let published = GitRepository::open(&path).unwrap();
    let ref_after_first = open_store(&published).read_snapshot().unwrap().ref_value;

    assert_eq!(second.run().unwrap(), Outcome::Race);

    let fresh = GitRepository::open(&path).unwrap();
    let store = open_store(&fresh);
    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.ref_value, ref_after_first);
    assert_eq!(snapshot.state, won);
    assert_eq!(snapshot.state.unapplied(), names(&["b", "c"]).as_slice());
    assert_eq!(head(&path), won.patch("a").unwrap().commit_id);

    let race = Outcome::Race.into_result(BRANCH).unwrap_err();
    assert!(race.is_retryable());
}

#[test]
fn test_held_lock_reports_contention() {
    let (_tmp, path) = create_test_repo();
    let repo = GitRepository::open(&path).unwrap();
    let store = open_store(&repo);
    three_patches(&store, &path);

    let _held = store.lock("another transaction").unwrap();

    let snapshot = store.load().unwrap();
    let mut transaction = StackTransaction::open(&store, snapshot, "pop");
    transaction
        .set_target(names(&["a", "b"]), names(&["c"]), vec![])
        .unwrap();
    let err = transaction.run().unwrap_err();
    assert!(matches!(err, StackError::LockContention(_)));
    assert!(err.is_retryable());
    assert!(path.join("c.txt").exists());
}
