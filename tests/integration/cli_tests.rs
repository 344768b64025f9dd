use super::test_helpers::*;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the `pstk` binary in `repo_path` with an isolated home directory
fn pstk(repo_path: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pstk"))
        .args(["--no-color"])
        .args(args)
        .current_dir(repo_path)
        .env("HOME", home)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn assert_ok(output: &Output) {
    assert!(
        output.status.success(),
        "pstk failed: {}{}",
        stdout(output),
        stderr(output)
    );
}

/// `pstk new` + edit + `pstk refresh`
fn cli_patch(path: &Path, home: &Path, name: &str, file: &str, content: &str) {
    assert_ok(&pstk(path, home, &["new", name, "-m", &format!("Patch {name}")]));
    std::fs::write(path.join(file), content).unwrap();
    git(path, &["add", file]);
    assert_ok(&pstk(path, home, &["refresh"]));
}

#[test]
fn test_cli_series_lifecycle() {
    let (_tmp, path) = create_test_repo();
    let home = TempDir::new().unwrap();
    let home = home.path();

    assert_ok(&pstk(&path, home, &["init"]));
    cli_patch(&path, home, "a", "a.txt", "a\n");
    cli_patch(&path, home, "b", "b.txt", "b\n");

    let series = pstk(&path, home, &["series"]);
    assert_ok(&series);
    let listing = stdout(&series);
    assert!(listing.contains("+ a"), "{listing}");
    assert!(listing.contains("> b"), "{listing}");

    assert_ok(&pstk(&path, home, &["pop"]));
    assert!(!path.join("b.txt").exists());
    let listing = stdout(&pstk(&path, home, &["series"]));
    assert!(listing.contains("> a"), "{listing}");
    assert!(listing.contains("- b"), "{listing}");

    assert_ok(&pstk(&path, home, &["push", "--all"]));
    assert!(path.join("b.txt").exists());

    assert_ok(&pstk(&path, home, &["goto", "a"]));
    assert_ok(&pstk(&path, home, &["hide", "b"]));
    let listing = stdout(&pstk(&path, home, &["series"]));
    assert!(!listing.contains("b"), "{listing}");
    let listing = stdout(&pstk(&path, home, &["series", "--all"]));
    assert!(listing.contains("! b"), "{listing}");

    let log = pstk(&path, home, &["log", "-n", "2"]);
    assert_ok(&log);
    let log = stdout(&log);
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().next().unwrap().contains("hide"), "{log}");
}

#[test]
fn test_cli_hide_twice_warns_and_succeeds() {
    let (_tmp, path) = create_test_repo();
    let home = TempDir::new().unwrap();
    let home = home.path();

    assert_ok(&pstk(&path, home, &["init"]));
    cli_patch(&path, home, "d", "d.txt", "d\n");
    assert_ok(&pstk(&path, home, &["hide", "d"]));

    let again = pstk(&path, home, &["hide", "d"]);
    assert_ok(&again);
    assert!(
        stderr(&again).contains("Patch 'd' already hidden"),
        "{}",
        stderr(&again)
    );

    let log = stdout(&pstk(&path, home, &["log", "-n", "1"]));
    assert!(log.contains("(no change)"), "{log}");
}

#[test]
fn test_cli_conflict_exits_with_one() {
    let (_tmp, path) = create_test_repo();
    let home = TempDir::new().unwrap();
    let home = home.path();

    assert_ok(&pstk(&path, home, &["init"]));
    cli_patch(&path, home, "a", "file.txt", "line 1\nA\nline 3\nline 4\nline 5\n");
    assert_ok(&pstk(&path, home, &["pop"]));
    cli_patch(&path, home, "e", "file.txt", "line 1\nE\nline 3\nline 4\nline 5\n");
    assert_ok(&pstk(&path, home, &["pop"]));

    let push = pstk(&path, home, &["push", "a", "e"]);
    assert_eq!(push.status.code(), Some(1), "{}", stderr(&push));
    assert!(stderr(&push).contains("Merge conflict while pushing 'e'"));
    assert!(stdout(&push).contains("file.txt"));

    let listing = stdout(&pstk(&path, home, &["series"]));
    assert!(listing.contains("+ a"), "{listing}");
    assert!(listing.contains("x e"), "{listing}");

    let content = std::fs::read_to_string(path.join("file.txt")).unwrap();
    assert!(content.contains("<<<<<<< current"));
}

#[test]
fn test_cli_errors_exit_with_two() {
    let (_tmp, path) = create_test_repo();
    let home = TempDir::new().unwrap();
    let home = home.path();

    let before_init = pstk(&path, home, &["series"]);
    assert_eq!(before_init.status.code(), Some(2));
    assert!(stderr(&before_init).contains("pstk init"), "{}", stderr(&before_init));

    assert_ok(&pstk(&path, home, &["init"]));
    let unknown = pstk(&path, home, &["push", "missing"]);
    assert_eq!(unknown.status.code(), Some(2));
    assert!(stderr(&unknown).contains("missing"));

    let empty = pstk(&path, home, &["pop"]);
    assert_eq!(empty.status.code(), Some(2));
}

#[test]
fn test_cli_config_roundtrip() {
    let (_tmp, path) = create_test_repo();
    let home = TempDir::new().unwrap();
    let home = home.path();

    assert_ok(&pstk(&path, home, &["init"]));
    assert_ok(&pstk(
        &path,
        home,
        &["config", "set", "transaction.conflict_policy", "abort"],
    ));

    let get = pstk(&path, home, &["config", "get", "transaction.conflict_policy"]);
    assert_ok(&get);
    assert_eq!(stdout(&get).trim(), "abort");

    let invalid = pstk(
        &path,
        home,
        &["config", "set", "transaction.conflict_policy", "sometimes"],
    );
    assert_eq!(invalid.status.code(), Some(2));
    assert!(path.join(".git/patchstack/config.json").exists());
}
