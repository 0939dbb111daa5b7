//! Policy list parsing, name matching and last-good reloads.

use warden::config::{PathsConfig, PolicyPaths};
use warden::policy::{matches_protected, read_list, strip_extension, PolicyList, PolicyStore};

#[test]
fn parse_trims_and_drops_blank_lines() {
    let list = PolicyList::parse("  guard.exe \r\n\n\t\nshield.exe\n   ");
    assert_eq!(list.entries(), ["guard.exe", "shield.exe"]);
    assert_eq!(list.len(), 2);
}

#[test]
fn parse_strips_byte_order_mark() {
    let list = PolicyList::parse("\u{feff}alice\nbob\n");
    assert_eq!(list.entries(), ["alice", "bob"]);
    assert!(list.contains("ALICE"));
}

#[test]
fn duplicates_are_kept_in_order() {
    let list = PolicyList::parse("b\na\nb\n");
    assert_eq!(list.entries(), ["b", "a", "b"]);
}

#[test]
fn membership_is_case_insensitive() {
    let list = PolicyList::new(["Bad.EXE", "Mallory"]);
    assert!(list.contains("bad.exe"));
    assert!(list.contains("BAD.exe"));
    assert!(list.contains("mALLORY"));
    assert!(!list.contains("bad"));
}

#[test]
fn empty_list() {
    let list = PolicyList::parse("\n\n");
    assert!(list.is_empty());
    assert!(!list.contains(""));
}

#[test]
fn extension_stripping() {
    assert_eq!(strip_extension("guard.exe"), "guard");
    assert_eq!(strip_extension("guard"), "guard");
    assert_eq!(strip_extension("archive.tar.gz"), "archive.tar");
    assert_eq!(strip_extension(".hidden"), ".hidden");
}

#[test]
fn protected_matching_ignores_extension_and_case() {
    assert!(matches_protected("guard.exe", "guard.exe"));
    assert!(matches_protected("GUARD.EXE", "guard"));
    assert!(matches_protected("guard", "Guard.exe"));
    assert!(!matches_protected("guard.exe", "guardian.exe"));
}

fn temp_paths() -> (tempfile::TempDir, PolicyPaths) {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("temp dir should be created: {err}"),
    };
    let paths = PolicyPaths::resolve(&PathsConfig::default(), dir.path());
    (dir, paths)
}

#[tokio::test]
async fn missing_file_reads_as_empty_list() {
    let (_dir, paths) = temp_paths();
    let list = read_list(&paths.forbidden_list).await;
    assert!(matches!(list, Ok(list) if list.is_empty()));
}

#[tokio::test]
async fn reload_publishes_a_new_snapshot() {
    let (_dir, paths) = temp_paths();
    let store = PolicyStore::new(paths.clone());
    assert!(store.current().forbidden.is_empty());

    std::fs::write(&paths.forbidden_list, "bad.exe\n").expect("write forbidden list");
    std::fs::write(&paths.protected_list, "guard.exe\n").expect("write protected list");
    std::fs::write(&paths.authorized_users, "alice\n").expect("write user list");

    let snapshot = store.reload().await;
    assert!(snapshot.forbidden.contains("BAD.EXE"));
    assert!(snapshot.protected.contains("guard.exe"));
    assert!(snapshot.authorized_users.contains("Alice"));
    assert_eq!(*store.current(), *snapshot);
}

#[tokio::test]
async fn unreadable_list_keeps_last_good_value() {
    let (_dir, paths) = temp_paths();
    let store = PolicyStore::new(paths.clone());

    std::fs::write(&paths.forbidden_list, "bad.exe\n").expect("write forbidden list");
    std::fs::write(&paths.authorized_users, "alice\n").expect("write user list");
    store.reload().await;

    // A directory in place of the file makes the read fail with something
    // other than NotFound.
    std::fs::remove_file(&paths.forbidden_list).expect("remove forbidden list");
    std::fs::create_dir(&paths.forbidden_list).expect("replace with directory");
    std::fs::write(&paths.authorized_users, "bob\n").expect("rewrite user list");

    let snapshot = store.reload().await;
    assert!(snapshot.forbidden.contains("bad.exe"));
    assert!(snapshot.authorized_users.contains("bob"));
    assert!(!snapshot.authorized_users.contains("alice"));
}

#[tokio::test]
async fn deleted_list_becomes_empty() {
    let (_dir, paths) = temp_paths();
    let store = PolicyStore::new(paths.clone());

    std::fs::write(&paths.forbidden_list, "bad.exe\n").expect("write forbidden list");
    store.reload().await;
    std::fs::remove_file(&paths.forbidden_list).expect("remove forbidden list");

    assert!(store.reload().await.forbidden.is_empty());
}
