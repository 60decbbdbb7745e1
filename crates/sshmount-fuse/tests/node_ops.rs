//! Lookup, readdir, mkdir and getattr semantics.

mod common;

use common::TestFs;
use sshmount_fuse::{NodeKind, ROOT_INODE};
use sshmount_sftp::testing::TEST_MTIME;
use std::time::{Duration, UNIX_EPOCH};

#[test]
fn lookup_missing_name_is_a_negative_result() {
    let t = TestFs::new();

    let err = t.fs.lookup_child(ROOT_INODE, "ghost").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);

    // No child was installed: once the remote gains the name, lookup
    // sees it fresh rather than serving a cached negative.
    t.seed_file("ghost", b"now it exists");
    let (_, attr) = t.fs.lookup_child(ROOT_INODE, "ghost").unwrap();
    assert_eq!(attr.size, 13);
}

#[test]
fn lookup_classifies_mode_once() {
    let t = TestFs::new();
    t.seed_file("file", b"x");
    t.seed_dir("dir");

    let (file_ino, file_attr) = t.fs.lookup_child(ROOT_INODE, "file").unwrap();
    let (dir_ino, dir_attr) = t.fs.lookup_child(ROOT_INODE, "dir").unwrap();

    assert_eq!(file_attr.kind, fuser::FileType::RegularFile);
    assert_eq!(dir_attr.kind, fuser::FileType::Directory);
    assert_ne!(file_ino, dir_ino);
}

#[test]
fn repeated_lookup_returns_the_same_inode_without_a_remote_call() {
    let t = TestFs::new();
    t.seed_file("stable", b"");

    let first = t.lookup_root("stable");
    t.client.clear_calls();

    // An installed child is returned directly from the table.
    let second = t.lookup_root("stable");
    assert_eq!(first, second);
    assert!(t.client.calls().is_empty(), "no remote call expected");
}

#[test]
fn getattr_surfaces_mtime_as_all_three_times() {
    let t = TestFs::new();
    t.seed_file("f", b"hello");
    let ino = t.lookup_root("f");

    let attr = t.fs.node_attr(ino, None).unwrap();
    let expected = UNIX_EPOCH + Duration::from_secs(TEST_MTIME);
    assert_eq!(attr.mtime, expected);
    assert_eq!(attr.ctime, expected);
    assert_eq!(attr.crtime, expected);
    assert_eq!(attr.size, 5);
}

#[test]
fn getattr_through_a_handle_uses_the_handle() {
    let t = TestFs::new();
    t.seed_file("f", b"12345");
    let ino = t.lookup_root("f");
    let fh = t.fs.open_node(ino, libc::O_RDONLY).unwrap();

    t.client.clear_calls();
    let attr = t.fs.node_attr(ino, Some(fh)).unwrap();
    assert_eq!(attr.size, 5);
    // Handle-based stat issues no path stat.
    assert!(t.client.calls().iter().all(|c| !c.starts_with("stat ")));
}

#[test]
fn readdir_on_empty_directory_yields_an_empty_stream() {
    let t = TestFs::new();
    t.seed_dir("empty");
    let ino = t.lookup_root("empty");

    let stream = t.fs.list_dir(ino).unwrap();
    assert!(!stream.has_next());
}

#[test]
fn readdir_lists_each_name_once_with_its_mode_class() {
    let t = TestFs::new();
    t.seed_dir("d");
    t.seed_file("d/a", b"");
    t.seed_file("d/b", b"");
    t.seed_dir("d/c");
    let ino = t.lookup_root("d");

    let mut stream = t.fs.list_dir(ino).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = stream.next() {
        seen.push((entry.name, entry.kind));
    }
    assert_eq!(
        seen,
        vec![
            ("a".to_string(), NodeKind::RegularFile),
            ("b".to_string(), NodeKind::RegularFile),
            ("c".to_string(), NodeKind::Directory),
        ]
    );
}

#[test]
fn readdir_preserves_existing_child_identity() {
    let t = TestFs::new();
    t.seed_file("known", b"");
    let ino = t.lookup_root("known");

    let mut stream = t.fs.list_dir(ROOT_INODE).unwrap();
    let entry = stream.next().unwrap();
    assert_eq!(entry.name, "known");
    assert_eq!(entry.ino, ino);
}

#[test]
fn readdir_stream_is_single_pass() {
    let t = TestFs::new();
    t.seed_file("only", b"");

    let mut stream = t.fs.list_dir(ROOT_INODE).unwrap();
    assert!(stream.has_next());
    assert!(stream.next().is_some());
    assert!(!stream.has_next());
    assert!(stream.next().is_none());
}

#[test]
fn mkdir_creates_then_sets_mode() {
    let t = TestFs::new();

    let (ino, attr) = t.fs.make_dir(ROOT_INODE, "newdir", 0o750).unwrap();
    assert_eq!(attr.kind, fuser::FileType::Directory);
    assert_eq!(attr.perm, 0o750);
    assert!(t.client.exists(t.remote("newdir")));

    // The new child is a real node: stat goes through.
    let stat = t.fs.node_attr(ino, None).unwrap();
    assert_eq!(stat.kind, fuser::FileType::Directory);

    let calls = t.client.calls();
    let mkdir_idx = calls.iter().position(|c| c.starts_with("mkdir")).unwrap();
    let chmod_idx = calls.iter().position(|c| c.starts_with("chmod")).unwrap();
    assert!(mkdir_idx < chmod_idx);
}

#[test]
fn mkdir_over_existing_child_is_busy_and_issues_no_remote_call() {
    let t = TestFs::new();
    t.seed_dir("taken");
    let ino = t.lookup_root("taken");

    t.client.clear_calls();
    let err = t.fs.make_dir(ROOT_INODE, "taken", 0o755).unwrap_err();
    assert_eq!(err.to_errno(), libc::EBUSY);
    assert!(t.client.calls().is_empty(), "no remote call expected");

    // The child table was not disturbed.
    assert_eq!(t.lookup_root("taken"), ino);
}

#[test]
fn mkdir_remote_failure_installs_no_child() {
    let t = TestFs::new();
    // The remote already has a *file* with this name, but the local tree
    // has never looked it up.
    t.seed_file("occupied", b"");

    let err = t.fs.make_dir(ROOT_INODE, "occupied", 0o755).unwrap_err();
    assert_eq!(err.to_errno(), libc::EEXIST);

    // No directory child was installed: lookup discovers the remote file.
    let (_, attr) = t.fs.lookup_child(ROOT_INODE, "occupied").unwrap();
    assert_eq!(attr.kind, fuser::FileType::RegularFile);
}

#[test]
fn setattr_mode_issues_chmod_and_echoes_times() {
    let t = TestFs::new();
    t.seed_file("f", b"abc");
    let ino = t.lookup_root("f");

    let wanted_mtime = UNIX_EPOCH + Duration::from_secs(42);
    let attr = t
        .fs
        .set_attr(ino, Some(0o600), None, Some(wanted_mtime), None)
        .unwrap();

    assert_eq!(attr.perm, 0o600);
    // Requested times are reflected back without a remote settime.
    assert_eq!(attr.mtime, wanted_mtime);
    assert!(t.client.calls().iter().any(|c| c.starts_with("chmod")));
}

#[test]
fn setattr_without_mode_issues_no_chmod() {
    let t = TestFs::new();
    t.seed_file("f", b"abc");
    let ino = t.lookup_root("f");
    t.client.clear_calls();

    let attr = t.fs.set_attr(ino, None, None, None, None).unwrap();
    assert_eq!(attr.size, 3);
    assert!(t.client.calls().iter().all(|c| !c.starts_with("chmod")));
}

#[test]
fn lookup_on_file_parent_is_not_a_directory() {
    let t = TestFs::new();
    t.seed_file("plain", b"");
    let ino = t.lookup_root("plain");

    let err = t.fs.lookup_child(ino, "child").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTDIR);
}

#[test]
fn type_change_goes_through_remove_and_re_add() {
    let t = TestFs::new();
    t.seed_file("morph", b"");
    let old = t.lookup_root("morph");

    // The name is unlinked, then the remote gains a directory under it.
    t.fs.remove_file(ROOT_INODE, "morph").unwrap();
    t.seed_dir("morph");

    let (fresh, attr) = t.fs.lookup_child(ROOT_INODE, "morph").unwrap();
    assert_ne!(fresh, old, "a type change requires a fresh identity");
    assert_eq!(attr.kind, fuser::FileType::Directory);
}

#[test]
fn removal_makes_the_next_lookup_authoritative() {
    let t = TestFs::new();
    t.seed_file("gone-soon", b"");
    let ino = t.lookup_root("gone-soon");

    t.fs.remove_file(ROOT_INODE, "gone-soon").unwrap();
    let err = t.fs.lookup_child(ROOT_INODE, "gone-soon").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);

    // Re-creating the name discovers a fresh node.
    t.seed_file("gone-soon", b"back");
    let fresh = t.lookup_root("gone-soon");
    assert_ne!(fresh, ino);
}
