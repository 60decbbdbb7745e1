//! Create, open, read, write and release semantics.

mod common;

use common::TestFs;
use sshmount_fuse::ROOT_INODE;

#[test]
fn create_write_close_read_back() {
    let t = TestFs::new();

    let (ino, attr, fh) = t
        .fs
        .create_file(ROOT_INODE, "hello", libc::O_WRONLY | libc::O_CREAT, 0o644)
        .unwrap();
    assert_eq!(attr.kind, fuser::FileType::RegularFile);

    assert_eq!(t.fs.write_node(ino, fh, 0, b"abc").unwrap(), 3);
    t.fs.release_handle(fh).unwrap();

    let fh = t.fs.open_node(ino, libc::O_RDONLY).unwrap();
    let data = t.fs.read_node(ino, fh, 0, 16).unwrap();
    assert_eq!(data, b"abc");
    t.fs.release_handle(fh).unwrap();

    assert_eq!(t.client.contents(t.remote("hello")).unwrap(), b"abc");
}

#[test]
fn create_then_lookup_yields_the_same_node_with_no_re_stat() {
    let t = TestFs::new();

    let (ino, _, fh) = t
        .fs
        .create_file(ROOT_INODE, "f", libc::O_WRONLY | libc::O_CREAT, 0o644)
        .unwrap();
    t.fs.release_handle(fh).unwrap();
    t.client.clear_calls();

    assert_eq!(t.lookup_root("f"), ino);
    assert!(t.client.calls().is_empty(), "no re-stat expected");
}

#[test]
fn create_over_existing_child_reuses_the_node() {
    let t = TestFs::new();
    t.seed_file("f", b"already here");
    let ino = t.lookup_root("f");

    let (created_ino, attr, fh) = t
        .fs
        .create_file(ROOT_INODE, "f", libc::O_RDWR, 0o644)
        .unwrap();
    assert_eq!(created_ino, ino);
    assert_eq!(attr.size, 12);

    let data = t.fs.read_node(ino, fh, 0, 64).unwrap();
    assert_eq!(data, b"already here");
    t.fs.release_handle(fh).unwrap();
}

#[test]
fn create_issues_create_chmod_stat_in_order() {
    let t = TestFs::new();

    let (_, _, fh) = t
        .fs
        .create_file(ROOT_INODE, "ordered", libc::O_WRONLY, 0o600)
        .unwrap();
    t.fs.release_handle(fh).unwrap();

    let calls = t.client.calls();
    let create = calls.iter().position(|c| c.starts_with("create")).unwrap();
    let chmod = calls.iter().position(|c| c.starts_with("chmod")).unwrap();
    let stat = calls.iter().position(|c| c.starts_with("stat")).unwrap();
    assert!(create < chmod && chmod < stat);
}

#[test]
fn create_failure_surfaces_and_installs_no_child() {
    let t = TestFs::new();
    // Remote has a directory with this name; create must fail.
    t.seed_dir("blocked");

    let err = t
        .fs
        .create_file(ROOT_INODE, "blocked", libc::O_WRONLY, 0o644)
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::EISDIR);

    // Lookup discovers the directory, proving no file child was installed.
    let (_, attr) = t.fs.lookup_child(ROOT_INODE, "blocked").unwrap();
    assert_eq!(attr.kind, fuser::FileType::Directory);
}

#[test]
fn open_directory_is_rejected() {
    let t = TestFs::new();
    t.seed_dir("d");
    let ino = t.lookup_root("d");

    let err = t.fs.open_node(ino, libc::O_RDONLY).unwrap_err();
    assert_eq!(err.to_errno(), libc::EISDIR);
}

#[test]
fn read_past_eof_returns_no_bytes() {
    let t = TestFs::new();
    t.seed_file("small", b"xyz");
    let ino = t.lookup_root("small");
    let fh = t.fs.open_node(ino, libc::O_RDONLY).unwrap();

    let data = t.fs.read_node(ino, fh, 1000, 64).unwrap();
    assert!(data.is_empty());
    t.fs.release_handle(fh).unwrap();
}

#[test]
fn short_reads_are_propagated_faithfully() {
    let t = TestFs::new();
    t.seed_file("f", b"abcdef");
    t.client.set_read_cap(2);
    let ino = t.lookup_root("f");
    let fh = t.fs.open_node(ino, libc::O_RDONLY).unwrap();

    let data = t.fs.read_node(ino, fh, 0, 6).unwrap();
    assert_eq!(data, b"ab");
    t.fs.release_handle(fh).unwrap();
}

#[test]
fn read_without_a_known_handle_opens_ad_hoc_and_closes() {
    let t = TestFs::new();
    t.seed_file("f", b"fallback data");
    let ino = t.lookup_root("f");
    t.client.clear_calls();

    // Handle id 9999 was never issued.
    let data = t.fs.read_node(ino, 9999, 0, 64).unwrap();
    assert_eq!(data, b"fallback data");

    let calls = t.client.calls();
    assert!(calls.iter().any(|c| c.starts_with("open")));
    assert!(calls.iter().any(|c| c.starts_with("close")));
}

#[test]
fn write_without_a_known_handle_opens_ad_hoc_and_closes() {
    let t = TestFs::new();
    t.seed_file("f", b"old!");
    let ino = t.lookup_root("f");
    t.client.clear_calls();

    assert_eq!(t.fs.write_node(ino, 9999, 0, b"new!").unwrap(), 4);
    assert_eq!(t.client.contents(t.remote("f")).unwrap(), b"new!");

    let calls = t.client.calls();
    assert!(calls.iter().any(|c| c.starts_with("open")));
    assert!(calls.iter().any(|c| c.starts_with("close")));
}

#[test]
fn every_write_reaches_the_remote_immediately() {
    let t = TestFs::new();
    let (ino, _, fh) = t
        .fs
        .create_file(ROOT_INODE, "log", libc::O_WRONLY, 0o644)
        .unwrap();

    t.fs.write_node(ino, fh, 0, b"one").unwrap();
    // No flush, no release: the remote already has the bytes.
    assert_eq!(t.client.contents(t.remote("log")).unwrap(), b"one");

    t.fs.write_node(ino, fh, 3, b"two").unwrap();
    assert_eq!(t.client.contents(t.remote("log")).unwrap(), b"onetwo");
    t.fs.release_handle(fh).unwrap();
}

#[test]
fn release_closes_the_remote_handle() {
    let t = TestFs::new();
    t.seed_file("f", b"");
    let ino = t.lookup_root("f");
    let fh = t.fs.open_node(ino, libc::O_RDONLY).unwrap();
    t.client.clear_calls();

    t.fs.release_handle(fh).unwrap();
    assert!(t.client.calls().iter().any(|c| c.starts_with("close")));

    // A second release of the same handle is a quiet no-op.
    t.fs.release_handle(fh).unwrap();
}

#[test]
fn positional_writes_do_not_disturb_other_regions() {
    let t = TestFs::new();
    t.seed_file("f", b"aaaaaaaa");
    let ino = t.lookup_root("f");
    let fh = t.fs.open_node(ino, libc::O_RDWR).unwrap();

    t.fs.write_node(ino, fh, 3, b"XY").unwrap();
    let data = t.fs.read_node(ino, fh, 0, 8).unwrap();
    assert_eq!(data, b"aaaXYaaa");
    t.fs.release_handle(fh).unwrap();
}
