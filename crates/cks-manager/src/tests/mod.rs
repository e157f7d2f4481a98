use crate::{CksManager, CksManagerConfig, Error};
use std::fs;
use std::time::Duration;

fn manager(use_mmap: bool) -> CksManager {
    CksManager::new(CksManagerConfig { use_mmap })
}

fn write_object(dir: &std::path::Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn calc_and_get_round_trip_for_a_regular_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", &vec![0x42u8; 1024]);

    let mgr = manager(false);
    let record = mgr.calc(&path, "adler32", true).unwrap();
    assert_eq!(record.name, "adler32");
    assert_eq!(record.length(), 4);

    let fetched = mgr.get(&path, "adler32").unwrap();
    assert_eq!(fetched, record);
}

#[test]
fn get_on_a_bumped_mtime_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"hello world");

    let mgr = manager(false);
    mgr.calc(&path, "adler32", true).unwrap();

    // mtime has whole-second resolution on most filesystems; sleep past a
    // tick boundary before rewriting so the record is unambiguously stale.
    std::thread::sleep(Duration::from_millis(1100));
    fs::write(&path, b"hello world, mutated").unwrap();

    let err = mgr.get(&path, "adler32").unwrap_err();
    assert!(matches!(err, Error::Stale(..)));
}

#[test]
fn calc_on_a_directory_is_not_regular() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(false);
    let err = mgr.calc(dir.path(), "adler32", false).unwrap_err();
    assert!(matches!(err, Error::NotRegular(_)));
}

#[test]
fn calc_with_unsupported_algorithm_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"data");
    let mgr = manager(false);
    let err = mgr.calc(&path, "sha256", false).unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[test]
fn empty_name_uses_the_primary_algorithm() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"data");
    let mgr = manager(false);

    let explicit = mgr.calc(&path, "adler32", false).unwrap();
    let implicit = mgr.calc(&path, "", false).unwrap();
    assert_eq!(explicit.name, implicit.name);
}

#[test]
fn ver_recomputes_on_a_stale_or_missing_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"verify me");
    let mgr = manager(false);

    let expected = mgr.calc(&path, "adler32", false).unwrap();
    assert!(mgr.ver(&path, "adler32", &expected.value).unwrap());
    assert!(!mgr.ver(&path, "adler32", &[0, 0, 0, 0]).unwrap());
}

#[test]
fn set_rejects_a_mismatched_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"data");
    let mgr = manager(false);

    let err = mgr.set(&path, "adler32", vec![1, 2, 3], 0).unwrap_err();
    assert!(matches!(err, Error::LengthMismatch));
}

#[test]
fn del_then_list_reflects_removal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_object(dir.path(), "object", b"data");
    let mgr = manager(false);

    mgr.calc(&path, "adler32", true).unwrap();
    mgr.calc(&path, "crc32", true).unwrap();
    assert_eq!(mgr.list(Some(&path), ",").unwrap().split(',').count(), 2);

    mgr.del(&path, "adler32").unwrap();
    assert_eq!(mgr.list(Some(&path), ",").unwrap(), "crc32");
}

#[test]
fn list_without_a_path_lists_configured_algorithms() {
    let mgr = manager(false);
    let configured = mgr.list(None, ",").unwrap();
    assert!(configured.contains("adler32"));
    assert!(configured.contains("crc32"));
    assert!(configured.contains("md5"));
}

#[test]
fn mmap_and_buffered_paths_agree_on_small_and_large_objects() {
    let dir = tempfile::tempdir().unwrap();
    for size in [0usize, 1, 4096, 200_000] {
        let path = write_object(dir.path(), &format!("object-{size}"), &vec![0x7eu8; size]);

        let buffered = manager(false).calc(&path, "crc32", false).unwrap();
        let mapped = manager(true).calc(&path, "crc32", false).unwrap();
        assert_eq!(buffered.value, mapped.value, "mismatch at size {size}");
    }
}
