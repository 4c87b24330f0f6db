// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention sweeper tests: age from filename, mtime fallback, empty-dir
//! pruning.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use kamerawacht::retention::{sweep, MAX_AGE_HOURS};
use tempfile::TempDir;

fn tmp_dir() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn place(base: &Path, rel: &str) -> PathBuf {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"fake-mp4-data").unwrap();
    path
}

#[test]
fn ancient_file_is_deleted_with_its_directories() {
    let dir = tmp_dir();
    let file = place(
        dir.path(),
        "2020-01-01/00-00_01-00/192.168.100.42_888_2020-01-01_00-00-00.mp4",
    );

    let stats = sweep(dir.path(), MAX_AGE_HOURS, Local::now());

    assert_eq!(stats.deleted, 1);
    assert!(!file.exists());
    // Hour and date directories were emptied and removed; the base stays.
    assert!(!dir.path().join("2020-01-01/00-00_01-00").exists());
    assert!(!dir.path().join("2020-01-01").exists());
    assert!(dir.path().exists());
}

#[test]
fn young_file_is_kept() {
    let dir = tmp_dir();
    let now = Local::now();
    let name = format!(
        "192.168.100.42_888_{}.mp4",
        now.format("%Y-%m-%d_%H-%M-%S")
    );
    let file = place(dir.path(), &format!("d/h/{name}"));

    let stats = sweep(dir.path(), MAX_AGE_HOURS, now);

    assert_eq!(stats.deleted, 0);
    assert!(file.exists());
}

#[test]
fn file_exactly_at_the_window_is_kept() {
    let dir = tmp_dir();
    let now = Local.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
    // Exactly 24 h old: age == window, not older.
    let file = place(
        dir.path(),
        "d/h/192.168.100.42_888_2026-03-14_12-00-00.mp4",
    );

    let stats = sweep(dir.path(), MAX_AGE_HOURS, now);
    assert_eq!(stats.deleted, 0);
    assert!(file.exists());

    // One second past the window → deleted.
    let older = place(
        dir.path(),
        "d/h/192.168.100.42_888_2026-03-14_11-59-59.mp4",
    );
    let stats = sweep(dir.path(), MAX_AGE_HOURS, now);
    assert_eq!(stats.deleted, 1);
    assert!(!older.exists());
    assert!(file.exists());
}

#[test]
fn unparseable_name_falls_back_to_mtime() {
    let dir = tmp_dir();
    // Freshly written file: mtime is now, so it survives even though the
    // name carries no timestamp.
    let file = place(dir.path(), "d/h/unbenannt.mp4");

    let stats = sweep(dir.path(), MAX_AGE_HOURS, Local::now());
    assert_eq!(stats.deleted, 0);
    assert!(file.exists());
}

#[test]
fn filename_timestamp_wins_over_fresh_mtime() {
    let dir = tmp_dir();
    // Written just now (fresh mtime) but named years in the past: the
    // filename timestamp is authoritative.
    let file = place(
        dir.path(),
        "2020-01-01/00-00_01-00/192.168.100.42_888_2020-01-01_00-00-00.mp4",
    );

    sweep(dir.path(), MAX_AGE_HOURS, Local::now());
    assert!(!file.exists());
}

#[test]
fn non_mp4_files_are_untouched() {
    let dir = tmp_dir();
    let path = dir.path().join("2020-01-01/notes.txt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"keep me").unwrap();

    let stats = sweep(dir.path(), MAX_AGE_HOURS, Local::now());
    assert_eq!(stats.deleted, 0);
    assert!(path.exists());
    // Its directory is not empty, so it stays too.
    assert!(dir.path().join("2020-01-01").exists());
}

#[test]
fn missing_base_directory_is_a_noop() {
    let dir = tmp_dir();
    let stats = sweep(&dir.path().join("nope"), MAX_AGE_HOURS, Local::now());
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.bytes, 0);
}

#[test]
fn bytes_accounting_matches_deleted_files() {
    let dir = tmp_dir();
    place(
        dir.path(),
        "a/b/192.168.100.1_888_2020-01-01_00-00-00.mp4",
    );
    place(
        dir.path(),
        "a/b/192.168.100.2_888_2020-01-01_00-00-00.mp4",
    );

    let stats = sweep(dir.path(), MAX_AGE_HOURS, Local::now());
    assert_eq!(stats.deleted, 2);
    assert_eq!(stats.bytes, 2 * b"fake-mp4-data".len() as u64);
}
