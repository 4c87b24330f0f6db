// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention sweeper: deletes recordings older than the rolling window
//! and prunes emptied directories.
//!
//! A file's age comes from the `YYYY-MM-DD_HH-MM-SS` timestamp in its
//! name when parseable, else from its modification time. Individual
//! failures are logged and skipped; a sweep never aborts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::recording::segment::parse_filename_timestamp;

/// Sweep cadence for the background worker.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Rolling retention window.
pub const MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub deleted: usize,
    pub bytes: u64,
}

/// One full pass: delete `.mp4` files older than `max_age_hours`, then
/// remove directories the pass emptied, bottom-up.
pub fn sweep(base: &Path, max_age_hours: i64, now: DateTime<Local>) -> SweepStats {
    let mut stats = SweepStats::default();
    if !base.exists() {
        return stats;
    }

    let max_age = chrono::Duration::hours(max_age_hours);

    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".mp4") {
            continue;
        }

        let Some(age) = file_age(entry.path(), &name, now) else {
            continue;
        };
        if age <= max_age {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(
                    file = %entry.path().display(),
                    age_hours = age.num_hours(),
                    "Deleted expired recording"
                );
                stats.deleted += 1;
                stats.bytes += size;
            }
            Err(e) => {
                error!(file = %entry.path().display(), error = %e, "Could not delete recording");
            }
        }
    }

    remove_empty_dirs(base);

    if stats.deleted > 0 {
        info!(
            deleted = stats.deleted,
            mb = format!("{:.1}", stats.bytes as f64 / (1024.0 * 1024.0)),
            max_age_hours,
            "Retention pass complete"
        );
    }
    stats
}

fn file_age(path: &Path, name: &str, now: DateTime<Local>) -> Option<chrono::Duration> {
    if let Some(ts) = parse_filename_timestamp(name) {
        return Some(now.naive_local().signed_duration_since(ts));
    }
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(now.signed_duration_since(DateTime::<Local>::from(modified)))
}

/// Bottom-up removal of directories left empty by the sweep. The base
/// directory itself stays.
fn remove_empty_dirs(base: &Path) {
    for entry in WalkDir::new(base)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() || entry.path() == base {
            continue;
        }
        let is_empty = std::fs::read_dir(entry.path())
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if std::fs::remove_dir(entry.path()).is_ok() {
                debug!(dir = %entry.path().display(), "Removed empty directory");
            }
        }
    }
}

/// Background worker: one pass every hour, forever. The startup one-shot
/// pass is the caller's job.
pub async fn run(base: PathBuf) {
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        sweep(&base, MAX_AGE_HOURS, Local::now());
    }
}
