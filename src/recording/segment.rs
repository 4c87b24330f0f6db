//! Segment file placement: `aufnahmen/YYYY-MM-DD/HH-00_(HH+1)-00/` with
//! `HOST_PORT_YYYY-MM-DD_HH-MM-SS[_k].mp4` file names.
//!
//! The hour bucket comes from local time at segment creation; the upper
//! bound wraps modulo 24 so the last bucket of the day is `23-00_00-00`.
//! Same-second collisions get a monotonic `_k` suffix.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};

use crate::error::Result;

/// Root of the recording tree, relative to the working directory.
pub const RECORDINGS_DIR: &str = "aufnahmen";

/// Wall-time length of one segment.
pub const SEGMENT_DURATION: Duration = Duration::from_secs(600);

/// Size cap per segment for the frame-grab backend.
pub const FRAME_GRAB_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Files below this size after the transcoder exits are flagged as
/// likely corrupt (killed before the header flush).
pub const MIN_HEALTHY_BYTES: u64 = 1024;

/// Pure path computation for a segment starting at `now`.
pub fn segment_path(base: &Path, host: &str, port: u16, now: DateTime<Local>) -> PathBuf {
    let date = now.format("%Y-%m-%d").to_string();
    let hour = now.hour();
    let next_hour = (hour + 1) % 24;
    let bucket = format!("{hour:02}-00_{next_hour:02}-00");
    let timestamp = now.format("%Y-%m-%d_%H-%M-%S");
    base.join(date)
        .join(bucket)
        .join(format!("{host}_{port}_{timestamp}.mp4"))
}

/// Compute the segment path for `now`, create its directories, and resolve
/// same-second collisions with a `_k` suffix.
pub fn create_segment_path(
    base: &Path,
    host: &str,
    port: u16,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let mut path = segment_path(base, host, port, now);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut k = 0u32;
    while path.exists() {
        let stem = segment_path(base, host, port, now);
        let stem = stem.with_extension("");
        path = PathBuf::from(format!("{}_{k}.mp4", stem.display()));
        k += 1;
    }
    Ok(path)
}

/// Parse the `YYYY-MM-DD_HH-MM-SS` timestamp from the last two
/// underscore-delimited fields of a segment basename. `None` when the name
/// does not follow the naming scheme (retention falls back to mtime).
pub fn parse_filename_timestamp(filename: &str) -> Option<chrono::NaiveDateTime> {
    let stem = filename.strip_suffix(".mp4")?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    // A trailing collision counter shifts the date/time fields left.
    let (date_idx, time_idx) = if parts[parts.len() - 1].parse::<u32>().is_ok() {
        (parts.len().checked_sub(3)?, parts.len() - 2)
    } else {
        (parts.len() - 2, parts.len() - 1)
    };
    let candidate = format!("{}_{}", parts[date_idx], parts[time_idx]);
    chrono::NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%d_%H-%M-%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn path_uses_hour_bucket() {
        let p = segment_path(Path::new("aufnahmen"), "192.168.100.42", 888, at(14, 5, 9));
        assert_eq!(
            p,
            Path::new("aufnahmen/2026-03-14/14-00_15-00/192.168.100.42_888_2026-03-14_14-05-09.mp4")
        );
    }

    #[test]
    fn last_bucket_of_the_day_wraps() {
        let p = segment_path(Path::new("aufnahmen"), "192.168.100.7", 835, at(23, 59, 59));
        assert!(p.to_string_lossy().contains("23-00_00-00"));
    }

    #[test]
    fn collision_appends_monotonic_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let now = at(10, 0, 0);

        let first = create_segment_path(dir.path(), "192.168.100.42", 888, now).unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = create_segment_path(dir.path(), "192.168.100.42", 888, now).unwrap();
        std::fs::write(&second, b"x").unwrap();
        let third = create_segment_path(dir.path(), "192.168.100.42", 888, now).unwrap();

        assert!(first.to_string_lossy().ends_with("2026-03-14_10-00-00.mp4"));
        assert!(second.to_string_lossy().ends_with("2026-03-14_10-00-00_0.mp4"));
        assert!(third.to_string_lossy().ends_with("2026-03-14_10-00-00_1.mp4"));
    }

    #[test]
    fn filename_timestamp_roundtrip() {
        let ts = parse_filename_timestamp("192.168.100.42_888_2026-03-14_14-05-09.mp4").unwrap();
        assert_eq!(
            ts,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 14)
                .unwrap()
                .and_hms_opt(14, 5, 9)
                .unwrap()
        );
    }

    #[test]
    fn filename_timestamp_with_collision_suffix() {
        assert!(parse_filename_timestamp("192.168.100.42_888_2026-03-14_14-05-09_3.mp4").is_some());
    }

    #[test]
    fn malformed_names_yield_none() {
        assert!(parse_filename_timestamp("whatever.mp4").is_none());
        assert!(parse_filename_timestamp("a_b_c_d.mp4").is_none());
        assert!(parse_filename_timestamp("not-even-mp4.avi").is_none());
    }
}
