// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Locates the external `ffmpeg` binary.
//!
//! Search order: system `PATH`, then `ffmpeg/bin/`, `ffmpeg/` and the
//! program directory itself. Each candidate must survive `ffmpeg -version`
//! within 5 seconds. The first hit is cached for the process lifetime.
//! A miss is not fatal: recording degrades to the frame-grab backend
//! (no audio).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Probe outcome, cached process-wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcoder {
    Present(PathBuf),
    Absent,
}

impl Transcoder {
    pub fn is_present(&self) -> bool {
        matches!(self, Transcoder::Present(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Transcoder::Present(p) => Some(p),
            Transcoder::Absent => None,
        }
    }
}

static PROBE: OnceLock<Transcoder> = OnceLock::new();

#[cfg(windows)]
const BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const BINARY: &str = "ffmpeg";

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Locate `ffmpeg`, probing once and returning the cached result afterwards.
pub async fn find_ffmpeg() -> Transcoder {
    if let Some(cached) = PROBE.get() {
        return cached.clone();
    }
    let result = probe().await;
    // Another task may have won the race; the stored value is authoritative.
    PROBE.get_or_init(|| result).clone()
}

async fn probe() -> Transcoder {
    for candidate in candidates() {
        if version_check(&candidate).await {
            info!(path = %candidate.display(), "FFmpeg found");
            return Transcoder::Present(candidate);
        }
    }

    warn!("FFmpeg not found - recording without audio (frame-grab backend)");
    info!("Hint: ffmpeg binaries may be placed next to the program:");
    info!("  - ffmpeg/bin/{BINARY}");
    info!("  - ffmpeg/{BINARY}");
    info!("  - {BINARY} (program directory)");
    Transcoder::Absent
}

/// PATH entries first, then the co-located directories.
fn candidates() -> Vec<PathBuf> {
    let mut list = Vec::new();

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(BINARY);
            if candidate.is_file() {
                list.push(candidate);
                break;
            }
        }
    }

    if let Some(program_dir) = program_dir() {
        list.push(program_dir.join("ffmpeg").join("bin").join(BINARY));
        list.push(program_dir.join("ffmpeg").join(BINARY));
        list.push(program_dir.join(BINARY));
    }

    list.retain(|p| p.is_file());
    list
}

fn program_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

async fn version_check(path: &Path) -> bool {
    let child = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Candidate not executable");
            return false;
        }
    };

    match tokio::time::timeout(VERSION_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "Version check failed");
            false
        }
        Err(_) => {
            debug!(path = %path.display(), "Version check timed out");
            let _ = child.start_kill();
            false
        }
    }
}
