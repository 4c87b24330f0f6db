// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-camera recording supervision.
//!
//! One session per registry index, owned by the session map. Concurrent
//! start attempts serialize through a per-index async gate; the loser
//! observes "Aufnahme läuft bereits". The only permitted nested locking is
//! start-gate → session-map, in that order, and no lock is held across an
//! await on process or pipeline teardown.

pub mod framegrab;
pub mod segment;
pub mod transcoder;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera::{Camera, CameraStream, StreamInfo};
use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::ffmpeg::{self, Transcoder};

/// How long a stopping worker may take before it is aborted. Covers the
/// transcoder's full q/terminate/kill ladder with margin.
const STOP_BUDGET: Duration = Duration::from_secs(20);

/// Thread-drain pause before a stopped session is evicted.
const STOP_DRAIN: Duration = Duration::from_millis(500);

/// How long the start probe waits for a first frame before falling back
/// to the clamped defaults.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Transcoder,
    FrameGrab,
}

/// Resolution plan for one session, derived from the probed stream.
#[derive(Debug, Clone, Copy)]
pub struct RecordOptions {
    pub fps: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub recording_width: u32,
    pub recording_height: u32,
}

impl RecordOptions {
    pub fn from_info(info: StreamInfo, half_resolution: bool) -> Self {
        let (recording_width, recording_height) = if half_resolution {
            ((info.width / 2).max(2), (info.height / 2).max(2))
        } else {
            (info.width, info.height)
        };
        RecordOptions {
            fps: info.fps,
            original_width: info.width,
            original_height: info.height,
            recording_width,
            recording_height,
        }
    }
}

struct SessionInfo {
    filename: Option<PathBuf>,
    started_at: DateTime<Local>,
    segment_started: Option<Instant>,
    backend: Backend,
}

/// State shared between a session's worker task and the manager.
pub struct SessionShared {
    state: Mutex<SessionState>,
    info: Mutex<SessionInfo>,
}

impl SessionShared {
    fn new(backend: Backend) -> Arc<Self> {
        Arc::new(SessionShared {
            state: Mutex::new(SessionState::Idle),
            info: Mutex::new(SessionInfo {
                filename: None,
                started_at: Local::now(),
                segment_started: None,
                backend,
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Compare-and-set transition; refuses to overwrite a concurrent
    /// state change (a stop request racing the worker's startup).
    pub fn transition_if(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Record the newly-opened segment file and reset the rotation clock.
    pub fn begin_segment(&self, path: PathBuf) {
        let mut info = self.info.lock();
        info.filename = Some(path);
        info.segment_started = Some(Instant::now());
    }

    /// Wall time since the current segment opened.
    pub fn segment_elapsed(&self) -> Duration {
        self.info
            .lock()
            .segment_started
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.info.lock().filename.clone()
    }

    fn backend(&self) -> Backend {
        self.info.lock().backend
    }

    fn started_at(&self) -> DateTime<Local> {
        self.info.lock().started_at
    }
}

struct Session {
    shared: Arc<SessionShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Wire shape of one entry in `/record/status`.
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_ffmpeg: Option<bool>,
}

impl SessionStatus {
    fn idle() -> Self {
        SessionStatus {
            recording: false,
            filename: None,
            start_time: None,
            use_ffmpeg: None,
        }
    }
}

/// Owner of all recording sessions, keyed by registry index.
pub struct RecordingManager {
    base_dir: PathBuf,
    config: ConfigStore,
    sessions: Mutex<HashMap<usize, Arc<Session>>>,
    start_gates: Mutex<HashMap<usize, Arc<tokio::sync::Mutex<()>>>>,
}

impl RecordingManager {
    pub fn new(base_dir: impl Into<PathBuf>, config: ConfigStore) -> Arc<Self> {
        Arc::new(RecordingManager {
            base_dir: base_dir.into(),
            config,
            sessions: Mutex::new(HashMap::new()),
            start_gates: Mutex::new(HashMap::new()),
        })
    }

    fn start_gate(&self, index: usize) -> Arc<tokio::sync::Mutex<()>> {
        self.start_gates
            .lock()
            .entry(index)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// True while the session is starting or running.
    pub fn is_active(&self, index: usize) -> bool {
        self.sessions
            .lock()
            .get(&index)
            .map(|s| {
                matches!(
                    s.shared.state(),
                    SessionState::Starting | SessionState::Running
                )
            })
            .unwrap_or(false)
    }

    /// Start a session for `index`. Returns the first segment path, or
    /// [`Error::AlreadyRecording`] when a session is active.
    pub async fn start(&self, index: usize, camera: Camera) -> Result<PathBuf> {
        let gate = self.start_gate(index);
        let _guard = gate.lock().await;

        if let Some(existing) = self.sessions.lock().get(&index).cloned() {
            match existing.shared.state() {
                SessionState::Starting | SessionState::Running => {
                    warn!(camera = index, "Recording already running");
                    return Err(Error::AlreadyRecording);
                }
                _ => {
                    // Stale remnant: free its resources and evict.
                    info!(camera = index, "Removing stale inactive session");
                    if let Some(handle) = existing.handle.lock().take() {
                        handle.abort();
                    }
                    self.sessions.lock().remove(&index);
                }
            }
        }

        // Open the main stream to learn fps and dimensions; missing values
        // are clamped downstream.
        let mut probe_stream = CameraStream::connect(&camera.main_stream_uri)
            .map_err(|_| Error::Stream("Konnte Stream nicht öffnen".into()))?;
        let first_frame = tokio::time::timeout(PROBE_TIMEOUT, probe_stream.read_frame())
            .await
            .ok()
            .flatten();
        let info = match &first_frame {
            Some(frame) => StreamInfo::from_frame(frame),
            None => StreamInfo {
                fps: 25,
                width: 1920,
                height: 1080,
            },
        };
        let opts = RecordOptions::from_info(info, self.config.half_resolution());
        if opts.recording_width != opts.original_width {
            info!(
                camera = index,
                "Recording at halved resolution: {}x{} (source {}x{})",
                opts.recording_width,
                opts.recording_height,
                opts.original_width,
                opts.original_height
            );
        }

        let transcoder = ffmpeg::find_ffmpeg().await;
        let backend = if transcoder.is_present() {
            Backend::Transcoder
        } else {
            Backend::FrameGrab
        };

        let first_path =
            segment::create_segment_path(&self.base_dir, &camera.host, camera.port, Local::now())?;

        let shared = SessionShared::new(backend);
        shared.set_state(SessionState::Starting);
        shared.begin_segment(first_path.clone());

        let handle = match (backend, transcoder) {
            (Backend::Transcoder, Transcoder::Present(ffmpeg_path)) => {
                drop(probe_stream);
                info!(camera = index, "Recording with FFmpeg (with audio)");
                tokio::spawn(transcoder::run(
                    shared.clone(),
                    camera.clone(),
                    opts,
                    ffmpeg_path,
                    first_path.clone(),
                    self.base_dir.clone(),
                ))
            }
            _ => {
                info!(camera = index, "Recording with frame-grab (no audio)");
                tokio::spawn(framegrab::run(
                    shared.clone(),
                    camera.clone(),
                    opts,
                    probe_stream,
                    first_path.clone(),
                    self.base_dir.clone(),
                ))
            }
        };

        let session = Arc::new(Session {
            shared,
            handle: Mutex::new(Some(handle)),
        });
        self.sessions.lock().insert(index, session);

        info!(
            camera = index,
            host = camera.host,
            file = %first_path.display(),
            "Recording started"
        );
        Ok(first_path)
    }

    /// Stop the session for `index`. The worker performs the graceful
    /// escalation ladder and finalizes the last segment before this
    /// returns; the entry is evicted afterwards.
    pub async fn stop(&self, index: usize) -> Result<PathBuf> {
        let session = self
            .sessions
            .lock()
            .get(&index)
            .cloned()
            .ok_or(Error::NotRecording)?;

        match session.shared.state() {
            SessionState::Starting | SessionState::Running => {}
            _ => return Err(Error::NotRecording),
        }

        session.shared.set_state(SessionState::Stopping);
        let filename = session.shared.filename().unwrap_or_default();

        let handle = session.handle.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_BUDGET, handle).await.is_err() {
                warn!(camera = index, "Recording worker did not drain, aborting");
                abort.abort();
            }
        }

        tokio::time::sleep(STOP_DRAIN).await;
        {
            // A racing start may have replaced the entry; only evict ours.
            let mut sessions = self.sessions.lock();
            if let Some(current) = sessions.get(&index) {
                if Arc::ptr_eq(current, &session) {
                    sessions.remove(&index);
                }
            }
        }

        info!(camera = index, file = %filename.display(), "Recording stopped");
        Ok(filename)
    }

    /// Stop every session; used on shutdown and before credential changes.
    pub async fn stop_all(&self) {
        let indices: Vec<usize> = self.sessions.lock().keys().copied().collect();
        for index in indices {
            if let Err(e) = self.stop(index).await {
                warn!(camera = index, error = %e, "Stop during shutdown failed");
            }
        }
    }

    /// After a completed scan: drop sessions whose index no longer exists,
    /// then start one for every camera without an active session.
    pub async fn auto_start_all(&self, cameras: &[Camera]) {
        let stale: Vec<usize> = self
            .sessions
            .lock()
            .keys()
            .copied()
            .filter(|&i| i >= cameras.len())
            .collect();
        for index in stale {
            info!(camera = index, "Camera gone after rescan, stopping session");
            let _ = self.stop(index).await;
        }

        for (index, camera) in cameras.iter().enumerate() {
            if self.is_active(index) {
                info!(
                    camera = index,
                    host = camera.host,
                    "Recording already running, skipping"
                );
                continue;
            }
            match self.start(index, camera.clone()).await {
                Ok(file) => {
                    info!(camera = index, file = %file.display(), "Auto-started recording");
                }
                Err(e) => {
                    warn!(camera = index, error = %e, "Could not auto-start recording");
                }
            }
        }
    }

    /// Status entry for one registry index.
    pub fn status(&self, index: usize) -> SessionStatus {
        let Some(session) = self.sessions.lock().get(&index).cloned() else {
            return SessionStatus::idle();
        };
        let shared = &session.shared;
        let recording = matches!(
            shared.state(),
            SessionState::Starting | SessionState::Running
        );
        if !recording {
            return SessionStatus::idle();
        }
        SessionStatus {
            recording: true,
            filename: shared
                .filename()
                .map(|p| p.to_string_lossy().replace('\\', "/")),
            start_time: Some(shared.started_at().format("%Y-%m-%dT%H:%M:%S").to_string()),
            use_ffmpeg: Some(shared.backend() == Backend::Transcoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_options_halve_resolution() {
        let info = StreamInfo {
            fps: 25,
            width: 2560,
            height: 1440,
        };
        let opts = RecordOptions::from_info(info, true);
        assert_eq!((opts.recording_width, opts.recording_height), (1280, 720));
        assert_eq!((opts.original_width, opts.original_height), (2560, 1440));
    }

    #[test]
    fn record_options_keep_full_resolution() {
        let info = StreamInfo {
            fps: 30,
            width: 1920,
            height: 1080,
        };
        let opts = RecordOptions::from_info(info, false);
        assert_eq!((opts.recording_width, opts.recording_height), (1920, 1080));
    }

    #[test]
    fn segment_clock_resets_on_begin() {
        let shared = SessionShared::new(Backend::FrameGrab);
        assert_eq!(shared.segment_elapsed(), Duration::ZERO);
        shared.begin_segment(PathBuf::from("a.mp4"));
        assert!(shared.segment_elapsed() < Duration::from_secs(1));
        assert_eq!(shared.filename(), Some(PathBuf::from("a.mp4")));
    }

    #[test]
    fn idle_status_serializes_minimal() {
        let status = SessionStatus::idle();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"recording": false}));
    }
}
