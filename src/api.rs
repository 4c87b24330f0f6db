// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP control plane — runs alongside the recording supervisors.
//!
//! Endpoints:
//!   GET  /                                  → dashboard
//!   POST /scan                              → trigger discovery
//!   GET  /cameras                           → current registry (JSON)
//!   POST /record/start/{i}                  → start session
//!   POST /record/stop/{i}                   → stop session
//!   GET  /record/status                     → per-index session status
//!   GET  /api/credentials                   → settings (password masked)
//!   POST /api/credentials                   → update settings, rescan
//!   GET  /api/recordings                    → grouped recording listing
//!   GET  /api/recordings/play/{path}        → stream MP4
//!   GET  /api/recordings/download/{path}    → download MP4
//!   GET  /stream/{i}                        → MJPEG live preview

use std::convert::Infallible;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{ConfigStore, Settings};
use crate::discovery::DiscoveryEngine;
use crate::error::{Error, Result};
use crate::preview::PreviewBroker;
use crate::recording::RecordingManager;

/// Shared state passed to all handlers.
pub struct AppState {
    pub config: ConfigStore,
    pub discovery: Arc<DiscoveryEngine>,
    pub recorder: Arc<RecordingManager>,
    pub preview: Arc<PreviewBroker>,
    pub recordings_dir: PathBuf,
}

// ──────────────── request / response types ────────────────────────────────

#[derive(Deserialize)]
pub struct CredentialsRequest {
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    half_resolution: bool,
}

#[derive(serde::Serialize)]
struct RecordingItem {
    filename: String,
    size: u64,
    timestamp: u64,
    camera: String,
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/scan", post(handle_scan))
        .route("/cameras", get(handle_cameras))
        .route("/record/start/{index}", post(handle_record_start))
        .route("/record/stop/{index}", post(handle_record_stop))
        .route("/record/status", get(handle_record_status))
        .route(
            "/api/credentials",
            get(handle_get_credentials).post(handle_set_credentials),
        )
        .route("/api/recordings", get(handle_recordings))
        .route("/api/recordings/play/{*path}", get(handle_play))
        .route("/api/recordings/download/{*path}", get(handle_download))
        .route("/stream/{index}", get(handle_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve. Returns only on listener failure; the caller treats a
/// return as terminal.
pub async fn start_server(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::Io)?;
    info!("HTTP API listening on http://{addr}");

    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "HTTP server error");
        Error::Io(e)
    })
}

// ──────────────── scan & registry handlers ────────────────────────────────

async fn handle_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (username, password) = state.config.credentials();
    let outcome = state.discovery.scan(&username, &password).await;
    if outcome.fresh {
        state.recorder.auto_start_all(&outcome.cameras).await;
    }
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "success": true,
            "message": format!("{} Kamera(s) gefunden", outcome.cameras.len()),
            "cameras": outcome.cameras.len(),
        })),
    )
}

async fn handle_cameras(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "cameras": state.discovery.cameras() })),
    )
}

// ──────────────── recording handlers ──────────────────────────────────────

async fn handle_record_start(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let Some(camera) = state.discovery.camera(index) else {
        return (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "success": false,
                "message": Error::CameraNotFound.to_string(),
            })),
        );
    };

    match state.recorder.start(index, camera).await {
        Ok(file) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "success": true,
                "message": file.to_string_lossy().replace('\\', "/"),
            })),
        ),
        Err(e) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
            })),
        ),
    }
}

async fn handle_record_stop(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    match state.recorder.stop(index).await {
        Ok(file) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "success": true,
                "message": file.to_string_lossy().replace('\\', "/"),
            })),
        ),
        Err(e) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
            })),
        ),
    }
}

async fn handle_record_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = serde_json::Map::new();
    for index in 0..state.discovery.len() {
        let entry = state.recorder.status(index);
        status.insert(
            index.to_string(),
            serde_json::to_value(entry).unwrap_or_default(),
        );
    }
    (StatusCode::OK, axum::Json(serde_json::Value::Object(status)))
}

// ──────────────── credentials handlers ────────────────────────────────────

async fn handle_get_credentials(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.config.snapshot();
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "username": settings.username,
            // Never return the real password.
            "password": "***",
            "half_resolution": settings.half_resolution,
        })),
    )
}

async fn handle_set_credentials(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CredentialsRequest>,
) -> impl IntoResponse {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "success": false,
                "message": "Username und Password erforderlich",
            })),
        );
    };
    let username = username.trim().to_string();
    let password = password.trim().to_string();
    if username.is_empty() || password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "success": false,
                "message": "Username und Password dürfen nicht leer sein",
            })),
        );
    }

    info!("Stopping all recordings before credential change");
    state.recorder.stop_all().await;

    let settings = Settings {
        username,
        password,
        half_resolution: body.half_resolution,
    };
    if let Err(e) = state.config.update(settings.clone()) {
        warn!(error = %e, "Could not persist configuration, changes are session-only");
    }

    info!(username = settings.username, "Credentials updated, rescanning");
    let outcome = state
        .discovery
        .scan(&settings.username, &settings.password)
        .await;
    if outcome.fresh {
        state.recorder.auto_start_all(&outcome.cameras).await;
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "success": true,
            "message": format!(
                "Login-Daten aktualisiert. {} Kamera(s) mit neuen Credentials gefunden.",
                outcome.cameras.len()
            ),
        })),
    )
}

// ──────────────── recordings handlers ─────────────────────────────────────

async fn handle_recordings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let grouped = collect_recordings(&state.recordings_dir);
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "success": true,
            "recordings": serde_json::Value::Object(grouped),
        })),
    )
}

/// Walk the recording tree and group files `{date → {hour_range → [items]}}`,
/// newest first on every level.
fn collect_recordings(base: &FsPath) -> serde_json::Map<String, serde_json::Value> {
    use std::collections::BTreeMap;

    let mut by_date: BTreeMap<String, BTreeMap<String, Vec<RecordingItem>>> = BTreeMap::new();

    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".mp4") {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(base) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let parts: Vec<&str> = rel.split('/').collect();
        let (date, hour_range) = if parts.len() >= 3 {
            (parts[0].to_string(), parts[1].to_string())
        } else {
            ("Unbekannt".to_string(), "Unbekannt".to_string())
        };

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                error!(file = %entry.path().display(), error = %e, "Could not stat recording");
                continue;
            }
        };
        let timestamp = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let stem_parts: Vec<&str> = name.trim_end_matches(".mp4").split('_').collect();
        let camera = if stem_parts.len() >= 2 {
            format!("{}:{}", stem_parts[0], stem_parts[1])
        } else {
            "Unbekannt".to_string()
        };

        by_date.entry(date).or_default().entry(hour_range).or_default().push(
            RecordingItem {
                filename: rel,
                size: meta.len(),
                timestamp,
                camera,
            },
        );
    }

    // Newest first: reverse date order, reverse hour order, items by mtime.
    let mut grouped = serde_json::Map::new();
    for (date, ranges) in by_date.into_iter().rev() {
        let mut range_map = serde_json::Map::new();
        for (range, mut items) in ranges.into_iter().rev() {
            items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            range_map.insert(range, serde_json::to_value(items).unwrap_or_default());
        }
        grouped.insert(date, serde_json::Value::Object(range_map));
    }
    grouped
}

async fn handle_play(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    serve_recording(&state, &path, false).await
}

async fn handle_download(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    serve_recording(&state, &path, true).await
}

/// Resolve `rel` strictly inside the recordings directory. Any component
/// that could escape the prefix (absolute, `..`) is rejected.
pub fn resolve_recording_path(base: &FsPath, rel: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in FsPath::new(rel).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(base.join(clean))
}

async fn serve_recording(state: &AppState, rel: &str, as_attachment: bool) -> Response {
    let Some(path) = resolve_recording_path(&state.recordings_dir, rel) else {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(serde_json::json!({ "error": "Ungültiger Pfad" })),
        )
            .into_response();
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                axum::Json(serde_json::json!({ "error": "Datei nicht gefunden" })),
            )
                .into_response();
        }
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    let stream = async_stream::stream! {
        let mut file = file;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4");
    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if as_attachment {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "aufnahme.mp4".into());
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{basename}\""),
        );
    }
    builder.body(Body::from_stream(stream)).unwrap()
}

// ──────────────── live preview handler ────────────────────────────────────

async fn handle_stream(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Response {
    let Some(camera) = state.discovery.camera(index) else {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": Error::CameraNotFound.to_string() })),
        )
            .into_response();
    };

    let rx = match state.preview.subscribe(index, &camera) {
        Ok(rx) => rx,
        Err(e) => {
            error!(camera = index, error = %e, "Could not open preview stream");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(jpeg) => {
                    let mut part = Vec::with_capacity(jpeg.len() + 64);
                    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                    part.extend_from_slice(&jpeg);
                    part.extend_from_slice(b"\r\n");
                    yield Ok::<Bytes, Infallible>(Bytes::from(part));
                    // Loose ~30 fps pacing.
                    tokio::time::sleep(Duration::from_millis(33)).await;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .body(Body::from_stream(stream))
        .unwrap()
}

// ──────────────── dashboard ───────────────────────────────────────────────

async fn handle_index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="de">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Kamerawacht</title>
<style>
  * { margin:0; padding:0; box-sizing:border-box; }
  body { font-family:system-ui,sans-serif; background:#1a1a1a; color:#fff; padding:20px; }
  h1 { text-align:center; color:#4CAF50; margin-bottom:10px; }
  .controls { text-align:center; margin:20px 0; }
  .btn { background:#4CAF50; color:#fff; border:none; padding:10px 24px;
         border-radius:5px; cursor:pointer; margin:0 8px; font-size:15px; }
  .btn:hover { background:#45a049; }
  .btn-record { background:#f44336; }
  .btn-record.recording { background:#4CAF50; }
  #status { text-align:center; margin:12px 0; color:#aaa; }
  .grid { display:grid; grid-template-columns:repeat(auto-fit,minmax(320px,1fr));
          gap:15px; max-width:1800px; margin:0 auto; }
  .card { background:#2a2a2a; border-radius:10px; overflow:hidden; }
  .card header { background:#333; padding:12px; border-bottom:2px solid #4CAF50; }
  .card header h3 { color:#4CAF50; font-size:1.1em; }
  .card header p { color:#aaa; font-size:.85em; }
  .card img { width:100%; background:#000; display:block; aspect-ratio:16/9; object-fit:contain; }
  .mode { font-size:.8em; color:#aaa; margin-left:8px; }
  dialog { background:#2a2a2a; color:#fff; border:2px solid #4CAF50; border-radius:10px;
           padding:24px; max-width:480px; width:90%; }
  dialog::backdrop { background:rgba(0,0,0,.7); }
  label { display:block; margin:12px 0 4px; }
  input[type=text],input[type=password] { width:100%; padding:10px; background:#1a1a1a;
           color:#fff; border:1px solid #555; border-radius:5px; }
  pre#recordings { background:#222; padding:12px; border-radius:8px; margin-top:16px;
           max-height:50vh; overflow:auto; display:none; }
</style>
</head>
<body>
<h1>📹 Kamerawacht</h1>
<div class="controls">
  <button class="btn" onclick="scan()">🔍 Kameras scannen</button>
  <button class="btn" onclick="loadRecordings()">📁 Aufnahmen anzeigen</button>
  <button class="btn" onclick="dlg.showModal()">⚙️ Einstellungen</button>
</div>
<div id="status">Lade…</div>
<div class="grid" id="grid"></div>
<pre id="recordings"></pre>
<dialog id="dlg">
  <h3>Kamera-Login</h3>
  <form method="dialog" onsubmit="saveSettings(event)">
    <label>Benutzername</label><input type="text" id="username" required>
    <label>Passwort</label><input type="password" id="password" required>
    <label><input type="checkbox" id="halfres"> Auflösung für Aufnahmen halbieren</label>
    <div style="margin-top:16px;text-align:right">
      <button class="btn" type="button" onclick="dlg.close()">Abbrechen</button>
      <button class="btn" type="submit">Speichern &amp; Neu verbinden</button>
    </div>
  </form>
</dialog>
<script>
const dlg = document.getElementById('dlg');

async function refresh() {
  const data = await fetch('/cameras').then(r => r.json());
  const cams = data.cameras || [];
  document.getElementById('status').textContent =
    cams.length ? cams.length + ' Kamera(s) gefunden' : 'Keine Kameras gefunden';
  const grid = document.getElementById('grid');
  grid.innerHTML = cams.map((c, i) => `
    <div class="card">
      <header>
        <h3>${c.name}</h3>
        <p>${c.host}:${c.port}</p>
        <button class="btn btn-record" id="rec-${i}" onclick="toggle(${i})">⏺ Aufnahme starten</button>
        <span class="mode" id="mode-${i}"></span>
      </header>
      <img src="/stream/${i}" alt="Stream ${i}">
    </div>`).join('');
}

async function scan() {
  document.getElementById('status').textContent = 'Suche nach Kameras…';
  const data = await fetch('/scan', {method: 'POST'}).then(r => r.json());
  document.getElementById('status').textContent = data.message;
  refresh();
}

async function toggle(i) {
  const btn = document.getElementById('rec-' + i);
  const path = btn.classList.contains('recording') ? 'stop' : 'start';
  const data = await fetch(`/record/${path}/${i}`, {method: 'POST'}).then(r => r.json());
  if (!data.success) alert('Fehler: ' + data.message);
}

setInterval(async () => {
  const status = await fetch('/record/status').then(r => r.json()).catch(() => ({}));
  for (const i in status) {
    const btn = document.getElementById('rec-' + i);
    const mode = document.getElementById('mode-' + i);
    if (!btn) continue;
    if (status[i].recording) {
      btn.classList.add('recording');
      btn.textContent = '⏹ Aufnahme stoppen';
      mode.textContent = status[i].use_ffmpeg ? '🎤 FFmpeg (mit Audio)' : '📹 ohne Audio';
    } else {
      btn.classList.remove('recording');
      btn.textContent = '⏺ Aufnahme starten';
      mode.textContent = '';
    }
  }
}, 1000);

async function saveSettings(ev) {
  ev.preventDefault();
  const body = {
    username: document.getElementById('username').value,
    password: document.getElementById('password').value,
    half_resolution: document.getElementById('halfres').checked,
  };
  const data = await fetch('/api/credentials', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body),
  }).then(r => r.json());
  alert(data.message);
  dlg.close();
  refresh();
}

async function loadRecordings() {
  const el = document.getElementById('recordings');
  const data = await fetch('/api/recordings').then(r => r.json());
  el.style.display = 'block';
  el.textContent = JSON.stringify(data.recordings, null, 2);
}

fetch('/api/credentials').then(r => r.json()).then(d => {
  document.getElementById('username').value = d.username || 'admin';
  document.getElementById('halfres').checked = !!d.half_resolution;
});
refresh();
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_rejected() {
        let base = FsPath::new("aufnahmen");
        assert!(resolve_recording_path(base, "../etc/passwd").is_none());
        assert!(resolve_recording_path(base, "a/../../etc/passwd").is_none());
        assert!(resolve_recording_path(base, "/etc/passwd").is_none());
        assert!(resolve_recording_path(base, "").is_none());
    }

    #[test]
    fn normal_relative_paths_resolve_under_base() {
        let base = FsPath::new("aufnahmen");
        let p = resolve_recording_path(base, "2026-03-14/14-00_15-00/cam.mp4").unwrap();
        assert!(p.starts_with(base));
        assert!(p.ends_with("cam.mp4"));
    }
}
