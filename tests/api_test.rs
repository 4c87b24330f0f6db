// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Control plane tests driven through the axum router: credential
//! masking, idempotent stop, path-escape rejection, recording listings.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::util::ServiceExt;

use kamerawacht::api::{build_router, AppState};
use kamerawacht::config::ConfigStore;
use kamerawacht::discovery::DiscoveryEngine;
use kamerawacht::preview::PreviewBroker;
use kamerawacht::recording::RecordingManager;

fn test_state(dir: &TempDir) -> Arc<AppState> {
    let config = ConfigStore::load(dir.path().join("config.json"));
    let recordings_dir = dir.path().join("aufnahmen");
    std::fs::create_dir_all(&recordings_dir).unwrap();
    Arc::new(AppState {
        config: config.clone(),
        discovery: DiscoveryEngine::new(),
        recorder: RecordingManager::new(recordings_dir.clone(), config),
        preview: PreviewBroker::new(),
        recordings_dir,
    })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn credentials_never_return_the_password() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["username"], "admin");
    assert_eq!(json["password"], "***");
    assert_eq!(json["half_resolution"], true);
}

#[tokio::test]
async fn credentials_missing_fields_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/credentials")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username":"nur-user"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Username und Password erforderlich");
}

#[tokio::test]
async fn credentials_empty_strings_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/credentials")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username":"  ","password":""}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Username und Password dürfen nicht leer sein");
}

#[tokio::test]
async fn stop_without_session_reports_keine_aktive_aufnahme() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/record/stop/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Keine aktive Aufnahme");
}

#[tokio::test]
async fn start_unknown_index_reports_kamera_nicht_gefunden() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/record/start/7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Kamera nicht gefunden");
}

#[tokio::test]
async fn empty_registry_yields_empty_collections() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/cameras")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["cameras"], serde_json::json!([]));

    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/record/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({}));
}

#[tokio::test]
async fn path_escape_yields_403() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/recordings/play/..%2F..%2Fetc%2Fpasswd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Ungültiger Pfad");
}

#[tokio::test]
async fn missing_recording_yields_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/recordings/play/2026-01-01/10-00_11-00/fehlt.mp4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Datei nicht gefunden");
}

#[tokio::test]
async fn play_streams_the_file_as_mp4() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let rel = "2026-03-14/14-00_15-00/192.168.100.42_888_2026-03-14_14-05-09.mp4";
    let path = state.recordings_dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"mp4-bytes-here").unwrap();

    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/recordings/play/{rel}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/mp4"
    );
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"mp4-bytes-here");
}

#[tokio::test]
async fn download_sets_attachment_disposition() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let rel = "2026-03-14/14-00_15-00/192.168.100.42_888_2026-03-14_14-05-09.mp4";
    let path = state.recordings_dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"x").unwrap();

    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/recordings/download/{rel}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("192.168.100.42_888_2026-03-14_14-05-09.mp4"));
}

#[tokio::test]
async fn recordings_are_grouped_by_date_and_hour_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    for rel in [
        "2026-03-13/09-00_10-00/192.168.100.42_888_2026-03-13_09-15-00.mp4",
        "2026-03-14/14-00_15-00/192.168.100.42_888_2026-03-14_14-05-09.mp4",
        "2026-03-14/15-00_16-00/192.168.100.7_835_2026-03-14_15-30-00.mp4",
    ] {
        let path = state.recordings_dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"data").unwrap();
    }

    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/recordings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    let recordings = json["recordings"].as_object().unwrap();
    let dates: Vec<&String> = recordings.keys().collect();
    assert_eq!(dates, ["2026-03-14", "2026-03-13"], "newest date first");

    let ranges: Vec<&String> = recordings["2026-03-14"].as_object().unwrap().keys().collect();
    assert_eq!(ranges, ["15-00_16-00", "14-00_15-00"], "newest hour first");

    let item = &recordings["2026-03-14"]["14-00_15-00"][0];
    assert_eq!(item["camera"], "192.168.100.42:888");
    assert_eq!(item["size"], 4);
    assert_eq!(
        item["filename"],
        "2026-03-14/14-00_15-00/192.168.100.42_888_2026-03-14_14-05-09.mp4"
    );
}
