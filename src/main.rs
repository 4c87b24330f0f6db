// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Kamerawacht — ONVIF surveillance controller
//!
//! Usage:
//!   kamerawacht                 # serve on 0.0.0.0:8080
//!   kamerawacht serve --port 8080
//!   kamerawacht scan            # one-shot subnet probe, print cameras
//!   kamerawacht sweep           # one-shot retention pass

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kamerawacht::api;
use kamerawacht::config::ConfigStore;
use kamerawacht::discovery::DiscoveryEngine;
use kamerawacht::ffmpeg;
use kamerawacht::preview::PreviewBroker;
use kamerawacht::recording::segment::RECORDINGS_DIR;
use kamerawacht::recording::RecordingManager;
use kamerawacht::retention;

#[derive(Parser)]
#[command(name = "kamerawacht", about = "ONVIF surveillance controller", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run discovery, recording, retention and the HTTP dashboard.
    Serve {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Probe the subnet once and print the discovered cameras.
    Scan {
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Run one retention pass and exit.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve {
        config: PathBuf::from("config.json"),
        port: 8080,
    }) {
        Command::Serve { config, port } => run_serve(config, port).await,
        Command::Scan { config } => {
            run_scan(config).await;
            Ok(())
        }
        Command::Sweep => {
            run_sweep();
            Ok(())
        }
    }
}

async fn run_serve(config_path: PathBuf, port: u16) -> anyhow::Result<()> {
    // Handlers are registered before anything else starts; a signal during
    // startup is buffered and honored as soon as the main select runs.
    let shutdown = register_shutdown();

    std::fs::create_dir_all(RECORDINGS_DIR)
        .context("Cannot create recordings directory")?;

    let config = ConfigStore::load(config_path);
    let discovery = DiscoveryEngine::new();
    let recorder = RecordingManager::new(RECORDINGS_DIR, config.clone());
    let preview = PreviewBroker::new();

    // Probe the transcoder early so the first recording doesn't pay for it.
    let transcoder = ffmpeg::find_ffmpeg().await;
    info!(
        with_audio = transcoder.is_present(),
        "Recording backend: {}",
        if transcoder.is_present() {
            "FFmpeg (with audio)"
        } else {
            "frame-grab (no audio)"
        }
    );

    // Retention: background worker plus one pass right away.
    tokio::spawn(retention::run(PathBuf::from(RECORDINGS_DIR)));
    let stats = retention::sweep(
        Path::new(RECORDINGS_DIR),
        retention::MAX_AGE_HOURS,
        Local::now(),
    );
    if stats.deleted > 0 {
        info!(
            deleted = stats.deleted,
            mb = format!("{:.1}", stats.bytes as f64 / (1024.0 * 1024.0)),
            "Startup cleanup removed old recordings"
        );
    }

    // Initial discovery auto-starts a session per camera.
    let (username, password) = config.credentials();
    let outcome = discovery.scan(&username, &password).await;
    recorder.auto_start_all(&outcome.cameras).await;

    let state = Arc::new(api::AppState {
        config,
        discovery,
        recorder: recorder.clone(),
        preview: preview.clone(),
        recordings_dir: PathBuf::from(RECORDINGS_DIR),
    });

    let dashboard_url = format!("http://localhost:{port}");
    tokio::spawn(async move {
        // Give the listener a moment before pointing a browser at it.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        open_browser(&dashboard_url);
    });

    let addr = format!("0.0.0.0:{port}");
    // A listener failure falls through to the same ordered cleanup as a
    // signal, so live sessions still finalize their last segments.
    let server_result = tokio::select! {
        result = api::start_server(state, &addr) => {
            if let Err(e) = &result {
                error!(error = %e, "HTTP listener failed");
            }
            Some(result)
        }
        _ = shutdown => {
            info!("Shutdown signal received");
            None
        }
    };

    info!("Closing all recordings so files remain playable…");
    recorder.stop_all().await;
    preview.shutdown();
    info!("Shutdown complete");

    match server_result {
        None => Ok(()),
        Some(Err(e)) => Err(anyhow::Error::new(e).context("HTTP listener failed")),
        Some(Ok(())) => anyhow::bail!("HTTP listener stopped unexpectedly"),
    }
}

async fn run_scan(config_path: PathBuf) {
    let config = ConfigStore::load(config_path);
    let (username, password) = config.credentials();
    let discovery = DiscoveryEngine::new();
    let outcome = discovery.scan(&username, &password).await;

    if outcome.cameras.is_empty() {
        println!("Keine Kameras gefunden");
        return;
    }
    println!("{} Kamera(s) gefunden:", outcome.cameras.len());
    for (index, camera) in outcome.cameras.iter().enumerate() {
        println!("  [{index}] {}:{} — {}", camera.host, camera.port, camera.name);
    }
}

fn run_sweep() {
    let stats = retention::sweep(
        Path::new(RECORDINGS_DIR),
        retention::MAX_AGE_HOURS,
        Local::now(),
    );
    println!(
        "{} Datei(en) gelöscht ({:.1} MB)",
        stats.deleted,
        stats.bytes as f64 / (1024.0 * 1024.0)
    );
}

/// Register shutdown handlers eagerly and return the future that resolves
/// on the first of them: interrupt everywhere, terminate on unix, break on
/// Windows where available.
fn register_shutdown() -> impl std::future::Future<Output = ()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let interrupt = signal(SignalKind::interrupt());
        let terminate = signal(SignalKind::terminate());
        if interrupt.is_err() || terminate.is_err() {
            warn!("Could not install all signal handlers");
        }
        return async move {
            match (interrupt, terminate) {
                (Ok(mut interrupt), Ok(mut terminate)) => {
                    tokio::select! {
                        _ = interrupt.recv() => {}
                        _ = terminate.recv() => {}
                    }
                }
                (Ok(mut interrupt), Err(_)) => {
                    interrupt.recv().await;
                }
                _ => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
    }

    #[cfg(windows)]
    {
        use tokio::signal::windows;
        let interrupt = windows::ctrl_c();
        let ctrl_break = windows::ctrl_break();
        return async move {
            match (interrupt, ctrl_break) {
                (Ok(mut interrupt), Ok(mut ctrl_break)) => {
                    tokio::select! {
                        _ = interrupt.recv() => {}
                        _ = ctrl_break.recv() => {}
                    }
                }
                (Ok(mut interrupt), Err(_)) => {
                    interrupt.recv().await;
                }
                _ => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
    }

    #[cfg(not(any(unix, windows)))]
    {
        return async {
            let _ = tokio::signal::ctrl_c().await;
        };
    }
}

/// Best-effort launch of the platform browser at the dashboard.
fn open_browser(url: &str) {
    let status = if cfg!(target_os = "windows") {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .status()
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).status()
    } else {
        std::process::Command::new("xdg-open").arg(url).status()
    };

    match status {
        Ok(s) if s.success() => info!(url, "Browser opened"),
        _ => info!(url, "Could not open browser automatically, open manually"),
    }
}
