// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Subnet discovery: TCP reachability gate plus ONVIF probe, fanned out
//! over a bounded worker pool.
//!
//! The registry is the single owner of discovered cameras, indexed
//! 0..N-1 within one scan epoch. A completed scan replaces the whole
//! vector atomically under the write lock; handlers see either the old
//! list or the new one. Only one scan may be in flight; a concurrent
//! request observes the flag and gets the existing registry back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::onvif;

/// The scanned /24 prefix. The original deployment targets exactly this
/// subnet; kept as the single constant rather than interface-derived.
pub const SUBNET_PREFIX: &str = "192.168.100";

/// ONVIF service ports the fleet's cameras listen on.
pub const SCAN_PORTS: [u16; 2] = [888, 835];

const SCAN_WORKERS: usize = 100;
const PORT_TIMEOUT: Duration = Duration::from_millis(300);
const PROGRESS_EVERY: usize = 50;

/// Non-blocking TCP connect with a hard timeout. Every error counts as
/// closed; the pending socket is dropped on timeout.
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{host}:{port}");
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}

/// Result of a scan request.
pub struct ScanOutcome {
    pub cameras: Vec<Camera>,
    /// False when another scan was already running and the existing
    /// registry was returned untouched.
    pub fresh: bool,
}

/// Owner of the camera registry and the single-scan flag.
pub struct DiscoveryEngine {
    registry: RwLock<Vec<Camera>>,
    scanning: Mutex<bool>,
}

impl DiscoveryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(DiscoveryEngine {
            registry: RwLock::new(Vec::new()),
            scanning: Mutex::new(false),
        })
    }

    /// Snapshot of the current registry.
    pub fn cameras(&self) -> Vec<Camera> {
        self.registry.read().clone()
    }

    pub fn camera(&self, index: usize) -> Option<Camera> {
        self.registry.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Scan the subnet and replace the registry. Individual probe failures
    /// never fail the scan; they just produce no camera.
    pub async fn scan(&self, username: &str, password: &str) -> ScanOutcome {
        {
            let mut flag = self.scanning.lock();
            if *flag {
                warn!("Scan already in progress, returning current registry");
                return ScanOutcome {
                    cameras: self.cameras(),
                    fresh: false,
                };
            }
            *flag = true;
        }

        let cameras = run_scan(username, password).await;
        *self.registry.write() = cameras.clone();
        *self.scanning.lock() = false;

        ScanOutcome {
            cameras,
            fresh: true,
        }
    }
}

async fn run_scan(username: &str, password: &str) -> Vec<Camera> {
    let candidates: Vec<(String, u16)> = (1u8..=254)
        .flat_map(|i| {
            SCAN_PORTS
                .iter()
                .map(move |&port| (format!("{SUBNET_PREFIX}.{i}"), port))
        })
        .collect();
    let total = candidates.len();

    info!(
        subnet = format!("{SUBNET_PREFIX}.0/24"),
        ports = ?SCAN_PORTS,
        workers = SCAN_WORKERS,
        "Scanning network"
    );

    let completed = AtomicUsize::new(0);
    let completed = &completed;

    let cameras: Vec<Camera> = stream::iter(candidates)
        .map(|(host, port)| async move {
            let result = probe_candidate(&host, port, username, password).await;
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_EVERY == 0 {
                info!("Scan progress: {done}/{total} ({}%)", done * 100 / total);
            }
            result
        })
        .buffer_unordered(SCAN_WORKERS)
        .filter_map(|camera| async move { camera })
        .collect()
        .await;

    info!(cameras = cameras.len(), "Scan complete");
    cameras
}

async fn probe_candidate(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Option<Camera> {
    if !probe_port(host, port, PORT_TIMEOUT).await {
        return None;
    }

    match onvif::probe(host, port, username, password).await {
        Ok(camera) => {
            info!(host, port, name = camera.name, "Camera found (SOAP auth ok)");
            Some(camera)
        }
        Err(e) => {
            debug!(host, port, error = %e, "Probe failed");
            None
        }
    }
}
