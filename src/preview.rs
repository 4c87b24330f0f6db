//! Live MJPEG previews from the cameras' sub-streams.
//!
//! Each camera index gets one lazily-opened JPEG pipeline whose frames
//! fan out to all connected viewers over a broadcast channel. A read
//! failure triggers one reopen; a second consecutive failure ends the
//! source (the next viewer request reopens it).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera::{redact_uri, Camera};
use crate::error::{Error, Result};

/// JPEG quality for preview frames.
const JPEG_QUALITY: u32 = 85;

/// A stalled source counts as failed after this long without a frame.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

const VIEWER_BUFFER: usize = 16;

/// Shared owner of the per-index preview pipelines.
pub struct PreviewBroker {
    sources: Mutex<HashMap<usize, SourceEntry>>,
}

struct SourceEntry {
    tx: broadcast::Sender<Bytes>,
    handle: JoinHandle<()>,
}

impl PreviewBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(PreviewBroker {
            sources: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe a viewer to camera `index`, opening the shared source on
    /// first use (or after a terminated one).
    pub fn subscribe(&self, index: usize, camera: &Camera) -> Result<broadcast::Receiver<Bytes>> {
        let mut sources = self.sources.lock();

        let live = match sources.get(&index) {
            Some(entry) if !entry.handle.is_finished() => Some(entry.tx.subscribe()),
            _ => None,
        };
        if let Some(rx) = live {
            return Ok(rx);
        }
        sources.remove(&index);

        let uri = camera.sub_stream_uri.clone();
        let source = JpegStream::connect(&uri)?;
        let (tx, rx) = broadcast::channel(VIEWER_BUFFER);
        let handle = tokio::spawn(source_loop(index, uri, source, tx.clone()));
        sources.insert(index, SourceEntry { tx, handle });

        info!(camera = index, "Preview source opened");
        Ok(rx)
    }

    /// Tear down every preview pipeline (shutdown path).
    pub fn shutdown(&self) {
        let mut sources = self.sources.lock();
        for (index, entry) in sources.drain() {
            entry.handle.abort();
            info!(camera = index, "Preview source released");
        }
    }
}

async fn source_loop(
    index: usize,
    uri: String,
    mut source: JpegStream,
    tx: broadcast::Sender<Bytes>,
) {
    let mut just_reopened = false;
    loop {
        match tokio::time::timeout(STALL_TIMEOUT, source.read_jpeg()).await {
            Ok(Some(jpeg)) => {
                just_reopened = false;
                // Viewers may all be gone; the source stays warm for the next one.
                let _ = tx.send(jpeg);
            }
            Ok(None) | Err(_) => {
                if just_reopened {
                    warn!(camera = index, "Preview stream failed twice, terminating");
                    break;
                }
                warn!(camera = index, "Preview read failed, reopening");
                source.stop();
                match JpegStream::connect(&uri) {
                    Ok(s) => {
                        source = s;
                        just_reopened = true;
                    }
                    Err(e) => {
                        warn!(camera = index, error = %e, "Preview reopen failed");
                        break;
                    }
                }
            }
        }
    }
    source.stop();
}

/// RTSP sub-stream decoded and re-encoded to JPEG frames:
///   rtspsrc → decodebin → videoconvert → jpegenc → appsink
struct JpegStream {
    pipeline: gst::Pipeline,
    rx: mpsc::Receiver<Bytes>,
}

impl JpegStream {
    fn connect(uri: &str) -> Result<Self> {
        gst::init().map_err(|e| Error::GStreamer(format!("gst::init: {e}")))?;

        let (tx, rx) = mpsc::channel::<Bytes>(8);

        let pipeline_str = format!(
            "rtspsrc location={uri} latency=200 protocols=tcp ! \
             decodebin ! videoconvert ! jpegenc quality={JPEG_QUALITY} ! \
             appsink name=sink emit-signals=true max-buffers=4 drop=true sync=false"
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| Error::GStreamer(format!("parse_launch: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::GStreamer("Not a pipeline".into()))?;

        let appsink: gst_app::AppSink = pipeline
            .by_name("sink")
            .ok_or_else(|| Error::GStreamer("appsink not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| Error::GStreamer("Cast to AppSink failed".into()))?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buf = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buf.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let _ = tx.try_send(Bytes::copy_from_slice(map.as_slice()));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::GStreamer(format!("set_state Playing: {e}")))?;

        info!(uri = redact_uri(uri), "Preview pipeline started");
        Ok(JpegStream { pipeline, rx })
    }

    async fn read_jpeg(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for JpegStream {
    fn drop(&mut self) {
        self.stop();
    }
}
