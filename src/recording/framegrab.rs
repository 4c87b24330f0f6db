// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Frame-grab recording backend: decoded frames from the shared RTSP
//! pipeline are pushed through an in-process encoder into conventional
//! MP4 segments. No audio.
//!
//! The H.264 encoder element is probed once per session against a scratch
//! file in the OS temp directory; when none of the candidates opens a
//! writer the MPEG-4 part 2 encoder is used instead. Rotation closes the
//! current mux (EOS, bus drain, Null) before the next file is opened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info, warn};

use crate::camera::{Camera, CameraStream, RawFrame, StreamInfo};
use crate::error::{Error, Result};
use crate::recording::segment::{self, FRAME_GRAB_MAX_BYTES, SEGMENT_DURATION};
use crate::recording::{RecordOptions, SessionShared, SessionState};

/// H.264 encoder elements in preference order; first that opens a writer
/// wins.
const ENCODER_CANDIDATES: [&str; 4] = ["x264enc", "openh264enc", "avenc_h264", "vah264enc"];

/// MPEG-4 part 2 fallback when no H.264 encoder is available.
const FALLBACK_ENCODER: &str = "avenc_mpeg4";

/// Constant-quantizer quality, matching the transcoder backend's CRF 23.
const QUANTIZER: u32 = 23;

/// How long a silent stream is tolerated before it counts as lost.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Recording loop for one camera. `stream` is the already-opened probe
/// pipeline handed over by the session start.
pub async fn run(
    shared: Arc<SessionShared>,
    camera: Camera,
    opts: RecordOptions,
    mut stream: CameraStream,
    first_path: PathBuf,
    base_dir: PathBuf,
) {
    let encoder = probe_encoder();
    info!(camera = camera.host, encoder, "Frame-grab backend starting");

    let mut writer = match SegmentWriter::open(
        first_path.clone(),
        encoder,
        (opts.original_width, opts.original_height, opts.fps),
        (opts.recording_width, opts.recording_height),
    ) {
        Ok(w) => {
            shared.begin_segment(first_path);
            shared.transition_if(SessionState::Starting, SessionState::Running);
            w
        }
        Err(e) => {
            warn!(camera = camera.host, error = %e, "Could not open first segment writer");
            shared.set_state(SessionState::Idle);
            return;
        }
    };

    loop {
        if shared.state() != SessionState::Running {
            break;
        }

        let frame = tokio::time::timeout(STALL_TIMEOUT, stream.read_frame()).await;
        let frame = match frame {
            Ok(Some(f)) => f,
            Ok(None) | Err(_) => {
                // Stream lost: one reopen attempt, then give up.
                warn!(camera = camera.host, "Stream read failed, reconnecting");
                stream.stop();
                match CameraStream::connect(&camera.main_stream_uri) {
                    Ok(s) => {
                        stream = s;
                        // Fresh source; caps may have changed, so the next
                        // segment starts from the first frame it delivers.
                        match rotate(&shared, &camera, &base_dir, writer, encoder, None, &opts) {
                            Some(w) => {
                                writer = w;
                                continue;
                            }
                            None => {
                                finish_session(&shared, &stream, &camera);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(camera = camera.host, error = %e, "Reconnect failed, stopping");
                        writer.finish();
                        finish_session(&shared, &stream, &camera);
                        return;
                    }
                }
            }
        };

        if let Err(e) = writer.write(&frame) {
            warn!(camera = camera.host, error = %e, "Frame write failed, rotating segment");
            // Re-key the next writer to the frame that was refused so a
            // caps change after reconnect converges instead of looping.
            let info = StreamInfo::from_frame(&frame);
            let input = Some((info.width, info.height, info.fps));
            match rotate(&shared, &camera, &base_dir, writer, encoder, input, &opts) {
                Some(w) => {
                    writer = w;
                    continue;
                }
                None => {
                    finish_session(&shared, &stream, &camera);
                    return;
                }
            }
        }

        let oversized = writer.size() >= FRAME_GRAB_MAX_BYTES;
        if shared.segment_elapsed() >= SEGMENT_DURATION || oversized {
            info!(
                camera = camera.host,
                oversized, "Segment rotation (frame-grab)"
            );
            match rotate(&shared, &camera, &base_dir, writer, encoder, None, &opts) {
                Some(w) => writer = w,
                None => {
                    finish_session(&shared, &stream, &camera);
                    return;
                }
            }
        }
    }

    writer.finish();
    finish_session(&shared, &stream, &camera);
}

fn finish_session(shared: &SessionShared, stream: &CameraStream, camera: &Camera) {
    stream.stop();
    shared.set_state(SessionState::Idle);
    info!(camera = camera.host, "Frame-grab recording finished");
}

/// Close `writer` finalizably, then open the next segment file. `None`
/// ends the session.
fn rotate(
    shared: &SessionShared,
    camera: &Camera,
    base_dir: &Path,
    writer: SegmentWriter,
    encoder: &'static str,
    new_input: Option<(u32, u32, u32)>,
    opts: &RecordOptions,
) -> Option<SegmentWriter> {
    let input = new_input.unwrap_or((writer.in_width, writer.in_height, writer.fps));
    writer.finish();

    if shared.state() != SessionState::Running {
        return None;
    }

    let path = match segment::create_segment_path(base_dir, &camera.host, camera.port, Local::now())
    {
        Ok(p) => p,
        Err(e) => {
            warn!(camera = camera.host, error = %e, "Could not create segment path");
            return None;
        }
    };
    match SegmentWriter::open(
        path.clone(),
        encoder,
        input,
        (opts.recording_width, opts.recording_height),
    ) {
        Ok(w) => {
            shared.begin_segment(path);
            Some(w)
        }
        Err(e) => {
            warn!(camera = camera.host, error = %e, "Could not open next segment writer");
            None
        }
    }
}

/// One MP4 segment: appsrc → convert/scale → encoder → mp4mux → filesink.
struct SegmentWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    path: PathBuf,
    in_width: u32,
    in_height: u32,
    fps: u32,
    frames: u64,
}

impl SegmentWriter {
    fn open(
        path: PathBuf,
        encoder: &str,
        input: (u32, u32, u32),
        output: (u32, u32),
    ) -> Result<Self> {
        gst::init().map_err(|e| Error::GStreamer(format!("gst::init: {e}")))?;

        let (in_width, in_height, fps) = input;
        let (out_width, out_height) = output;
        let fps = fps.max(1);

        let pipeline_str = format!(
            "appsrc name=src is-live=true ! videoconvert ! videoscale ! \
             video/x-raw,width={out_width},height={out_height} ! {} ! \
             mp4mux ! filesink location={}",
            encoder_launch(encoder),
            path.display()
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| Error::GStreamer(format!("parse_launch: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::GStreamer("Not a pipeline".into()))?;

        let appsrc: gst_app::AppSrc = pipeline
            .by_name("src")
            .ok_or_else(|| Error::GStreamer("appsrc not found".into()))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| Error::GStreamer("Cast to AppSrc failed".into()))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .field("width", in_width.max(1) as i32)
            .field("height", in_height.max(1) as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::GStreamer(format!("set_state Playing: {e}")))?;

        Ok(SegmentWriter {
            pipeline,
            appsrc,
            path,
            in_width,
            in_height,
            fps,
            frames: 0,
        })
    }

    fn write(&mut self, frame: &RawFrame) -> Result<()> {
        if frame.width != self.in_width || frame.height != self.in_height {
            return Err(Error::Stream(format!(
                "Frame size changed: {}x{} -> {}x{}",
                self.in_width, self.in_height, frame.width, frame.height
            )));
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| Error::GStreamer("Buffer not writable".into()))?;
            let frame_ns = 1_000_000_000u64 / self.fps as u64;
            buffer.set_pts(gst::ClockTime::from_nseconds(self.frames * frame_ns));
            buffer.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| Error::GStreamer(format!("push_buffer: {e:?}")))?;
        self.frames += 1;
        Ok(())
    }

    /// Bytes written so far.
    fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Finalize the file: EOS through the mux, drain the bus, tear down.
    fn finish(self) {
        let _ = self.appsrc.end_of_stream();
        if let Some(bus) = self.pipeline.bus() {
            let _ = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(10),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
        }
        let _ = self.pipeline.set_state(gst::State::Null);
        debug!(file = %self.path.display(), frames = self.frames, "Segment finalized");
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn encoder_launch(encoder: &str) -> String {
    match encoder {
        "x264enc" => format!("x264enc speed-preset=medium pass=quant quantizer={QUANTIZER} ! h264parse"),
        FALLBACK_ENCODER => FALLBACK_ENCODER.to_string(),
        other => format!("{other} ! h264parse"),
    }
}

/// Try each H.264 candidate by opening a writer against a scratch file in
/// the OS temp directory; fall back to MPEG-4 part 2 when none works.
fn probe_encoder() -> &'static str {
    let scratch = std::env::temp_dir().join(format!("codec_probe_{}.mp4", std::process::id()));

    for candidate in ENCODER_CANDIDATES {
        match SegmentWriter::open(scratch.clone(), candidate, (320, 240, 25), (320, 240)) {
            Ok(writer) => {
                writer.finish();
                let _ = std::fs::remove_file(&scratch);
                debug!(encoder = candidate, "H.264 encoder available");
                return candidate;
            }
            Err(e) => {
                debug!(encoder = candidate, error = %e, "Encoder probe failed");
            }
        }
    }

    let _ = std::fs::remove_file(&scratch);
    warn!("No H.264 encoder available, falling back to {FALLBACK_ENCODER}");
    FALLBACK_ENCODER
}
