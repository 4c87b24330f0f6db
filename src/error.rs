// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GStreamer error: {0}")]
    GStreamer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SOAP error: {0}")]
    Soap(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Transcoder error: {0}")]
    Transcoder(String),

    #[error("Kamera nicht gefunden")]
    CameraNotFound,

    #[error("Aufnahme läuft bereits")]
    AlreadyRecording,

    #[error("Keine aktive Aufnahme")]
    NotRecording,

    #[error("Keine Stream-URL verfügbar")]
    NoStreamUri,
}

pub type Result<T> = std::result::Result<T, Error>;
