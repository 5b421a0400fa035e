// src/error.rs
//! Error types for the MTK logger tools

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GpsError>;

#[derive(Debug, Error)]
pub enum GpsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    /// `open` was called on a transport that already owns a link.
    #[error("Port {0} is already open")]
    AlreadyOpen(String),

    #[error("Port is not open")]
    NotOpen,

    /// No response with the expected prefix arrived before the deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The device answered, but with a non-success status digit.
    #[error("Device rejected {command} (status {status})")]
    Rejected { command: String, status: u8 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Other(String),
}

impl GpsError {
    /// True for failures of the physical link itself, as opposed to protocol
    /// level outcomes (timeouts, rejections, malformed responses).
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            GpsError::Io(_) | GpsError::Serial(_) | GpsError::Connection(_) | GpsError::NotOpen
        )
    }
}
