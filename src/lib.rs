// src/lib.rs
//! MTK GPS Logger Library
//!
//! Talks to MediaTek based GPS receivers over a serial link using PMTK
//! commands, and downloads and decodes their onboard track log.

pub mod config;
pub mod datalog;
pub mod error;
pub mod gps;
pub mod session;

// Re-export main types for convenience
pub use config::{GpsConfig, Handshake, Parity, SerialSettings};
pub use datalog::{FormatRegister, LogField, LogRecord};
pub use error::{GpsError, Result};
pub use gps::{CommandChannel, LineTransport, LinkHandle, SendHandle, TransportConfig, UpdateRateInfo};
pub use session::{load_capture, save_capture, CancelToken, LogSession, NoProgress, ProgressSink, ReadOutcome, ReadProgress};
