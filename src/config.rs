// src/config.rs
//! Configuration loading and serial port settings

use crate::error::{GpsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Baud rates offered by the receiver's UART.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 19200, 28800, 38400, 57600, 115200];

pub const DEFAULT_BAUD_RATE: u32 = 115200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Parity {
    None,
    Even,
    #[default]
    Odd,
    Mark,
    Space,
}

impl Parity {
    pub const ALL: [Parity; 5] = [Parity::None, Parity::Even, Parity::Odd, Parity::Mark, Parity::Space];

    pub fn label(&self) -> &'static str {
        match self {
            Parity::None => "None",
            Parity::Even => "Even",
            Parity::Odd => "Odd",
            Parity::Mark => "Mark (always 1)",
            Parity::Space => "Space (always 0)",
        }
    }

    /// Map onto the serial backend. Mark and space parity have no equivalent there.
    pub fn to_serial(self) -> Result<tokio_serial::Parity> {
        match self {
            Parity::None => Ok(tokio_serial::Parity::None),
            Parity::Even => Ok(tokio_serial::Parity::Even),
            Parity::Odd => Ok(tokio_serial::Parity::Odd),
            Parity::Mark | Parity::Space => Err(GpsError::Config(format!(
                "{} parity is not supported by the serial backend",
                self.label()
            ))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Handshake {
    None,
    #[default]
    XonXoff,
    RtsCts,
    RtsCtsXonXoff,
}

impl Handshake {
    pub const ALL: [Handshake; 4] = [
        Handshake::None,
        Handshake::XonXoff,
        Handshake::RtsCts,
        Handshake::RtsCtsXonXoff,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Handshake::None => "None",
            Handshake::XonXoff => "XON/XOFF",
            Handshake::RtsCts => "RTS/CTS",
            Handshake::RtsCtsXonXoff => "XON/XOFF + RTS/CTS",
        }
    }

    /// Map onto the serial backend's flow control.
    ///
    /// The backend cannot combine software and hardware flow control, so the
    /// combined mode falls back to RTS/CTS.
    pub fn to_serial(self) -> tokio_serial::FlowControl {
        match self {
            Handshake::None => tokio_serial::FlowControl::None,
            Handshake::XonXoff => tokio_serial::FlowControl::Software,
            Handshake::RtsCts => tokio_serial::FlowControl::Hardware,
            Handshake::RtsCtsXonXoff => {
                tracing::warn!("combined XON/XOFF + RTS/CTS handshake unavailable, using RTS/CTS");
                tokio_serial::FlowControl::Hardware
            }
        }
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Line settings used when opening the receiver's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub parity: Parity,
    pub handshake: Handshake,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Odd,
            handshake: Handshake::XonXoff,
        }
    }
}

impl SerialSettings {
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(GpsError::Config(format!(
                "unsupported baud rate {} (expected one of {:?})",
                self.baud_rate, SUPPORTED_BAUD_RATES
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub serial_port: Option<String>,
    pub serial: SerialSettings,
    /// Capacity of the bounded receive buffer (oldest lines evicted first).
    pub receive_buffer_capacity: usize,
    /// Number of vendor responses retained for correlation. `None` keeps all of them.
    pub result_history_limit: Option<usize>,
    pub command_timeout_ms: u64,
    pub block_timeout_ms: u64,
    pub log_level: String,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            serial_port: None,
            serial: SerialSettings::default(),
            receive_buffer_capacity: 1000,
            result_history_limit: Some(10_000),
            command_timeout_ms: 5000,
            block_timeout_ms: 3000,
            log_level: "info".to_string(),
        }
    }
}

impl GpsConfig {
    /// Load configuration from the default location, falling back to defaults
    /// when no file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GpsError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GpsError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        if self.receive_buffer_capacity == 0 {
            return Err(GpsError::Config("receive_buffer_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Get config file path
    fn get_config_path() -> Result<PathBuf> {
        #[cfg(windows)]
        let home_var = "USERPROFILE";
        #[cfg(not(windows))]
        let home_var = "HOME";

        let home = std::env::var(home_var)
            .map_err(|_| GpsError::Config(format!("{} environment variable not set", home_var)))?;

        Ok(PathBuf::from(home).join(".config").join("mtk-datalog").join("config.json"))
    }

    /// Override serial settings, e.g. from command line flags
    pub fn update_serial(&mut self, port: Option<String>, baud_rate: Option<u32>, parity: Option<Parity>, handshake: Option<Handshake>) {
        if port.is_some() {
            self.serial_port = port;
        }
        if let Some(baud_rate) = baud_rate {
            self.serial.baud_rate = baud_rate;
        }
        if let Some(parity) = parity {
            self.serial.parity = parity;
        }
        if let Some(handshake) = handshake {
            self.serial.handshake = handshake;
        }
    }
}
