// src/gps/mod.rs
//! Serial link and PMTK command handling

pub mod buffers;
pub mod command;
pub mod pmtk;
pub mod rate;
pub mod transport;

pub use buffers::{RawLine, SentCommand};
pub use command::CommandChannel;
pub use rate::{Sentence, SentenceTiming, UpdateRateInfo};
pub use transport::{LineTransport, LinkHandle, SendHandle, TransportConfig};
