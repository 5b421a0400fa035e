// src/datalog/mod.rs
//! On-flash log format: register, records and sectors

pub mod hex;
pub mod record;
pub mod register;
pub mod sector;

pub use record::LogRecord;
pub use register::{FormatRegister, LogField};
pub use sector::{parse_sector, SectorHeader};
