// src/datalog/sector.rs
//! Flash sector layout
//!
//! ```text
//! | header (512 bytes) | padding markers (16 bytes each, optional) | records ... | 0xFF fill |
//! ```
//!
//! The header starts with the record count (u16) and the format register
//! (u32), both little-endian. Every record is `needed_size(true)` bytes for
//! that register. All of it arrives hex encoded.

use super::hex;
use super::record::LogRecord;
use super::register::FormatRegister;
use crate::error::{GpsError, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// Bytes fetched per log read command.
pub const BLOCK_SIZE: u32 = 0x800;

/// Bytes per flash sector.
pub const SECTOR_SIZE: u32 = 0x10000;

pub const BLOCKS_PER_SECTOR: usize = (SECTOR_SIZE / BLOCK_SIZE) as usize;

pub const HEADER_SIZE: usize = 512;

/// Length of one padding marker in hex characters.
pub const PADDING_LEN: usize = 32;

const PADDING_PREFIX: &str = "AAAAAAAAAAAAAA";
const PADDING_SUFFIX: &str = "BBBBBBBB";

/// Prefix of a block payload line: `$PMTK182,8,<ADDR8>,<data>*CS`.
pub const BLOCK_PAYLOAD_PREFIX: &str = "$PMTK182,8,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectorHeader {
    pub record_count: u16,
    pub register: FormatRegister,
}

/// Read the record count and format register from a sector's header.
pub fn parse_header(sector: &str) -> Result<SectorHeader> {
    if !sector.is_ascii() {
        return Err(GpsError::Parse("sector contains non-ASCII data".to_string()));
    }
    let header = sector
        .get(..HEADER_SIZE * 2)
        .ok_or_else(|| GpsError::Parse(format!("sector too short for header ({} chars)", sector.len())))?;

    let count_hex = format!("{}{}", &header[2..4], &header[0..2]);
    let record_count = hex::parse_u32(&count_hex)
        .and_then(|count| u16::try_from(count).ok())
        .ok_or_else(|| GpsError::Parse(format!("invalid record count '{}'", count_hex)))?;

    let register_hex = format!("{}{}{}{}", &header[10..12], &header[8..10], &header[6..8], &header[4..6]);
    let mut register = FormatRegister::new();
    if !register.decode(&register_hex) {
        debug!("Format register {} partly unreadable, using {}", register_hex, register);
    }

    Ok(SectorHeader { record_count, register })
}

/// Decode every record of one sector.
///
/// Never fails: a broken header yields no records, a malformed record is
/// skipped, and a truncated sector stops at the last complete record.
pub fn parse_sector(sector: &str) -> Vec<LogRecord> {
    match try_parse_sector(sector) {
        Ok(records) => records,
        Err(e) => {
            warn!("Skipping sector: {}", e);
            Vec::new()
        }
    }
}

fn try_parse_sector(sector: &str) -> Result<Vec<LogRecord>> {
    let header = parse_header(sector)?;
    let mut cursor = HEADER_SIZE * 2;

    while let Some(chunk) = sector.get(cursor..cursor + PADDING_LEN) {
        if chunk.starts_with(PADDING_PREFIX) && chunk.ends_with(PADDING_SUFFIX) {
            cursor += PADDING_LEN;
        } else {
            break;
        }
    }

    let record_len = header.register.needed_size(true) * 2;
    let mut records = Vec::with_capacity(header.record_count as usize);
    for i in 0..header.record_count {
        let Some(text) = sector.get(cursor..cursor + record_len) else {
            debug!("Sector truncated after {} of {} records", i, header.record_count);
            break;
        };
        cursor += record_len;

        match LogRecord::decode(&header.register, text) {
            Some(record) => records.push(record),
            None => debug!("Skipping malformed record {}", i),
        }
    }

    debug!(
        "Decoded {} of {} records with register {}",
        records.len(),
        header.record_count,
        header.register
    );
    Ok(records)
}

/// Hex data carried by one block line.
///
/// `$PMTK182,8,<ADDR8>,<data>*CS` yields `<data>`. Any other line is taken as
/// bare data; a trailing `*CS` is dropped in either case.
pub fn block_data(line: &str) -> &str {
    let line = line.trim_end();
    let data = match line.strip_prefix(BLOCK_PAYLOAD_PREFIX) {
        Some(rest) => rest.split_once(',').map_or("", |(_, data)| data),
        None => line,
    };
    match data.rfind('*') {
        Some(star) => &data[..star],
        None => data,
    }
}

/// Start address echoed in a block line, if it is one.
pub fn block_address(line: &str) -> Option<u32> {
    let rest = line.strip_prefix(BLOCK_PAYLOAD_PREFIX)?;
    let address = rest.split(|c| c == ',' || c == '*').next()?;
    hex::parse_u32(address)
}

/// Concatenate the data of up to one sector's worth of block lines.
pub fn assemble_sector<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .take(BLOCKS_PER_SECTOR)
        .map(block_data)
        .collect()
}
