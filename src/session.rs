// src/session.rs
//! Log download sessions
//!
//! A session either completes and holds every record it decoded, or it ends
//! empty. Cancellation and block level failures discard everything gathered
//! so far; malformed records and sectors only lose themselves.

use crate::datalog::sector::{self, BLOCKS_PER_SECTOR, BLOCK_SIZE, SECTOR_SIZE};
use crate::datalog::LogRecord;
use crate::error::Result;
use crate::gps::CommandChannel;
use serde::Serialize;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Snapshot handed to a [`ProgressSink`] before each block or sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReadProgress {
    pub blocks_read: usize,
    pub blocks_total: usize,
    pub records_decoded: usize,
    pub records_expected: usize,
}

impl ReadProgress {
    pub fn percent(&self) -> f64 {
        if self.blocks_total == 0 {
            100.0
        } else {
            self.blocks_read as f64 * 100.0 / self.blocks_total as f64
        }
    }
}

/// Cooperative progress and cancellation, polled once per block or sector.
pub trait ProgressSink {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn report(&mut self, _progress: ReadProgress) {}
}

/// Ignores progress, never cancels
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Shared cancellation flag, e.g. set from a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CancelToken {
    fn is_cancelled(&self) -> bool {
        CancelToken::is_cancelled(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadOutcome {
    /// All blocks read; `records` were decoded.
    Completed { records: usize },
    /// The device reports no log.
    Empty,
    /// Stopped on request; nothing kept.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct LogSession {
    record_count: u32,
    last_address: u32,
    records: Vec<LogRecord>,
    raw_blocks: Vec<String>,
}

impl LogSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the device claimed before a read, the decoded count after a
    /// completed one.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn last_address(&self) -> u32 {
        self.last_address
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    /// Block lines the records were decoded from, in address order.
    pub fn raw_blocks(&self) -> &[String] {
        &self.raw_blocks
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Download and decode the whole log from the receiver.
    ///
    /// Returns `Err` if any block cannot be read; the session is then empty.
    /// Count and address queries that fail without a link error are read as
    /// "no log".
    pub async fn read_live<P>(&mut self, channel: &CommandChannel, progress: &mut P) -> Result<ReadOutcome>
    where
        P: ProgressSink,
    {
        self.reset();

        let Some(record_count) = Self::log_status(channel.query_log_record_count().await, "record count")? else {
            return Ok(ReadOutcome::Empty);
        };
        if record_count == 0 {
            info!("Receiver log is empty");
            return Ok(ReadOutcome::Empty);
        }
        let Some(last_address) = Self::log_status(channel.query_log_last_address().await, "last address")? else {
            return Ok(ReadOutcome::Empty);
        };
        self.record_count = record_count;
        self.last_address = last_address;

        let blocks = (0..last_address).step_by(BLOCK_SIZE as usize);
        let blocks_total = blocks.len();
        info!(
            "Reading {} records from {} blocks (last address {:08X})",
            record_count, blocks_total, last_address
        );

        let mut records = Vec::new();
        let mut raw_blocks = Vec::with_capacity(blocks_total);
        let mut sector = String::with_capacity(SECTOR_SIZE as usize * 2);
        let mut blocks_in_sector = 0;

        for (index, address) in blocks.enumerate() {
            if progress.is_cancelled() {
                info!("Log read cancelled at block {:08X}", address);
                self.reset();
                return Ok(ReadOutcome::Cancelled);
            }
            progress.report(ReadProgress {
                blocks_read: index,
                blocks_total,
                records_decoded: records.len(),
                records_expected: record_count as usize,
            });

            let line = match channel.read_log_block(address).await {
                Ok(line) => line,
                Err(e) => {
                    warn!("Reading block {:08X} failed, discarding log: {}", address, e);
                    self.reset();
                    return Err(e);
                }
            };
            sector.push_str(sector::block_data(&line));
            raw_blocks.push(line);
            blocks_in_sector += 1;

            if blocks_in_sector == BLOCKS_PER_SECTOR {
                records.extend(sector::parse_sector(&sector));
                sector.clear();
                blocks_in_sector = 0;
            }
        }
        if blocks_in_sector > 0 {
            records.extend(sector::parse_sector(&sector));
        }

        progress.report(ReadProgress {
            blocks_read: blocks_total,
            blocks_total,
            records_decoded: records.len(),
            records_expected: record_count as usize,
        });
        info!("Decoded {} of {} records", records.len(), record_count);

        self.record_count = records.len() as u32;
        self.records = records;
        self.raw_blocks = raw_blocks;
        Ok(ReadOutcome::Completed {
            records: self.records.len(),
        })
    }

    fn log_status(result: Result<u32>, what: &str) -> Result<Option<u32>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_link_error() => Err(e),
            Err(e) => {
                warn!("Could not read log {}: {}", what, e);
                Ok(None)
            }
        }
    }

    /// Decode a captured log: one block line per entry, 32 blocks per sector.
    pub fn read_offline<I, S, P>(&mut self, lines: I, progress: &mut P) -> ReadOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        P: ProgressSink,
    {
        self.reset();

        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return ReadOutcome::Empty;
        }
        let blocks_total = lines.len();

        let mut records = Vec::new();
        for (index, chunk) in lines.chunks(BLOCKS_PER_SECTOR).enumerate() {
            if progress.is_cancelled() {
                info!("Log decode cancelled at sector {}", index);
                self.reset();
                return ReadOutcome::Cancelled;
            }
            progress.report(ReadProgress {
                blocks_read: index * BLOCKS_PER_SECTOR,
                blocks_total,
                records_decoded: records.len(),
                records_expected: 0,
            });

            let text = sector::assemble_sector(chunk.iter().map(String::as_str));
            let decoded = sector::parse_sector(&text);
            debug!("Sector {}: {} records", index, decoded.len());
            records.extend(decoded);
        }

        progress.report(ReadProgress {
            blocks_read: blocks_total,
            blocks_total,
            records_decoded: records.len(),
            records_expected: 0,
        });

        self.last_address = lines
            .last()
            .and_then(|line| sector::block_address(line))
            .map_or((blocks_total as u32).saturating_mul(BLOCK_SIZE), |address| {
                address.saturating_add(BLOCK_SIZE)
            });
        self.record_count = records.len() as u32;
        self.records = records;
        self.raw_blocks = lines;
        ReadOutcome::Completed {
            records: self.records.len(),
        }
    }
}

/// Read a capture file written by [`save_capture`]: one block line each.
pub fn load_capture(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Write block lines so [`load_capture`] can replay them.
pub fn save_capture(path: &Path, lines: &[String]) -> Result<()> {
    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(path, contents)?;
    Ok(())
}
