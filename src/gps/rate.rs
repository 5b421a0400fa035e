// src/gps/rate.rs
//! NMEA output timing and position fix rate

use super::pmtk;
use crate::error::{GpsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of timing slots in `$PMTK314` / `$PMTK514`.
pub const SENTENCE_COUNT: usize = 18;

/// Fix intervals the receiver accepts, in milliseconds.
pub const FIX_RATES_MS: [u32; 7] = [200, 500, 1000, 2000, 3000, 4000, 5000];

pub const DEFAULT_FIX_RATE_MS: u32 = 1000;

const MAX_FIX_RATE_MS: u32 = 5000;

/// NMEA sentences with an output timing slot. Slots 8 to 12 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentence {
    Gll,
    Rmc,
    Vtg,
    Gga,
    Gsa,
    Gsv,
    Grs,
    Gst,
    Malm,
    Meph,
    Mdgp,
    Mdbg,
    Zda,
}

impl Sentence {
    pub const ALL: [Sentence; 13] = [
        Sentence::Gll,
        Sentence::Rmc,
        Sentence::Vtg,
        Sentence::Gga,
        Sentence::Gsa,
        Sentence::Gsv,
        Sentence::Grs,
        Sentence::Gst,
        Sentence::Malm,
        Sentence::Meph,
        Sentence::Mdgp,
        Sentence::Mdbg,
        Sentence::Zda,
    ];

    /// Position of this sentence in the timing list
    pub fn slot(&self) -> usize {
        match self {
            Sentence::Gll => 0,
            Sentence::Rmc => 1,
            Sentence::Vtg => 2,
            Sentence::Gga => 3,
            Sentence::Gsa => 4,
            Sentence::Gsv => 5,
            Sentence::Grs => 6,
            Sentence::Gst => 7,
            Sentence::Malm => 13,
            Sentence::Meph => 14,
            Sentence::Mdgp => 15,
            Sentence::Mdbg => 16,
            Sentence::Zda => 17,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sentence::Gll => "GLL",
            Sentence::Rmc => "RMC",
            Sentence::Vtg => "VTG",
            Sentence::Gga => "GGA",
            Sentence::Gsa => "GSA",
            Sentence::Gsv => "GSV",
            Sentence::Grs => "GRS",
            Sentence::Gst => "GST",
            Sentence::Malm => "MALM",
            Sentence::Meph => "MEPH",
            Sentence::Mdgp => "MDGP",
            Sentence::Mdbg => "MDBG",
            Sentence::Zda => "ZDA",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Sentence::Gll => "Geographic position, latitude/longitude",
            Sentence::Rmc => "Recommended minimum specific GNSS data",
            Sentence::Vtg => "Course over ground and ground speed",
            Sentence::Gga => "GPS fix data",
            Sentence::Gsa => "GNSS DOP and active satellites",
            Sentence::Gsv => "GNSS satellites in view",
            Sentence::Grs => "GNSS range residuals",
            Sentence::Gst => "GNSS pseudorange error statistics",
            Sentence::Malm => "Almanac data",
            Sentence::Meph => "Ephemeris data",
            Sentence::Mdgp => "Differential GPS data",
            Sentence::Mdbg => "Debug data",
            Sentence::Zda => "Time and date",
        }
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Sentence {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self> {
        Sentence::ALL
            .iter()
            .copied()
            .find(|sentence| sentence.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| GpsError::Parse(format!("unknown sentence type '{}'", s)))
    }
}

/// Output timing per sentence: 0 disables it, n emits it once every n fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SentenceTiming {
    slots: [u32; SENTENCE_COUNT],
}

impl SentenceTiming {
    pub fn get(&self, sentence: Sentence) -> u32 {
        self.slots[sentence.slot()]
    }

    pub fn set(&mut self, sentence: Sentence, every: u32) {
        self.slots[sentence.slot()] = every;
    }

    pub fn slots(&self) -> &[u32; SENTENCE_COUNT] {
        &self.slots
    }

    /// Parse a `$PMTK514,...` response. A bare comma separated list is
    /// accepted too. Missing trailing slots read as 0; any value that is not
    /// a number rejects the whole response.
    pub fn parse_response(response: &str) -> Result<Self> {
        let values = pmtk::payload(response, "$PMTK514").unwrap_or(response);

        let mut slots = [0u32; SENTENCE_COUNT];
        for (slot, value) in slots.iter_mut().zip(values.split(',')) {
            *slot = value
                .trim()
                .parse()
                .map_err(|_| GpsError::Parse(format!("invalid sentence timing '{}' in {}", value, response)))?;
        }
        Ok(Self { slots })
    }

    /// `$PMTK314` command carrying all 18 slots.
    pub fn to_command(&self) -> String {
        let args: Vec<String> = self.slots.iter().map(|v| v.to_string()).collect();
        pmtk::build_command("314", &args)
    }
}

/// Snap a fix interval upward to the nearest supported value. Anything above
/// the slowest rate clamps to it.
pub fn snap_fix_rate(ms: u32) -> u32 {
    FIX_RATES_MS
        .iter()
        .copied()
        .find(|&rate| ms <= rate)
        .unwrap_or(MAX_FIX_RATE_MS)
}

/// Parse the interval out of a `$PMTK500,<ms>,0,0,0,0` response.
pub fn parse_fix_rate(response: &str) -> Result<u32> {
    let values = pmtk::payload(response, "$PMTK500").unwrap_or(response);
    let first = values.split(',').next().unwrap_or_default().trim();
    first
        .parse()
        .map_err(|_| GpsError::Parse(format!("invalid fix rate '{}' in {}", first, response)))
}

/// `$PMTK300` command for a fix interval (snapped first).
pub fn fix_rate_command(ms: u32) -> String {
    let args = vec![
        snap_fix_rate(ms).to_string(),
        "0".to_string(),
        "0".to_string(),
        "0".to_string(),
        "0".to_string(),
    ];
    pmtk::build_command("300", &args)
}

/// Sentence timing together with the fix interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateRateInfo {
    pub timing: SentenceTiming,
    fix_rate_ms: u32,
}

impl Default for UpdateRateInfo {
    fn default() -> Self {
        Self {
            timing: SentenceTiming::default(),
            fix_rate_ms: DEFAULT_FIX_RATE_MS,
        }
    }
}

impl UpdateRateInfo {
    pub fn new(timing: SentenceTiming, fix_rate_ms: u32) -> Self {
        Self {
            timing,
            fix_rate_ms: snap_fix_rate(fix_rate_ms),
        }
    }

    pub fn fix_rate_ms(&self) -> u32 {
        self.fix_rate_ms
    }

    pub fn set_fix_rate_ms(&mut self, ms: u32) {
        self.fix_rate_ms = snap_fix_rate(ms);
    }
}
