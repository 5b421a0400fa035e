// src/datalog/register.rs
//! Log format register
//!
//! A 32-bit mask selecting which fields each log record carries. Field order,
//! bit position and stored width all come from [`FIELD_TABLE`]; size
//! arithmetic, register decoding and record decoding all walk that table.

use super::hex;
use crate::error::{GpsError, Result};
use serde::Serialize;
use std::fmt;

/// Trailing per-record checksum, in bytes.
pub const RECORD_CHECKSUM_LEN: usize = 2;

/// Optional record fields in their on-flash order. The discriminant is the
/// register bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogField {
    Utc,
    Valid,
    Latitude,
    Longitude,
    Height,
    Speed,
    Track,
    Dsta,
    Dage,
    Pdop,
    Hdop,
    Vdop,
    Nsat,
    Sid,
    Ele,
    Azi,
    Snr,
    Rcr,
    Ms,
}

/// How a field's little-endian bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unsigned,
    Signed,
    Float32,
    Float64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: LogField,
    pub name: &'static str,
    pub bit: u8,
    pub byte_len: usize,
    pub kind: ValueKind,
}

const fn spec(field: LogField, name: &'static str, byte_len: usize, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        field,
        name,
        bit: field as u8,
        byte_len,
        kind,
    }
}

pub static FIELD_TABLE: [FieldSpec; 19] = [
    spec(LogField::Utc, "UTC", 4, ValueKind::Unsigned),
    spec(LogField::Valid, "VALID", 2, ValueKind::Unsigned),
    spec(LogField::Latitude, "LATITUDE", 8, ValueKind::Float64),
    spec(LogField::Longitude, "LONGITUDE", 8, ValueKind::Float64),
    spec(LogField::Height, "HEIGHT", 4, ValueKind::Float32),
    spec(LogField::Speed, "SPEED", 4, ValueKind::Float32),
    spec(LogField::Track, "TRACK", 4, ValueKind::Float32),
    spec(LogField::Dsta, "DSTA", 2, ValueKind::Unsigned),
    spec(LogField::Dage, "DAGE", 4, ValueKind::Float32),
    spec(LogField::Pdop, "PDOP", 2, ValueKind::Unsigned),
    spec(LogField::Hdop, "HDOP", 2, ValueKind::Unsigned),
    spec(LogField::Vdop, "VDOP", 2, ValueKind::Unsigned),
    spec(LogField::Nsat, "NSAT", 2, ValueKind::Unsigned),
    spec(LogField::Sid, "SID", 4, ValueKind::Unsigned),
    spec(LogField::Ele, "ELE", 2, ValueKind::Signed),
    spec(LogField::Azi, "AZI", 2, ValueKind::Unsigned),
    spec(LogField::Snr, "SNR", 2, ValueKind::Unsigned),
    spec(LogField::Rcr, "RCR", 2, ValueKind::Unsigned),
    spec(LogField::Ms, "MS", 2, ValueKind::Unsigned),
];

impl LogField {
    pub fn spec(self) -> &'static FieldSpec {
        &FIELD_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn byte_len(self) -> usize {
        self.spec().byte_len
    }

    pub fn all() -> impl Iterator<Item = LogField> {
        FIELD_TABLE.iter().map(|spec| spec.field)
    }
}

impl fmt::Display for LogField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Register value, stored as four little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FormatRegister {
    bytes: [u8; 4],
}

impl FormatRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: u32) -> Self {
        Self {
            bytes: value.to_le_bytes(),
        }
    }

    pub fn value(&self) -> u32 {
        u32::from_le_bytes(self.bytes)
    }

    /// Every field enabled
    pub fn all() -> Self {
        let mut register = Self::new();
        for field in LogField::all() {
            register.set(field, true);
        }
        register
    }

    /// Load the register from 8 hex characters as the device prints them,
    /// most significant byte first (`"0002003F"`).
    ///
    /// A byte that is not valid hex is stored as 0 and the call returns
    /// false; the other bytes are still loaded. Input of any other length
    /// returns false and leaves the register untouched.
    pub fn decode(&mut self, hex8: &str) -> bool {
        let text = hex8.as_bytes();
        if text.len() != 8 {
            return false;
        }

        let mut ok = true;
        for (i, pair) in text.chunks(2).enumerate() {
            self.bytes[3 - i] = match hex::parse_pair(pair) {
                Some(byte) => byte,
                None => {
                    ok = false;
                    0
                }
            };
        }
        ok
    }

    /// Strict variant of [`decode`](Self::decode).
    pub fn parse(hex8: &str) -> Result<Self> {
        let mut register = Self::new();
        if register.decode(hex8) {
            Ok(register)
        } else {
            Err(GpsError::Parse(format!("invalid format register '{}'", hex8)))
        }
    }

    pub fn get(&self, field: LogField) -> bool {
        let bit = field.spec().bit as usize;
        self.bytes[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn set(&mut self, field: LogField, enabled: bool) {
        let bit = field.spec().bit as usize;
        let mask = 1u8 << (bit % 8);
        if enabled {
            self.bytes[bit / 8] |= mask;
        } else {
            self.bytes[bit / 8] &= !mask;
        }
    }

    /// Enabled fields in on-flash order
    pub fn enabled(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        FIELD_TABLE.iter().filter(move |spec| self.get(spec.field))
    }

    /// Bytes per record for this register.
    pub fn needed_size(&self, include_checksum: bool) -> usize {
        let body: usize = self.enabled().map(|spec| spec.byte_len).sum();
        if include_checksum {
            body + RECORD_CHECKSUM_LEN
        } else {
            body
        }
    }
}

impl fmt::Display for FormatRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.enabled().map(|spec| spec.name).collect();
        write!(f, "{:08X} [{}]", self.value(), names.join(","))
    }
}

impl Serialize for FormatRegister {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:08X}", self.value()))
    }
}
