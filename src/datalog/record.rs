// src/datalog/record.rs
//! Decoded trackpoints

use super::hex;
use super::register::{FieldSpec, FormatRegister, LogField, ValueKind};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

const VALID_NO_FIX: u16 = 0x0001;
const VALID_SPS: u16 = 0x0002;
const VALID_DGPS: u16 = 0x0004;
const VALID_PPS: u16 = 0x0008;
const VALID_RTK: u16 = 0x0010;
const VALID_FLOAT_RTK: u16 = 0x0020;
const VALID_ESTIMATED: u16 = 0x0040;
const VALID_MANUAL: u16 = 0x0080;
const VALID_SIMULATOR: u16 = 0x0100;

const RCR_TIME: u16 = 0x01;
const RCR_SPEED: u16 = 0x02;
const RCR_DISTANCE: u16 = 0x04;
const RCR_BUTTON: u16 = 0x08;

/// One field value as read from flash, before narrowing to the record type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Unsigned(u32),
    Signed(i32),
    Float(f64),
}

impl FieldValue {
    /// Interpret little-endian `bytes` according to `spec`.
    pub fn read(spec: &FieldSpec, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != spec.byte_len || bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        match spec.kind {
            ValueKind::Unsigned => {
                let raw = little_endian(bytes)?;
                Some(FieldValue::Unsigned(raw))
            }
            ValueKind::Signed => {
                let raw = little_endian(bytes)?;
                let shift = 32 - 8 * bytes.len() as u32;
                Some(FieldValue::Signed(((raw << shift) as i32) >> shift))
            }
            ValueKind::Float32 => {
                let raw: [u8; 4] = bytes.try_into().ok()?;
                Some(FieldValue::Float(f64::from(f32::from_le_bytes(raw))))
            }
            ValueKind::Float64 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(FieldValue::Float(f64::from_le_bytes(raw)))
            }
        }
    }

    fn as_u32(self) -> Option<u32> {
        match self {
            FieldValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }

    fn as_u16(self) -> Option<u16> {
        self.as_u32().and_then(|v| u16::try_from(v).ok())
    }

    fn as_i16(self) -> Option<i16> {
        match self {
            FieldValue::Signed(v) => i16::try_from(v).ok(),
            _ => None,
        }
    }

    fn as_f64(self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(v),
            _ => None,
        }
    }

    fn as_f32(self) -> Option<f32> {
        self.as_f64().map(|v| v as f32)
    }
}

fn little_endian(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(
        bytes
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &b)| acc | u32::from(b) << (8 * i)),
    )
}

/// A trackpoint. Each field is present only when the format register that
/// produced the record enables it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc: Option<u32>,          // Seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<u16>,        // Fix validity flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,     // Degrees, north positive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,    // Degrees, east positive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,       // Meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,        // km/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<f32>,        // Degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dgps_station: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dgps_age: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdop: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdop: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdop: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nsat: Option<u16>,         // In view (low byte), in use (high byte)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<u32>,          // Satellite id, in-use flag, in-view count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<i16>,    // Degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azimuth: Option<u16>,      // Degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<u16>,          // dB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rcr: Option<u16>,          // Record reason flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millis: Option<u16>,       // Fraction of the UTC second
}

impl LogRecord {
    /// Decode one record from hex text laid out by `register`.
    ///
    /// Returns `None` if the text is shorter than the register requires or
    /// any enabled field fails to decode. A trailing checksum, if present, is
    /// ignored.
    pub fn decode(register: &FormatRegister, hex_payload: &str) -> Option<Self> {
        if hex_payload.len() < register.needed_size(false) * 2 {
            return None;
        }

        let mut record = LogRecord::default();
        let mut cursor = 0;
        for spec in register.enabled() {
            let end = cursor + spec.byte_len * 2;
            let bytes = hex::decode_bytes(hex_payload.get(cursor..end)?)?;
            cursor = end;

            let value = FieldValue::read(spec, &bytes)?;
            record.assign(spec.field, value)?;
        }
        Some(record)
    }

    fn assign(&mut self, field: LogField, value: FieldValue) -> Option<()> {
        match field {
            LogField::Utc => self.utc = Some(value.as_u32()?),
            LogField::Valid => self.valid = Some(value.as_u16()?),
            LogField::Latitude => self.latitude = Some(value.as_f64()?),
            LogField::Longitude => self.longitude = Some(value.as_f64()?),
            LogField::Height => self.height = Some(value.as_f32()?),
            LogField::Speed => self.speed = Some(value.as_f32()?),
            LogField::Track => self.track = Some(value.as_f32()?),
            LogField::Dsta => self.dgps_station = Some(value.as_u16()?),
            LogField::Dage => self.dgps_age = Some(value.as_f32()?),
            LogField::Pdop => self.pdop = Some(value.as_u16()?),
            LogField::Hdop => self.hdop = Some(value.as_u16()?),
            LogField::Vdop => self.vdop = Some(value.as_u16()?),
            LogField::Nsat => self.nsat = Some(value.as_u16()?),
            LogField::Sid => self.sid = Some(value.as_u32()?),
            LogField::Ele => self.elevation = Some(value.as_i16()?),
            LogField::Azi => self.azimuth = Some(value.as_u16()?),
            LogField::Snr => self.snr = Some(value.as_u16()?),
            LogField::Rcr => self.rcr = Some(value.as_u16()?),
            LogField::Ms => self.millis = Some(value.as_u16()?),
        }
        Some(())
    }

    /// UTC time of the fix, including the millisecond fraction when logged.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::from(self.utc?);
        let nanos = u32::from(self.millis.unwrap_or(0)).min(999) * 1_000_000;
        Utc.timestamp_opt(seconds, nanos).single()
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    fn valid_flag(&self, mask: u16) -> bool {
        self.valid.map_or(false, |v| v & mask != 0)
    }

    pub fn is_no_fix(&self) -> bool {
        self.valid_flag(VALID_NO_FIX)
    }

    pub fn is_sps(&self) -> bool {
        self.valid_flag(VALID_SPS)
    }

    pub fn is_dgps(&self) -> bool {
        self.valid_flag(VALID_DGPS)
    }

    pub fn is_pps(&self) -> bool {
        self.valid_flag(VALID_PPS)
    }

    pub fn is_rtk(&self) -> bool {
        self.valid_flag(VALID_RTK)
    }

    pub fn is_float_rtk(&self) -> bool {
        self.valid_flag(VALID_FLOAT_RTK)
    }

    pub fn is_estimated(&self) -> bool {
        self.valid_flag(VALID_ESTIMATED)
    }

    pub fn is_manual(&self) -> bool {
        self.valid_flag(VALID_MANUAL)
    }

    pub fn is_simulated(&self) -> bool {
        self.valid_flag(VALID_SIMULATOR)
    }

    /// Get fix type description
    pub fn fix_description(&self) -> &'static str {
        match self.valid {
            None => "Unknown",
            Some(_) if self.is_no_fix() => "No fix",
            Some(_) if self.is_rtk() => "RTK",
            Some(_) if self.is_float_rtk() => "Float RTK",
            Some(_) if self.is_dgps() => "DGPS",
            Some(_) if self.is_pps() => "PPS",
            Some(_) if self.is_sps() => "SPS",
            Some(_) if self.is_estimated() => "Estimated",
            Some(_) if self.is_manual() => "Manual",
            Some(_) if self.is_simulated() => "Simulator",
            Some(_) => "Invalid",
        }
    }

    pub fn satellites_in_view(&self) -> Option<u8> {
        self.nsat.map(|n| (n & 0x00ff) as u8)
    }

    pub fn satellites_in_use(&self) -> Option<u8> {
        self.nsat.map(|n| (n >> 8) as u8)
    }

    pub fn satellite_id(&self) -> Option<u8> {
        self.sid.map(|s| (s & 0x7f) as u8)
    }

    pub fn satellite_in_use(&self) -> Option<bool> {
        self.sid.map(|s| s & 0x80 != 0)
    }

    /// Satellites in view, as carried in the upper half of SID
    pub fn sid_satellites_in_view(&self) -> Option<u16> {
        self.sid.map(|s| (s >> 16) as u16)
    }

    fn reason(&self, mask: u16) -> bool {
        self.rcr.map_or(false, |r| r & mask != 0)
    }

    pub fn logged_by_time(&self) -> bool {
        self.reason(RCR_TIME)
    }

    pub fn logged_by_speed(&self) -> bool {
        self.reason(RCR_SPEED)
    }

    pub fn logged_by_distance(&self) -> bool {
        self.reason(RCR_DISTANCE)
    }

    pub fn logged_by_button(&self) -> bool {
        self.reason(RCR_BUTTON)
    }
}
