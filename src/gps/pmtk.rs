// src/gps/pmtk.rs
//! PMTK sentence building and response parsing

use std::fmt;

/// Every vendor sentence, command or response, starts with this.
pub const VENDOR_PREFIX: &str = "$PMTK";

/// Acknowledgement sentence prefix (`$PMTK001,<cmd>,<status>`).
pub const ACK_PREFIX: &str = "$PMTK001";

/// XOR checksum over the bytes between an optional leading `$` and the first
/// `*` (or the end of the text). Returns two lowercase hex digits, `"00"` when
/// that range is empty.
pub fn checksum(sentence: &str) -> String {
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    let body = match body.find('*') {
        Some(star) => &body[..star],
        None => body,
    };

    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{:02x}", sum)
}

/// Build a complete command: `$PMTK<number>[,arg]*` followed by `*` and its checksum.
pub fn build_command(number: &str, args: &[String]) -> String {
    let mut command = format!("{}{}", VENDOR_PREFIX, number);
    for arg in args {
        command.push(',');
        command.push_str(arg);
    }
    command.push('*');

    let sum = checksum(&command);
    command.push_str(&sum);
    command
}

/// Check the `*XX` trailer of a received sentence against its body.
pub fn has_valid_checksum(sentence: &str) -> bool {
    match sentence.rfind('*') {
        Some(star) => sentence[star + 1..].eq_ignore_ascii_case(&checksum(&sentence[..star])),
        None => false,
    }
}

/// True when a sentence carries a `*XX` trailer that does not match its body.
/// Sentences without a trailer are not checked.
pub fn checksum_mismatch(sentence: &str) -> bool {
    sentence.contains('*') && !has_valid_checksum(sentence)
}

/// Split a sentence into its comma separated fields, dropping the `*XX` trailer.
///
/// `"$PMTK182,3,10,1A*4F"` yields `["$PMTK182", "3", "10", "1A"]`.
pub fn fields(sentence: &str) -> Vec<&str> {
    let body = match sentence.rfind('*') {
        Some(star) => &sentence[..star],
        None => sentence,
    };
    body.split(',').collect()
}

/// Text between a response prefix and the `*XX` trailer, e.g. the
/// `0,1,0,...` part of `$PMTK514,0,1,0,...*2F`.
pub fn payload<'a>(sentence: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = sentence.strip_prefix(prefix)?;
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    Some(match rest.rfind('*') {
        Some(star) => &rest[..star],
        None => rest,
    })
}

/// Status digit carried by a `$PMTK001` acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    InvalidCommand,
    Unsupported,
    Failed,
    Succeeded,
}

impl AckStatus {
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(AckStatus::InvalidCommand),
            '1' => Some(AckStatus::Unsupported),
            '2' => Some(AckStatus::Failed),
            '3' => Some(AckStatus::Succeeded),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AckStatus::InvalidCommand => 0,
            AckStatus::Unsupported => 1,
            AckStatus::Failed => 2,
            AckStatus::Succeeded => 3,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == AckStatus::Succeeded
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AckStatus::InvalidCommand => "invalid command",
            AckStatus::Unsupported => "unsupported command",
            AckStatus::Failed => "action failed",
            AckStatus::Succeeded => "succeeded",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Read the status digit that follows `prefix` in an acknowledgement.
///
/// The prefix may or may not include the separating comma:
/// both `("$PMTK001,0,3*30", "$PMTK001,0")` and
/// `("$PMTK001,182,7,3*20", "$PMTK001,182,7,")` yield `Succeeded`.
pub fn ack_status(response: &str, prefix: &str) -> Option<AckStatus> {
    let rest = response.strip_prefix(prefix)?;
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    rest.chars().next().and_then(AckStatus::from_digit)
}

/// Acknowledgement prefix for a command number, e.g. `"$PMTK001,300"`.
pub fn ack_prefix(command: &str) -> String {
    format!("{},{}", ACK_PREFIX, command)
}
