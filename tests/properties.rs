// tests/properties.rs
//! Property tests for the wire helpers and the log codec

use mtk_datalog::datalog::register::FIELD_TABLE;
use mtk_datalog::datalog::sector;
use mtk_datalog::gps::buffers::{RawLine, ReceiveBuffer, ResultLog};
use mtk_datalog::gps::pmtk;
use mtk_datalog::{FormatRegister, LogRecord};
use proptest::prelude::*;

proptest! {
    /// The checksum only covers the body, whatever follows the `*`.
    #[test]
    fn checksum_ignores_trailer(body in "[A-Z0-9,.]{0,60}", trailer in "[ -~]{0,8}") {
        let bare = format!("${}", body);
        let star = format!("${}*", body);
        let full = format!("${}*{}", body, trailer);
        prop_assert_eq!(pmtk::checksum(&bare), pmtk::checksum(&star));
        prop_assert_eq!(pmtk::checksum(&star), pmtk::checksum(&full));
    }

    #[test]
    fn built_commands_carry_valid_checksums(
        number in "[0-9]{3}",
        args in proptest::collection::vec("[0-9A-F]{1,8}", 0..6),
    ) {
        let command = pmtk::build_command(&number, &args);
        prop_assert!(command.starts_with("$PMTK"));
        prop_assert!(pmtk::has_valid_checksum(&command));
    }

    #[test]
    fn receive_buffer_never_exceeds_capacity(capacity in 1usize..50, pushes in 0usize..200) {
        let mut buffer = ReceiveBuffer::new(capacity);
        for i in 0..pushes {
            buffer.push(RawLine::new(format!("line {}", i)));
            prop_assert!(buffer.len() <= capacity);
        }
        let lines = buffer.drain();
        prop_assert_eq!(lines.len(), pushes.min(capacity));
        if pushes > 0 {
            prop_assert_eq!(&lines[lines.len() - 1].text, &format!("line {}", pushes - 1));
        }
    }

    /// Trimming the result history never shifts indices.
    #[test]
    fn result_log_indices_are_stable(limit in 1usize..20, pushes in 1usize..100) {
        let mut log = ResultLog::new(Some(limit));
        for i in 0..pushes {
            log.push(format!("$PMTK010,{:04}", i));
        }
        prop_assert_eq!(log.end(), pushes);
        let newest = pushes - 1;
        let expected = format!("$PMTK010,{:04}", newest);
        prop_assert_eq!(log.find("$PMTK010", newest), Some(expected.as_str()));
    }

    #[test]
    fn needed_size_matches_field_table(value in 0u32..(1 << 19)) {
        let register = FormatRegister::from_value(value);
        let expected: usize = FIELD_TABLE
            .iter()
            .filter(|spec| value & (1 << spec.bit) != 0)
            .map(|spec| spec.byte_len)
            .sum();
        prop_assert_eq!(register.needed_size(false), expected);
        prop_assert_eq!(register.needed_size(true), expected + 2);
        prop_assert!(register.needed_size(true) <= 64);
    }

    #[test]
    fn register_decode_round_trips(value in 0u32..(1 << 19)) {
        let mut register = FormatRegister::new();
        let hex = format!("{:08X}", value);
        prop_assert!(register.decode(&hex));
        prop_assert_eq!(register.value(), value);
    }

    #[test]
    fn record_decode_requires_full_payload(value in 1u32..(1 << 19), cut in 1usize..16) {
        let register = FormatRegister::from_value(value);
        let needed = register.needed_size(false) * 2;
        let payload = "0".repeat(needed);
        prop_assert!(LogRecord::decode(&register, &payload).is_some());
        let short = &payload[..needed.saturating_sub(cut)];
        prop_assert!(LogRecord::decode(&register, short).is_none());
    }

    #[test]
    fn record_decode_never_panics(value in 0u32..(1 << 19), payload in "\\PC{0,140}") {
        let register = FormatRegister::from_value(value);
        let _ = LogRecord::decode(&register, &payload);
    }

    #[test]
    fn sector_parse_never_panics(text in "\\PC{0,1500}") {
        let _ = sector::parse_sector(&text);
        let _ = sector::block_data(&text);
    }

    /// A zero record count yields nothing whatever follows the header.
    #[test]
    fn zero_count_sector_is_empty(register in "[0-9A-F]{8}", rest in "[0-9A-F]{0,600}") {
        let mut text = format!("0000{}{}", &register[6..8], &register[4..6]);
        text.push_str(&register[2..4]);
        text.push_str(&register[0..2]);
        text.push_str(&"F".repeat(1024 - text.len()));
        text.push_str(&rest);
        prop_assert!(sector::parse_sector(&text).is_empty());
    }
}
