// tests/common/mod.rs
//! Shared fixtures: synthetic flash images and a simulated receiver

#![allow(dead_code)]

use mtk_datalog::datalog::sector::{BLOCK_SIZE, HEADER_SIZE, SECTOR_SIZE};
use mtk_datalog::gps::pmtk;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// UTC, VALID, LATITUDE, LONGITUDE, HEIGHT, SPEED, RCR
pub const REGISTER: u32 = 0x0002003F;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub utc: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub height: f32,
    pub speed: f32,
}

pub fn track(start_utc: u32, count: usize) -> Vec<Fix> {
    (0..count)
        .map(|i| Fix {
            utc: start_utc + i as u32,
            latitude: 35.0 + i as f64 * 0.001,
            longitude: 139.5 - i as f64 * 0.001,
            height: 40.0 + i as f32,
            speed: 3.5,
        })
        .collect()
}

fn push_le(text: &mut String, bytes: &[u8]) {
    for b in bytes {
        text.push_str(&format!("{:02X}", b));
    }
}

pub fn record_hex(fix: &Fix) -> String {
    let mut text = String::new();
    push_le(&mut text, &fix.utc.to_le_bytes());
    push_le(&mut text, &0x0002u16.to_le_bytes());
    push_le(&mut text, &fix.latitude.to_le_bytes());
    push_le(&mut text, &fix.longitude.to_le_bytes());
    push_le(&mut text, &fix.height.to_le_bytes());
    push_le(&mut text, &fix.speed.to_le_bytes());
    push_le(&mut text, &0x0001u16.to_le_bytes());
    // Record checksum, never validated
    text.push_str("2A00");
    text
}

/// One full sector: header, a padding marker, the records, then 0xFF fill.
pub fn sector_hex(fixes: &[Fix]) -> String {
    let mut text = String::new();
    push_le(&mut text, &(fixes.len() as u16).to_le_bytes());
    push_le(&mut text, &REGISTER.to_le_bytes());
    while text.len() < HEADER_SIZE * 2 {
        text.push_str("FF");
    }
    text.push_str("AAAAAAAAAAAAAA0000000000BBBBBBBB");
    for fix in fixes {
        text.push_str(&record_hex(fix));
    }
    while text.len() < SECTOR_SIZE as usize * 2 {
        text.push_str("FF");
    }
    text
}

pub fn log_image(sectors: &[Vec<Fix>]) -> String {
    sectors.iter().map(|fixes| sector_hex(fixes)).collect()
}

pub fn sentence(body: &str) -> String {
    format!("${}*{}", body, pmtk::checksum(body))
}

/// The `$PMTK182,8` line the receiver sends for the block at `address`.
pub fn block_line(image: &str, address: u32) -> String {
    let start = address as usize * 2;
    let end = start + BLOCK_SIZE as usize * 2;
    sentence(&format!("PMTK182,8,{:08X},{}", address, &image[start..end]))
}

pub fn block_lines(image: &str, last_address: u32) -> Vec<String> {
    (0..last_address)
        .step_by(BLOCK_SIZE as usize)
        .map(|address| block_line(image, address))
        .collect()
}

/// Behaviour of the simulated receiver.
#[derive(Debug, Clone, Default)]
pub struct Receiver {
    pub image: String,
    pub record_count: u32,
    pub last_address: u32,
    /// Never answer a read of this block
    pub silent_block: Option<u32>,
    /// Ignore log status queries
    pub silent_status: bool,
}

impl Receiver {
    fn respond(&self, line: &str) -> Vec<String> {
        let fields = pmtk::fields(line);
        match fields.as_slice() {
            ["$PMTK000"] => vec![sentence("PMTK001,0,3")],
            ["$PMTK182", "2", "10"] if !self.silent_status => {
                vec![sentence(&format!("PMTK182,3,10,{:X}", self.record_count))]
            }
            ["$PMTK182", "2", "8"] if !self.silent_status => {
                vec![sentence(&format!("PMTK182,3,8,{:08X}", self.last_address))]
            }
            ["$PMTK182", "7", address, _length] => {
                let Ok(address) = u32::from_str_radix(address, 16) else {
                    return vec![sentence("PMTK001,182,7,0")];
                };
                if self.silent_block == Some(address) {
                    return vec![];
                }
                vec![
                    // Regular NMEA output keeps flowing between responses
                    "$GPGGA,123519,3500.000,N,13930.000,E,1,08,0.9,40.0,M,39.0,M,,*4B".to_string(),
                    sentence("PMTK001,182,7,3"),
                    block_line(&self.image, address),
                ]
            }
            _ => vec![],
        }
    }
}

/// Run `receiver` on the device end of a duplex pipe. Returns the commands
/// it has seen.
pub fn spawn_receiver(stream: DuplexStream, receiver: Receiver) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.lock().unwrap().push(line.clone());
            for reply in receiver.respond(&line) {
                if writer.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });
    seen
}
