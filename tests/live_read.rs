// tests/live_read.rs
//! Full log downloads against a simulated receiver

mod common;

use common::{block_lines, log_image, spawn_receiver, track, Receiver};
use mtk_datalog::datalog::sector::{BLOCK_SIZE, SECTOR_SIZE};
use mtk_datalog::{
    CommandChannel, GpsError, LineTransport, LogSession, NoProgress, ProgressSink, ReadOutcome, ReadProgress,
    TransportConfig,
};
use std::time::Duration;

async fn connect(receiver: Receiver) -> (LineTransport, CommandChannel) {
    let (client, device) = tokio::io::duplex(256 * 1024);
    spawn_receiver(device, receiver);

    let mut transport = LineTransport::new(TransportConfig::default());
    transport.attach("sim", client).await.unwrap();
    let channel = CommandChannel::new(transport.handle().unwrap())
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(300));
    (transport, channel)
}

/// Two sectors, the second one only partly written.
fn two_sector_receiver() -> Receiver {
    let image = log_image(&[track(1_600_000_000, 5), track(1_600_001_000, 3)]);
    Receiver {
        image,
        record_count: 8,
        last_address: SECTOR_SIZE + 2 * BLOCK_SIZE,
        ..Receiver::default()
    }
}

struct Recorder {
    reports: Vec<ReadProgress>,
    cancel_after: Option<usize>,
}

impl ProgressSink for Recorder {
    fn is_cancelled(&self) -> bool {
        self.cancel_after.map_or(false, |n| self.reports.len() >= n)
    }

    fn report(&mut self, progress: ReadProgress) {
        self.reports.push(progress);
    }
}

#[tokio::test]
async fn test_live_read_completes() {
    let (_transport, channel) = connect(two_sector_receiver()).await;
    let mut session = LogSession::new();
    let mut progress = Recorder { reports: Vec::new(), cancel_after: None };

    let outcome = session.read_live(&channel, &mut progress).await.unwrap();

    assert_eq!(outcome, ReadOutcome::Completed { records: 8 });
    assert_eq!(session.record_count(), 8);
    assert_eq!(session.last_address(), SECTOR_SIZE + 2 * BLOCK_SIZE);
    assert_eq!(session.raw_blocks().len(), 34);

    let records = session.records();
    assert_eq!(records[0].utc, Some(1_600_000_000));
    assert_eq!(records[4].utc, Some(1_600_000_004));
    assert_eq!(records[5].utc, Some(1_600_001_000));
    assert_eq!(records[0].latitude, Some(35.0));
    assert_eq!(records[7].height, Some(42.0));
    assert!(records.iter().all(|r| r.logged_by_time()));

    let last = progress.reports.last().unwrap();
    assert_eq!(last.blocks_read, 34);
    assert_eq!(last.blocks_total, 34);
    assert_eq!(last.records_decoded, 8);
}

#[tokio::test]
async fn test_live_read_with_implausible_record_count() {
    let receiver = Receiver {
        record_count: 0xFFFF_FFFF,
        ..two_sector_receiver()
    };
    let (_transport, channel) = connect(receiver).await;
    let mut session = LogSession::new();

    let outcome = session.read_live(&channel, &mut NoProgress).await.unwrap();

    // The flash only holds what the sector headers say
    assert_eq!(outcome, ReadOutcome::Completed { records: 8 });
    assert_eq!(session.record_count(), 8);
}

#[tokio::test]
async fn test_live_read_block_failure_discards_everything() {
    let receiver = Receiver {
        silent_block: Some(3 * BLOCK_SIZE),
        ..two_sector_receiver()
    };
    let (_transport, channel) = connect(receiver).await;
    let mut session = LogSession::new();

    let err = session.read_live(&channel, &mut NoProgress).await.unwrap_err();

    assert!(matches!(err, GpsError::Timeout(_)));
    assert!(session.records().is_empty());
    assert!(session.raw_blocks().is_empty());
    assert_eq!(session.record_count(), 0);
}

#[tokio::test]
async fn test_live_read_cancel_discards_everything() {
    let (_transport, channel) = connect(two_sector_receiver()).await;
    let mut session = LogSession::new();
    let mut progress = Recorder { reports: Vec::new(), cancel_after: Some(33) };

    let outcome = session.read_live(&channel, &mut progress).await.unwrap();

    // A full sector was decoded before the cancel, and still nothing is kept
    assert_eq!(outcome, ReadOutcome::Cancelled);
    assert!(session.records().is_empty());
    assert_eq!(progress.reports.len(), 33);
}

#[tokio::test]
async fn test_empty_log() {
    let receiver = Receiver {
        record_count: 0,
        ..two_sector_receiver()
    };
    let (_transport, channel) = connect(receiver).await;
    let mut session = LogSession::new();

    assert_eq!(session.read_live(&channel, &mut NoProgress).await.unwrap(), ReadOutcome::Empty);
}

#[tokio::test]
async fn test_unanswered_status_reads_as_empty() {
    let receiver = Receiver {
        silent_status: true,
        ..two_sector_receiver()
    };
    let (_transport, channel) = connect(receiver).await;
    let mut session = LogSession::new();

    assert_eq!(session.read_live(&channel, &mut NoProgress).await.unwrap(), ReadOutcome::Empty);
}

#[tokio::test]
async fn test_closed_link_is_an_error() {
    let (mut transport, channel) = connect(two_sector_receiver()).await;
    transport.close().await;
    let mut session = LogSession::new();

    let err = session.read_live(&channel, &mut NoProgress).await.unwrap_err();
    assert!(err.is_link_error());
}

#[tokio::test]
async fn test_offline_matches_live() {
    let receiver = two_sector_receiver();
    let lines = block_lines(&receiver.image, receiver.last_address);
    let (_transport, channel) = connect(receiver).await;

    let mut live = LogSession::new();
    live.read_live(&channel, &mut NoProgress).await.unwrap();

    let mut offline = LogSession::new();
    let outcome = offline.read_offline(lines, &mut NoProgress);

    assert_eq!(outcome, ReadOutcome::Completed { records: 8 });
    assert_eq!(offline.records(), live.records());
    assert_eq!(offline.raw_blocks(), live.raw_blocks());
}
