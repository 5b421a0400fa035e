// src/gps/command.rs
//! PMTK command catalog on top of a link
//!
//! Each operation sends one command and waits for its response, searching
//! only responses that arrived after the send. Nothing is retried: a timeout
//! surfaces as [`GpsError::Timeout`], a negative acknowledgement as
//! [`GpsError::Rejected`].

use super::pmtk::{self, AckStatus};
use super::rate::{self, SentenceTiming, UpdateRateInfo};
use super::transport::{LinkHandle, SendHandle};
use crate::config::GpsConfig;
use crate::datalog::hex;
use crate::datalog::register::FormatRegister;
use crate::datalog::sector::{BLOCK_PAYLOAD_PREFIX, BLOCK_SIZE};
use crate::error::{GpsError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The connection test is answered quickly or not at all.
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_millis(1000);

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Clone)]
pub struct CommandChannel {
    link: LinkHandle,
    command_timeout: Duration,
    block_timeout: Duration,
}

impl CommandChannel {
    pub fn new(link: LinkHandle) -> Self {
        Self {
            link,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }

    pub fn from_config(link: LinkHandle, config: &GpsConfig) -> Self {
        Self::new(link).with_timeouts(
            Duration::from_millis(config.command_timeout_ms),
            Duration::from_millis(config.block_timeout_ms),
        )
    }

    pub fn with_timeouts(mut self, command_timeout: Duration, block_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self.block_timeout = block_timeout;
        self
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    async fn send(&self, command: &str) -> Result<SendHandle> {
        let sent = self.link.send(command).await?;
        debug!("Sent {} (results from #{})", command, sent.result_index());
        Ok(sent)
    }

    async fn wait<F>(&self, prefix: &str, sent: SendHandle, timeout: Duration, on_poll: F) -> Result<String>
    where
        F: FnMut(),
    {
        self.link
            .wait_for_result_with(prefix, Some(sent.result_index()), timeout, on_poll)
            .await?
            .ok_or_else(|| GpsError::Timeout(prefix.to_string()))
    }

    /// Send a query and return the first response starting with `response_prefix`.
    async fn query(&self, number: &str, response_prefix: &str) -> Result<String> {
        let command = pmtk::build_command(number, &[]);
        let sent = self.send(&command).await?;
        self.wait(response_prefix, sent, self.command_timeout, || {}).await
    }

    fn check_ack(command: &str, response: &str, ack_prefix: &str) -> Result<()> {
        match pmtk::ack_status(response, ack_prefix) {
            Some(AckStatus::Succeeded) => Ok(()),
            Some(status) => {
                warn!("{} answered {}", command, status);
                Err(GpsError::Rejected {
                    command: command.to_string(),
                    status: status.code(),
                })
            }
            None => Err(GpsError::Parse(format!("malformed acknowledgement '{}'", response))),
        }
    }

    /// Send a command and require a success acknowledgement.
    async fn execute(&self, command: &str, ack_prefix: &str, timeout: Duration) -> Result<()> {
        let sent = self.send(command).await?;
        let response = self.wait(ack_prefix, sent, timeout, || {}).await?;
        Self::check_ack(command, &response, ack_prefix)
    }

    /// `$PMTK000`: is a receiver listening?
    pub async fn test_connection(&self) -> Result<()> {
        let command = pmtk::build_command("000", &[]);
        let timeout = self.command_timeout.min(CONNECTION_TEST_TIMEOUT);
        self.execute(&command, &pmtk::ack_prefix("0"), timeout).await?;
        info!("Receiver responded to connection test");
        Ok(())
    }

    /// `$PMTK414` → `$PMTK514`
    pub async fn query_sentence_timing(&self) -> Result<SentenceTiming> {
        let response = self.query("414", "$PMTK514").await?;
        SentenceTiming::parse_response(&response)
    }

    /// `$PMTK400` → `$PMTK500`, snapped to a supported interval.
    pub async fn query_fix_rate(&self) -> Result<u32> {
        let response = self.query("400", "$PMTK500").await?;
        rate::parse_fix_rate(&response).map(rate::snap_fix_rate)
    }

    /// Sentence timing plus fix rate. The timing is required; when the fix
    /// rate cannot be read the default interval is kept.
    pub async fn query_update_rate(&self) -> Result<UpdateRateInfo> {
        let timing = self.query_sentence_timing().await?;
        let mut info = UpdateRateInfo::new(timing, rate::DEFAULT_FIX_RATE_MS);

        match self.query_fix_rate().await {
            Ok(ms) => info.set_fix_rate_ms(ms),
            Err(e) if e.is_link_error() => return Err(e),
            Err(e) => warn!("Fix rate unavailable ({}), assuming {} ms", e, info.fix_rate_ms()),
        }
        Ok(info)
    }

    /// `$PMTK314,...` acknowledged by `$PMTK001,314,3`.
    pub async fn set_sentence_timing(&self, timing: &SentenceTiming) -> Result<()> {
        self.execute(&timing.to_command(), &pmtk::ack_prefix("314"), self.command_timeout)
            .await
    }

    /// `$PMTK300,<ms>,0,0,0,0` acknowledged by `$PMTK001,300,3`. Returns the
    /// interval actually sent after snapping.
    pub async fn set_fix_rate(&self, ms: u32) -> Result<u32> {
        let snapped = rate::snap_fix_rate(ms);
        self.execute(&rate::fix_rate_command(snapped), &pmtk::ack_prefix("300"), self.command_timeout)
            .await?;
        Ok(snapped)
    }

    /// Sentence timing first, then the fix rate. Both must be acknowledged.
    pub async fn set_update_rate(&self, info: &UpdateRateInfo) -> Result<()> {
        self.set_sentence_timing(&info.timing).await?;
        self.set_fix_rate(info.fix_rate_ms()).await?;
        Ok(())
    }

    /// `$PMTK182,2,2` → `$PMTK182,3,2,<8 hex>`
    pub async fn query_format_register(&self) -> Result<FormatRegister> {
        let response = self.query("182,2,2", "$PMTK182,3,2").await?;
        let value = pmtk::fields(&response)
            .get(3)
            .copied()
            .ok_or_else(|| GpsError::Parse(format!("no register value in '{}'", response)))?;
        FormatRegister::parse(value)
    }

    /// `$PMTK182,2,10` → `$PMTK182,3,10,<hex count>`
    pub async fn query_log_record_count(&self) -> Result<u32> {
        let response = self.query("182,2,10", "$PMTK182,3,10").await?;
        Self::hex_field(&response)
    }

    /// `$PMTK182,2,8` → `$PMTK182,3,8,<hex address>`
    pub async fn query_log_last_address(&self) -> Result<u32> {
        let response = self.query("182,2,8", "$PMTK182,3,8").await?;
        Self::hex_field(&response)
    }

    fn hex_field(response: &str) -> Result<u32> {
        pmtk::fields(response)
            .get(3)
            .and_then(|value| hex::parse_u32(value))
            .ok_or_else(|| GpsError::Parse(format!("no hex value in '{}'", response)))
    }

    /// Read the 2 KiB block at `address`. Returns the full
    /// `$PMTK182,8,<ADDR8>,...` payload line.
    pub async fn read_log_block(&self, address: u32) -> Result<String> {
        self.read_log_block_with(address, || {}).await
    }

    /// Like [`read_log_block`](Self::read_log_block), calling `on_poll`
    /// while waiting.
    pub async fn read_log_block_with<F>(&self, address: u32, mut on_poll: F) -> Result<String>
    where
        F: FnMut(),
    {
        let command = pmtk::build_command(
            "182",
            &["7".to_string(), format!("{:X}", address), format!("{:X}", BLOCK_SIZE)],
        );
        let sent = self.send(&command).await?;

        // The ack precedes the payload; both are searched from the send point
        let ack_prefix = pmtk::ack_prefix("182,7,");
        let ack = self.wait(&ack_prefix, sent, self.block_timeout, &mut on_poll).await?;
        Self::check_ack(&command, &ack, &ack_prefix)?;

        let payload_prefix = format!("{}{:08X}", BLOCK_PAYLOAD_PREFIX, address);
        let payload = self.wait(&payload_prefix, sent, self.block_timeout, &mut on_poll).await?;
        debug!("Block {:08X}: {} chars", address, payload.len());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::rate::Sentence;
    use crate::gps::transport::{LineTransport, TransportConfig};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn sentence(body: &str) -> String {
        format!("${}*{}", body, pmtk::checksum(body))
    }

    /// Answer each command line with whatever `respond` returns.
    fn spawn_device<F>(stream: DuplexStream, respond: F) -> Arc<Mutex<Vec<String>>>
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(stream);
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log.lock().unwrap().push(line.clone());
                for reply in respond(&line) {
                    if writer.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        });
        seen
    }

    async fn channel_with<F>(respond: F) -> (LineTransport, CommandChannel, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        let (client, device) = tokio::io::duplex(64 * 1024);
        let seen = spawn_device(device, respond);
        let mut transport = LineTransport::new(TransportConfig::default());
        transport.attach("sim", client).await.unwrap();
        let channel = CommandChannel::new(transport.handle().unwrap())
            .with_timeouts(Duration::from_millis(300), Duration::from_millis(300));
        (transport, channel, seen)
    }

    #[tokio::test]
    async fn test_connection_ok() {
        let (_transport, channel, seen) = channel_with(|line| {
            if line.starts_with("$PMTK000") {
                vec![sentence("PMTK001,0,3")]
            } else {
                vec![]
            }
        })
        .await;

        channel.test_connection().await.unwrap();
        assert_eq!(seen.lock().unwrap()[0], "$PMTK000*32");
    }

    #[tokio::test]
    async fn test_connection_rejected() {
        let (_transport, channel, _) = channel_with(|_| vec![sentence("PMTK001,0,1")]).await;

        let err = channel.test_connection().await.unwrap_err();
        assert!(matches!(err, GpsError::Rejected { status: 1, .. }));
    }

    #[tokio::test]
    async fn test_connection_timeout() {
        let (_transport, channel, _) = channel_with(|_| vec![]).await;

        let err = channel.test_connection().await.unwrap_err();
        assert!(matches!(err, GpsError::Timeout(ref prefix) if prefix == "$PMTK001,0"));
        assert!(!err.is_link_error());
    }

    #[tokio::test]
    async fn test_query_update_rate() {
        let (_transport, channel, _) = channel_with(|line| {
            if line.starts_with("$PMTK414") {
                vec![sentence("PMTK514,0,1,0,1,1,5,0,0,0,0,0,0,0,0,0,0,0,0")]
            } else if line.starts_with("$PMTK400") {
                vec![sentence("PMTK500,200,0,0,0,0")]
            } else {
                vec![]
            }
        })
        .await;

        let info = channel.query_update_rate().await.unwrap();
        assert_eq!(info.timing.get(Sentence::Gsv), 5);
        assert_eq!(info.timing.get(Sentence::Rmc), 1);
        assert_eq!(info.fix_rate_ms(), 200);
    }

    #[tokio::test]
    async fn test_query_update_rate_keeps_default_rate() {
        let (_transport, channel, _) = channel_with(|line| {
            if line.starts_with("$PMTK414") {
                vec![sentence("PMTK514,1,1,1,1,1,1,0,0,0,0,0,0,0,0,0,0,0,0")]
            } else {
                vec![]
            }
        })
        .await;

        let info = channel.query_update_rate().await.unwrap();
        assert_eq!(info.fix_rate_ms(), 1000);
        assert_eq!(info.timing.get(Sentence::Gll), 1);
    }

    #[tokio::test]
    async fn test_set_update_rate() {
        let (_transport, channel, seen) = channel_with(|line| {
            if line.starts_with("$PMTK314") {
                vec![sentence("PMTK001,314,3")]
            } else if line.starts_with("$PMTK300") {
                vec![sentence("PMTK001,300,3")]
            } else {
                vec![]
            }
        })
        .await;

        let mut info = UpdateRateInfo::default();
        info.timing.set(Sentence::Rmc, 1);
        info.set_fix_rate_ms(450);
        channel.set_update_rate(&info).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("$PMTK314,0,1,0"));
        assert_eq!(seen[1], "$PMTK300,500,0,0,0,0*28");
    }

    #[tokio::test]
    async fn test_set_fix_rate_failure() {
        let (_transport, channel, _) = channel_with(|_| vec![sentence("PMTK001,300,2")]).await;

        let err = channel.set_fix_rate(1000).await.unwrap_err();
        assert!(matches!(err, GpsError::Rejected { status: 2, .. }));
    }

    #[tokio::test]
    async fn test_log_status_queries() {
        let (_transport, channel, _) = channel_with(|line| {
            if line.starts_with("$PMTK182,2,2*") {
                vec![sentence("PMTK182,3,2,0002003F")]
            } else if line.starts_with("$PMTK182,2,10") {
                vec![sentence("PMTK182,3,10,1A")]
            } else if line.starts_with("$PMTK182,2,8") {
                vec![sentence("PMTK182,3,8,0001F000")]
            } else {
                vec![]
            }
        })
        .await;

        let register = channel.query_format_register().await.unwrap();
        assert_eq!(register.needed_size(true), 34);
        assert_eq!(channel.query_log_record_count().await.unwrap(), 26);
        assert_eq!(channel.query_log_last_address().await.unwrap(), 0x1F000);
    }

    #[tokio::test]
    async fn test_read_log_block() {
        let (_transport, channel, seen) = channel_with(|line| {
            if line.starts_with("$PMTK182,7,800,") {
                vec![
                    // A stale payload for another block must not match
                    sentence("PMTK182,8,00000000,DEAD"),
                    sentence("PMTK001,182,7,3"),
                    sentence("PMTK182,8,00000800,0102FFFF"),
                ]
            } else {
                vec![]
            }
        })
        .await;

        let payload = channel.read_log_block(0x800).await.unwrap();
        assert!(payload.starts_with("$PMTK182,8,00000800,0102FFFF"));
        assert_eq!(seen.lock().unwrap()[0], "$PMTK182,7,800,800*22");
    }

    #[tokio::test]
    async fn test_read_log_block_nak() {
        let (_transport, channel, _) = channel_with(|_| vec![sentence("PMTK001,182,7,2")]).await;

        let err = channel.read_log_block(0).await.unwrap_err();
        assert!(matches!(err, GpsError::Rejected { status: 2, .. }));
    }

    #[tokio::test]
    async fn test_read_log_block_missing_payload() {
        let (_transport, channel, _) = channel_with(|_| vec![sentence("PMTK001,182,7,3")]).await;

        let mut polls = 0;
        let err = channel.read_log_block_with(0, || polls += 1).await.unwrap_err();
        assert!(matches!(err, GpsError::Timeout(ref prefix) if prefix == "$PMTK182,8,00000000"));
        assert!(polls > 0);
    }

    #[tokio::test]
    async fn test_closed_link_is_link_error() {
        let (mut transport, channel, _) = channel_with(|_| vec![]).await;
        transport.close().await;

        let err = channel.test_connection().await.unwrap_err();
        assert!(err.is_link_error());
    }
}
