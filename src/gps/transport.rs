// src/gps/transport.rs
//! Line oriented link to the receiver
//!
//! A single task owns the serial stream together with the line buffers.
//! Callers talk to it through a [`LinkHandle`]:
//!
//! ```text
//! caller ─┐                                   ┌─► ReceiveBuffer (bounded)
//! caller ─┼─► mpsc<Request> ─► link task ─────┼─► ResultLog ($PMTK lines)
//! caller ─┘        ▲               │          └─► SentLog
//!                  └── watch<usize> (result count, bumped per new response)
//! ```
//!
//! Waiting for a response is woken by the watch channel and re-checks at
//! least every [`RESULT_POLL_INTERVAL`].

use super::buffers::{RawLine, ReceiveBuffer, ResultLog, SentCommand, SentLog, DEFAULT_RECEIVE_CAPACITY};
use super::pmtk::{self, VENDOR_PREFIX};
use crate::config::{GpsConfig, SerialSettings};
use crate::error::{GpsError, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Upper bound on lines drained from the port before requests get a turn.
pub const MAX_LINES_PER_TICK: usize = 20;

/// Longest a waiter sleeps before re-checking the result log.
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_millis(5000);

const REQUEST_CHANNEL_CAPACITY: usize = 64;

const LINE_TERMINATOR: &str = "\r\n";

/// Returned by a successful send. `result_index` is the length of the result
/// log at the moment the command went out; responses to the command can only
/// appear at or after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendHandle {
    result_index: usize,
    sent_index: usize,
}

impl SendHandle {
    pub fn result_index(&self) -> usize {
        self.result_index
    }

    pub fn sent_index(&self) -> usize {
        self.sent_index
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub receive_capacity: usize,
    pub result_history_limit: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            result_history_limit: Some(10_000),
        }
    }
}

impl From<&GpsConfig> for TransportConfig {
    fn from(config: &GpsConfig) -> Self {
        Self {
            receive_capacity: config.receive_buffer_capacity,
            result_history_limit: config.result_history_limit,
        }
    }
}

/// Buffers owned by the link task. Handed back on close so history survives
/// a reconnect.
#[derive(Debug)]
struct LinkState {
    received: ReceiveBuffer,
    sent: SentLog,
    results: ResultLog,
}

impl LinkState {
    fn new(config: &TransportConfig) -> Self {
        Self {
            received: ReceiveBuffer::new(config.receive_capacity),
            sent: SentLog::new(),
            results: ResultLog::new(config.result_history_limit),
        }
    }

    fn accept(&mut self, text: String) {
        debug!(line = %text, "received");
        if text.starts_with(VENDOR_PREFIX) {
            if pmtk::checksum_mismatch(&text) {
                warn!(line = %text, "checksum mismatch");
            }
            self.results.push(text.clone());
        }
        self.received.push(RawLine::new(text));
    }

    async fn handle<W>(&mut self, request: Request, writer: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        match request {
            Request::Send { text, reply } => {
                let result_index = self.results.end();
                let outcome = match write_line(writer, &text).await {
                    Ok(()) => {
                        let sent_index = self.sent.record(&text);
                        debug!(command = %text, "sent");
                        Ok(SendHandle { result_index, sent_index })
                    }
                    Err(e) => {
                        warn!("Error writing to serial port: {}", e);
                        Err(GpsError::Io(e))
                    }
                };
                let _ = reply.send(outcome);
            }
            Request::ResolveStart { from, reply } => {
                let _ = reply.send(self.results.resolve_start(from));
            }
            Request::FindResult { prefix, from, reply } => {
                let _ = reply.send(self.results.find(&prefix, from).map(str::to_string));
            }
            Request::PopReceived { reply } => {
                let _ = reply.send(self.received.drain());
            }
            Request::PopSent { unacquired_only, reply } => {
                let _ = reply.send(self.sent.fetch(unacquired_only));
            }
            Request::Shutdown => {}
        }
    }
}

enum Request {
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendHandle>>,
    },
    ResolveStart {
        from: Option<usize>,
        reply: oneshot::Sender<usize>,
    },
    FindResult {
        prefix: String,
        from: usize,
        reply: oneshot::Sender<Option<String>>,
    },
    PopReceived {
        reply: oneshot::Sender<Vec<RawLine>>,
    },
    PopSent {
        unacquired_only: bool,
        reply: oneshot::Sender<Vec<SentCommand>>,
    },
    Shutdown,
}

async fn write_line<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(LINE_TERMINATOR.as_bytes()).await?;
    writer.flush().await
}

enum LineRead {
    Line(String),
    Closed,
    Failed(io::Error),
}

/// Turn the outcome of one `read_until` into a line. Bytes of a partially
/// received line stay in `pending` until the terminator shows up.
fn complete_line(read: io::Result<usize>, pending: &mut Vec<u8>) -> LineRead {
    match read {
        Ok(0) if pending.is_empty() => LineRead::Closed,
        Ok(_) => {
            let text = String::from_utf8_lossy(pending)
                .trim_end_matches(|c| c == '\r' || c == '\n')
                .to_string();
            pending.clear();
            LineRead::Line(text)
        }
        Err(e) => LineRead::Failed(e),
    }
}

/// The link task: owns the stream, serves requests, drains incoming lines.
async fn run_link<S>(
    stream: S,
    mut state: LinkState,
    mut requests: mpsc::Receiver<Request>,
    results: watch::Sender<usize>,
) -> LinkState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();
    let mut reading = true;

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => break,
                Some(request) => state.handle(request, &mut writer).await,
            },
            read = reader.read_until(b'\n', &mut pending), if reading => {
                let mut outcome = read;
                let mut drained = 0;
                loop {
                    match complete_line(outcome, &mut pending) {
                        LineRead::Line(text) => {
                            if !text.is_empty() {
                                state.accept(text);
                            }
                            drained += 1;
                        }
                        LineRead::Closed => {
                            info!("Device closed the link");
                            reading = false;
                            break;
                        }
                        LineRead::Failed(e) => {
                            warn!("Error reading from serial port: {}", e);
                            reading = false;
                            break;
                        }
                    }
                    if drained >= MAX_LINES_PER_TICK {
                        break;
                    }
                    // Take whatever else is already buffered, but never wait here
                    outcome = tokio::select! {
                        biased;
                        read = reader.read_until(b'\n', &mut pending) => read,
                        _ = std::future::ready(()) => break,
                    };
                }
                results.send_replace(state.results.end());
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error shutting down link: {}", e);
    }
    state
}

/// Cheaply cloneable access to a running link.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<Request>,
    results: watch::Receiver<usize>,
}

impl LinkHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| GpsError::NotOpen)?;
        response
            .await
            .map_err(|_| GpsError::Connection("link task stopped".to_string()))
    }

    /// Whether the link task is still accepting requests
    pub fn is_connected(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Write one command line (terminator appended).
    pub async fn send(&self, text: &str) -> Result<SendHandle> {
        self.call(|reply| Request::Send {
            text: text.to_string(),
            reply,
        })
        .await?
    }

    /// Copy out and clear the bounded receive buffer.
    pub async fn pop_receive_buffer(&self) -> Result<Vec<RawLine>> {
        self.call(|reply| Request::PopReceived { reply }).await
    }

    /// Sent commands, all of them or only those not fetched before.
    pub async fn pop_sent_buffer(&self, unacquired_only: bool) -> Result<Vec<SentCommand>> {
        self.call(|reply| Request::PopSent { unacquired_only, reply }).await
    }

    /// Wait for the first response starting with `prefix` at or after `from`.
    ///
    /// `from = None` starts at the newest response already received. Returns
    /// `Ok(None)` when `timeout` passes without a match.
    pub async fn wait_for_result(
        &self,
        prefix: &str,
        from: Option<usize>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        self.wait_for_result_with(prefix, from, timeout, || {}).await
    }

    /// Like [`wait_for_result`](Self::wait_for_result), calling `on_poll`
    /// after every unsuccessful check.
    pub async fn wait_for_result_with<F>(
        &self,
        prefix: &str,
        from: Option<usize>,
        timeout: Duration,
        mut on_poll: F,
    ) -> Result<Option<String>>
    where
        F: FnMut(),
    {
        let start = self
            .call(|reply| Request::ResolveStart { from, reply })
            .await?;
        let deadline = Instant::now() + timeout;
        let mut results = self.results.clone();
        let _ = results.borrow_and_update();

        loop {
            let found = self
                .call(|reply| Request::FindResult {
                    prefix: prefix.to_string(),
                    from: start,
                    reply,
                })
                .await?;
            if found.is_some() {
                return Ok(found);
            }

            on_poll();

            let now = Instant::now();
            if now >= deadline {
                debug!(prefix, "timed out waiting for response");
                return Ok(None);
            }
            let wait = RESULT_POLL_INTERVAL.min(deadline - now);
            let _ = tokio::time::timeout(wait, results.changed()).await;
        }
    }
}

struct ActiveLink {
    handle: LinkHandle,
    task: JoinHandle<LinkState>,
}

/// Owner of the physical link and, through its task, of the line buffers.
pub struct LineTransport {
    config: TransportConfig,
    port_name: Option<String>,
    link: Option<ActiveLink>,
    parked: Option<LinkState>,
}

impl LineTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            port_name: None,
            link: None,
            parked: None,
        }
    }

    /// Open a serial port and start the link task. Fails if a link is already
    /// open or the port cannot be opened; nothing is retried.
    pub async fn open(&mut self, port_name: &str, settings: &SerialSettings) -> Result<()> {
        if self.is_open() {
            return Err(GpsError::AlreadyOpen(self.port_name.clone().unwrap_or_default()));
        }
        settings.validate()?;

        info!(
            "Connecting to GPS on {} at {} baud ({} parity, {} handshake)...",
            port_name, settings.baud_rate, settings.parity, settings.handshake
        );

        let serial = tokio_serial::new(port_name, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(settings.parity.to_serial()?)
            .flow_control(settings.handshake.to_serial())
            .open_native_async()
            .map_err(|e| GpsError::Connection(format!("Failed to open serial port {}: {}", port_name, e)))?;

        self.attach(port_name, serial).await?;
        info!("Connected successfully!");
        Ok(())
    }

    /// Start the link task over an already opened stream.
    pub async fn attach<S>(&mut self, name: &str, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_open() {
            return Err(GpsError::AlreadyOpen(self.port_name.clone().unwrap_or_default()));
        }
        // A link whose task already ended still holds the buffers
        self.close().await;

        let state = match self.parked.take() {
            Some(state) => state,
            None => LinkState::new(&self.config),
        };
        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (results_tx, results) = watch::channel(state.results.end());
        let task = tokio::spawn(run_link(stream, state, requests_rx, results_tx));

        self.port_name = Some(name.to_string());
        self.link = Some(ActiveLink {
            handle: LinkHandle { requests, results },
            task,
        });
        Ok(())
    }

    /// Stop the link task and release the port. Errors while closing are
    /// logged and otherwise ignored.
    pub async fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.handle.requests.send(Request::Shutdown).await;
        match link.task.await {
            Ok(state) => self.parked = Some(state),
            Err(e) => warn!("Link task ended abnormally: {}", e),
        }
        if let Some(port) = &self.port_name {
            debug!("Closed {}", port);
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.as_ref().map_or(false, |link| link.handle.is_connected())
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Handle for issuing requests from other tasks.
    pub fn handle(&self) -> Result<LinkHandle> {
        self.link
            .as_ref()
            .map(|link| link.handle.clone())
            .ok_or(GpsError::NotOpen)
    }

    pub async fn send(&self, text: &str) -> Result<SendHandle> {
        self.handle()?.send(text).await
    }

    pub async fn pop_receive_buffer(&self) -> Result<Vec<RawLine>> {
        self.handle()?.pop_receive_buffer().await
    }

    pub async fn pop_sent_buffer(&self, unacquired_only: bool) -> Result<Vec<SentCommand>> {
        self.handle()?.pop_sent_buffer(unacquired_only).await
    }

    pub async fn wait_for_result(
        &self,
        prefix: &str,
        from: Option<usize>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        self.handle()?.wait_for_result(prefix, from, timeout).await
    }
}

impl Default for LineTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}
