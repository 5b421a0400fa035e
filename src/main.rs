// src/main.rs
//! MTK Datalog - PMTK command tool and track log downloader

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mtk_datalog::{
    config::{Handshake, Parity, SUPPORTED_BAUD_RATES},
    gps::{rate::Sentence, SentenceTiming},
    load_capture, save_capture, CancelToken, CommandChannel, GpsConfig, LineTransport, LogRecord, LogSession,
    ProgressSink, ReadOutcome, ReadProgress, TransportConfig, UpdateRateInfo,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mtk-datalog", version)]
#[command(about = "PMTK command tool and track log downloader for MTK GPS loggers")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Config file (default: ~/.config/mtk-datalog/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: AppCommand,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    #[arg(long, value_enum, global = true)]
    parity: Option<Parity>,

    #[arg(long, value_enum, global = true)]
    handshake: Option<Handshake>,
}

#[derive(Subcommand, Debug)]
enum AppCommand {
    /// Check that a receiver answers on the port
    Test,
    /// Show NMEA sentence timing and fix rate
    Rate,
    /// Set the position fix interval in milliseconds
    SetRate {
        /// Interval, snapped up to 200/500/1000/2000/3000/4000/5000
        ms: u32,
    },
    /// Change NMEA sentence timing, e.g. `set-timing GGA=1 GSV=5`
    SetTiming(SetTimingArgs),
    /// Show the log format register
    Format,
    /// Show log record count and last write address
    LogStatus,
    /// Download and decode the whole track log
    ReadLog(ReadLogArgs),
    /// Decode a previously captured log
    Decode(DecodeArgs),
    /// Print raw traffic to and from the receiver
    Monitor {
        /// How long to watch
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// List supported serial settings
    Settings,
}

#[derive(Args, Debug)]
struct SetTimingArgs {
    /// SENTENCE=N pairs; 0 disables, N emits every N fixes
    #[arg(required = true)]
    sentences: Vec<String>,

    /// Also set the fix interval in milliseconds
    #[arg(long)]
    fix_rate: Option<u32>,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Print records as JSON
    #[arg(long)]
    json: bool,

    /// Print at most this many records
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ReadLogArgs {
    /// Also write the raw block lines to this file
    #[arg(long)]
    capture: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Capture file, one block line each
    file: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

/// Progress line on stderr, cancelled by Ctrl-C
struct ConsoleProgress {
    cancel: CancelToken,
}

impl ConsoleProgress {
    fn with_ctrl_c() -> Self {
        let cancel = CancelToken::new();
        let handler = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                handler.cancel();
            }
        });
        Self { cancel }
    }
}

impl ProgressSink for ConsoleProgress {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&mut self, progress: ReadProgress) {
        eprint!(
            "\rBlock {}/{} ({:.0}%), {} records",
            progress.blocks_read,
            progress.blocks_total,
            progress.percent(),
            progress.records_decoded
        );
        if progress.blocks_read == progress.blocks_total {
            eprintln!();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GpsConfig::load_from(path),
        None => GpsConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(cli.verbose, &config.log_level);

    config.update_serial(
        cli.connection.port.clone(),
        cli.connection.baud,
        cli.connection.parity,
        cli.connection.handshake,
    );
    config.validate().context("Invalid serial settings")?;

    match cli.command {
        AppCommand::Decode(args) => decode_capture(&args),
        AppCommand::Settings => {
            print_settings();
            Ok(())
        }
        command => {
            let (mut transport, channel) = connect(&config).await?;
            let result = run_command(command, &transport, &channel).await;
            transport.close().await;
            result
        }
    }
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &GpsConfig) -> Result<(LineTransport, CommandChannel)> {
    let Some(port) = config.serial_port.as_deref() else {
        bail!("No serial port given (use --port or set serial_port in the config file)");
    };

    let mut transport = LineTransport::new(TransportConfig::from(config));
    transport
        .open(port, &config.serial)
        .await
        .with_context(|| format!("Failed to open {}", port))?;

    let channel = CommandChannel::from_config(transport.handle()?, config);
    Ok((transport, channel))
}

async fn run_command(command: AppCommand, transport: &LineTransport, channel: &CommandChannel) -> Result<()> {
    match command {
        AppCommand::Test => {
            channel.test_connection().await.context("Connection test failed")?;
            println!("Receiver is responding");
        }
        AppCommand::Rate => {
            let info = channel.query_update_rate().await.context("Failed to read update rate")?;
            print_update_rate(&info);
        }
        AppCommand::SetRate { ms } => {
            let snapped = channel.set_fix_rate(ms).await.context("Failed to set fix rate")?;
            println!("Fix rate set to {} ms", snapped);
        }
        AppCommand::SetTiming(args) => set_timing(channel, &args).await?,
        AppCommand::Format => {
            let register = channel.query_format_register().await.context("Failed to read format register")?;
            println!("Format register: {}", register);
            println!("Record size:     {} bytes", register.needed_size(true));
        }
        AppCommand::LogStatus => {
            let count = channel.query_log_record_count().await.context("Failed to read record count")?;
            let address = channel.query_log_last_address().await.context("Failed to read log address")?;
            println!("Records:      {}", count);
            println!("Last address: 0x{:08X}", address);
        }
        AppCommand::ReadLog(args) => read_log(channel, &args).await?,
        AppCommand::Monitor { seconds } => monitor(transport, Duration::from_secs(seconds)).await?,
        // Handled before connecting
        AppCommand::Decode(_) | AppCommand::Settings => {}
    }
    Ok(())
}

async fn set_timing(channel: &CommandChannel, args: &SetTimingArgs) -> Result<()> {
    let mut timing: SentenceTiming = channel
        .query_sentence_timing()
        .await
        .context("Failed to read current sentence timing")?;

    for assignment in &args.sentences {
        let Some((name, every)) = assignment.split_once('=') else {
            bail!("Expected SENTENCE=N, got '{}'", assignment);
        };
        let sentence: Sentence = name.parse()?;
        let every: u32 = every
            .parse()
            .with_context(|| format!("Invalid timing '{}' for {}", every, sentence))?;
        timing.set(sentence, every);
    }

    match args.fix_rate {
        Some(ms) => {
            let info = UpdateRateInfo::new(timing, ms);
            channel.set_update_rate(&info).await.context("Failed to set update rate")?;
            print_update_rate(&info);
        }
        None => {
            channel.set_sentence_timing(&timing).await.context("Failed to set sentence timing")?;
            println!("Sentence timing updated");
        }
    }
    Ok(())
}

async fn read_log(channel: &CommandChannel, args: &ReadLogArgs) -> Result<()> {
    let mut progress = ConsoleProgress::with_ctrl_c();
    let mut session = LogSession::new();

    let outcome = session
        .read_live(channel, &mut progress)
        .await
        .context("Log download failed, nothing kept")?;

    if let Some(path) = &args.capture {
        if !session.raw_blocks().is_empty() {
            save_capture(path, session.raw_blocks())
                .with_context(|| format!("Failed to write capture {}", path.display()))?;
            info!("Wrote {} blocks to {}", session.raw_blocks().len(), path.display());
        }
    }

    print_outcome(&session, outcome, &args.output)
}

fn decode_capture(args: &DecodeArgs) -> Result<()> {
    let lines = load_capture(&args.file)
        .with_context(|| format!("Failed to read capture {}", args.file.display()))?;
    let mut progress = ConsoleProgress { cancel: CancelToken::new() };
    let mut session = LogSession::new();
    let outcome = session.read_offline(lines, &mut progress);
    print_outcome(&session, outcome, &args.output)
}

async fn monitor(transport: &LineTransport, duration: Duration) -> Result<()> {
    let link = transport.handle()?;
    let deadline = tokio::time::Instant::now() + duration;
    let mut interval = tokio::time::interval(Duration::from_millis(250));

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        for sent in link.pop_sent_buffer(true).await? {
            println!("{} > {}", sent.sent_at.format("%H:%M:%S%.3f"), sent.text);
        }
        for line in link.pop_receive_buffer().await? {
            println!("{} < {}", line.received_at.format("%H:%M:%S%.3f"), line.text);
        }
    }
    Ok(())
}

fn print_update_rate(info: &UpdateRateInfo) {
    println!("Fix rate: {} ms", info.fix_rate_ms());
    println!("Sentence timing (0 = off, N = every N fixes):");
    for sentence in Sentence::ALL {
        println!(
            "  {:<5} {:>2}  {}",
            sentence.name(),
            info.timing.get(sentence),
            sentence.description()
        );
    }
}

fn print_settings() {
    let bauds: Vec<String> = SUPPORTED_BAUD_RATES.iter().map(|b| b.to_string()).collect();
    println!("Baud rates: {}", bauds.join(", "));
    let parities: Vec<&str> = Parity::ALL.iter().map(|p| p.label()).collect();
    println!("Parity:     {}", parities.join(", "));
    let handshakes: Vec<&str> = Handshake::ALL.iter().map(|h| h.label()).collect();
    println!("Handshake:  {}", handshakes.join(", "));
}

fn print_outcome(session: &LogSession, outcome: ReadOutcome, output: &OutputArgs) -> Result<()> {
    match outcome {
        ReadOutcome::Empty => println!("No log data"),
        ReadOutcome::Cancelled => println!("Cancelled, nothing kept"),
        ReadOutcome::Completed { records } => {
            let all = session.records();
            let shown = &all[..output.limit.map_or(all.len(), |limit| limit.min(all.len()))];
            if output.json {
                println!("{}", serde_json::to_string_pretty(shown)?);
            } else {
                print_records(shown);
                println!("{} records", records);
            }
        }
    }
    Ok(())
}

fn format_optional<T: std::fmt::Display>(value: Option<T>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn print_records(records: &[LogRecord]) {
    println!(
        "{:<24} {:>11} {:>12} {:>8} {:>7}  {}",
        "Time (UTC)", "Latitude", "Longitude", "Height", "Speed", "Fix"
    );
    for record in records {
        let time = record
            .timestamp()
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>11} {:>12} {:>8} {:>7}  {}",
            time,
            format_optional(record.latitude, 6),
            format_optional(record.longitude, 6),
            format_optional(record.height, 1),
            format_optional(record.speed, 1),
            record.fix_description()
        );
    }
}
