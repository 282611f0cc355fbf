//! flvcast CLI
//!
//! Streams FLV files to an RTMP server at their natural rate

use anyhow::Context;
use clap::{ArgGroup, Parser};
use flvcast_lib::format::flv::MAX_PAYLOAD_SIZE;
use flvcast_lib::source::{Playlist, ScriptSource, SourceProvider};
use flvcast_lib::streaming::engine::{DeliveryEngine, EngineConfig, Outcome, SessionReport};
use flvcast_lib::streaming::rtmp::RtmpTransport;
use flvcast_lib::util::CancellationToken;
use flvcast_lib::{init, Config};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "flvcast")]
#[command(about = "Stream FLV files to an RTMP server in real time", long_about = None)]
#[command(version)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["file", "playlist", "exec"])
))]
struct Cli {
    /// Stream a single FLV file
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Stream the files listed in PLAYLIST, one per line
    #[arg(short, long, value_name = "PLAYLIST")]
    playlist: Option<PathBuf>,

    /// Run SCRIPT to get the path of each next file
    #[arg(short = 'e', long = "exec", value_name = "SCRIPT")]
    exec: Option<PathBuf>,

    /// Number of passes over the input, 0 loops forever
    #[arg(short, long, value_name = "LOOPS", conflicts_with = "exec")]
    loops: Option<u32>,

    /// Shuffle the playlist on every pass
    #[arg(short, long, requires = "playlist")]
    shuffle: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Keep each file's own timestamps instead of continuing the previous file's
    #[arg(long)]
    no_rebase: bool,

    /// Largest tag payload accepted from a file, in bytes
    #[arg(
        long,
        value_name = "BYTES",
        default_value_t = MAX_PAYLOAD_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=0xFF_FFFF)
    )]
    max_payload: u32,

    /// Destination, e.g. rtmp://live.example.com/app/stream_key
    #[arg(value_name = "URL")]
    url: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        verbose: cli.verbose,
        debug: cli.debug,
    };
    init(config)?;

    info!("flvcast v{}", flvcast_lib::VERSION);

    let cancel = CancellationToken::new();
    if let Err(e) = cancel.install_signal_handlers() {
        warn!("Could not install signal handlers: {}", e);
    }

    let engine_config = EngineConfig::new()
        .with_rebase(!cli.no_rebase)
        .with_max_payload(cli.max_payload);

    let report = if let Some(script) = &cli.exec {
        stream(
            ScriptSource::new(script),
            &cli.url,
            engine_config,
            cancel,
        )?
    } else {
        stream(playlist(&cli)?, &cli.url, engine_config, cancel)?
    };

    match report.outcome {
        Outcome::Completed => info!(
            "Streamed {} tags from {} source(s)",
            report.tags_written, report.sources_played
        ),
        Outcome::Cancelled => info!("Stopped after {} tags", report.tags_written),
    }

    Ok(())
}

/// Build the playlist for `-f` or `-p`
fn playlist(cli: &Cli) -> anyhow::Result<Playlist> {
    let playlist = match (&cli.file, &cli.playlist) {
        (Some(file), _) => Playlist::single(file),
        (None, Some(list)) => Playlist::from_file(list)
            .with_context(|| format!("Failed to load playlist {}", list.display()))?
            .with_shuffle(cli.shuffle),
        (None, None) => anyhow::bail!("No input given"),
    };
    Ok(playlist.with_loops(cli.loops.unwrap_or(1)))
}

fn stream<S: SourceProvider>(
    sources: S,
    url: &str,
    config: EngineConfig,
    cancel: CancellationToken,
) -> anyhow::Result<SessionReport> {
    let mut engine =
        DeliveryEngine::new(RtmpTransport::new(), sources, cancel).with_config(config);
    let report = engine
        .run(url)
        .with_context(|| format!("Streaming to {} failed", url))?;
    Ok(report)
}
