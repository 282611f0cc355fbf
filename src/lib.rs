//! flvcast - paced delivery of FLV files to a streaming server
//!
//! flvcast reads FLV containers tag by tag and pushes each tag to a
//! streaming transport, sleeping between tags so the stream goes out in
//! real time.
//!
//! # Architecture
//!
//! - `format`: FLV demuxing (header validation, tag iteration, timestamps)
//! - `source`: where FLV sources come from (files, playlists, scripts)
//! - `streaming`: the delivery engine and the RTMP transport
//! - `util`: cancellation and signal handling
//! - `error`: error types shared by all of the above

pub mod error;
pub mod format;
pub mod source;
pub mod streaming;
pub mod util;

pub use error::{Error, Result};

/// flvcast version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

impl Config {
    /// Log filter implied by the flags
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` takes precedence over the flags. Calling this more than once
/// keeps the first subscriber.
pub fn init(config: Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(config.log_level()))
        .map_err(|e| Error::Init(format!("Invalid log filter: {}", e)))?;

    // A subscriber installed earlier (tests, embedding) wins
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}
