//! Paced delivery engine
//!
//! Pulls tags from an [`FlvDemuxer`], writes them to a [`Transport`] and
//! sleeps between tags so the stream leaves at the rate its timestamps
//! describe.
//!
//! ```text
//! Idle ──connect──▶ Streaming ──end of source──▶ Draining ──next source──▶ Streaming
//!                       │                            │
//!                       └──error / cancel──▶ Closed ◀┘ no more sources
//! ```
//!
//! Everything runs on the calling thread. The only blocking points are the
//! pacing sleep and the transport's own I/O. Cancellation is observed once
//! per tag and between the short slices a [`ThreadPacer`] sleeps in.

use super::Transport;
use crate::error::{Error, Result, TransportError};
use crate::format::flv::{FlvDemuxer, MAX_PAYLOAD_SIZE};
use crate::source::SourceProvider;
use crate::util::CancellationToken;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Delivery engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shift each new source's timestamps past the previous source's end
    pub rebase_timestamps: bool,
    /// Largest tag payload accepted from a source
    pub max_payload_size: u32,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            rebase_timestamps: true,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Enable or disable timestamp rebasing across sources
    pub fn with_rebase(mut self, rebase: bool) -> Self {
        self.rebase_timestamps = rebase;
        self
    }

    /// Set the demuxer payload ceiling
    pub fn with_max_payload(mut self, limit: u32) -> Self {
        self.max_payload_size = limit;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Streaming,
    Draining,
    Closed,
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Every source was streamed to the end
    #[default]
    Completed,
    /// The cancellation token was set
    Cancelled,
}

/// Summary of a delivery session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: Outcome,
    pub tags_written: u64,
    pub bytes_written: u64,
    pub sources_played: u32,
    /// Last timestamp that advanced the pacing clock
    pub last_timestamp: u32,
}

/// Suspends the loop between tags
pub trait Pacer {
    fn pause(&mut self, delay: Duration);
}

/// Longest single sleep before the cancellation token is checked again
pub const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Sleeps the current thread, waking early once `cancel` is set
#[derive(Debug, Clone, Default)]
pub struct ThreadPacer {
    cancel: CancellationToken,
}

impl ThreadPacer {
    pub fn new(cancel: CancellationToken) -> Self {
        ThreadPacer { cancel }
    }
}

impl Pacer for ThreadPacer {
    fn pause(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }
}

/// Delay owed before moving past a tag stamped `timestamp`
///
/// Timestamps that do not advance past `previous` yield `None`; FLV does not
/// promise monotonic timestamps and going backwards is not an error.
pub fn pacing_delay(previous: u32, timestamp: u32) -> Option<Duration> {
    if timestamp > previous {
        Some(Duration::from_millis((timestamp - previous) as u64))
    } else {
        None
    }
}

/// Streams FLV sources to a transport in real time
pub struct DeliveryEngine<T, S, P = ThreadPacer>
where
    T: Transport,
    S: SourceProvider,
    P: Pacer,
{
    transport: T,
    sources: S,
    pacer: P,
    cancel: CancellationToken,
    config: EngineConfig,
    state: EngineState,
    released: bool,
    report: SessionReport,
}

impl<T, S> DeliveryEngine<T, S, ThreadPacer>
where
    T: Transport,
    S: SourceProvider,
{
    /// Create an engine that sleeps the calling thread between tags
    pub fn new(transport: T, sources: S, cancel: CancellationToken) -> Self {
        DeliveryEngine {
            transport,
            sources,
            pacer: ThreadPacer::new(cancel.clone()),
            cancel,
            config: EngineConfig::default(),
            state: EngineState::Idle,
            released: false,
            report: SessionReport::default(),
        }
    }
}

impl<T, S, P> DeliveryEngine<T, S, P>
where
    T: Transport,
    S: SourceProvider,
    P: Pacer,
{
    /// Replace the pacer
    pub fn with_pacer<Q: Pacer>(self, pacer: Q) -> DeliveryEngine<T, S, Q> {
        DeliveryEngine {
            transport: self.transport,
            sources: self.sources,
            pacer,
            cancel: self.cancel,
            config: self.config,
            state: self.state,
            released: self.released,
            report: self.report,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Progress so far; complete once [`run`](Self::run) returns
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Connect to `url` and stream every source
    ///
    /// The transport is released exactly once before this returns, whatever
    /// the outcome. Errors are fatal; nothing is retried.
    pub fn run(&mut self, url: &str) -> Result<SessionReport> {
        if self.state != EngineState::Idle {
            return Err(Error::invalid_state(format!(
                "engine cannot run from state {:?}",
                self.state
            )));
        }

        let result = self.run_session(url);
        self.shutdown();

        match &result {
            Ok(report) => info!(
                outcome = ?report.outcome,
                tags = report.tags_written,
                bytes = report.bytes_written,
                sources = report.sources_played,
                "Session finished"
            ),
            Err(e) => debug!("Session failed after {} tags: {}", self.report.tags_written, e),
        }
        result
    }

    fn run_session(&mut self, url: &str) -> Result<SessionReport> {
        if self.cancel.is_cancelled() {
            info!("Cancelled before connecting");
            self.report.outcome = Outcome::Cancelled;
            return Ok(self.report.clone());
        }

        self.transport.setup(url)?;
        self.transport.enable_write();
        self.transport.connect()?;
        self.transport.connect_stream()?;
        info!("Connected to {}", url);
        self.transition(EngineState::Streaming);

        let Some(mut demuxer) = self.open_next()? else {
            info!("No sources to stream");
            return Ok(self.report.clone());
        };

        let mut last_emitted: u32 = 0;
        let mut base: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping");
                self.report.outcome = Outcome::Cancelled;
                break;
            }

            if demuxer.next_tag()?.is_none() {
                debug!("Source finished after {} tags", demuxer.tags_read());
                self.transition(EngineState::Draining);
                match self.open_next()? {
                    Some(next) => {
                        demuxer = next;
                        if self.config.rebase_timestamps {
                            base = last_emitted;
                        } else {
                            last_emitted = 0;
                        }
                        self.transition(EngineState::Streaming);
                        continue;
                    }
                    None => break,
                }
            }

            if base != 0 {
                let rebased = demuxer.timestamp().wrapping_add(base);
                demuxer.set_timestamp(rebased);
            }
            let timestamp = demuxer.timestamp();
            let bytes = match demuxer.tag() {
                Some(tag) => tag.as_bytes(),
                None => return Err(Error::invalid_state("demuxer lost its current tag")),
            };

            let written = self.transport.write(bytes)?;
            if written == 0 {
                return Err(TransportError::Write("transport accepted no bytes".into()).into());
            }
            self.report.tags_written += 1;
            self.report.bytes_written += written as u64;

            if self.transport.is_readable()? {
                if let Some(unit) = self.transport.read_unit()? {
                    self.transport.dispatch(unit)?;
                }
            }

            if let Some(delay) = pacing_delay(last_emitted, timestamp) {
                trace!("Sleeping {} ms", delay.as_millis());
                self.pacer.pause(delay);
                last_emitted = timestamp;
                self.report.last_timestamp = timestamp;
            }
        }

        Ok(self.report.clone())
    }

    fn open_next(&mut self) -> Result<Option<FlvDemuxer<S::Reader>>> {
        let Some(source) = self.sources.next_source()? else {
            return Ok(None);
        };
        info!("Streaming {}", source.label);
        let demuxer =
            FlvDemuxer::open(source.reader)?.with_max_payload(self.config.max_payload_size);
        self.report.sources_played += 1;
        Ok(Some(demuxer))
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            debug!("Engine {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn shutdown(&mut self) {
        if !self.released {
            self.transport.release();
            self.released = true;
        }
        self.transition(EngineState::Closed);
    }
}
