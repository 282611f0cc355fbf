//! Paced delivery of FLV tags to a streaming transport
//!
//! - [`engine`] drives the read → write → poll → sleep loop
//! - [`rtmp`] is the RTMP publishing transport
//!
//! The engine only talks to the network through the [`Transport`] trait, so
//! any session type that can take framed FLV tags can be plugged in.

pub mod engine;
pub mod rtmp;

pub use engine::{
    DeliveryEngine, EngineConfig, EngineState, Outcome, Pacer, SessionReport, ThreadPacer,
};

use crate::error::TransportError;

/// A protocol session that accepts framed FLV tags
///
/// Lifecycle: [`setup`](Transport::setup) → [`enable_write`](Transport::enable_write)
/// → [`connect`](Transport::connect) → [`connect_stream`](Transport::connect_stream),
/// then any number of writes and polls, then [`release`](Transport::release).
pub trait Transport {
    /// One inbound protocol unit
    type Unit;

    /// Parse and remember the target URL
    fn setup(&mut self, url: &str) -> Result<(), TransportError>;

    /// Mark the session as publishing rather than playing
    fn enable_write(&mut self);

    /// Establish the network connection and protocol session
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Open the media stream on the established session
    fn connect_stream(&mut self) -> Result<(), TransportError>;

    /// Send one or more complete FLV tags, returning the bytes consumed
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Zero-timeout readiness check for inbound data
    fn is_readable(&mut self) -> Result<bool, TransportError>;

    /// Read one inbound unit; `None` if only part of one has arrived
    fn read_unit(&mut self) -> Result<Option<Self::Unit>, TransportError>;

    /// Hand an inbound unit to the session's own protocol handling
    fn dispatch(&mut self, unit: Self::Unit) -> Result<(), TransportError>;

    /// Tear the session down; calling it again is a no-op
    fn release(&mut self);
}
