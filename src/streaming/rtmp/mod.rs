//! RTMP (Real-Time Messaging Protocol) publishing transport
//!
//! Pushes FLV tags to an RTMP ingest server such as nginx-rtmp, YouTube
//! or Twitch.
//!
//! ## Features
//!
//! - Simple (unencrypted) handshake
//! - AMF0 encoding and decoding for commands and metadata
//! - Chunk writer with extended timestamps, chunk reader with per-stream state
//! - Publish sequence: connect, releaseStream, FCPublish, createStream, publish
//! - Control traffic: chunk size, acknowledgements, window size, ping
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flvcast_lib::streaming::rtmp::RtmpTransport;
//! use flvcast_lib::streaming::Transport;
//!
//! let mut transport = RtmpTransport::new();
//! transport.setup("rtmp://live.example.com/app/stream_key")?;
//! transport.enable_write();
//! transport.connect()?;
//! transport.connect_stream()?;
//!
//! // One or more complete FLV tags
//! # let tag_bytes: Vec<u8> = Vec::new();
//! transport.write(&tag_bytes)?;
//!
//! transport.release();
//! # Ok::<(), flvcast_lib::error::TransportError>(())
//! ```

pub mod amf0;
pub mod client;
pub mod protocol;

pub use amf0::{Amf0Decoder, Amf0Encoder, Amf0Value};
pub use client::{RtmpConfig, RtmpTransport, RtmpUrl};
pub use protocol::{ChunkReader, ChunkWriter, MessageType, RtmpHandshake, RtmpMessage};
