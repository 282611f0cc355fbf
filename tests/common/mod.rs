//! Common test utilities for flvcast integration tests
//!
//! Builds FLV byte streams tag by tag, including deliberately broken ones.

#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;

pub const AUDIO: u8 = 8;
pub const VIDEO: u8 = 9;
pub const SCRIPT: u8 = 18;

// ============================================================================
// FLV Builder
// ============================================================================

/// Incremental FLV writer for test fixtures
pub struct FlvBuilder {
    data: Vec<u8>,
}

impl FlvBuilder {
    /// Header with audio and video flags and the standard data offset
    pub fn new() -> Self {
        Self::with_flags(0x05)
    }

    pub fn with_flags(flags: u8) -> Self {
        let mut data = b"FLV\x01".to_vec();
        data.push(flags);
        data.extend_from_slice(&9u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        FlvBuilder { data }
    }

    /// Append a well-formed tag
    pub fn tag(self, tag_type: u8, timestamp: u32, payload: &[u8]) -> Self {
        let footer = 11 + payload.len() as u32;
        self.tag_with_footer(tag_type, timestamp, payload, footer)
    }

    /// Append a tag with an explicit trailing size
    pub fn tag_with_footer(
        mut self,
        tag_type: u8,
        timestamp: u32,
        payload: &[u8],
        footer: u32,
    ) -> Self {
        let size = payload.len() as u32;
        self.data.push(tag_type);
        self.data.extend_from_slice(&size.to_be_bytes()[1..]);
        self.data.extend_from_slice(&timestamp.to_be_bytes()[1..]);
        self.data.push((timestamp >> 24) as u8);
        self.data.extend_from_slice(&[0, 0, 0]);
        self.data.extend_from_slice(payload);
        self.data.extend_from_slice(&footer.to_be_bytes());
        self
    }

    /// Video tag with a small payload
    pub fn video(self, timestamp: u32) -> Self {
        self.tag(VIDEO, timestamp, &[0x17, 0x01, 0x00, 0x00, 0x00])
    }

    /// Audio tag with a small payload
    pub fn audio(self, timestamp: u32) -> Self {
        self.tag(AUDIO, timestamp, &[0xAF, 0x01, 0x21])
    }

    /// Append arbitrary bytes
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }

    /// Write to a temporary `.flv` file
    pub fn write_temp(self) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".flv").expect("Failed to create temp file");
        file.write_all(&self.data).expect("Failed to write FLV");
        file.flush().expect("Failed to flush FLV");
        file
    }
}

/// Size on the wire of a tag with `payload_len` bytes, footer included
pub fn tag_len(payload_len: usize) -> usize {
    11 + payload_len + 4
}

/// A video-only FLV with tags at the given timestamps
pub fn video_stream(timestamps: &[u32]) -> Vec<u8> {
    timestamps
        .iter()
        .fold(FlvBuilder::new(), |builder, &ts| builder.video(ts))
        .build()
}
