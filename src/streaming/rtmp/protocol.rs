//! RTMP protocol implementation
//!
//! Core RTMP protocol components including handshake, chunking, and messages

use crate::error::TransportError;
use std::collections::HashMap;
use std::io::{Read, Write};
use tracing::trace;

type Result<T> = std::result::Result<T, TransportError>;

/// RTMP handshake version
pub const RTMP_VERSION: u8 = 3;

/// Default chunk size
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Handshake packet size (C1/S1/C2/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Timestamp field value signalling a 4-byte extended timestamp
const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;

/// RTMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    SetChunkSize = 1,
    Abort = 2,
    Acknowledgement = 3,
    UserControl = 4,
    WindowAckSize = 5,
    SetPeerBandwidth = 6,
    Audio = 8,
    Video = 9,
    DataAmf3 = 15,
    SharedObjectAmf3 = 16,
    CommandAmf3 = 17,
    DataAmf0 = 18,
    SharedObjectAmf0 = 19,
    CommandAmf0 = 20,
    Aggregate = 22,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::SetChunkSize),
            2 => Some(MessageType::Abort),
            3 => Some(MessageType::Acknowledgement),
            4 => Some(MessageType::UserControl),
            5 => Some(MessageType::WindowAckSize),
            6 => Some(MessageType::SetPeerBandwidth),
            8 => Some(MessageType::Audio),
            9 => Some(MessageType::Video),
            15 => Some(MessageType::DataAmf3),
            16 => Some(MessageType::SharedObjectAmf3),
            17 => Some(MessageType::CommandAmf3),
            18 => Some(MessageType::DataAmf0),
            19 => Some(MessageType::SharedObjectAmf0),
            20 => Some(MessageType::CommandAmf0),
            22 => Some(MessageType::Aggregate),
            _ => None,
        }
    }
}

/// User control event types
pub mod user_control {
    pub const STREAM_BEGIN: u16 = 0;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

/// RTMP message
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    pub timestamp: u32,
    pub message_length: u32,
    pub message_type: MessageType,
    pub message_stream_id: u32,
    pub payload: Vec<u8>,
}

impl RtmpMessage {
    pub fn new(message_type: MessageType, stream_id: u32, payload: Vec<u8>) -> Self {
        RtmpMessage {
            timestamp: 0,
            message_length: payload.len() as u32,
            message_type,
            message_stream_id: stream_id,
            payload,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Protocol control: Set Chunk Size
    pub fn set_chunk_size(size: u32) -> Self {
        Self::new(
            MessageType::SetChunkSize,
            0,
            (size & 0x7FFF_FFFF).to_be_bytes().to_vec(),
        )
    }

    /// Protocol control: Acknowledgement of `sequence` bytes received
    pub fn acknowledgement(sequence: u32) -> Self {
        Self::new(MessageType::Acknowledgement, 0, sequence.to_be_bytes().to_vec())
    }

    /// Protocol control: Window Acknowledgement Size
    pub fn window_ack_size(size: u32) -> Self {
        Self::new(MessageType::WindowAckSize, 0, size.to_be_bytes().to_vec())
    }

    /// User control: ping response echoing the request timestamp
    pub fn ping_response(timestamp: u32) -> Self {
        let mut payload = user_control::PING_RESPONSE.to_be_bytes().to_vec();
        payload.extend_from_slice(&timestamp.to_be_bytes());
        Self::new(MessageType::UserControl, 0, payload)
    }

    /// Read the big-endian u32 most control messages carry
    pub fn control_value(&self) -> Option<u32> {
        let b = self.payload.get(0..4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// RTMP chunk format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    Type0 = 0, // 11 bytes header
    Type1 = 1, // 7 bytes header
    Type2 = 2, // 3 bytes header
    Type3 = 3, // 0 bytes header (continuation)
}

/// RTMP chunk header
#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub format: ChunkFormat,
    pub chunk_stream_id: u32,
    pub timestamp: u32,
    pub message_length: u32,
    pub message_type: u8,
    pub message_stream_id: u32,
}

impl ChunkHeader {
    /// Create a Type 0 chunk header (full header)
    pub fn type0(chunk_stream_id: u32, message: &RtmpMessage) -> Self {
        ChunkHeader {
            format: ChunkFormat::Type0,
            chunk_stream_id,
            timestamp: message.timestamp,
            message_length: message.message_length,
            message_type: message.message_type as u8,
            message_stream_id: message.message_stream_id,
        }
    }

    /// Type 3 continuation header for the same message
    pub fn continuation(&self) -> Self {
        ChunkHeader {
            format: ChunkFormat::Type3,
            ..self.clone()
        }
    }

    /// Encode chunk header to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(18);

        // Basic header
        let fmt = (self.format as u8) << 6;
        if self.chunk_stream_id < 64 {
            bytes.push(fmt | (self.chunk_stream_id as u8));
        } else if self.chunk_stream_id < 320 {
            bytes.push(fmt);
            bytes.push((self.chunk_stream_id - 64) as u8);
        } else {
            bytes.push(fmt | 1);
            let id = self.chunk_stream_id - 64;
            bytes.push((id & 0xFF) as u8);
            bytes.push(((id >> 8) & 0xFF) as u8);
        }

        let extended = self.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            self.timestamp
        };

        // Message header (depends on format type)
        match self.format {
            ChunkFormat::Type0 => {
                bytes.extend_from_slice(&ts_field.to_be_bytes()[1..4]);
                bytes.extend_from_slice(&self.message_length.to_be_bytes()[1..4]);
                bytes.push(self.message_type);
                // message stream id is little-endian
                bytes.extend_from_slice(&self.message_stream_id.to_le_bytes());
            }
            ChunkFormat::Type1 => {
                bytes.extend_from_slice(&ts_field.to_be_bytes()[1..4]);
                bytes.extend_from_slice(&self.message_length.to_be_bytes()[1..4]);
                bytes.push(self.message_type);
            }
            ChunkFormat::Type2 => {
                bytes.extend_from_slice(&ts_field.to_be_bytes()[1..4]);
            }
            ChunkFormat::Type3 => {}
        }

        // Continuation chunks repeat the extended timestamp
        if extended {
            bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        }

        bytes
    }
}

/// RTMP handshake handler
pub struct RtmpHandshake;

impl RtmpHandshake {
    /// Perform RTMP handshake with separate reader and writer
    pub fn perform_simple_handshake_split<W: Write, R: Read>(
        writer: &mut W,
        reader: &mut R,
    ) -> Result<()> {
        // C0 + C1: version, then time (0), zero, random bytes
        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        c0c1[0] = RTMP_VERSION;
        fastrand::fill(&mut c0c1[9..]);
        writer.write_all(&c0c1)?;
        writer.flush()?;

        // S0: server version
        let mut s0 = [0u8; 1];
        reader.read_exact(&mut s0)?;
        if s0[0] != RTMP_VERSION {
            return Err(TransportError::Handshake(format!(
                "unsupported RTMP version: {}",
                s0[0]
            )));
        }

        // S1, echoed back as C2
        let mut s1 = vec![0u8; HANDSHAKE_SIZE];
        reader.read_exact(&mut s1)?;
        writer.write_all(&s1)?;
        writer.flush()?;

        // S2: server's echo of C1, not verified
        let mut s2 = vec![0u8; HANDSHAKE_SIZE];
        reader.read_exact(&mut s2)?;

        Ok(())
    }
}

/// Outbound chunking state
pub struct ChunkWriter {
    pub chunk_size: u32,
    pub bytes_written: u64,
}

impl ChunkWriter {
    pub fn new() -> Self {
        ChunkWriter {
            chunk_size: DEFAULT_CHUNK_SIZE,
            bytes_written: 0,
        }
    }

    /// Write a message as chunks
    pub fn write_message<W: Write>(
        &mut self,
        writer: &mut W,
        chunk_stream_id: u32,
        message: &RtmpMessage,
    ) -> Result<()> {
        let header = ChunkHeader::type0(chunk_stream_id, message);
        let payload = &message.payload;
        let chunk_size = self.chunk_size.max(1) as usize;

        let first = header.encode();
        writer.write_all(&first)?;
        self.bytes_written += first.len() as u64;

        let continuation = header.continuation().encode();
        let mut offset = 0;
        loop {
            let end = std::cmp::min(offset + chunk_size, payload.len());
            writer.write_all(&payload[offset..end])?;
            self.bytes_written += (end - offset) as u64;
            offset = end;
            if offset >= payload.len() {
                break;
            }
            writer.write_all(&continuation)?;
            self.bytes_written += continuation.len() as u64;
        }

        trace!(
            kind = ?message.message_type,
            len = message.message_length,
            csid = chunk_stream_id,
            "Wrote message"
        );
        Ok(())
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct InboundChunkState {
    timestamp: u32,
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    message_stream_id: u32,
    extended: bool,
    payload: Vec<u8>,
}

/// Inbound de-chunking state
///
/// Reassembles messages from interleaved chunk streams. Each call to
/// [`read_chunk`](ChunkReader::read_chunk) consumes exactly one chunk.
pub struct ChunkReader {
    pub chunk_size: u32,
    pub bytes_read: u64,
    streams: HashMap<u32, InboundChunkState>,
}

impl ChunkReader {
    pub fn new() -> Self {
        ChunkReader {
            chunk_size: DEFAULT_CHUNK_SIZE,
            bytes_read: 0,
            streams: HashMap::new(),
        }
    }

    /// Read one chunk, returning a message if it completes one
    ///
    /// Messages of a type this client does not know are consumed and
    /// dropped.
    pub fn read_chunk<R: Read>(&mut self, reader: &mut R) -> Result<Option<RtmpMessage>> {
        let b0 = self.read_u8(reader)?;
        let format = b0 >> 6;
        let chunk_stream_id = match b0 & 0x3F {
            0 => 64 + self.read_u8(reader)? as u32,
            1 => {
                let lo = self.read_u8(reader)? as u32;
                let hi = self.read_u8(reader)? as u32;
                64 + lo + (hi << 8)
            }
            id => id as u32,
        };

        if format != 0 && !self.streams.contains_key(&chunk_stream_id) {
            return Err(TransportError::protocol(format!(
                "chunk format {} on unknown chunk stream {}",
                format, chunk_stream_id
            )));
        }

        let mut header = [0u8; 11];
        match format {
            0 => self.read_exact(reader, &mut header[..11])?,
            1 => self.read_exact(reader, &mut header[..7])?,
            2 => self.read_exact(reader, &mut header[..3])?,
            _ => {}
        }

        let ts_field = u24(&header[0..3]);
        let needs_extended = match format {
            0..=2 => ts_field == EXTENDED_TIMESTAMP,
            _ => self
                .streams
                .get(&chunk_stream_id)
                .map(|s| s.extended)
                .unwrap_or(false),
        };
        let extended_value = if needs_extended {
            let mut ext = [0u8; 4];
            self.read_exact(reader, &mut ext)?;
            Some(u32::from_be_bytes(ext))
        } else {
            None
        };

        let state = self.streams.entry(chunk_stream_id).or_default();
        let starting = state.payload.is_empty();
        match format {
            0 => {
                state.timestamp = extended_value.unwrap_or(ts_field);
                state.timestamp_delta = 0;
                state.message_length = u24(&header[3..6]);
                state.message_type = header[6];
                state.message_stream_id =
                    u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
                state.extended = needs_extended;
            }
            1 | 2 => {
                let delta = extended_value.unwrap_or(ts_field);
                state.timestamp_delta = delta;
                state.timestamp = state.timestamp.wrapping_add(delta);
                if format == 1 {
                    state.message_length = u24(&header[3..6]);
                    state.message_type = header[6];
                }
                state.extended = needs_extended;
            }
            _ => {
                if starting {
                    state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
                }
            }
        }

        let remaining = (state.message_length as usize).saturating_sub(state.payload.len());
        let take = remaining.min(self.chunk_size.max(1) as usize);
        let start = state.payload.len();
        state.payload.resize(start + take, 0);
        reader.read_exact(&mut state.payload[start..])?;
        self.bytes_read += take as u64;

        if state.payload.len() < state.message_length as usize {
            return Ok(None);
        }

        let payload = std::mem::take(&mut state.payload);
        let Some(message_type) = MessageType::from_u8(state.message_type) else {
            trace!("Dropping message of unknown type {}", state.message_type);
            return Ok(None);
        };
        Ok(Some(RtmpMessage {
            timestamp: state.timestamp,
            message_length: state.message_length,
            message_type,
            message_stream_id: state.message_stream_id,
            payload,
        }))
    }

    fn read_u8<R: Read>(&mut self, reader: &mut R) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(reader, &mut b)?;
        Ok(b[0])
    }

    fn read_exact<R: Read>(&mut self, reader: &mut R, buf: &mut [u8]) -> Result<()> {
        reader.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new()
    }
}

fn u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}
