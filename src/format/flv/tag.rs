//! Reusable FLV tag record

use super::{u24be, u32be, FlvTagType, TAG_FOOTER_SIZE, TAG_HEADER_SIZE};

/// A single framed FLV tag: header, payload and trailing size footer
///
/// The demuxer overwrites one `FlvTag` in place on every call to
/// [`FlvDemuxer::next_tag`](super::FlvDemuxer::next_tag), so the buffer only
/// ever grows to the largest tag seen.
#[derive(Debug, Clone)]
pub struct FlvTag {
    data: Vec<u8>,
    len: usize,
}

impl FlvTag {
    /// Create an empty tag record
    ///
    /// Accessors read a zeroed header until the first tag is loaded.
    pub fn new() -> Self {
        FlvTag {
            data: vec![0; TAG_HEADER_SIZE + TAG_FOOTER_SIZE],
            len: 0,
        }
    }

    /// Build a tag from raw framed bytes
    ///
    /// Returns `None` if the bytes are shorter than the header plus footer
    /// or the declared payload does not fit.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TAG_HEADER_SIZE + TAG_FOOTER_SIZE {
            return None;
        }
        let payload_size = u24be(&bytes[1..4]) as usize;
        let len = TAG_HEADER_SIZE + payload_size + TAG_FOOTER_SIZE;
        if bytes.len() < len {
            return None;
        }
        Some(FlvTag {
            data: bytes[..len].to_vec(),
            len,
        })
    }

    /// Header bytes
    pub(crate) fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[..TAG_HEADER_SIZE]
    }

    /// Grow the buffer to hold `total` bytes and return the body region
    /// (everything after the header)
    pub(crate) fn body_mut(&mut self, total: usize) -> &mut [u8] {
        if self.data.len() < total {
            self.data.resize(total, 0);
        }
        &mut self.data[TAG_HEADER_SIZE..total]
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    /// Total framed size: `11 + payload + 4`, or 0 before the first tag
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The complete framed tag as it appeared in the source
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn tag_type(&self) -> FlvTagType {
        FlvTagType::from_u8(self.data[0])
    }

    /// Payload length from the 24-bit size field
    pub fn payload_size(&self) -> u32 {
        u24be(&self.data[1..4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_empty() {
            return &[];
        }
        let end = TAG_HEADER_SIZE + self.payload_size() as usize;
        &self.data[TAG_HEADER_SIZE..end]
    }

    pub fn stream_id(&self) -> u32 {
        u24be(&self.data[8..11])
    }

    /// Trailing footer value as stored in the source
    pub fn footer(&self) -> u32 {
        if self.is_empty() {
            return 0;
        }
        let at = TAG_HEADER_SIZE + self.payload_size() as usize;
        u32be(&self.data[at..at + TAG_FOOTER_SIZE])
    }

    /// Presentation timestamp in milliseconds
    ///
    /// Reassembled from the 24-bit low part and the 8-bit extension that
    /// follows it.
    pub fn timestamp(&self) -> u32 {
        u24be(&self.data[4..7]) | ((self.data[7] as u32) << 24)
    }

    /// Rewrite the timestamp in place
    pub fn set_timestamp(&mut self, timestamp: u32) {
        let header = self.header_mut();
        header[4] = ((timestamp >> 16) & 0xFF) as u8;
        header[5] = ((timestamp >> 8) & 0xFF) as u8;
        header[6] = (timestamp & 0xFF) as u8;
        header[7] = ((timestamp >> 24) & 0xFF) as u8;
    }
}

impl Default for FlvTag {
    fn default() -> Self {
        Self::new()
    }
}
