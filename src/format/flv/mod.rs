//! FLV (Flash Video) container format
//!
//! FLV is Adobe's tag-framed container, still the native payload format of
//! RTMP. A file is a 9-byte header followed by a sequence of tags, each tag
//! carrying its own 11-byte header and a trailing 4-byte size footer:
//!
//! ```text
//! "FLV" | version | flags | data offset (u32)
//! prev tag size 0 (u32)
//! type | size (u24) | ts low (u24) | ts high (u8) | stream id (u24) | payload | size (u32)
//! ...
//! ```

pub mod demuxer;
pub mod tag;

pub use demuxer::FlvDemuxer;
pub use tag::FlvTag;

/// Size of the file header ("FLV", version, flags, data offset)
pub const FILE_HEADER_SIZE: u32 = 9;

/// Size of the fixed header in front of every tag payload
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of the trailing previous-tag-size field
pub const TAG_FOOTER_SIZE: usize = 4;

/// Largest payload the 24-bit size field can describe
pub const MAX_PAYLOAD_SIZE: u32 = 0x00FF_FFFF;

/// `'F' 'L' 'V' 0x01` read as a big-endian u32
pub const FLV1_SIGNATURE: u32 = 0x464C_5601;

/// Read a big-endian 24-bit value
pub(crate) fn u24be(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

/// Read a big-endian 32-bit value
pub(crate) fn u32be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// FLV file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvHeader {
    pub signature: [u8; 3], // "FLV"
    pub version: u8,        // Usually 1
    pub has_video: bool,
    pub has_audio: bool,
    pub data_offset: u32, // Offset to first tag (usually 9)
}

impl FlvHeader {
    /// Parse the 9-byte file header
    ///
    /// Does not validate the signature; see [`FlvHeader::is_flv1`].
    pub fn parse(bytes: &[u8; 9]) -> Self {
        FlvHeader {
            signature: [bytes[0], bytes[1], bytes[2]],
            version: bytes[3],
            has_video: (bytes[4] & 0x01) != 0,
            has_audio: (bytes[4] & 0x04) != 0,
            data_offset: u32be(&bytes[5..9]),
        }
    }

    /// Combined signature + version check against `FLV\x01`
    pub fn is_flv1(&self) -> bool {
        self.signature_word() == FLV1_SIGNATURE
    }

    /// Signature and version packed as a big-endian u32
    pub fn signature_word(&self) -> u32 {
        u32::from_be_bytes([
            self.signature[0],
            self.signature[1],
            self.signature[2],
            self.version,
        ])
    }
}

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    ScriptData,
    /// Any type byte the format does not define; passed through untouched
    Other(u8),
}

impl FlvTagType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            8 => FlvTagType::Audio,
            9 => FlvTagType::Video,
            18 => FlvTagType::ScriptData,
            other => FlvTagType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::ScriptData => 18,
            FlvTagType::Other(value) => value,
        }
    }
}

impl std::fmt::Display for FlvTagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlvTagType::Audio => write!(f, "audio"),
            FlvTagType::Video => write!(f, "video"),
            FlvTagType::ScriptData => write!(f, "script"),
            FlvTagType::Other(value) => write!(f, "type {}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flv_header_parse() {
        let bytes = [b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9];
        let header = FlvHeader::parse(&bytes);
        assert_eq!(header.signature, *b"FLV");
        assert_eq!(header.version, 1);
        assert!(header.has_video);
        assert!(header.has_audio);
        assert_eq!(header.data_offset, 9);
        assert!(header.is_flv1());
    }

    #[test]
    fn test_flv_header_wrong_version() {
        let bytes = [b'F', b'L', b'V', 2, 0x01, 0, 0, 0, 9];
        let header = FlvHeader::parse(&bytes);
        assert!(!header.is_flv1());
        assert_eq!(header.signature_word(), 0x464C5602);
    }

    #[test]
    fn test_flv_tag_type() {
        assert_eq!(FlvTagType::from_u8(8), FlvTagType::Audio);
        assert_eq!(FlvTagType::from_u8(9), FlvTagType::Video);
        assert_eq!(FlvTagType::from_u8(18), FlvTagType::ScriptData);
        assert_eq!(FlvTagType::from_u8(99), FlvTagType::Other(99));
        assert_eq!(FlvTagType::Other(99).as_u8(), 99);
    }

    #[test]
    fn test_big_endian_helpers() {
        assert_eq!(u24be(&[0x01, 0x02, 0x03]), 0x010203);
        assert_eq!(u32be(&[0xde, 0xad, 0xbe, 0xef]), 0xdeadbeef);
    }
}
