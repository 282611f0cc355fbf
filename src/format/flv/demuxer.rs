//! FLV demuxer implementation

use super::{
    u24be, FlvHeader, FlvTag, FILE_HEADER_SIZE, MAX_PAYLOAD_SIZE, TAG_FOOTER_SIZE,
    TAG_HEADER_SIZE,
};
use crate::error::{OpenError, TagError};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// FLV demuxer
///
/// Validates the file header on [`open`](FlvDemuxer::open) and then yields
/// one structurally checked tag per [`next_tag`](FlvDemuxer::next_tag) call.
/// A value of this type only exists for an opened source; dropping it (or
/// calling [`close`](FlvDemuxer::close)) releases the reader.
pub struct FlvDemuxer<R: Read + Seek> {
    reader: R,
    header: FlvHeader,
    tag: FlvTag,
    max_payload: u32,
    tags_read: u64,
    bytes_read: u64,
}

impl FlvDemuxer<BufReader<File>> {
    /// Open an FLV file from disk
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| OpenError::file(path, e))?;
        debug!("Opened {}", path.display());
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> FlvDemuxer<R> {
    /// Validate the FLV header and position the reader at the first tag
    pub fn open(mut reader: R) -> Result<Self, OpenError> {
        let mut bytes = [0u8; FILE_HEADER_SIZE as usize];
        reader.read_exact(&mut bytes).map_err(OpenError::Io)?;

        let header = FlvHeader::parse(&bytes);
        if !header.is_flv1() {
            return Err(OpenError::BadSignature {
                found: header.signature_word(),
            });
        }

        if !header.has_video && !header.has_audio {
            warn!(
                "FLV header flags ({:02x}) indicate neither video nor audio",
                bytes[4]
            );
        }

        let mut position = FILE_HEADER_SIZE as u64;
        if header.data_offset != FILE_HEADER_SIZE {
            warn!(
                "FLV data offset expected {}, got {}",
                FILE_HEADER_SIZE, header.data_offset
            );
            let offset = header.data_offset;
            reader
                .seek(SeekFrom::Start(offset as u64))
                .map_err(|source| OpenError::Seek { offset, source })?;
            position = offset as u64;
        }

        let mut prev_tag_size = [0u8; TAG_FOOTER_SIZE];
        reader.read_exact(&mut prev_tag_size).map_err(OpenError::Io)?;
        let prev_tag_size = u32::from_be_bytes(prev_tag_size);
        if prev_tag_size != 0 {
            warn!("First previous-tag-size expected 0, got {}", prev_tag_size);
        }

        debug!(
            video = header.has_video,
            audio = header.has_audio,
            data_offset = header.data_offset,
            "FLV header validated"
        );

        Ok(FlvDemuxer {
            reader,
            header,
            tag: FlvTag::new(),
            max_payload: MAX_PAYLOAD_SIZE,
            tags_read: 0,
            bytes_read: position + TAG_FOOTER_SIZE as u64,
        })
    }

    /// Lower the largest accepted payload size
    ///
    /// Declared sizes above the limit are rejected before any payload byte is
    /// read. Values above the 24-bit ceiling are clamped to it.
    pub fn with_max_payload(mut self, limit: u32) -> Self {
        self.max_payload = limit.min(MAX_PAYLOAD_SIZE);
        self
    }

    /// Read the next tag
    ///
    /// Returns `Ok(None)` when the source ends exactly on a tag boundary. A
    /// source that ends anywhere else is a [`TagError::Truncated`].
    pub fn next_tag(&mut self) -> Result<Option<&mut FlvTag>, TagError> {
        self.tag.clear();

        let got = read_full(&mut self.reader, self.tag.header_mut())?;
        if got == 0 {
            return Ok(None);
        }
        if got < TAG_HEADER_SIZE {
            return Err(TagError::Truncated {
                part: "header",
                expected: TAG_HEADER_SIZE,
                got,
            });
        }

        let payload_size = u24be(&self.tag.header_mut()[1..4]);
        if payload_size > self.max_payload {
            return Err(TagError::PayloadTooLarge {
                declared: payload_size,
                limit: self.max_payload,
            });
        }

        // Payload and trailing size in one read
        let total = TAG_HEADER_SIZE + payload_size as usize + TAG_FOOTER_SIZE;
        let body = self.tag.body_mut(total);
        let expected = body.len();
        let got = read_full(&mut self.reader, body)?;
        if got < expected {
            return Err(TagError::Truncated {
                part: "payload",
                expected,
                got,
            });
        }

        self.tag.set_len(total);
        let stored = self.tag.footer();
        let calculated = TAG_HEADER_SIZE as u32 + payload_size;
        if stored != calculated {
            self.tag.clear();
            return Err(TagError::SizeMismatch {
                stored,
                expected: calculated,
            });
        }

        self.tags_read += 1;
        self.bytes_read += total as u64;
        debug!(
            kind = %self.tag.tag_type(),
            size = payload_size,
            timestamp = self.tag.timestamp(),
            "Read tag"
        );

        Ok(Some(&mut self.tag))
    }

    /// The most recently read tag, if the last read succeeded
    pub fn tag(&self) -> Option<&FlvTag> {
        if self.tag.is_empty() {
            None
        } else {
            Some(&self.tag)
        }
    }

    /// Timestamp of the current tag
    pub fn timestamp(&self) -> u32 {
        self.tag.timestamp()
    }

    /// Rewrite the timestamp of the current tag in place
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.tag.set_timestamp(timestamp);
    }

    pub fn header(&self) -> &FlvHeader {
        &self.header
    }

    /// Number of tags successfully read
    pub fn tags_read(&self) -> u64 {
        self.tags_read
    }

    /// Bytes consumed from the source, header included
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Close the demuxer, handing back the reader
    pub fn close(self) -> R {
        debug!(tags = self.tags_read, "Closing FLV demuxer");
        self.reader
    }
}

/// Fill `buf` as far as the reader allows
///
/// Returns the number of bytes read; less than `buf.len()` only at end of
/// input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::flv::FlvTagType;
    use std::io::Cursor;

    fn file_header(flags: u8) -> Vec<u8> {
        let mut bytes = vec![b'F', b'L', b'V', 1, flags, 0, 0, 0, 9];
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes
    }

    fn tag(tag_type: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let size = payload.len() as u32;
        let mut bytes = vec![tag_type];
        bytes.extend_from_slice(&size.to_be_bytes()[1..]);
        bytes.extend_from_slice(&timestamp.to_be_bytes()[1..]);
        bytes.push((timestamp >> 24) as u8);
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&(11 + size).to_be_bytes());
        bytes
    }

    #[test]
    fn test_open_and_iterate() {
        let mut data = file_header(0x05);
        data.extend(tag(18, 0, b"meta"));
        data.extend(tag(9, 0, &[0x17, 0, 0, 0, 0]));
        data.extend(tag(8, 23, &[0xaf, 1, 0x21]));

        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert!(demuxer.header().has_video);
        assert!(demuxer.header().has_audio);

        let first = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(first.tag_type(), FlvTagType::ScriptData);
        assert_eq!(first.payload(), b"meta");
        assert_eq!(first.len(), 11 + 4 + 4);

        let second = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(second.tag_type(), FlvTagType::Video);

        let third = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(third.tag_type(), FlvTagType::Audio);
        assert_eq!(third.timestamp(), 23);

        assert!(demuxer.next_tag().unwrap().is_none());
        assert_eq!(demuxer.tags_read(), 3);
    }

    #[test]
    fn test_bad_signature() {
        let mut data = file_header(0x05);
        data[0] = b'X';
        let result = FlvDemuxer::open(Cursor::new(data));
        assert!(matches!(result, Err(OpenError::BadSignature { .. })));
    }

    #[test]
    fn test_wrong_version_is_bad_signature() {
        let mut data = file_header(0x05);
        data[3] = 2;
        let result = FlvDemuxer::open(Cursor::new(data));
        assert!(matches!(
            result,
            Err(OpenError::BadSignature { found: 0x464C5602 })
        ));
    }

    #[test]
    fn test_short_header_is_io_error() {
        let result = FlvDemuxer::open(Cursor::new(b"FLV\x01".to_vec()));
        assert!(matches!(result, Err(OpenError::Io(_))));
    }

    #[test]
    fn test_no_stream_flags_is_not_fatal() {
        let data = file_header(0x00);
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert!(demuxer.next_tag().unwrap().is_none());
    }

    #[test]
    fn test_custom_data_offset_seeks() {
        // header declares 12: three padding bytes before prev-tag-size
        let mut data = vec![b'F', b'L', b'V', 1, 0x01, 0, 0, 0, 12, 0xee, 0xee, 0xee];
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend(tag(9, 7, &[1, 2]));

        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        let first = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(first.timestamp(), 7);
        assert_eq!(first.payload(), &[1, 2]);
    }

    #[test]
    fn test_nonzero_first_prev_size_is_not_fatal() {
        let mut data = vec![b'F', b'L', b'V', 1, 0x01, 0, 0, 0, 9];
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend(tag(9, 0, &[1]));
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert!(demuxer.next_tag().unwrap().is_some());
    }

    #[test]
    fn test_size_mismatch() {
        let mut data = file_header(0x01);
        let mut bad = tag(9, 0, &[1, 2, 3]);
        let len = bad.len();
        bad[len - 1] = 15; // should be 14
        data.extend(bad);

        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        match demuxer.next_tag() {
            Err(TagError::SizeMismatch { stored, expected }) => {
                assert_eq!(stored, 15);
                assert_eq!(expected, 14);
            }
            other => panic!("expected size mismatch, got {:?}", other.map(|t| t.is_some())),
        }
        assert!(demuxer.tag().is_none());
    }

    #[test]
    fn test_empty_payload_accepted() {
        let mut data = file_header(0x04);
        data.extend(tag(8, 0, &[]));
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        let first = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(first.payload_size(), 0);
        assert_eq!(first.footer(), 11);
        assert_eq!(first.len(), 15);
    }

    #[test]
    fn test_truncated_header() {
        let mut data = file_header(0x01);
        data.extend_from_slice(&[9, 0, 0, 1, 0]);
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert!(matches!(
            demuxer.next_tag(),
            Err(TagError::Truncated { part: "header", got: 5, .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut data = file_header(0x01);
        let full = tag(9, 0, &[1, 2, 3, 4]);
        data.extend_from_slice(&full[..full.len() - 2]);
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert!(matches!(
            demuxer.next_tag(),
            Err(TagError::Truncated { part: "payload", .. })
        ));
    }

    #[test]
    fn test_payload_limit_checked_before_read() {
        let mut data = file_header(0x01);
        data.extend(tag(9, 0, &[0u8; 64]));
        let mut demuxer = FlvDemuxer::open(Cursor::new(data))
            .unwrap()
            .with_max_payload(32);
        assert!(matches!(
            demuxer.next_tag(),
            Err(TagError::PayloadTooLarge {
                declared: 64,
                limit: 32
            })
        ));
    }

    #[test]
    fn test_demuxer_timestamp_rewrite() {
        let mut data = file_header(0x01);
        data.extend(tag(9, 100, &[1]));
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        demuxer.next_tag().unwrap().unwrap();
        assert_eq!(demuxer.timestamp(), 100);
        demuxer.set_timestamp(0xFFFF_FFFF);
        assert_eq!(demuxer.timestamp(), 0xFFFF_FFFF);
        assert_eq!(&demuxer.tag().unwrap().as_bytes()[4..8], &[0xffu8; 4]);
    }

    #[test]
    fn test_buffer_reused_across_tags() {
        let mut data = file_header(0x01);
        data.extend(tag(9, 0, &[7u8; 100]));
        data.extend(tag(9, 40, &[8u8; 10]));
        let mut demuxer = FlvDemuxer::open(Cursor::new(data)).unwrap();
        assert_eq!(demuxer.next_tag().unwrap().unwrap().len(), 115);
        let second = demuxer.next_tag().unwrap().unwrap();
        assert_eq!(second.len(), 25);
        assert_eq!(second.payload(), &[8u8; 10]);
    }
}
