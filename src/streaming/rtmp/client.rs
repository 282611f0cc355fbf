//! RTMP publishing client

use super::amf0::{Amf0Decoder, Amf0Encoder, Amf0Value};
use super::protocol::{
    user_control, ChunkReader, ChunkWriter, MessageType, RtmpHandshake, RtmpMessage,
};
use crate::error::TransportError;
use crate::format::flv::{u24be, TAG_FOOTER_SIZE, TAG_HEADER_SIZE};
use crate::streaming::Transport;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

type Result<T> = std::result::Result<T, TransportError>;

/// Chunk stream ids used for outbound messages
const CSID_PROTOCOL: u32 = 2;
const CSID_COMMAND: u32 = 3;
const CSID_AUDIO: u32 = 4;
const CSID_VIDEO: u32 = 6;

/// RTMP client configuration
#[derive(Debug, Clone)]
pub struct RtmpConfig {
    /// Outbound chunk size announced after connecting
    pub chunk_size: u32,
    /// Socket read/write timeout
    pub io_timeout: Duration,
    /// `flashVer` sent in the connect command
    pub flash_ver: String,
}

impl RtmpConfig {
    pub fn new() -> Self {
        RtmpConfig {
            chunk_size: 4096,
            io_timeout: Duration::from_secs(10),
            flash_ver: format!("FMLE/3.0 (compatible; flvcast/{})", crate::VERSION),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

impl Default for RtmpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Components of an `rtmp://host[:port]/app/playpath` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub playpath: String,
}

impl RtmpUrl {
    /// Parse RTMP URL into components
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("rtmp://")
            .ok_or_else(|| TransportError::Setup(format!("not an rtmp:// URL: {}", url)))?;

        let (host_port, path) = rest
            .split_once('/')
            .ok_or_else(|| TransportError::Setup(format!("missing application in {}", url)))?;

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::Setup(format!("invalid port: {}", port)))?;
                (host, port)
            }
            None => (host_port, 1935), // Default RTMP port
        };
        if host.is_empty() {
            return Err(TransportError::Setup(format!("missing host in {}", url)));
        }

        let (app, playpath) = path.split_once('/').unwrap_or((path, ""));
        if app.is_empty() {
            return Err(TransportError::Setup(format!("missing application in {}", url)));
        }
        if playpath.is_empty() {
            return Err(TransportError::Setup(format!("missing stream name in {}", url)));
        }

        Ok(RtmpUrl {
            host: host.to_string(),
            port,
            app: app.to_string(),
            playpath: playpath.to_string(),
        })
    }

    /// `tcUrl` for the connect command
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

/// RTMP publishing session
///
/// Implements [`Transport`]: takes framed FLV tags, turns each into one
/// RTMP message and answers the server's control traffic.
pub struct RtmpTransport {
    config: RtmpConfig,
    url: Option<RtmpUrl>,
    write_enabled: bool,
    writer: Option<BufWriter<TcpStream>>,
    reader: Option<BufReader<TcpStream>>,
    chunk_writer: ChunkWriter,
    chunk_reader: ChunkReader,
    transaction_id: f64,
    stream_id: u32,
    publishing: bool,
    window_ack_size: u32,
    last_ack: u64,
    released: bool,
}

impl RtmpTransport {
    /// Create a new RTMP client
    pub fn new() -> Self {
        Self::with_config(RtmpConfig::default())
    }

    pub fn with_config(config: RtmpConfig) -> Self {
        RtmpTransport {
            config,
            url: None,
            write_enabled: false,
            writer: None,
            reader: None,
            chunk_writer: ChunkWriter::new(),
            chunk_reader: ChunkReader::new(),
            transaction_id: 1.0,
            stream_id: 0,
            publishing: false,
            window_ack_size: 2_500_000,
            last_ack: 0,
            released: false,
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    /// Message stream id assigned by `createStream`
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn url(&self) -> Option<&RtmpUrl> {
        self.url.as_ref()
    }

    fn next_transaction(&mut self) -> f64 {
        let id = self.transaction_id;
        self.transaction_id += 1.0;
        id
    }

    fn send(&mut self, chunk_stream_id: u32, message: &RtmpMessage) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        self.chunk_writer
            .write_message(writer, chunk_stream_id, message)?;
        writer.flush()?;
        Ok(())
    }

    fn send_command(&mut self, stream_id: u32, payload: Vec<u8>) -> Result<()> {
        let message = RtmpMessage::new(MessageType::CommandAmf0, stream_id, payload);
        self.send(CSID_COMMAND, &message)
    }

    /// Read one chunk; acknowledges received bytes once the window fills
    fn read_chunk(&mut self) -> Result<Option<RtmpMessage>> {
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;
        let message = self.chunk_reader.read_chunk(reader)?;

        let received = self.chunk_reader.bytes_read;
        if self.window_ack_size > 0 && received - self.last_ack >= self.window_ack_size as u64 {
            self.last_ack = received;
            self.send(CSID_PROTOCOL, &RtmpMessage::acknowledgement(received as u32))?;
        }
        Ok(message)
    }

    fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(message) = self.read_chunk()? {
                return Ok(message);
            }
        }
    }

    /// Process control traffic; returns decoded values for AMF0 commands
    fn handle_message(&mut self, message: &RtmpMessage) -> Result<Option<Vec<Amf0Value>>> {
        match message.message_type {
            MessageType::SetChunkSize => {
                let size = message
                    .control_value()
                    .ok_or_else(|| TransportError::protocol("short SetChunkSize"))?
                    & 0x7FFF_FFFF;
                debug!("Server chunk size {}", size);
                self.chunk_reader.chunk_size = size;
            }
            MessageType::WindowAckSize => {
                if let Some(size) = message.control_value() {
                    debug!("Server window ack size {}", size);
                    self.window_ack_size = size;
                }
            }
            MessageType::SetPeerBandwidth => {
                if let Some(size) = message.control_value() {
                    self.send(CSID_PROTOCOL, &RtmpMessage::window_ack_size(size))?;
                }
            }
            MessageType::UserControl => {
                let payload = &message.payload;
                if payload.len() >= 6 {
                    let event = u16::from_be_bytes([payload[0], payload[1]]);
                    let value =
                        u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
                    match event {
                        user_control::PING_REQUEST => {
                            trace!("Ping {}", value);
                            self.send(CSID_PROTOCOL, &RtmpMessage::ping_response(value))?;
                        }
                        user_control::STREAM_BEGIN => debug!("Stream {} begin", value),
                        other => trace!("User control event {}", other),
                    }
                }
            }
            MessageType::CommandAmf0 => {
                let values = Amf0Decoder::decode_all(&message.payload)?;
                log_command(&values);
                return Ok(Some(values));
            }
            other => trace!("Ignoring {:?} message", other),
        }
        Ok(None)
    }

    /// Wait for `_result`/`_error` of `transaction_id`, handling anything else
    fn wait_for_result(&mut self, transaction_id: f64) -> Result<Vec<Amf0Value>> {
        loop {
            let message = self.read_message()?;
            let Some(values) = self.handle_message(&message)? else {
                continue;
            };
            let name = values.first().and_then(Amf0Value::as_str);
            let id = values.get(1).and_then(Amf0Value::as_number);
            match (name, id) {
                (Some("_result"), Some(id)) if id == transaction_id => return Ok(values),
                (Some("_error"), Some(id)) if id == transaction_id => {
                    return Err(TransportError::protocol(format!(
                        "server rejected transaction {}: {}",
                        transaction_id,
                        status_code(&values).unwrap_or("no description")
                    )));
                }
                _ => {}
            }
        }
    }

    /// Convert one framed tag into an RTMP message
    fn tag_message(&self, tag: &[u8]) -> Option<(u32, RtmpMessage)> {
        let payload_size = u24be(&tag[1..4]) as usize;
        let timestamp = u24be(&tag[4..7]) | ((tag[7] as u32) << 24);
        let payload = &tag[TAG_HEADER_SIZE..TAG_HEADER_SIZE + payload_size];

        let (csid, message_type, payload) = match tag[0] {
            8 => (CSID_AUDIO, MessageType::Audio, payload.to_vec()),
            9 => (CSID_VIDEO, MessageType::Video, payload.to_vec()),
            18 => (CSID_COMMAND, MessageType::DataAmf0, set_data_frame(payload)),
            other => {
                debug!("Skipping FLV tag of type {}", other);
                return None;
            }
        };
        let message =
            RtmpMessage::new(message_type, self.stream_id, payload).with_timestamp(timestamp);
        Some((csid, message))
    }
}

impl Default for RtmpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RtmpTransport {
    fn drop(&mut self) {
        self.release();
    }
}

impl Transport for RtmpTransport {
    type Unit = RtmpMessage;

    fn setup(&mut self, url: &str) -> Result<()> {
        let parsed = RtmpUrl::parse(url)?;
        debug!(
            host = %parsed.host,
            port = parsed.port,
            app = %parsed.app,
            "Parsed stream URL"
        );
        self.url = Some(parsed);
        Ok(())
    }

    fn enable_write(&mut self) {
        self.write_enabled = true;
    }

    fn connect(&mut self) -> Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| TransportError::Setup("no URL configured".into()))?;

        let addrs = (url.host.as_str(), url.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect(format!("{}: {}", url.host, e)))?;
        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.io_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| {
            TransportError::Connect(match last_error {
                Some(e) => format!("{}:{}: {}", url.host, url.port, e),
                None => format!("{} did not resolve", url.host),
            })
        })?;

        tcp.set_read_timeout(Some(self.config.io_timeout))?;
        tcp.set_write_timeout(Some(self.config.io_timeout))?;
        tcp.set_nodelay(true)?;

        let tcp_read = tcp.try_clone()?;
        let mut writer = BufWriter::new(tcp);
        let mut reader = BufReader::new(tcp_read);

        RtmpHandshake::perform_simple_handshake_split(&mut writer, &mut reader)?;
        debug!("Handshake complete");

        self.writer = Some(writer);
        self.reader = Some(reader);
        self.released = false;

        let transaction_id = self.next_transaction();
        let connect = Amf0Encoder::encode_connect(
            transaction_id,
            &url.app,
            &self.config.flash_ver,
            &url.tc_url(),
        );
        self.send_command(0, connect)?;
        self.wait_for_result(transaction_id)
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let chunk_size = self.config.chunk_size;
        self.send(CSID_PROTOCOL, &RtmpMessage::set_chunk_size(chunk_size))?;
        self.chunk_writer.chunk_size = chunk_size;

        info!("Connected to {}:{}/{}", url.host, url.port, url.app);
        Ok(())
    }

    fn connect_stream(&mut self) -> Result<()> {
        if !self.write_enabled {
            return Err(TransportError::protocol("publishing is not enabled"));
        }
        let playpath = self
            .url
            .as_ref()
            .map(|u| u.playpath.clone())
            .ok_or_else(|| TransportError::Setup("no URL configured".into()))?;

        let id = self.next_transaction();
        self.send_command(0, Amf0Encoder::encode_release_stream(id, &playpath))?;
        let id = self.next_transaction();
        self.send_command(0, Amf0Encoder::encode_fc_publish(id, &playpath))?;

        let id = self.next_transaction();
        self.send_command(0, Amf0Encoder::encode_create_stream(id))?;
        let result = self.wait_for_result(id)?;
        let stream_id = result
            .get(3)
            .and_then(Amf0Value::as_number)
            .ok_or_else(|| TransportError::protocol("createStream result without stream id"))?;
        self.stream_id = stream_id as u32;
        debug!("Created stream {}", self.stream_id);

        let id = self.next_transaction();
        let publish = Amf0Encoder::encode_publish(id, &playpath, "live");
        self.send_command(self.stream_id, publish)?;

        loop {
            let message = self.read_message()?;
            let Some(values) = self.handle_message(&message)? else {
                continue;
            };
            if values.first().and_then(Amf0Value::as_str) != Some("onStatus") {
                continue;
            }
            let code = status_code(&values).unwrap_or_default();
            if status_level(&values) == Some("error") {
                return Err(TransportError::protocol(format!("publish failed: {}", code)));
            }
            if code == "NetStream.Publish.Start" {
                break;
            }
        }

        self.publishing = true;
        info!("Publishing {}", playpath);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.publishing {
            return Err(TransportError::NotConnected);
        }

        let mut offset = 0;
        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if rest.len() < TAG_HEADER_SIZE {
                return Err(TransportError::Write(format!(
                    "incomplete FLV tag header ({} bytes)",
                    rest.len()
                )));
            }
            let tag_len = TAG_HEADER_SIZE + u24be(&rest[1..4]) as usize;
            if rest.len() < tag_len {
                return Err(TransportError::Write(format!(
                    "incomplete FLV tag: need {} bytes, have {}",
                    tag_len,
                    rest.len()
                )));
            }

            if let Some((csid, message)) = self.tag_message(&rest[..tag_len]) {
                let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
                self.chunk_writer
                    .write_message(writer, csid, &message)
                    .map_err(|e| TransportError::Write(e.to_string()))?;
            }

            // The trailing size is optional
            offset += (tag_len + TAG_FOOTER_SIZE).min(rest.len());
        }

        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| TransportError::Write(e.to_string()))?;
        }
        Ok(bytes.len())
    }

    fn is_readable(&mut self) -> Result<bool> {
        let reader = self.reader.as_ref().ok_or(TransportError::NotConnected)?;
        if !reader.buffer().is_empty() {
            return Ok(true);
        }

        let socket = reader.get_ref();
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::Poll(e.to_string()))?;
        let mut probe = [0u8; 1];
        let ready = match socket.peek(&mut probe) {
            // EOF counts as readable; the read reports it
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(TransportError::Poll(e.to_string())),
        };
        socket
            .set_nonblocking(false)
            .map_err(|e| TransportError::Poll(e.to_string()))?;
        ready
    }

    fn read_unit(&mut self) -> Result<Option<RtmpMessage>> {
        self.read_chunk().map_err(|e| match e {
            TransportError::Io(io) => TransportError::Read(io.to_string()),
            other => other,
        })
    }

    fn dispatch(&mut self, unit: RtmpMessage) -> Result<()> {
        if let Some(values) = self.handle_message(&unit)? {
            let name = values.first().and_then(Amf0Value::as_str);
            if name == Some("onStatus") && status_level(&values) == Some("error") {
                return Err(TransportError::protocol(format!(
                    "server error: {}",
                    status_code(&values).unwrap_or("unknown")
                )));
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.writer.is_some() {
            if self.publishing {
                if let Some(url) = self.url.clone() {
                    let id = self.next_transaction();
                    let unpublish = Amf0Encoder::encode_fc_unpublish(id, &url.playpath);
                    let id = self.next_transaction();
                    let delete = Amf0Encoder::encode_delete_stream(id, self.stream_id);
                    let sent = self
                        .send_command(0, unpublish)
                        .and_then(|_| self.send_command(0, delete));
                    if let Err(e) = sent {
                        debug!("Failed to unpublish cleanly: {}", e);
                    }
                }
            }
            if let Some(mut writer) = self.writer.take() {
                if let Err(e) = writer.flush() {
                    debug!("Flush on release failed: {}", e);
                }
                let _ = writer.get_ref().shutdown(Shutdown::Both);
            }
            info!("Disconnected");
        }

        self.reader = None;
        self.publishing = false;
        self.stream_id = 0;
    }
}

/// AMF0 short string `onMetaData`: marker, u16 length, bytes
const ON_METADATA: &[u8] = b"\x02\x00\x0aonMetaData";

/// Prefix `onMetaData` script tags with `@setDataFrame` for publishing
fn set_data_frame(payload: &[u8]) -> Vec<u8> {
    if payload.starts_with(ON_METADATA) {
        let mut data = Amf0Value::String("@setDataFrame".to_string()).encode();
        data.extend_from_slice(payload);
        data
    } else {
        payload.to_vec()
    }
}

fn status_info(values: &[Amf0Value]) -> Option<&Amf0Value> {
    values.get(3)
}

fn status_code(values: &[Amf0Value]) -> Option<&str> {
    status_info(values)?.get("code")?.as_str()
}

fn status_level(values: &[Amf0Value]) -> Option<&str> {
    status_info(values)?.get("level")?.as_str()
}

fn log_command(values: &[Amf0Value]) {
    let name = values.first().and_then(Amf0Value::as_str).unwrap_or("?");
    match (status_level(values), status_code(values)) {
        (Some("error"), Some(code)) => warn!("{}: {}", name, code),
        (_, Some(code)) => debug!("{}: {}", name, code),
        _ => debug!("Received command {}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtmp_transport_creation() {
        let client = RtmpTransport::new();
        assert!(!client.is_connected());
        assert!(!client.is_publishing());
    }

    #[test]
    fn test_rtmp_url_parsing() {
        let url = RtmpUrl::parse("rtmp://live.example.com/live/key").unwrap();
        assert_eq!(url.host, "live.example.com");
        assert_eq!(url.port, 1935);
        assert_eq!(url.app, "live");
        assert_eq!(url.playpath, "key");
        assert_eq!(url.tc_url(), "rtmp://live.example.com:1935/live");

        let url = RtmpUrl::parse("rtmp://localhost:1936/app/stream/extra?token=1").unwrap();
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 1936);
        assert_eq!(url.app, "app");
        assert_eq!(url.playpath, "stream/extra?token=1");
    }

    #[test]
    fn test_rtmp_url_rejects() {
        for bad in [
            "http://example.com/live/key",
            "rtmp://example.com",
            "rtmp://example.com/live",
            "rtmp://example.com:notaport/live/key",
            "rtmp:///live/key",
        ] {
            assert!(
                matches!(RtmpUrl::parse(bad), Err(TransportError::Setup(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_setup_stores_url() {
        let mut client = RtmpTransport::new();
        client.setup("rtmp://localhost/live/abc").unwrap();
        assert_eq!(client.url().unwrap().playpath, "abc");
    }

    #[test]
    fn test_write_without_connect() {
        let mut client = RtmpTransport::new();
        let result = client.write(&[9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 11]);
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_connect_stream_requires_write() {
        let mut client = RtmpTransport::new();
        client.setup("rtmp://localhost/live/abc").unwrap();
        assert!(matches!(
            client.connect_stream(),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_tag_message_conversion() {
        let client = RtmpTransport::new();
        // video tag, 2-byte payload, timestamp 0x01000010
        let tag = [9, 0, 0, 2, 0, 0, 0x10, 0x01, 0, 0, 0, 0x17, 0x01, 0, 0, 0, 13];
        let (csid, message) = client.tag_message(&tag[..13]).unwrap();
        assert_eq!(csid, CSID_VIDEO);
        assert_eq!(message.message_type, MessageType::Video);
        assert_eq!(message.timestamp, 0x0100_0010);
        assert_eq!(message.payload, vec![0x17, 0x01]);
    }

    #[test]
    fn test_set_data_frame_prefix() {
        let mut payload = Amf0Value::String("onMetaData".into()).encode();
        payload.extend(Amf0Value::EcmaArray(vec![]).encode());
        let data = set_data_frame(&payload);
        let values = Amf0Decoder::decode_all(&data).unwrap();
        assert_eq!(values[0].as_str(), Some("@setDataFrame"));
        assert_eq!(values[1].as_str(), Some("onMetaData"));

        let other = Amf0Value::String("onCuePoint".into()).encode();
        assert_eq!(set_data_frame(&other), other);
    }

    #[test]
    fn test_set_data_frame_ignores_nested_script_data() {
        // A strict array nested far past any sane depth; only the leading bytes are inspected
        let mut payload = Vec::new();
        for _ in 0..500_000 {
            payload.extend_from_slice(&[0x0A, 0, 0, 0, 1]);
        }
        payload.push(0x05);
        assert_eq!(set_data_frame(&payload), payload);

        let mut metadata = ON_METADATA.to_vec();
        metadata.extend_from_slice(&payload);
        let data = set_data_frame(&metadata);
        assert!(data.starts_with(b"\x02\x00\x0d@setDataFrame"));
        assert_eq!(&data[16..], &metadata[..]);
    }

    #[test]
    fn test_set_data_frame_needs_exact_name() {
        let longer = Amf0Value::String("onMetaDataX".into()).encode();
        assert_eq!(set_data_frame(&longer), longer);
        assert_eq!(set_data_frame(&ON_METADATA[..5]), &ON_METADATA[..5]);
    }

    #[test]
    fn test_dispatch_rejects_deeply_nested_command() {
        let mut payload = Amf0Value::String("onStatus".into()).encode();
        for _ in 0..500_000 {
            payload.extend_from_slice(&[0x03, 0x00, 0x01, b'k']);
        }
        payload.push(0x05);

        let mut client = RtmpTransport::new();
        let unit = RtmpMessage::new(MessageType::CommandAmf0, 0, payload);
        match client.dispatch(unit) {
            Err(TransportError::Protocol(msg)) => assert!(msg.contains("nesting too deep")),
            other => panic!("expected nesting error, got {:?}", other),
        }
        client.release();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_release_is_idempotent_when_unconnected() {
        let mut client = RtmpTransport::new();
        client.release();
        client.release();
        assert!(!client.is_connected());
    }
}
