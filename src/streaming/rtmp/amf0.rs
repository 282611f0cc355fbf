//! AMF0 (Action Message Format 0) encoding and decoding
//!
//! AMF0 is used by RTMP for encoding commands and data

use crate::error::TransportError;

type Result<T> = std::result::Result<T, TransportError>;

/// AMF0 data types
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Key order is preserved on the wire
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
    /// Milliseconds since the epoch; the timezone field is ignored
    Date(f64),
}

/// AMF0 type markers
mod markers {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0A;
    pub const DATE: u8 = 0x0B;
    pub const LONG_STRING: u8 = 0x0C;
}

impl Amf0Value {
    /// Encode AMF0 value to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode_into(&mut bytes);
        bytes
    }

    fn encode_into(&self, bytes: &mut Vec<u8>) {
        match self {
            Amf0Value::Number(n) => {
                bytes.push(markers::NUMBER);
                bytes.extend_from_slice(&n.to_bits().to_be_bytes());
            }
            Amf0Value::Boolean(b) => {
                bytes.push(markers::BOOLEAN);
                bytes.push(if *b { 1 } else { 0 });
            }
            Amf0Value::String(s) => {
                if s.len() > u16::MAX as usize {
                    bytes.push(markers::LONG_STRING);
                    bytes.extend_from_slice(&(s.len() as u32).to_be_bytes());
                } else {
                    bytes.push(markers::STRING);
                    bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
                }
                bytes.extend_from_slice(s.as_bytes());
            }
            Amf0Value::Object(properties) => {
                bytes.push(markers::OBJECT);
                encode_properties(properties, bytes);
            }
            Amf0Value::Null => {
                bytes.push(markers::NULL);
            }
            Amf0Value::Undefined => {
                bytes.push(markers::UNDEFINED);
            }
            Amf0Value::EcmaArray(properties) => {
                bytes.push(markers::ECMA_ARRAY);
                bytes.extend_from_slice(&(properties.len() as u32).to_be_bytes());
                encode_properties(properties, bytes);
            }
            Amf0Value::StrictArray(values) => {
                bytes.push(markers::STRICT_ARRAY);
                bytes.extend_from_slice(&(values.len() as u32).to_be_bytes());
                for value in values {
                    value.encode_into(bytes);
                }
            }
            Amf0Value::Date(millis) => {
                bytes.push(markers::DATE);
                bytes.extend_from_slice(&millis.to_bits().to_be_bytes());
                bytes.extend_from_slice(&[0, 0]);
            }
        }
    }

    /// Helper: Create a command object
    pub fn command_object(properties: Vec<(&str, Amf0Value)>) -> Self {
        Amf0Value::Object(
            properties
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a property of an object or ECMA array
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object(properties) | Amf0Value::EcmaArray(properties) => properties
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

fn encode_properties(properties: &[(String, Amf0Value)], bytes: &mut Vec<u8>) {
    for (key, value) in properties {
        // Key is encoded as string without type marker
        bytes.extend_from_slice(&(key.len() as u16).to_be_bytes());
        bytes.extend_from_slice(key.as_bytes());
        value.encode_into(bytes);
    }
    bytes.extend_from_slice(&[0x00, 0x00, markers::OBJECT_END]);
}

/// Deepest container nesting the decoder accepts
pub const MAX_DEPTH: usize = 64;

/// AMF0 decoder over a byte slice
pub struct Amf0Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Amf0Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Amf0Decoder {
            data,
            pos: 0,
            depth: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Decode every value in the buffer
    pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>> {
        let mut decoder = Amf0Decoder::new(data);
        let mut values = Vec::new();
        while !decoder.is_empty() {
            values.push(decoder.decode()?);
        }
        Ok(values)
    }

    /// Decode the next value
    pub fn decode(&mut self) -> Result<Amf0Value> {
        let marker = self.take(1)?[0];
        match marker {
            markers::NUMBER => Ok(Amf0Value::Number(self.read_f64()?)),
            markers::BOOLEAN => Ok(Amf0Value::Boolean(self.take(1)?[0] != 0)),
            markers::STRING => {
                let len = self.read_u16()? as usize;
                Ok(Amf0Value::String(self.read_string(len)?))
            }
            markers::LONG_STRING => {
                let len = self.read_u32()? as usize;
                Ok(Amf0Value::String(self.read_string(len)?))
            }
            markers::OBJECT => {
                self.enter()?;
                let properties = self.read_properties()?;
                self.depth -= 1;
                Ok(Amf0Value::Object(properties))
            }
            markers::NULL => Ok(Amf0Value::Null),
            markers::UNDEFINED => Ok(Amf0Value::Undefined),
            markers::ECMA_ARRAY => {
                // The count is advisory; the end marker terminates the list
                self.read_u32()?;
                self.enter()?;
                let properties = self.read_properties()?;
                self.depth -= 1;
                Ok(Amf0Value::EcmaArray(properties))
            }
            markers::STRICT_ARRAY => {
                let count = self.read_u32()? as usize;
                self.enter()?;
                let mut values = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    values.push(self.decode()?);
                }
                self.depth -= 1;
                Ok(Amf0Value::StrictArray(values))
            }
            markers::DATE => {
                let millis = self.read_f64()?;
                self.take(2)?;
                Ok(Amf0Value::Date(millis))
            }
            other => Err(TransportError::protocol(format!(
                "unsupported AMF0 marker 0x{:02x}",
                other
            ))),
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(TransportError::protocol("AMF0 nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn read_properties(&mut self) -> Result<Vec<(String, Amf0Value)>> {
        let mut properties = Vec::new();
        loop {
            let len = self.read_u16()? as usize;
            if len == 0 && self.data.get(self.pos) == Some(&markers::OBJECT_END) {
                self.pos += 1;
                return Ok(properties);
            }
            let key = self.read_string(len)?;
            let value = self.decode()?;
            properties.push((key, value));
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(TransportError::protocol("truncated AMF0 value"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_bits(u64::from_be_bytes(raw)))
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// AMF0 encoder for RTMP commands
pub struct Amf0Encoder;

impl Amf0Encoder {
    /// Encode a command: name, transaction id, then the arguments
    pub fn encode_command(name: &str, transaction_id: f64, args: &[Amf0Value]) -> Vec<u8> {
        let mut bytes = Amf0Value::String(name.to_string()).encode();
        Amf0Value::Number(transaction_id).encode_into(&mut bytes);
        for arg in args {
            arg.encode_into(&mut bytes);
        }
        bytes
    }

    /// Encode connect command
    pub fn encode_connect(
        transaction_id: f64,
        app: &str,
        flash_ver: &str,
        tc_url: &str,
    ) -> Vec<u8> {
        let command_obj = Amf0Value::command_object(vec![
            ("app", Amf0Value::String(app.to_string())),
            ("type", Amf0Value::String("nonprivate".to_string())),
            ("flashVer", Amf0Value::String(flash_ver.to_string())),
            ("tcUrl", Amf0Value::String(tc_url.to_string())),
        ]);
        Self::encode_command("connect", transaction_id, &[command_obj])
    }

    /// Encode createStream command
    pub fn encode_create_stream(transaction_id: f64) -> Vec<u8> {
        Self::encode_command("createStream", transaction_id, &[Amf0Value::Null])
    }

    /// Encode publish command
    pub fn encode_publish(transaction_id: f64, stream_name: &str, publish_type: &str) -> Vec<u8> {
        Self::encode_command(
            "publish",
            transaction_id,
            &[
                Amf0Value::Null,
                Amf0Value::String(stream_name.to_string()),
                // "live", "record", or "append"
                Amf0Value::String(publish_type.to_string()),
            ],
        )
    }

    /// Encode releaseStream command
    pub fn encode_release_stream(transaction_id: f64, stream_name: &str) -> Vec<u8> {
        Self::encode_stream_command("releaseStream", transaction_id, stream_name)
    }

    /// Encode FCPublish command (used by some servers)
    pub fn encode_fc_publish(transaction_id: f64, stream_name: &str) -> Vec<u8> {
        Self::encode_stream_command("FCPublish", transaction_id, stream_name)
    }

    /// Encode FCUnpublish command
    pub fn encode_fc_unpublish(transaction_id: f64, stream_name: &str) -> Vec<u8> {
        Self::encode_stream_command("FCUnpublish", transaction_id, stream_name)
    }

    /// Encode deleteStream command
    pub fn encode_delete_stream(transaction_id: f64, stream_id: u32) -> Vec<u8> {
        Self::encode_command(
            "deleteStream",
            transaction_id,
            &[Amf0Value::Null, Amf0Value::Number(stream_id as f64)],
        )
    }

    fn encode_stream_command(name: &str, transaction_id: f64, stream_name: &str) -> Vec<u8> {
        Self::encode_command(
            name,
            transaction_id,
            &[Amf0Value::Null, Amf0Value::String(stream_name.to_string())],
        )
    }
}
