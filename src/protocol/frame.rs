//! # Frame Codec
//!
//! Converts between semantic frames (header + optional payload) and the bytes
//! that travel over the transport. The codec knows nothing about message
//! types; it only enforces that a header carries `type` and `content`.
//!
//! ## Key Rust Concepts:
//! - **Tagged variants**: `Frame::Text` / `Frame::Binary` make the text/binary
//!   duality explicit instead of inspecting bytes at runtime
//! - **byteorder**: the length prefix is read and written with `NativeEndian`
//! - **Slices**: decoding borrows the frame and only copies the payload once

use byteorder::{ByteOrder, NativeEndian};
use serde_json::{Map, Value};
use thiserror::Error;

/// Size of the header length prefix in binary frames.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Binary payloads start at a multiple of this many bytes from frame start.
pub const PAYLOAD_ALIGNMENT: usize = 8;

/// Errors raised while decoding (or, rarely, encoding) a frame.
///
/// All of these are local to the failing frame: the session logs them and
/// keeps the connection open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Header bytes are not a JSON object (or `type` is not a string)
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Header parsed but a required field is absent
    #[error("header is missing required field `{0}`")]
    MissingField(&'static str),

    /// Binary frame too short for its prefix or claimed header length
    #[error("truncated frame: {0}")]
    TruncatedFrame(String),

    /// Header does not fit the signed 32-bit length prefix
    #[error("header of {0} bytes exceeds the length prefix range")]
    HeaderTooLarge(usize),
}

/// Bytes as exchanged with the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// The structured control object embedded in every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Message discriminator (`type` on the wire)
    pub kind: String,
    /// Message-specific fields
    pub content: Value,
}

impl Header {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }

    /// Serialize as `{"type": ..., "content": ...}` with `type` first.
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        object.insert("content".to_string(), self.content.clone());
        Value::Object(object).to_string()
    }

    /// Parse header bytes. Trailing padding spaces are accepted as JSON whitespace.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| ProtocolError::MalformedHeader(err.to_string()))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(ProtocolError::MalformedHeader(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(other) => {
                return Err(ProtocolError::MalformedHeader(format!(
                    "`type` must be a string, found {}",
                    json_kind(&other)
                )))
            }
            None => return Err(ProtocolError::MissingField("type")),
        };

        let content = object
            .remove("content")
            .ok_or(ProtocolError::MissingField("content"))?;

        Ok(Self { kind, content })
    }
}

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Control object only
    Text(Header),
    /// Control object plus raw payload
    Binary(Header, Vec<u8>),
}

impl Frame {
    pub fn new(kind: impl Into<String>, content: Value, payload: Option<Vec<u8>>) -> Self {
        let header = Header::new(kind, content);
        match payload {
            Some(payload) => Frame::Binary(header, payload),
            None => Frame::Text(header),
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Frame::Text(header) | Frame::Binary(header, _) => header,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(_) => None,
            Frame::Binary(_, payload) => Some(payload),
        }
    }

    /// Encode into transport bytes.
    pub fn encode(&self) -> Result<WireFrame, ProtocolError> {
        match self {
            Frame::Text(header) => Ok(WireFrame::Text(header.to_json())),
            Frame::Binary(header, payload) => {
                encode_header_with_payload(header, payload).map(WireFrame::Binary)
            }
        }
    }

    /// Decode transport bytes into a frame.
    ///
    /// ## Errors:
    /// - `MalformedHeader` when the header is not a JSON object
    /// - `MissingField` when `type` or `content` is absent
    /// - `TruncatedFrame` when the length prefix does not fit the frame
    pub fn decode(wire: &WireFrame) -> Result<Self, ProtocolError> {
        match wire {
            WireFrame::Text(text) => Header::parse(text.as_bytes()).map(Frame::Text),
            WireFrame::Binary(bytes) => decode_binary(bytes),
        }
    }

    /// Hand the frame to the router as a message.
    pub fn into_message(self) -> Message {
        match self {
            Frame::Text(header) => Message {
                kind: header.kind,
                content: header.content,
                payload: None,
            },
            Frame::Binary(header, payload) => Message {
                kind: header.kind,
                content: header.content,
                payload: Some(payload),
            },
        }
    }
}

/// The decoded, semantic unit consumed once by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: String,
    pub content: Value,
    pub payload: Option<Vec<u8>>,
}

/// Encode a payload-free message as a text frame.
pub fn encode_text(kind: &str, content: Value) -> WireFrame {
    WireFrame::Text(Header::new(kind, content).to_json())
}

/// Encode a message with a payload as an aligned binary frame.
pub fn encode_binary(kind: &str, content: Value, payload: &[u8]) -> Result<WireFrame, ProtocolError> {
    encode_header_with_payload(&Header::new(kind, content), payload).map(WireFrame::Binary)
}

/// Number of padding spaces needed after a header of `header_len` bytes.
pub fn padding_for(header_len: usize) -> usize {
    (PAYLOAD_ALIGNMENT - (LENGTH_PREFIX_BYTES + header_len) % PAYLOAD_ALIGNMENT) % PAYLOAD_ALIGNMENT
}

fn encode_header_with_payload(header: &Header, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut header_bytes = header.to_json().into_bytes();
    header_bytes.resize(header_bytes.len() + padding_for(header_bytes.len()), b' ');

    let header_len = i32::try_from(header_bytes.len())
        .map_err(|_| ProtocolError::HeaderTooLarge(header_bytes.len()))?;

    let mut frame = vec![0u8; LENGTH_PREFIX_BYTES];
    NativeEndian::write_i32(&mut frame, header_len);
    frame.reserve(header_bytes.len() + payload.len());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn decode_binary(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < LENGTH_PREFIX_BYTES {
        return Err(ProtocolError::TruncatedFrame(format!(
            "{} bytes is shorter than the {}-byte length prefix",
            bytes.len(),
            LENGTH_PREFIX_BYTES
        )));
    }

    let claimed = NativeEndian::read_i32(&bytes[..LENGTH_PREFIX_BYTES]);
    let available = bytes.len() - LENGTH_PREFIX_BYTES;
    let header_len = usize::try_from(claimed)
        .ok()
        .filter(|&len| len <= available)
        .ok_or_else(|| {
            ProtocolError::TruncatedFrame(format!(
                "header length {} does not fit in {} available bytes",
                claimed, available
            ))
        })?;

    let header_end = LENGTH_PREFIX_BYTES + header_len;
    let header = Header::parse(&bytes[LENGTH_PREFIX_BYTES..header_end])?;
    Ok(Frame::Binary(header, bytes[header_end..].to_vec()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
