//! # Wire Protocol
//!
//! Every message is a JSON header `{"type": ..., "content": ...}`. Messages
//! without a payload travel as WebSocket text frames; messages with a payload
//! travel as binary frames laid out as:
//!
//! ```text
//! offset 0..3   : header length L (i32, native byte order)
//! offset 4..4+L : UTF-8 JSON header, space padded so (4 + L) % 8 == 0
//! offset 4+L..  : raw payload bytes (8-byte aligned)
//! ```

pub mod frame;
pub mod messages;

pub use frame::{encode_binary, encode_text, Frame, Header, Message, ProtocolError, WireFrame};
