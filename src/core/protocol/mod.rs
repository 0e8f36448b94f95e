// src/core/protocol/mod.rs

//! Wire-level pieces of MProtocol: line framing and line classification.

pub mod line_frame;
pub mod result;
pub use line_frame::{
    Frame, FrameReader, MAX_BLOCK_LINES, MAX_LINE_LENGTH, MProtocolCodec, validate_command,
};
pub use result::{
    ChangeNotification, DecodedLine, Payload, PropertyLine, ProtocolResult, decode_line,
    parse_property_shorthand,
};
