// src/core/protocol/line_frame.rs

//! Implements line framing for MProtocol: a `tokio_util::codec` `Decoder` that
//! assembles newline-terminated lines out of an arbitrarily chunked byte stream
//! and folds `{ ... }` blocks into a single frame, and an `Encoder` for
//! outgoing command lines.

use super::result::{BLOCK_CLOSE, BLOCK_OPEN};
use crate::core::ClientError;
use bytes::{BufMut, BytesMut};
use std::mem;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

const LF: u8 = b'\n';
const CR: u8 = b'\r';

// Limits on what a misbehaving device can make the reader buffer.
/// Longest accepted line in bytes, excluding its terminator.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
/// Most lines accepted inside one `{ ... }` block.
pub const MAX_BLOCK_LINES: usize = 64 * 1024;

/// A complete unit of input produced by the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A single line received outside of a block, without its terminator.
    Line(String),
    /// The lines between a `{` and its matching `}`, in order. The lines are
    /// opaque: nothing inside a block is interpreted.
    Block(Vec<String>),
}

/// A `tokio_util::codec` implementation for MProtocol lines.
///
/// The codec is stateful: it remembers whether it is inside a block and the
/// block lines accumulated so far. The partial trailing line stays in the
/// `BytesMut` owned by the framed reader.
#[derive(Debug)]
pub struct MProtocolCodec {
    in_block: bool,
    block: Vec<String>,
    /// Lines of a block discarded at end of stream, kept until taken.
    unfinished: Option<Vec<String>>,
    /// How far into the buffer has already been searched for a terminator.
    scan_offset: usize,
    max_line_length: usize,
    max_block_lines: usize,
}

impl Default for MProtocolCodec {
    fn default() -> Self {
        Self::with_limits(MAX_LINE_LENGTH, MAX_BLOCK_LINES)
    }
}

impl MProtocolCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec with custom line-length and block-size limits.
    pub fn with_limits(max_line_length: usize, max_block_lines: usize) -> Self {
        Self {
            in_block: false,
            block: Vec::new(),
            unfinished: None,
            scan_offset: 0,
            max_line_length,
            max_block_lines,
        }
    }

    /// Returns true while a `{` has been seen and its `}` has not.
    pub fn in_block(&self) -> bool {
        self.in_block
    }

    /// Returns the lines of a block that was opened but never closed, either
    /// the block still in progress or the one discarded at end of stream.
    pub fn take_unfinished_block(&mut self) -> Option<Vec<String>> {
        if self.in_block {
            self.in_block = false;
            return Some(mem::take(&mut self.block));
        }
        self.unfinished.take()
    }

    /// Splits the next complete line off the front of `src`, if there is one.
    fn next_line(&mut self, src: &mut BytesMut) -> Result<Option<String>, ClientError> {
        let start = self.scan_offset.min(src.len());
        match src[start..].iter().position(|b| *b == LF) {
            Some(offset) => {
                let end = start + offset;
                self.scan_offset = 0;
                let raw = src.split_to(end + 1);
                let mut line = &raw[..end];
                if let Some(stripped) = line.strip_suffix(&[CR]) {
                    line = stripped;
                }
                if line.len() > self.max_line_length {
                    return Err(self.line_too_long(line.len()));
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
            None => {
                // One byte of slack for a trailing CR.
                if src.len() > self.max_line_length + 1 {
                    return Err(self.line_too_long(src.len()));
                }
                self.scan_offset = src.len();
                Ok(None)
            }
        }
    }

    fn line_too_long(&self, length: usize) -> ClientError {
        ClientError::Decode(format!(
            "line of {length} bytes exceeds the limit of {} bytes",
            self.max_line_length
        ))
    }
}

impl Decoder for MProtocolCodec {
    type Item = Frame;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = self.next_line(src)? {
            if self.in_block {
                if line == BLOCK_CLOSE {
                    self.in_block = false;
                    return Ok(Some(Frame::Block(mem::take(&mut self.block))));
                }
                if self.block.len() >= self.max_block_lines {
                    return Err(ClientError::Decode(format!(
                        "block exceeds the limit of {} lines",
                        self.max_block_lines
                    )));
                }
                self.block.push(line);
            } else if line == BLOCK_OPEN {
                self.in_block = true;
            } else {
                return Ok(Some(Frame::Line(line)));
            }
        }
        Ok(None)
    }

    /// Called once the peer has closed the stream. A half-received block or an
    /// unterminated trailing line is discarded, never delivered. The lines of
    /// the discarded block stay available through `take_unfinished_block`.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(
                "Discarding {} bytes of unterminated input at end of stream",
                src.len()
            );
            src.clear();
            self.scan_offset = 0;
        }
        if self.in_block {
            warn!(
                "Stream ended inside a multi-line block; discarding {} partial lines",
                self.block.len()
            );
            self.in_block = false;
            self.unfinished = Some(mem::take(&mut self.block));
        }
        Ok(None)
    }
}

impl Encoder<&str> for MProtocolCodec {
    type Error = ClientError;

    /// Writes `item` followed by a single `\n`.
    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        validate_command(item)?;
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(LF);
        Ok(())
    }
}

/// Rejects commands that would break line framing on the wire.
pub fn validate_command(command: &str) -> Result<(), ClientError> {
    if command.bytes().any(|b| b == LF || b == CR) {
        return Err(ClientError::InvalidCommand(format!(
            "command must not contain a line terminator: {command:?}"
        )));
    }
    Ok(())
}

/// A synchronous front end to the codec: feed it byte chunks as they arrive and
/// get back every frame they complete.
#[derive(Debug, Default)]
pub struct FrameReader {
    codec: MProtocolCodec,
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(codec: MProtocolCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Appends `bytes` and returns the frames completed by them, in order.
    /// Any trailing unterminated fragment is retained for the next call.
    ///
    /// Fails with `ClientError::Decode` when a limit is exceeded; the stream
    /// cannot be resynchronized after that and the reader should be dropped.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ClientError> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn in_block(&self) -> bool {
        self.codec.in_block()
    }

    /// The bytes of the partial line waiting for its terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}
