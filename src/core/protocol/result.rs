// src/core/protocol/result.rs

//! The `ProtocolResult` type and the line classifier that turns a single
//! received line into a result, a change notification, or a diagnostic.

use crate::core::ClientError;
use std::fmt;

/// The line that opens a multi-line block.
pub const BLOCK_OPEN: &str = "{";
/// The line that closes a multi-line block.
pub const BLOCK_CLOSE: &str = "}";

const CHANGE_PREFIX: &str = "CHG ";
const MANUAL_PREFIX: &str = "MAN ";
const PROPERTY_PREFIXES: [&str; 2] = ["PW_", "P_"];
const OK_MESSAGE: &str = "Ok";

/// The payload carried by a `ProtocolResult`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    /// Free text, e.g. the body of a `MAN` reply.
    Text(String),
    /// A property shorthand reply such as `P_int foo=42`.
    Property { kind: String, value: String },
    /// The ordered lines of a `{ ... }` block.
    Lines(Vec<String>),
}

/// A single decoded reply from the device. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResult {
    code: u8,
    message: String,
    payload: Payload,
}

impl ProtocolResult {
    pub fn new(code: u8, message: impl Into<String>, payload: Payload) -> Self {
        Self {
            code,
            message: message.into(),
            payload,
        }
    }

    /// A successful result (`code == 0`, message `Ok`) carrying `payload`.
    pub fn ok(payload: Payload) -> Self {
        Self::new(0, OK_MESSAGE, payload)
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when the device reported success. Check this before reading the payload.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Returns the value of a property shorthand payload, or the body of a text payload.
    pub fn value(&self) -> Option<&str> {
        match &self.payload {
            Payload::Property { value, .. } => Some(value),
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the lines of a block payload.
    pub fn lines(&self) -> Option<&[String]> {
        match &self.payload {
            Payload::Lines(lines) => Some(lines),
            _ => None,
        }
    }

    /// Converts a non-zero status into `ClientError::CommandRejected` for `command`.
    pub fn into_checked(self, command: &str) -> Result<Self, ClientError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ClientError::CommandRejected {
                command: command.to_string(),
                code: self.code,
                message: self.message,
            })
        }
    }
}

impl fmt::Display for ProtocolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Code: {})", self.message, self.code)
    }
}

/// An unsolicited `CHG <node>.<property>=<value>` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub node_path: String,
    pub property: String,
    pub value: String,
}

/// The classification of one line received outside of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    /// A status line, a property shorthand, or a manual-text reply.
    Result(ProtocolResult),
    Change(ChangeNotification),
    BlockOpen,
    BlockClose,
    /// Noise or a malformed line. Diagnostic only.
    Unrecognized { line: String, reason: String },
}

/// Classifies a single line (without its terminator).
///
/// This never fails: anything that cannot be decoded, including malformed
/// status-like lines such as `E:` or `Ex:foo`, is reported as `Unrecognized`.
pub fn decode_line(line: &str) -> DecodedLine {
    if line == BLOCK_OPEN {
        return DecodedLine::BlockOpen;
    }
    if line == BLOCK_CLOSE {
        return DecodedLine::BlockClose;
    }
    if let Some(rest) = line.strip_prefix(CHANGE_PREFIX) {
        return match parse_change(rest) {
            Some(change) => DecodedLine::Change(change),
            None => unrecognized(line, "malformed change notification"),
        };
    }
    if let Some(rest) = line.strip_prefix(MANUAL_PREFIX) {
        return DecodedLine::Result(ProtocolResult::ok(Payload::Text(rest.to_string())));
    }
    if line.starts_with('E') {
        return match parse_status(line) {
            Some(result) => DecodedLine::Result(result),
            None => unrecognized(line, "malformed status line"),
        };
    }
    if line.starts_with('P') {
        return match parse_property_shorthand(line) {
            Some(property) => DecodedLine::Result(ProtocolResult::ok(Payload::Property {
                kind: property.kind,
                value: property.value,
            })),
            None => unrecognized(line, "malformed property line"),
        };
    }
    unrecognized(line, "unknown line")
}

fn unrecognized(line: &str, reason: &str) -> DecodedLine {
    DecodedLine::Unrecognized {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses `E<digit>:<message>`.
fn parse_status(line: &str) -> Option<ProtocolResult> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'E' || !bytes[1].is_ascii_digit() || bytes[2] != b':' {
        return None;
    }
    let code = bytes[1] - b'0';
    Some(ProtocolResult::new(code, &line[3..], Payload::None))
}

/// Parses `<node>.<property>=<value>`. The value may itself contain `=` or `.`.
fn parse_change(rest: &str) -> Option<ChangeNotification> {
    let (target, value) = rest.split_once('=')?;
    let (node_path, property) = target.rsplit_once('.')?;
    if node_path.is_empty() || property.is_empty() {
        return None;
    }
    Some(ChangeNotification {
        node_path: node_path.to_string(),
        property: property.to_string(),
        value: value.to_string(),
    })
}

/// A property line as it appears in a shorthand reply or a node listing,
/// e.g. `PW_int speed=42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyLine {
    pub kind: String,
    pub name: String,
    pub value: String,
    pub writable: bool,
}

/// Parses `P_<type> <name>=<value>` or `PW_<type> <name>=<value>`.
///
/// The value is everything after the last `=`.
pub fn parse_property_shorthand(line: &str) -> Option<PropertyLine> {
    let (prefix, rest) = PROPERTY_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(*prefix).map(|rest| (*prefix, rest)))?;
    let (kind, tail) = rest.split_once(' ')?;
    if kind.is_empty() {
        return None;
    }
    let (name, value) = tail.rsplit_once('=')?;
    Some(PropertyLine {
        kind: kind.to_string(),
        name: name.to_string(),
        value: value.to_string(),
        writable: prefix == "PW_",
    })
}
