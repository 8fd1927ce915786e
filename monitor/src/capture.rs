//! Parser for candump-style capture lines.
//!
//! Accepts the compact form `301#4B40060E06000005` as well as full log lines
//! such as `(1700000000.123456) can0 301#4B40060E06000005`; the last
//! whitespace-separated token holding a `#` is the frame.

use std::fmt;

/// Largest classic CAN payload.
pub const MAX_PAYLOAD: usize = 8;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CaptureFrame {
    pub can_id: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CaptureError {
    MissingSeparator,
    InvalidIdentifier(String),
    OddHexLength(usize),
    InvalidHex(String),
    PayloadTooLong(usize),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::MissingSeparator => f.write_str("expected `ID#DATA`"),
            CaptureError::InvalidIdentifier(id) => write!(f, "invalid CAN identifier `{id}`"),
            CaptureError::OddHexLength(len) => write!(f, "payload has odd hex length {len}"),
            CaptureError::InvalidHex(data) => write!(f, "invalid hex payload `{data}`"),
            CaptureError::PayloadTooLong(len) => {
                write!(f, "payload of {len} bytes exceeds {MAX_PAYLOAD}")
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// Parses one capture line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<CaptureFrame>, CaptureError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let token = trimmed
        .split_whitespace()
        .rev()
        .find(|token| token.contains('#'))
        .ok_or(CaptureError::MissingSeparator)?;
    let (id, data) = token
        .split_once('#')
        .ok_or(CaptureError::MissingSeparator)?;

    let can_id = Some(id)
        .filter(|id| !id.is_empty() && id.bytes().all(|byte| byte.is_ascii_hexdigit()))
        .and_then(|id| u16::from_str_radix(id, 16).ok())
        .filter(|id| *id <= 0x7FF)
        .ok_or_else(|| CaptureError::InvalidIdentifier(id.to_string()))?;

    if data.len() % 2 != 0 {
        return Err(CaptureError::OddHexLength(data.len()));
    }
    if data.len() / 2 > MAX_PAYLOAD {
        return Err(CaptureError::PayloadTooLong(data.len() / 2));
    }

    let data = (0..data.len())
        .step_by(2)
        .map(|index| {
            data.get(index..index + 2)
                .filter(|pair| pair.bytes().all(|byte| byte.is_ascii_hexdigit()))
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| CaptureError::InvalidHex(data.to_string()))?;

    Ok(Some(CaptureFrame { can_id, data }))
}
