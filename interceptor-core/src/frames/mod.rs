//! Binary frames exchanged with the interceptor over the CAN bus.
//!
//! Both directions use fixed identifiers and a fixed layout with the CRC-8 from
//! [`crate::checksum`] in byte 0. The control frame is sent by the host on
//! [`CONTROL_ID`]; the interceptor answers on the output identifier that
//! matches its configured [`Mode`].

use core::fmt;

pub mod control;
pub mod telemetry;

pub use control::{
    CONTROL_FRAME_LEN, ControlFrame, DifferentialCommand, RollingCounter, TORQUE_DEADBAND,
    TORQUE_LIMIT, decode_control, encode,
};
pub use telemetry::{
    GAS_PEDAL_FRAME_LEN, GasPedalFrame, RawTelemetryFrame, TELEMETRY_FRAME_LEN, TelemetryFrame,
    decode, decode_gas_pedal, decode_verified, parse_raw,
};

/// Identifier the host transmits control frames on.
pub const CONTROL_ID: u16 = 0x300;

/// Identifier the interceptor answers on in differential mode.
pub const DIFFERENTIAL_OUTPUT_ID: u16 = 0x301;

/// Identifier the interceptor answers on in gas-pedal mode.
pub const GAS_PEDAL_OUTPUT_ID: u16 = 0x201;

/// Mask applied to rolling counters and nibble fields.
pub const NIBBLE_MASK: u8 = 0x0F;

/// Operating mode stored in the interceptor's configuration.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Unconfigured,
    Differential,
    GasPedal,
    Unknown(u8),
}

impl Mode {
    /// Decodes the raw configuration value.
    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            0 => Mode::Unconfigured,
            1 => Mode::Differential,
            2 => Mode::GasPedal,
            other => Mode::Unknown(other),
        }
    }

    /// Encodes the mode into its configuration value.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            Mode::Unconfigured => 0,
            Mode::Differential => 1,
            Mode::GasPedal => 2,
            Mode::Unknown(code) => code,
        }
    }

    /// Output identifier the interceptor transmits on in this mode.
    #[must_use]
    pub const fn output_id(self) -> Option<u16> {
        match self {
            Mode::Differential => Some(DIFFERENTIAL_OUTPUT_ID),
            Mode::GasPedal => Some(GAS_PEDAL_OUTPUT_ID),
            Mode::Unconfigured | Mode::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Unconfigured => f.write_str("unconfigured"),
            Mode::Differential => f.write_str("differential"),
            Mode::GasPedal => f.write_str("gas-pedal"),
            Mode::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// Checksum byte that did not match the frame contents.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChecksumMismatch {
    /// Checksum recomputed over the payload.
    pub expected: u8,
    /// Checksum carried in byte 0.
    pub received: u8,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checksum mismatch: expected {:#04x}, received {:#04x}",
            self.expected, self.received
        )
    }
}

impl core::error::Error for ChecksumMismatch {}

/// Errors reported while decoding a binary frame.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Fewer bytes than the frame layout requires. The frame must be dropped.
    TooShort { len: usize, required: usize },
    /// Checksum verification was requested and failed.
    Checksum(ChecksumMismatch),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len, required } => {
                write!(f, "frame too short: {len} bytes, need {required}")
            }
            DecodeError::Checksum(mismatch) => mismatch.fmt(f),
        }
    }
}

impl core::error::Error for DecodeError {}

impl From<ChecksumMismatch> for DecodeError {
    fn from(mismatch: ChecksumMismatch) -> Self {
        DecodeError::Checksum(mismatch)
    }
}

pub(crate) const fn require_len(bytes: &[u8], required: usize) -> Result<(), DecodeError> {
    if bytes.len() < required {
        Err(DecodeError::TooShort {
            len: bytes.len(),
            required,
        })
    } else {
        Ok(())
    }
}
