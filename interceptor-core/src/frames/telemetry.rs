//! Telemetry frames (interceptor to host).
//!
//! Differential-mode output, 8 bytes:
//!
//! | Byte | Content                         |
//! |------|---------------------------------|
//! | 0    | checksum over bytes 1..=7       |
//! | 1-2  | `adc_0`, little-endian          |
//! | 3-4  | `adc_1`, little-endian          |
//! | 5    | override flag                   |
//! | 6    | reserved                        |
//! | 7    | `state << 4 \| pkt_idx`          |
//!
//! Decoding is split in two stages. [`parse_raw`] only checks the length, so
//! legacy producers that never filled in a checksum can still be read;
//! [`RawTelemetryFrame::validate`] is the opt-in checksum gate.

use super::{ChecksumMismatch, DecodeError, NIBBLE_MASK, require_len};
use crate::checksum;
use crate::fault::FaultState;

/// Size of a differential-mode telemetry frame.
pub const TELEMETRY_FRAME_LEN: usize = 8;

/// Minimum size of a gas-pedal output frame.
pub const GAS_PEDAL_FRAME_LEN: usize = 6;

/// Length-checked telemetry frame whose checksum has not been examined.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawTelemetryFrame {
    bytes: [u8; TELEMETRY_FRAME_LEN],
}

impl RawTelemetryFrame {
    /// Wraps an 8-byte frame.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TELEMETRY_FRAME_LEN]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TELEMETRY_FRAME_LEN] {
        &self.bytes
    }

    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.bytes[0]
    }

    #[must_use]
    pub const fn adc_0(&self) -> u16 {
        u16::from_le_bytes([self.bytes[1], self.bytes[2]])
    }

    #[must_use]
    pub const fn adc_1(&self) -> u16 {
        u16::from_le_bytes([self.bytes[3], self.bytes[4]])
    }

    #[must_use]
    pub const fn override_flag(&self) -> u8 {
        self.bytes[5]
    }

    #[must_use]
    pub const fn reserved(&self) -> u8 {
        self.bytes[6]
    }

    /// Fault code from the upper nibble of byte 7.
    #[must_use]
    pub const fn state(&self) -> u8 {
        (self.bytes[7] >> 4) & NIBBLE_MASK
    }

    /// Rolling counter from the lower nibble of byte 7.
    #[must_use]
    pub const fn pkt_idx(&self) -> u8 {
        self.bytes[7] & NIBBLE_MASK
    }

    /// Checksum recomputed over bytes 1..=7.
    #[must_use]
    pub fn expected_checksum(&self) -> u8 {
        checksum::checksum(&self.bytes[1..])
    }

    /// Verifies the checksum and decodes the frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumMismatch`] when byte 0 does not match the payload.
    pub fn validate(self) -> Result<TelemetryFrame, ChecksumMismatch> {
        let expected = self.expected_checksum();
        if expected == self.checksum() {
            Ok(self.into_frame_unchecked())
        } else {
            Err(ChecksumMismatch {
                expected,
                received: self.checksum(),
            })
        }
    }

    /// Decodes the frame without looking at the checksum.
    #[must_use]
    pub const fn into_frame_unchecked(self) -> TelemetryFrame {
        let adc_0 = self.adc_0();
        let adc_1 = self.adc_1();
        TelemetryFrame {
            adc_0,
            adc_1,
            magnitude: adc_0.abs_diff(adc_1),
            override_flag: self.override_flag(),
            state: self.state(),
            pkt_idx: self.pkt_idx(),
            checksum: self.checksum(),
        }
    }
}

/// Decoded differential-mode telemetry.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryFrame {
    pub adc_0: u16,
    pub adc_1: u16,
    /// `|adc_0 - adc_1|`, recomputed on the host since the frame does not carry it.
    pub magnitude: u16,
    pub override_flag: u8,
    pub state: u8,
    pub pkt_idx: u8,
    /// Raw byte 0, kept so callers can verify after the fact.
    pub checksum: u8,
}

impl TelemetryFrame {
    /// Classified fault state.
    #[must_use]
    pub const fn fault(&self) -> FaultState {
        FaultState::from_raw(self.state)
    }

    /// Returns `true` when the firmware reports manual override.
    #[must_use]
    pub const fn is_override(&self) -> bool {
        self.override_flag != 0
    }
}

/// Copies the first eight bytes into a [`RawTelemetryFrame`].
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for fewer than eight bytes.
pub fn parse_raw(bytes: &[u8]) -> Result<RawTelemetryFrame, DecodeError> {
    require_len(bytes, TELEMETRY_FRAME_LEN)?;
    let mut frame = [0u8; TELEMETRY_FRAME_LEN];
    frame.copy_from_slice(&bytes[..TELEMETRY_FRAME_LEN]);
    Ok(RawTelemetryFrame::from_bytes(frame))
}

/// Decodes a telemetry frame without checksum verification.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for fewer than eight bytes.
pub fn decode(bytes: &[u8]) -> Result<TelemetryFrame, DecodeError> {
    parse_raw(bytes).map(RawTelemetryFrame::into_frame_unchecked)
}

/// Decodes and verifies a telemetry frame.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for fewer than eight bytes and
/// [`DecodeError::Checksum`] when verification fails.
pub fn decode_verified(bytes: &[u8]) -> Result<TelemetryFrame, DecodeError> {
    Ok(parse_raw(bytes)?.validate()?)
}

/// Gas-pedal mode output.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GasPedalFrame {
    pub adc_0: u16,
    pub adc_1: u16,
    pub checksum: u8,
}

impl GasPedalFrame {
    /// Pedal position is read from the primary sensor.
    #[must_use]
    pub const fn pedal_position(&self) -> u16 {
        self.adc_0
    }
}

/// Decodes a gas-pedal output frame.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for fewer than six bytes.
pub fn decode_gas_pedal(bytes: &[u8]) -> Result<GasPedalFrame, DecodeError> {
    require_len(bytes, GAS_PEDAL_FRAME_LEN)?;
    Ok(GasPedalFrame {
        adc_0: u16::from_le_bytes([bytes[1], bytes[2]]),
        adc_1: u16::from_le_bytes([bytes[3], bytes[4]]),
        checksum: bytes[0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 8] = [0x4B, 0x40, 0x06, 0x0E, 0x06, 0x00, 0x00, 0x05];

    #[test]
    fn decodes_fields_and_magnitude() {
        let frame = decode(&SAMPLE).expect("frame should decode");
        assert_eq!(frame.adc_0, 1600);
        assert_eq!(frame.adc_1, 1550);
        assert_eq!(frame.magnitude, 50);
        assert_eq!(frame.state, 0);
        assert_eq!(frame.pkt_idx, 5);
        assert_eq!(frame.checksum, 0x4B);
        assert_eq!(frame.fault(), FaultState::NoFault);
    }

    #[test]
    fn nibble_accessors_split_last_byte() {
        let mut bytes = SAMPLE;
        bytes[7] = 0x9C;
        let raw = parse_raw(&bytes).expect("length ok");
        assert_eq!(raw.state(), 9);
        assert_eq!(raw.pkt_idx(), 12);
        assert_eq!(raw.into_frame_unchecked().fault(), FaultState::TimeoutVss);
    }

    #[test]
    fn strict_validation_catches_corruption() {
        assert!(parse_raw(&SAMPLE).expect("length ok").validate().is_ok());

        let mut corrupted = SAMPLE;
        corrupted[5] = 0x01;
        let raw = parse_raw(&corrupted).expect("length ok");
        let mismatch = raw.validate().expect_err("corruption must be detected");
        assert_eq!(mismatch.received, 0x4B);
        assert_eq!(mismatch.expected, raw.expected_checksum());

        // Lenient decoding still yields the frame.
        let frame = decode(&corrupted).expect("lenient decode");
        assert!(frame.is_override());
        assert!(matches!(
            decode_verified(&corrupted),
            Err(DecodeError::Checksum(_))
        ));
    }

    #[test]
    fn short_frames_are_rejected() {
        assert_eq!(
            decode(&SAMPLE[..7]),
            Err(DecodeError::TooShort {
                len: 7,
                required: TELEMETRY_FRAME_LEN
            })
        );
    }

    #[test]
    fn gas_pedal_position_tracks_primary_sensor() {
        let frame = decode_gas_pedal(&SAMPLE[..6]).expect("six bytes suffice");
        assert_eq!(frame.pedal_position(), 1600);
        assert_eq!(frame.adc_1, 1550);
        assert!(decode_gas_pedal(&SAMPLE[..5]).is_err());
    }
}
