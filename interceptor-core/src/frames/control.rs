//! Control frame (host to interceptor).
//!
//! Wire layout, 6 bytes:
//!
//! | Byte | Content                                  |
//! |------|------------------------------------------|
//! | 0    | checksum over bytes 1..=5                |
//! | 1-2  | `target_0`, little-endian two's complement |
//! | 3-4  | `target_1`, little-endian two's complement |
//! | 5    | `enable << 7 \| counter`                  |
//!
//! The codec frames whatever targets it is given. Limiting them to a safe range
//! is the caller's job; [`DifferentialCommand`] is the policy the bench tooling
//! uses.

use super::{DecodeError, NIBBLE_MASK, require_len};
use crate::checksum;

/// Size of an encoded control frame.
pub const CONTROL_FRAME_LEN: usize = 6;

const ENABLE_BIT: u8 = 0x80;

/// Largest torque target the bench tooling will request.
pub const TORQUE_LIMIT: i16 = 500;

/// Requests with a smaller magnitude are sent as zero.
pub const TORQUE_DEADBAND: i16 = 10;

/// Decoded control frame.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ControlFrame {
    pub target_0: i16,
    pub target_1: i16,
    pub enable: bool,
    /// Rolling counter, always `0..=15`.
    pub counter: u8,
}

impl ControlFrame {
    /// Creates a frame, masking `counter` to four bits.
    #[must_use]
    pub const fn new(target_0: i16, target_1: i16, enable: bool, counter: u8) -> Self {
        Self {
            target_0,
            target_1,
            enable,
            counter: counter & NIBBLE_MASK,
        }
    }

    /// Zero targets with actuation disarmed, sent when a control session ends.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, 0, false, 0)
    }

    /// Flags byte carrying the enable bit and rolling counter.
    #[must_use]
    pub const fn flags(&self) -> u8 {
        let enable = if self.enable { ENABLE_BIT } else { 0 };
        enable | (self.counter & NIBBLE_MASK)
    }

    /// Encodes the frame and seals it with its checksum.
    #[must_use]
    pub fn encode(&self) -> [u8; CONTROL_FRAME_LEN] {
        let target_0 = self.target_0.to_le_bytes();
        let target_1 = self.target_1.to_le_bytes();
        let mut frame = [
            0,
            target_0[0],
            target_0[1],
            target_1[0],
            target_1[1],
            self.flags(),
        ];
        checksum::seal(&mut frame);
        frame
    }
}

/// Encodes a control frame from its fields.
#[must_use]
pub fn encode(target_0: i16, target_1: i16, enable: bool, counter: u8) -> [u8; CONTROL_FRAME_LEN] {
    ControlFrame::new(target_0, target_1, enable, counter).encode()
}

/// Decodes the first [`CONTROL_FRAME_LEN`] bytes of a control frame.
///
/// The checksum is not verified; use [`checksum::verify`] when that matters.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] when fewer than six bytes are supplied.
pub fn decode_control(bytes: &[u8]) -> Result<ControlFrame, DecodeError> {
    require_len(bytes, CONTROL_FRAME_LEN)?;
    let flags = bytes[5];
    Ok(ControlFrame {
        target_0: i16::from_le_bytes([bytes[1], bytes[2]]),
        target_1: i16::from_le_bytes([bytes[3], bytes[4]]),
        enable: flags & ENABLE_BIT != 0,
        counter: flags & NIBBLE_MASK,
    })
}

/// Four-bit sequence counter for outbound frames.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RollingCounter {
    value: u8,
}

impl RollingCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Starts the counter at `value & 0x0F`.
    #[must_use]
    pub const fn starting_at(value: u8) -> Self {
        Self {
            value: value & NIBBLE_MASK,
        }
    }

    /// Value the next frame will carry.
    #[must_use]
    pub const fn current(&self) -> u8 {
        self.value
    }

    /// Returns the current value and advances, wrapping 15 to 0.
    pub fn advance(&mut self) -> u8 {
        let value = self.value;
        self.value = value.wrapping_add(1) & NIBBLE_MASK;
        value
    }
}

/// Symmetric differential torque request policy.
///
/// Produces frames with `target_1 == -target_0`, zeroes requests inside the
/// dead-band and clamps the rest to `±limit`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DifferentialCommand {
    pub limit: i16,
    pub deadband: i16,
}

impl DifferentialCommand {
    /// Limits used by the steering bench tools.
    pub const DEFAULT: Self = Self {
        limit: TORQUE_LIMIT,
        deadband: TORQUE_DEADBAND,
    };

    /// Applies the dead-band and clamp to a torque request.
    ///
    /// The result always lies in `-i16::MAX..=i16::MAX` so its negation fits.
    #[must_use]
    pub fn shape(&self, torque: i32) -> i16 {
        if torque.unsigned_abs() < u32::from(self.deadband.unsigned_abs()) {
            return 0;
        }
        let limit = i32::from(self.limit.unsigned_abs()).min(i32::from(i16::MAX));
        let clamped = torque.clamp(-limit, limit);
        i16::try_from(clamped).unwrap_or(if clamped < 0 { -i16::MAX } else { i16::MAX })
    }

    /// Builds the control frame for a torque request.
    #[must_use]
    pub fn frame(&self, torque: i32, enable: bool, counter: u8) -> ControlFrame {
        let target = self.shape(torque);
        ControlFrame::new(target, target.saturating_neg(), enable, counter)
    }
}

impl Default for DifferentialCommand {
    fn default() -> Self {
        Self::DEFAULT
    }
}
