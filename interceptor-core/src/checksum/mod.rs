//! CRC-8 checksum shared by the control and telemetry frames.
//!
//! Polynomial `0x1D`, initial register `0xFF`, no reflection, final XOR `0xFF`
//! (the SAE J1850 parameter set). The interceptor firmware rejects frames whose
//! checksum was computed without the final inversion, so [`checksum`] always
//! applies it.

/// Generator polynomial.
pub const POLYNOMIAL: u8 = 0x1D;

/// Register value before the first byte is folded in.
pub const INITIAL: u8 = 0xFF;

/// Value XORed into the register after the last byte.
pub const FINAL_XOR: u8 = 0xFF;

/// Lookup table indexed by `register ^ byte`, built at compile time.
pub static TABLE: [u8; 256] = build_table(POLYNOMIAL);

const fn build_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = index as u8;
        let mut round = 0;
        while round < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            round += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

/// Computes the checksum over `payload`.
#[must_use]
pub fn checksum(payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(INITIAL, |crc, byte| TABLE[usize::from(crc ^ byte)])
        ^ FINAL_XOR
}

/// Returns `true` when byte 0 of `frame` matches the checksum of the remaining bytes.
///
/// An empty frame never verifies.
#[must_use]
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_first() {
        Some((received, payload)) => checksum(payload) == *received,
        None => false,
    }
}

/// Writes the checksum of `frame[1..]` into `frame[0]`.
///
/// Does nothing for an empty slice.
pub fn seal(frame: &mut [u8]) {
    if let Some((slot, payload)) = frame.split_first_mut() {
        *slot = checksum(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_shift_register() {
        assert_eq!(&TABLE[..4], &[0x00, 0x1D, 0x3A, 0x27]);
        assert_eq!(TABLE[255], 0xC4);
    }

    #[test]
    fn matches_catalogue_check_value() {
        assert_eq!(checksum(b"123456789"), 0x4B);
    }

    #[test]
    fn empty_payload_is_inverted_initial_register() {
        assert_eq!(checksum(&[]), INITIAL ^ FINAL_XOR);
    }

    #[test]
    fn final_inversion_is_applied() {
        let payload = [0x38, 0xFF, 0xC8, 0x00, 0x83];
        let raw = payload
            .iter()
            .fold(INITIAL, |crc, byte| TABLE[usize::from(crc ^ byte)]);
        assert_eq!(checksum(&payload), raw ^ 0xFF);
        assert_ne!(checksum(&payload), raw);
    }

    #[test]
    fn seal_then_verify() {
        let mut frame = [0u8, 0x40, 0x06, 0x0E, 0x06, 0x00, 0x00, 0x05];
        seal(&mut frame);
        assert_eq!(frame[0], 0x4B);
        assert!(verify(&frame));

        frame[3] ^= 0x01;
        assert!(!verify(&frame));
    }

    #[test]
    fn empty_frame_does_not_verify() {
        assert!(!verify(&[]));
    }
}
