//! Fault-state codes reported in the upper nibble of telemetry frames.

use core::fmt;

/// Fault condition reported by the interceptor firmware.
///
/// The firmware defines codes `0..=9`; anything else decodes to [`FaultState::Unknown`]
/// and is left to the caller to grade.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FaultState {
    NoFault,
    BadChecksum,
    Send,
    Sce,
    Startup,
    Timeout,
    Sensor,
    InvalidChecksum,
    AdcUnconfigured,
    TimeoutVss,
    Unknown(u8),
}

impl FaultState {
    const NO_FAULT_CODE: u8 = 0;
    const BAD_CHECKSUM_CODE: u8 = 1;
    const SEND_CODE: u8 = 2;
    const SCE_CODE: u8 = 3;
    const STARTUP_CODE: u8 = 4;
    const TIMEOUT_CODE: u8 = 5;
    const SENSOR_CODE: u8 = 6;
    const INVALID_CHECKSUM_CODE: u8 = 7;
    const ADC_UNCONFIGURED_CODE: u8 = 8;
    const TIMEOUT_VSS_CODE: u8 = 9;

    /// Classifies a raw fault code.
    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            Self::NO_FAULT_CODE => FaultState::NoFault,
            Self::BAD_CHECKSUM_CODE => FaultState::BadChecksum,
            Self::SEND_CODE => FaultState::Send,
            Self::SCE_CODE => FaultState::Sce,
            Self::STARTUP_CODE => FaultState::Startup,
            Self::TIMEOUT_CODE => FaultState::Timeout,
            Self::SENSOR_CODE => FaultState::Sensor,
            Self::INVALID_CHECKSUM_CODE => FaultState::InvalidChecksum,
            Self::ADC_UNCONFIGURED_CODE => FaultState::AdcUnconfigured,
            Self::TIMEOUT_VSS_CODE => FaultState::TimeoutVss,
            other => FaultState::Unknown(other),
        }
    }

    /// Encodes the state back into its raw code.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            FaultState::NoFault => Self::NO_FAULT_CODE,
            FaultState::BadChecksum => Self::BAD_CHECKSUM_CODE,
            FaultState::Send => Self::SEND_CODE,
            FaultState::Sce => Self::SCE_CODE,
            FaultState::Startup => Self::STARTUP_CODE,
            FaultState::Timeout => Self::TIMEOUT_CODE,
            FaultState::Sensor => Self::SENSOR_CODE,
            FaultState::InvalidChecksum => Self::INVALID_CHECKSUM_CODE,
            FaultState::AdcUnconfigured => Self::ADC_UNCONFIGURED_CODE,
            FaultState::TimeoutVss => Self::TIMEOUT_VSS_CODE,
            FaultState::Unknown(code) => code,
        }
    }

    /// Returns `true` for every state other than [`FaultState::NoFault`].
    #[must_use]
    pub const fn is_fault(self) -> bool {
        !matches!(self, FaultState::NoFault)
    }

    /// Returns `true` when the code is outside the firmware's catalogue.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, FaultState::Unknown(_))
    }

    /// Firmware identifier for the state, `None` for unknown codes.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self {
            FaultState::NoFault => Some("NO_FAULT"),
            FaultState::BadChecksum => Some("FAULT_BAD_CHECKSUM"),
            FaultState::Send => Some("FAULT_SEND"),
            FaultState::Sce => Some("FAULT_SCE"),
            FaultState::Startup => Some("FAULT_STARTUP"),
            FaultState::Timeout => Some("FAULT_TIMEOUT"),
            FaultState::Sensor => Some("FAULT_SENSOR"),
            FaultState::InvalidChecksum => Some("FAULT_INVALID_CKSUM"),
            FaultState::AdcUnconfigured => Some("FAULT_ADC_UNCONFIGURED"),
            FaultState::TimeoutVss => Some("FAULT_TIMEOUT_VSS"),
            FaultState::Unknown(_) => None,
        }
    }
}

impl From<u8> for FaultState {
    fn from(code: u8) -> Self {
        Self::from_raw(code)
    }
}

impl From<FaultState> for u8 {
    fn from(state: FaultState) -> Self {
        state.to_raw()
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.pad(name),
            None => write!(f, "UNKNOWN({})", self.to_raw()),
        }
    }
}

/// Classifies a fault code. Equivalent to [`FaultState::from_raw`].
#[must_use]
pub const fn classify(code: u8) -> FaultState {
    FaultState::from_raw(code)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::ToString;

    #[test]
    fn catalogue_round_trip() {
        let fixtures = [
            (FaultState::NoFault, 0, "NO_FAULT"),
            (FaultState::BadChecksum, 1, "FAULT_BAD_CHECKSUM"),
            (FaultState::Send, 2, "FAULT_SEND"),
            (FaultState::Sce, 3, "FAULT_SCE"),
            (FaultState::Startup, 4, "FAULT_STARTUP"),
            (FaultState::Timeout, 5, "FAULT_TIMEOUT"),
            (FaultState::Sensor, 6, "FAULT_SENSOR"),
            (FaultState::InvalidChecksum, 7, "FAULT_INVALID_CKSUM"),
            (FaultState::AdcUnconfigured, 8, "FAULT_ADC_UNCONFIGURED"),
            (FaultState::TimeoutVss, 9, "FAULT_TIMEOUT_VSS"),
        ];

        for (state, code, name) in fixtures {
            assert_eq!(classify(code), state);
            assert_eq!(state.to_raw(), code);
            assert_eq!(state.to_string(), name);
        }
    }

    #[test]
    fn upper_nibble_codes_are_unknown_not_fatal() {
        for code in 10..=15 {
            let state = classify(code);
            assert_eq!(state, FaultState::Unknown(code));
            assert!(state.is_unknown());
            assert_eq!(state.name(), None);
        }
        assert_eq!(classify(11).to_string(), "UNKNOWN(11)");
    }

    #[test]
    fn only_no_fault_is_healthy() {
        assert!(!FaultState::NoFault.is_fault());
        assert!(FaultState::Sensor.is_fault());
        assert!(FaultState::Unknown(12).is_fault());
    }
}
