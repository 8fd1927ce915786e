//! Decoder for the interceptor's human-readable debug stream.
//!
//! Each line carries space-separated `LABEL:HEX` fields. Producers emit
//! different subsets, so a line is matched against a fixed list of
//! [`DebugPattern`]s, most specific first. Fields inside a pattern group must be
//! adjacent; groups may be separated by arbitrary text. A line no pattern
//! accepts yields no record.

use core::fmt;

use crate::fault::FaultState;

pub mod assembler;
pub mod lexer;

pub use assembler::{DebugStream, LineAssembler, StreamCounters};
pub use lexer::{FieldLabel, LexError, LineItem};

use lexer::FieldLabel::{Adc0, Adc1, Dac0, Dac1, Mag, Ovr, Relay, State};

/// Largest value a 12-bit converter reports.
pub const ADC_MAX: u16 = 4095;

/// Default allowed difference between reported and recomputed magnitude.
pub const MAGNITUDE_TOLERANCE: u16 = 5;

/// Field layouts understood by the decoder, in matching order.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebugPattern {
    /// `ADC0 ADC1 DAC0 DAC1 Relay State Mag Ovr`, all adjacent.
    Full,
    /// `ADC0 ADC1 DAC0 DAC1 … State … Mag`.
    Status,
    /// `ADC0 ADC1 DAC0 DAC1 … Mag`.
    Actuator,
    /// `ADC0 ADC1 … Mag Ovr`.
    Override,
    /// `ADC0 ADC1 … Mag`.
    Magnitude,
    /// `ADC0 ADC1`.
    Minimal,
}

impl DebugPattern {
    /// Every pattern, most specific first.
    pub const ALL: [DebugPattern; 6] = [
        DebugPattern::Full,
        DebugPattern::Status,
        DebugPattern::Actuator,
        DebugPattern::Override,
        DebugPattern::Magnitude,
        DebugPattern::Minimal,
    ];

    /// Groups of labels; labels inside a group are adjacent, groups appear in order.
    #[must_use]
    pub const fn groups(self) -> &'static [&'static [FieldLabel]] {
        match self {
            DebugPattern::Full => &[&[Adc0, Adc1, Dac0, Dac1, Relay, State, Mag, Ovr]],
            DebugPattern::Status => &[&[Adc0, Adc1, Dac0, Dac1], &[State], &[Mag]],
            DebugPattern::Actuator => &[&[Adc0, Adc1, Dac0, Dac1], &[Mag]],
            DebugPattern::Override => &[&[Adc0, Adc1], &[Mag, Ovr]],
            DebugPattern::Magnitude => &[&[Adc0, Adc1], &[Mag]],
            DebugPattern::Minimal => &[&[Adc0, Adc1]],
        }
    }
}

impl fmt::Display for DebugPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugPattern::Full => "full",
            DebugPattern::Status => "status",
            DebugPattern::Actuator => "actuator",
            DebugPattern::Override => "override",
            DebugPattern::Magnitude => "magnitude",
            DebugPattern::Minimal => "minimal",
        };
        f.write_str(name)
    }
}

/// One decoded debug line. Fields outside the matched pattern are `None`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DebugRecord {
    pub pattern: DebugPattern,
    pub adc_0: u16,
    pub adc_1: u16,
    pub dac_0: Option<u16>,
    pub dac_1: Option<u16>,
    pub relay: Option<u8>,
    pub state: Option<u8>,
    /// Magnitude as computed by the firmware.
    pub magnitude: Option<u16>,
    pub override_flag: Option<u8>,
}

impl DebugRecord {
    const fn empty(pattern: DebugPattern) -> Self {
        Self {
            pattern,
            adc_0: 0,
            adc_1: 0,
            dac_0: None,
            dac_1: None,
            relay: None,
            state: None,
            magnitude: None,
            override_flag: None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn assign(&mut self, label: FieldLabel, value: u32) {
        // Widths were checked against `FieldLabel::max_value` while lexing.
        match label {
            Adc0 => self.adc_0 = value as u16,
            Adc1 => self.adc_1 = value as u16,
            Dac0 => self.dac_0 = Some(value as u16),
            Dac1 => self.dac_1 = Some(value as u16),
            Relay => self.relay = Some(value as u8),
            State => self.state = Some(value as u8),
            Mag => self.magnitude = Some(value as u16),
            Ovr => self.override_flag = Some(value as u8),
        }
    }

    /// `|adc_0 - adc_1|`.
    #[must_use]
    pub const fn computed_magnitude(&self) -> u16 {
        self.adc_0.abs_diff(self.adc_1)
    }

    /// Reported magnitude, falling back to the recomputed one.
    #[must_use]
    pub fn effective_magnitude(&self) -> u16 {
        self.magnitude.unwrap_or_else(|| self.computed_magnitude())
    }

    /// Whether the reported magnitude is within `tolerance` of the recomputed one.
    ///
    /// `None` when the line carried no magnitude.
    #[must_use]
    pub fn magnitude_consistent(&self, tolerance: u16) -> Option<bool> {
        self.magnitude
            .map(|reported| reported.abs_diff(self.computed_magnitude()) <= tolerance)
    }

    /// Both ADC readings fit the 12-bit converter range.
    #[must_use]
    pub const fn adc_in_range(&self) -> bool {
        self.adc_0 <= ADC_MAX && self.adc_1 <= ADC_MAX
    }

    /// Both DAC outputs fit the 12-bit range; `None` without DAC fields.
    #[must_use]
    pub fn dac_in_range(&self) -> Option<bool> {
        match (self.dac_0, self.dac_1) {
            (Some(dac_0), Some(dac_1)) => Some(dac_0 <= ADC_MAX && dac_1 <= ADC_MAX),
            _ => None,
        }
    }

    #[must_use]
    pub fn fault(&self) -> Option<FaultState> {
        self.state.map(FaultState::from_raw)
    }

    #[must_use]
    pub fn is_override(&self) -> Option<bool> {
        self.override_flag.map(|flag| flag != 0)
    }
}

/// Decodes one debug line.
///
/// Returns `None` when no pattern matches; that is the normal outcome for boot
/// banners, partial lines, and other chatter.
///
/// Fields are recognized only as whitespace-separated `LABEL:HEX` tokens. A
/// label glued to preceding text (`dbg:ADC0:0620`, `[12]ADC0:0620`) is noise,
/// and a line longer than [`lexer::MAX_TOKENS`] tokens yields `None`.
#[must_use]
pub fn decode_line(line: &str) -> Option<DebugRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    let items = match lexer::line_items(line) {
        Ok(items) => items,
        Err(error) => {
            log::trace!("debug line not lexed: {error}");
            return None;
        }
    };

    let record = DebugPattern::ALL
        .into_iter()
        .find_map(|pattern| match_pattern(pattern, &items));
    if record.is_none() {
        log::trace!("unrecognized debug line: {line}");
    }
    record
}

fn match_pattern(pattern: DebugPattern, items: &[LineItem]) -> Option<DebugRecord> {
    let mut record = DebugRecord::empty(pattern);
    let mut cursor = 0;

    for group in pattern.groups() {
        let start = find_group(items, cursor, group)?;
        for (offset, label) in group.iter().enumerate() {
            if let LineItem::Field { value, .. } = items[start + offset] {
                record.assign(*label, value);
            }
        }
        cursor = start + group.len();
    }

    Some(record)
}

fn find_group(items: &[LineItem], from: usize, group: &[FieldLabel]) -> Option<usize> {
    let remaining = items.get(from..)?;
    remaining
        .windows(group.len())
        .position(|window| {
            window.iter().zip(group).all(|(item, expected)| {
                matches!(item, LineItem::Field { label, .. } if label == expected)
            })
        })
        .map(|position| from + position)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "ADC0:00000620 ADC1:00000608 DAC0:00000400 DAC1:00000410 \
                        Relay:00000001 State:00000000 Mag:00000018 Ovr:00000000";

    #[test]
    fn full_line_decodes_every_field() {
        let record = decode_line(FULL).expect("full pattern");
        assert_eq!(record.pattern, DebugPattern::Full);
        assert_eq!(record.adc_0, 0x620);
        assert_eq!(record.adc_1, 0x608);
        assert_eq!(record.dac_0, Some(0x400));
        assert_eq!(record.dac_1, Some(0x410));
        assert_eq!(record.relay, Some(1));
        assert_eq!(record.state, Some(0));
        assert_eq!(record.magnitude, Some(0x18));
        assert_eq!(record.override_flag, Some(0));
        assert_eq!(record.fault(), Some(FaultState::NoFault));
        assert_eq!(record.magnitude_consistent(MAGNITUDE_TOLERANCE), Some(true));
    }

    #[test]
    fn minimal_line_leaves_optional_fields_empty() {
        let record = decode_line("ADC0:00000100 ADC1:00000FA0\r\n").expect("minimal");
        assert_eq!(record.pattern, DebugPattern::Minimal);
        assert_eq!(record.computed_magnitude(), 3900);
        assert_eq!(record.effective_magnitude(), 3900);
        assert_eq!(record.magnitude_consistent(5), None);
        assert_eq!(record.dac_in_range(), None);
        assert_eq!(record.fault(), None);
    }

    #[test]
    fn separated_groups_match_narrower_patterns() {
        let record = decode_line("ADC0:10 ADC1:20 DAC0:1 DAC1:2 t=5 State:3 x Mag:10")
            .expect("status");
        assert_eq!(record.pattern, DebugPattern::Status);
        assert_eq!(record.state, Some(3));
        assert_eq!(record.relay, None);

        let record = decode_line("ADC0:10 ADC1:20 seq 4 Mag:10 Ovr:1").expect("override");
        assert_eq!(record.pattern, DebugPattern::Override);
        assert_eq!(record.is_override(), Some(true));

        let record = decode_line("ADC0:10 ADC1:20 Ovr:1 Mag:10").expect("magnitude");
        assert_eq!(record.pattern, DebugPattern::Magnitude);
        assert_eq!(record.override_flag, None);
    }

    #[test]
    fn adc_pair_must_be_adjacent() {
        assert_eq!(decode_line("ADC0:10 junk ADC1:20"), None);
        assert_eq!(decode_line("ADC1:20 ADC0:10"), None);
    }

    #[test]
    fn chatter_yields_no_record() {
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line("Interceptor boot v2"), None);
        assert_eq!(decode_line("ADC0:"), None);
        assert_eq!(decode_line("ADC0:0620xyz ADC1:0608"), None);
    }

    #[test]
    fn fields_must_start_a_token() {
        assert_eq!(decode_line("dbg:ADC0:0620 ADC1:0608"), None);
        assert_eq!(decode_line("[12]ADC0:0620 ADC1:0608"), None);

        let record = decode_line("[12] ADC0:0620 ADC1:0608").expect("prefix separated");
        assert_eq!(record.adc_0, 0x620);
    }

    #[test]
    fn overlong_line_yields_no_record() {
        const PREFIX: &[u8] = b"ADC0:10 ADC1:20";
        let mut bytes = [b' '; PREFIX.len() + 2 * (lexer::MAX_TOKENS + 8)];
        bytes[..PREFIX.len()].copy_from_slice(PREFIX);
        for pair in bytes[PREFIX.len()..].chunks_exact_mut(2) {
            pair[1] = b'x';
        }
        let line = core::str::from_utf8(&bytes).expect("ascii");

        assert!(lexer::lex(line).is_err());
        assert_eq!(decode_line(line), None);
    }

    #[test]
    fn range_checks_flag_out_of_range_values() {
        let record = decode_line("ADC0:1000 ADC1:0FFF DAC0:0 DAC1:FFF Mag:10").expect("actuator");
        assert_eq!(record.pattern, DebugPattern::Actuator);
        assert!(!record.adc_in_range());
        assert_eq!(record.dac_in_range(), Some(true));
        assert_eq!(record.magnitude_consistent(5), Some(false));
    }
}
