//! Host-side monitor for the interceptor CAN link.
//!
//! The transport hands over `(identifier, payload)` pairs; [`LinkMonitor`]
//! filters them by the configured [`Mode`], decodes them, runs the sequence
//! trackers and fault classifier, and keeps running [`LinkStats`]. Frames that
//! cannot be decoded are dropped and counted, never fatal.

use core::fmt;

use crate::calibration::DEFAULT_OVERRIDE_THRESHOLD;
use crate::checksum;
use crate::fault::FaultState;
use crate::frames::{
    CONTROL_ID, ChecksumMismatch, ControlFrame, DecodeError, GasPedalFrame, Mode, TelemetryFrame,
    decode_control, decode_gas_pedal, parse_raw,
};
use crate::sequence::{Channel, GAP_HISTORY_CAPACITY, SequenceGap, SequenceMonitor};

mod override_watch;

pub use override_watch::{
    APPROACHING_PERCENT, NEAR_THRESHOLD_PERCENT, OverrideLevel, OverrideVerdict, OverrideWatch,
};

/// What to do with frames whose checksum does not match.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChecksumPolicy {
    /// Drop the frame.
    Strict,
    /// Keep the frame, count the mismatch.
    Lenient,
}

/// Link monitor configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkConfig {
    pub mode: Mode,
    pub checksum: ChecksumPolicy,
    /// Threshold used to grade telemetry magnitudes.
    pub override_threshold: u32,
}

impl LinkConfig {
    pub const DEFAULT: Self = Self {
        mode: Mode::Differential,
        checksum: ChecksumPolicy::Lenient,
        override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
    };
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Result of feeding one CAN frame to the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    /// Differential-mode output frame.
    Telemetry {
        frame: TelemetryFrame,
        checksum_ok: bool,
        gap: Option<SequenceGap>,
        level: OverrideLevel,
    },
    /// Gas-pedal output frame.
    GasPedal(GasPedalFrame),
    /// Control frame seen on the bus.
    Control {
        frame: ControlFrame,
        checksum_ok: bool,
        gap: Option<SequenceGap>,
    },
    /// Frame on a monitored identifier that could not be accepted.
    Dropped { can_id: u16, error: DecodeError },
    /// Frame on an identifier the monitor does not follow.
    Ignored { can_id: u16 },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Telemetry {
                frame,
                checksum_ok,
                gap,
                level,
            } => {
                write!(
                    f,
                    "telemetry adc0={} adc1={} mag={} ovr={} state={} idx={} [{level}]",
                    frame.adc_0,
                    frame.adc_1,
                    frame.magnitude,
                    frame.override_flag,
                    frame.fault(),
                    frame.pkt_idx
                )?;
                if !checksum_ok {
                    f.write_str(" checksum-mismatch")?;
                }
                if let Some(gap) = gap {
                    write!(f, " lost={}", gap.lost)?;
                }
                Ok(())
            }
            LinkEvent::GasPedal(frame) => write!(
                f,
                "gas-pedal position={} adc1={}",
                frame.pedal_position(),
                frame.adc_1
            ),
            LinkEvent::Control {
                frame,
                checksum_ok,
                gap,
            } => {
                write!(
                    f,
                    "control t0={} t1={} enable={} counter={}",
                    frame.target_0, frame.target_1, frame.enable, frame.counter
                )?;
                if !checksum_ok {
                    f.write_str(" checksum-mismatch")?;
                }
                if let Some(gap) = gap {
                    write!(f, " lost={}", gap.lost)?;
                }
                Ok(())
            }
            LinkEvent::Dropped { can_id, error } => write!(f, "dropped {can_id:#05x}: {error}"),
            LinkEvent::Ignored { can_id } => write!(f, "ignored {can_id:#05x}"),
        }
    }
}

/// Running counters for a monitoring session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkStats {
    /// Every frame handed to the monitor, ignored identifiers included.
    pub total_frames: u32,
    pub output_frames: u32,
    pub control_frames: u32,
    pub framing_errors: u32,
    pub checksum_errors: u32,
    pub sequence_gaps: u32,
    pub frames_lost: u32,
    pub override_frames: u32,
    pub min_magnitude: Option<u16>,
    pub max_magnitude: Option<u16>,
    state_counts: [u32; 16],
}

impl LinkStats {
    /// Telemetry frames reported with `state`.
    #[must_use]
    pub fn state_count(&self, state: FaultState) -> u32 {
        self.state_counts
            .get(usize::from(state.to_raw()))
            .copied()
            .unwrap_or(0)
    }

    /// Non-zero state counts, most frequent first.
    pub fn state_breakdown(&self) -> impl Iterator<Item = (FaultState, u32)> + '_ {
        let mut order: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        order.sort_unstable_by_key(|&code| {
            (core::cmp::Reverse(self.state_counts[usize::from(code)]), code)
        });
        order.into_iter().filter_map(|code| {
            let count = self.state_counts[usize::from(code)];
            (count > 0).then_some((FaultState::from_raw(code), count))
        })
    }

    /// No checksum errors and no sequence gaps.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.checksum_errors == 0 && self.sequence_gaps == 0
    }

    fn record_magnitude(&mut self, magnitude: u16) {
        self.min_magnitude = Some(self.min_magnitude.map_or(magnitude, |min| min.min(magnitude)));
        self.max_magnitude = Some(self.max_magnitude.map_or(magnitude, |max| max.max(magnitude)));
    }

    fn record_gap(&mut self, gap: Option<SequenceGap>) {
        if let Some(gap) = gap {
            self.sequence_gaps = self.sequence_gaps.saturating_add(1);
            self.frames_lost = self.frames_lost.saturating_add(u32::from(gap.lost));
        }
    }
}

/// Decodes and accounts for every frame seen on the link.
pub struct LinkMonitor<const HISTORY: usize = GAP_HISTORY_CAPACITY> {
    config: LinkConfig,
    sequences: SequenceMonitor<HISTORY>,
    stats: LinkStats,
    watch: OverrideWatch,
}

impl<const HISTORY: usize> LinkMonitor<HISTORY> {
    #[must_use]
    pub const fn new(config: LinkConfig) -> Self {
        Self {
            config,
            sequences: SequenceMonitor::new(),
            stats: LinkStats {
                total_frames: 0,
                output_frames: 0,
                control_frames: 0,
                framing_errors: 0,
                checksum_errors: 0,
                sequence_gaps: 0,
                frames_lost: 0,
                override_frames: 0,
                min_magnitude: None,
                max_magnitude: None,
                state_counts: [0; 16],
            },
            watch: OverrideWatch::new(config.override_threshold),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    #[must_use]
    pub const fn stats(&self) -> &LinkStats {
        &self.stats
    }

    #[must_use]
    pub const fn sequences(&self) -> &SequenceMonitor<HISTORY> {
        &self.sequences
    }

    #[must_use]
    pub const fn override_watch(&self) -> &OverrideWatch {
        &self.watch
    }

    /// Feeds one frame received on `can_id`.
    ///
    /// Every frame counts towards [`LinkStats::total_frames`], including ones
    /// on identifiers the monitor ignores.
    pub fn process(&mut self, can_id: u16, bytes: &[u8]) -> LinkEvent {
        self.stats.total_frames = self.stats.total_frames.saturating_add(1);
        let event = if can_id == CONTROL_ID {
            self.process_control(bytes)
        } else if Some(can_id) == self.config.mode.output_id() {
            match self.config.mode {
                Mode::GasPedal => self.process_gas_pedal(bytes),
                _ => self.process_telemetry(bytes),
            }
        } else {
            return LinkEvent::Ignored { can_id };
        };

        match event {
            Ok(event) => event,
            Err(error) => {
                log::debug!("dropping frame {can_id:#05x}: {error}");
                match error {
                    DecodeError::TooShort { .. } => {
                        self.stats.framing_errors = self.stats.framing_errors.saturating_add(1);
                    }
                    DecodeError::Checksum(_) => {
                        self.stats.checksum_errors = self.stats.checksum_errors.saturating_add(1);
                    }
                }
                LinkEvent::Dropped { can_id, error }
            }
        }
    }

    /// Applies the checksum policy; returns whether the checksum matched.
    fn screen(&mut self, mismatch: Option<ChecksumMismatch>) -> Result<bool, DecodeError> {
        let Some(mismatch) = mismatch else {
            return Ok(true);
        };
        match self.config.checksum {
            ChecksumPolicy::Strict => Err(DecodeError::Checksum(mismatch)),
            ChecksumPolicy::Lenient => {
                self.stats.checksum_errors = self.stats.checksum_errors.saturating_add(1);
                Ok(false)
            }
        }
    }

    fn process_telemetry(&mut self, bytes: &[u8]) -> Result<LinkEvent, DecodeError> {
        let raw = parse_raw(bytes)?;
        let checksum_ok = self.screen(raw.validate().err())?;
        let frame = raw.into_frame_unchecked();

        let gap = self.sequences.observe(Channel::Telemetry, frame.pkt_idx);
        self.stats.record_gap(gap);
        self.stats.output_frames = self.stats.output_frames.saturating_add(1);
        let slot = &mut self.stats.state_counts[usize::from(frame.state & 0x0F)];
        *slot = slot.saturating_add(1);
        self.stats.record_magnitude(frame.magnitude);
        if frame.is_override() {
            self.stats.override_frames = self.stats.override_frames.saturating_add(1);
        }
        let level = self.watch.observe(frame.magnitude, frame.is_override());

        Ok(LinkEvent::Telemetry {
            frame,
            checksum_ok,
            gap,
            level,
        })
    }

    fn process_gas_pedal(&mut self, bytes: &[u8]) -> Result<LinkEvent, DecodeError> {
        let frame = decode_gas_pedal(bytes)?;
        self.stats.output_frames = self.stats.output_frames.saturating_add(1);
        Ok(LinkEvent::GasPedal(frame))
    }

    fn process_control(&mut self, bytes: &[u8]) -> Result<LinkEvent, DecodeError> {
        let frame = decode_control(bytes)?;
        let payload = &bytes[..crate::frames::CONTROL_FRAME_LEN];
        let mismatch = (!checksum::verify(payload)).then(|| ChecksumMismatch {
            expected: checksum::checksum(&payload[1..]),
            received: payload[0],
        });
        let checksum_ok = self.screen(mismatch)?;

        let gap = self.sequences.observe(Channel::Control, frame.counter);
        self.stats.record_gap(gap);
        self.stats.control_frames = self.stats.control_frames.saturating_add(1);
        Ok(LinkEvent::Control {
            frame,
            checksum_ok,
            gap,
        })
    }
}
