//! Rolling-counter continuity tracking.
//!
//! Each logical channel carries its own 4-bit counter. A tracker remembers the
//! last index it saw and reports a [`SequenceGap`] when the next one is not
//! its successor. Gaps are observations only: the tracker always adopts the new
//! index, so a single loss never wedges it, and no frame is rejected for
//! sequence reasons.
//!
//! Trackers are plain values updated through `&mut self`. A caller receiving
//! frames on several threads has to keep one writer per channel (or wrap the
//! tracker in a mutex).

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::frames::NIBBLE_MASK;

/// Number of gap events retained by [`SequenceMonitor`] by default.
pub const GAP_HISTORY_CAPACITY: usize = 32;

/// Largest loss count a gap can report; also used when the loss cannot be determined.
pub const MAX_REPORTED_LOSS: u8 = 15;

/// Logical direction of a rolling counter.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Host to interceptor control frames.
    Control,
    /// Interceptor to host telemetry frames.
    Telemetry,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Control => f.write_str("control"),
            Channel::Telemetry => f.write_str("telemetry"),
        }
    }
}

/// Discontinuity observed in a rolling counter.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceGap {
    pub channel: Channel,
    pub expected: u8,
    pub received: u8,
    /// `(received - expected) mod 16`. A duplicate or reordered frame shows up as 15.
    pub lost: u8,
}

impl fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sequence gap: expected {} received {} (lost {})",
            self.channel, self.expected, self.received, self.lost
        )
    }
}

/// Last-seen counter for one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceTracker {
    channel: Channel,
    last_index: Option<u8>,
}

impl SequenceTracker {
    #[must_use]
    pub const fn new(channel: Channel) -> Self {
        Self {
            channel,
            last_index: None,
        }
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    #[must_use]
    pub const fn last_index(&self) -> Option<u8> {
        self.last_index
    }

    /// Index the next frame should carry, if any frame has been seen.
    #[must_use]
    pub const fn expected(&self) -> Option<u8> {
        match self.last_index {
            Some(last) => Some(last.wrapping_add(1) & NIBBLE_MASK),
            None => None,
        }
    }

    /// Records `pkt_idx` and reports a gap when it is not the expected successor.
    pub fn observe(&mut self, pkt_idx: u8) -> Option<SequenceGap> {
        let received = pkt_idx & NIBBLE_MASK;
        let gap = self.expected().and_then(|expected| {
            (received != expected).then(|| SequenceGap {
                channel: self.channel,
                expected,
                received,
                lost: (received.wrapping_sub(expected) & NIBBLE_MASK).min(MAX_REPORTED_LOSS),
            })
        });
        self.last_index = Some(received);
        gap
    }

    /// Forgets the last index, e.g. after the link was re-established.
    pub fn reset(&mut self) {
        self.last_index = None;
    }
}

/// Trackers for both channels plus a bounded history of recent gaps.
pub struct SequenceMonitor<const HISTORY: usize = GAP_HISTORY_CAPACITY> {
    control: SequenceTracker,
    telemetry: SequenceTracker,
    history: HistoryBuf<SequenceGap, HISTORY>,
    gap_count: u32,
    lost_total: u32,
}

impl<const HISTORY: usize> SequenceMonitor<HISTORY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            control: SequenceTracker::new(Channel::Control),
            telemetry: SequenceTracker::new(Channel::Telemetry),
            history: HistoryBuf::new(),
            gap_count: 0,
            lost_total: 0,
        }
    }

    /// Tracker for `channel`.
    #[must_use]
    pub const fn tracker(&self, channel: Channel) -> &SequenceTracker {
        match channel {
            Channel::Control => &self.control,
            Channel::Telemetry => &self.telemetry,
        }
    }

    /// Feeds a counter value observed on `channel`.
    pub fn observe(&mut self, channel: Channel, pkt_idx: u8) -> Option<SequenceGap> {
        let tracker = match channel {
            Channel::Control => &mut self.control,
            Channel::Telemetry => &mut self.telemetry,
        };
        let gap = tracker.observe(pkt_idx)?;

        log::debug!(
            "{} sequence gap: expected {} received {} lost {}",
            gap.channel,
            gap.expected,
            gap.received,
            gap.lost
        );
        self.gap_count = self.gap_count.saturating_add(1);
        self.lost_total = self.lost_total.saturating_add(u32::from(gap.lost));
        self.history.write(gap);
        Some(gap)
    }

    /// Total gap events since creation.
    #[must_use]
    pub const fn gap_count(&self) -> u32 {
        self.gap_count
    }

    /// Sum of the loss counts of every gap.
    #[must_use]
    pub const fn lost_total(&self) -> u32 {
        self.lost_total
    }

    /// Most recent gap, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&SequenceGap> {
        self.history.recent()
    }

    /// Retained gaps in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, SequenceGap> {
        self.history.oldest_ordered()
    }

    /// Resets both trackers; the gap history and counters are kept.
    pub fn reset_trackers(&mut self) {
        self.control.reset();
        self.telemetry.reset();
    }
}

impl<const HISTORY: usize> Default for SequenceMonitor<HISTORY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_never_reports_a_gap() {
        let mut tracker = SequenceTracker::new(Channel::Telemetry);
        assert_eq!(tracker.observe(9), None);
        assert_eq!(tracker.last_index(), Some(9));
        assert_eq!(tracker.expected(), Some(10));
    }

    #[test]
    fn duplicate_reports_full_wrap_loss() {
        let mut tracker = SequenceTracker::new(Channel::Telemetry);
        tracker.observe(4);
        let gap = tracker.observe(4).expect("duplicate is a discontinuity");
        assert_eq!(gap.expected, 5);
        assert_eq!(gap.lost, MAX_REPORTED_LOSS);
    }

    #[test]
    fn tracker_adopts_index_after_gap() {
        let mut tracker = SequenceTracker::new(Channel::Control);
        tracker.observe(0);
        assert!(tracker.observe(7).is_some());
        assert_eq!(tracker.observe(8), None);
    }

    #[test]
    fn upper_bits_are_ignored() {
        let mut tracker = SequenceTracker::new(Channel::Telemetry);
        tracker.observe(0x1F);
        assert_eq!(tracker.last_index(), Some(0x0F));
        assert_eq!(tracker.observe(0x20), None);
    }

    #[test]
    fn monitor_keeps_channels_independent() {
        let mut monitor = SequenceMonitor::<4>::new();
        monitor.observe(Channel::Control, 3);
        monitor.observe(Channel::Telemetry, 9);
        assert_eq!(monitor.observe(Channel::Control, 4), None);
        assert_eq!(monitor.observe(Channel::Telemetry, 10), None);

        let gap = monitor
            .observe(Channel::Telemetry, 13)
            .expect("telemetry gap");
        assert_eq!(gap.channel, Channel::Telemetry);
        assert_eq!(gap.lost, 2);
        assert_eq!(monitor.gap_count(), 1);
        assert_eq!(monitor.lost_total(), 2);
        assert_eq!(monitor.latest(), Some(&gap));
        assert_eq!(monitor.tracker(Channel::Control).last_index(), Some(4));
    }

    #[test]
    fn history_is_bounded() {
        let mut monitor = SequenceMonitor::<2>::new();
        monitor.observe(Channel::Telemetry, 0);
        for index in [2u8, 4, 6] {
            assert!(monitor.observe(Channel::Telemetry, index).is_some());
        }
        let received: heapless::Vec<u8, 2> =
            monitor.oldest_first().map(|gap| gap.received).collect();
        assert_eq!(received.as_slice(), &[4, 6]);
        assert_eq!(monitor.gap_count(), 3);
    }
}
