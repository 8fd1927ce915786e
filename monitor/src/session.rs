use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use interceptor_core::calibration::{
    CalibrationError, CalibrationPolicy, CalibrationSession, ChannelRecommendation,
    HealthPolicy, SampleInstant, SensorCalibration, SensorConfigRecommendation, Stats,
    ThresholdBasis, ThresholdRecommendation, WindowStatus, summarize,
};
use interceptor_core::debug::{DebugRecord, DebugStream, MAGNITUDE_TOLERANCE, StreamCounters};
use interceptor_core::link::{
    LinkConfig, LinkEvent, LinkMonitor, LinkStats, OverrideVerdict, OverrideWatch,
};

use crate::capture;

/// Readings held per calibration window.
pub const HOST_SAMPLE_CAPACITY: usize = 8192;

const READ_CHUNK: usize = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Profile {
    Frames,
    Debug,
    CalibrateSensors,
    CalibrateThreshold,
}

impl Profile {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("frames") {
            Ok(Self::Frames)
        } else if tag.eq_ignore_ascii_case("debug") {
            Ok(Self::Debug)
        } else if tag.eq_ignore_ascii_case("calibrate-sensors") {
            Ok(Self::CalibrateSensors)
        } else if tag.eq_ignore_ascii_case("calibrate-threshold") {
            Ok(Self::CalibrateThreshold)
        } else {
            Err(format!("Unknown profile `{tag}`"))
        }
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Profile::Frames => "frames",
            Profile::Debug => "debug",
            Profile::CalibrateSensors => "calibrate-sensors",
            Profile::CalibrateThreshold => "calibrate-threshold",
        }
    }
}

/// Monotonic host clock for calibration windows.
#[derive(Clone, Copy, Debug)]
pub struct HostInstant(Instant);

impl HostInstant {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl SampleInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Feeds every record of a raw debug stream to `on_record` until it breaks or input ends.
fn for_each_record<R, F>(mut reader: R, mut on_record: F) -> io::Result<StreamCounters>
where
    R: Read,
    F: FnMut(&DebugRecord) -> io::Result<ControlFlow<()>>,
{
    let mut stream: DebugStream = DebugStream::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut decoded = Vec::new();

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        stream.feed(&chunk[..read], |record| decoded.push(record));
        for record in decoded.drain(..) {
            if on_record(&record)?.is_break() {
                return Ok(stream.counters());
            }
        }
    }

    // Terminate a final line that lacks a newline.
    stream.feed(b"\n", |record| decoded.push(record));
    for record in decoded.drain(..) {
        if on_record(&record)?.is_break() {
            break;
        }
    }

    let overflows = stream.assembler().overflows();
    if overflows > 0 {
        log::warn!("{overflows} over-long debug lines discarded");
    }
    Ok(stream.counters())
}

fn window_flow(result: Result<WindowStatus, CalibrationError>) -> io::Result<ControlFlow<()>> {
    match result {
        Ok(WindowStatus::Open) => Ok(ControlFlow::Continue(())),
        Ok(WindowStatus::Elapsed) => {
            log::info!("collection window elapsed");
            Ok(ControlFlow::Break(()))
        }
        Err(CalibrationError::SampleOverflow { capacity }) => {
            log::warn!("sample buffer full after {capacity} readings; closing window");
            Ok(ControlFlow::Break(()))
        }
        Err(error) => Err(io::Error::other(error)),
    }
}

/// `frames` profile: candump lines in, one event line per frame, statistics at EOF.
pub fn run_frames<R, W>(reader: R, writer: &mut W, config: LinkConfig) -> io::Result<LinkStats>
where
    R: BufRead,
    W: Write,
{
    let mut monitor: LinkMonitor = LinkMonitor::new(config);

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match capture::parse_line(&line) {
            Ok(Some(frame)) => {
                let event = monitor.process(frame.can_id, &frame.data);
                if !matches!(event, LinkEvent::Ignored { .. }) {
                    writeln!(writer, "{event}")?;
                }
            }
            Ok(None) => {}
            Err(error) => log::warn!("line {}: {error}", index + 1),
        }
    }

    write_link_summary(writer, &monitor)?;
    Ok(*monitor.stats())
}

fn write_link_summary<W: Write>(writer: &mut W, monitor: &LinkMonitor) -> io::Result<()> {
    let stats = monitor.stats();
    writeln!(writer)?;
    writeln!(writer, "Link statistics ({}):", monitor.config().mode)?;
    writeln!(writer, "  Total frames: {}", stats.total_frames)?;
    writeln!(writer, "  Output frames: {}", stats.output_frames)?;
    writeln!(writer, "  Control frames: {}", stats.control_frames)?;
    writeln!(writer, "  Framing errors: {}", stats.framing_errors)?;
    writeln!(writer, "  Checksum errors: {}", stats.checksum_errors)?;
    writeln!(
        writer,
        "  Sequence gaps: {} ({} frames lost)",
        stats.sequence_gaps, stats.frames_lost
    )?;
    if let (Some(min), Some(max)) = (stats.min_magnitude, stats.max_magnitude) {
        writeln!(writer, "  Magnitude: {min} - {max}")?;
    }
    writeln!(writer, "  Override frames: {}", stats.override_frames)?;

    if stats.output_frames > 0 {
        writeln!(writer, "  State distribution:")?;
        for (state, count) in stats.state_breakdown() {
            let share = f64::from(count) / f64::from(stats.output_frames) * 100.0;
            writeln!(writer, "    {state:<24} {count:>5} ({share:5.1}%)")?;
        }
    }

    if stats.output_frames == 0 {
        writeln!(writer, "No interceptor output frames received")
    } else if stats.is_clean() {
        writeln!(
            writer,
            "Data integrity verified (no sequence or checksum errors)"
        )
    } else {
        writeln!(
            writer,
            "Data received with {} sequence gaps and {} checksum errors",
            stats.sequence_gaps, stats.checksum_errors
        )
    }
}

fn check_record(record: &DebugRecord) {
    if record.magnitude_consistent(MAGNITUDE_TOLERANCE) == Some(false) {
        log::warn!(
            "reported magnitude {:?} differs from |{} - {}|",
            record.magnitude,
            record.adc_0,
            record.adc_1
        );
    }
    if !record.adc_in_range() {
        log::warn!("ADC reading outside 12-bit range: {} / {}", record.adc_0, record.adc_1);
    }
    if record.dac_in_range() == Some(false) {
        log::warn!("DAC output outside 12-bit range: {:?} / {:?}", record.dac_0, record.dac_1);
    }
}

/// `debug` profile: raw debug stream in, one graded line per record.
///
/// ADC stability is reported at EOF, and drift as well when `baseline` holds the
/// calibrated centers of both channels.
pub fn run_debug<R, W>(
    reader: R,
    writer: &mut W,
    threshold: u32,
    baseline: Option<[u16; 2]>,
) -> io::Result<OverrideWatch>
where
    R: Read,
    W: Write,
{
    let mut watch = OverrideWatch::new(threshold);
    let mut channels: [Vec<u64>; 2] = [Vec::new(), Vec::new()];

    let counters = for_each_record(reader, |record| {
        check_record(record);
        channels[0].push(u64::from(record.adc_0));
        channels[1].push(u64::from(record.adc_1));
        let magnitude = record.effective_magnitude();
        let level = watch.observe(magnitude, record.is_override().unwrap_or(false));
        let percent = if threshold > 0 {
            f64::from(magnitude) / f64::from(threshold) * 100.0
        } else {
            0.0
        };
        let fault = record
            .fault()
            .map_or_else(|| "-".to_string(), |fault| fault.to_string());
        writeln!(
            writer,
            "[{level:<15}] mag {magnitude:>4} / {threshold} ({percent:5.1}%) adc0 {:>4} adc1 {:>4} state {fault}",
            record.adc_0,
            record.adc_1
        )?;
        Ok(ControlFlow::Continue(()))
    })?;

    writeln!(writer)?;
    writeln!(
        writer,
        "Lines: {} decoded, {} unrecognized",
        counters.records, counters.unmatched
    )?;
    writeln!(writer, "Override threshold: {threshold} ({threshold:#X})")?;
    writeln!(writer, "Maximum magnitude: {}", watch.max_magnitude())?;
    writeln!(writer, "Override triggers: {}", watch.activations())?;
    match watch.verdict() {
        OverrideVerdict::Triggered {
            well_above_threshold,
        } => {
            writeln!(writer, "PASS: override detection is working")?;
            if well_above_threshold {
                writeln!(
                    writer,
                    "Note: maximum magnitude is at least 1.5x the threshold; review it for this application"
                )?;
            }
        }
        OverrideVerdict::NotTriggered { needs_more_torque } => {
            writeln!(writer, "Override not triggered")?;
            if needs_more_torque {
                writeln!(
                    writer,
                    "Apply more torque: magnitude must exceed {threshold} to trigger"
                )?;
            }
        }
    }

    for (index, samples) in channels.iter().enumerate() {
        if let Ok(stats) = summarize(samples) {
            let baseline = baseline.map(|centers| u64::from(centers[index]));
            write_health(writer, index, &stats, baseline)?;
        }
    }

    Ok(watch)
}

fn write_health<W: Write>(
    writer: &mut W,
    index: usize,
    stats: &Stats,
    baseline: Option<u64>,
) -> io::Result<()> {
    let policy = HealthPolicy::DEFAULT;

    let stability = policy.stability(stats);
    if !stability.stable {
        log::warn!("ADC{index} unstable: range {}", stability.spread);
    }
    writeln!(
        writer,
        "ADC{index} stability: range {} (limit {}) {}",
        stability.spread,
        policy.stability_limit,
        if stability.stable { "OK" } else { "UNSTABLE" }
    )?;

    if let Some(baseline) = baseline {
        let drift = policy.drift(stats, baseline);
        if !drift.within_limit {
            log::warn!("ADC{index} drifted {} from baseline {baseline}", drift.drift);
        }
        writeln!(
            writer,
            "ADC{index} drift: median {} is {} from baseline {baseline} (limit {}) {}",
            drift.reading,
            drift.drift,
            policy.drift_limit,
            if drift.within_limit { "OK" } else { "DRIFTED" }
        )?;
    }
    Ok(())
}

fn write_channel<W: Write>(
    writer: &mut W,
    index: usize,
    channel: &ChannelRecommendation,
) -> io::Result<()> {
    let stats = &channel.stats;
    let (low, high) = channel.range.valid_range();
    writeln!(writer, "ADC channel {index}:")?;
    writeln!(writer, "  Center (median): {}", stats.median)?;
    writeln!(writer, "  Average: {:.1}", stats.mean)?;
    writeln!(
        writer,
        "  Range: {} - {} (span {})",
        stats.min,
        stats.max,
        stats.spread()
    )?;
    writeln!(writer, "  Std deviation: {:.1}", stats.std_dev)?;
    writeln!(writer, "  95% range: {} - {}", stats.p2_5, stats.p97_5)?;
    writeln!(writer, "  Tolerance: {}", channel.range.tolerance)?;
    writeln!(writer, "  Valid range: {low} to {high}")?;
    writeln!(writer, "  Settings:")?;
    for setting in channel.range.settings() {
        writeln!(writer, "    {setting}")?;
    }
    Ok(())
}

/// `calibrate-sensors` profile: ADC readings until EOF or the window closes.
pub fn run_calibrate_sensors<R, W>(
    reader: R,
    writer: &mut W,
    policy: CalibrationPolicy,
    window: Duration,
) -> io::Result<Option<SensorConfigRecommendation>>
where
    R: Read,
    W: Write,
{
    let mut calibration =
        SensorCalibration::<HostInstant, HOST_SAMPLE_CAPACITY>::new(policy, window);
    calibration.start(HostInstant::now());

    for_each_record(reader, |record| {
        window_flow(calibration.record(HostInstant::now(), record.adc_0, record.adc_1))
    })?;

    let recommendation = match calibration.finish() {
        Ok(recommendation) => recommendation,
        Err(error @ CalibrationError::InsufficientSamples { .. }) => {
            writeln!(writer, "No ADC data collected ({error}); check the debug stream")?;
            return Ok(None);
        }
        Err(error) => return Err(io::Error::other(error)),
    };

    writeln!(
        writer,
        "Collected {} readings per channel",
        recommendation.channel_0.stats.count
    )?;
    write_channel(writer, 0, &recommendation.channel_0)?;
    write_channel(writer, 1, &recommendation.channel_1)?;
    Ok(Some(recommendation))
}

fn write_stats<W: Write>(writer: &mut W, title: &str, stats: &Stats) -> io::Result<()> {
    writeln!(writer, "{title} statistics ({} readings):", stats.count)?;
    writeln!(writer, "  Minimum: {}", stats.min)?;
    writeln!(writer, "  Maximum: {}", stats.max)?;
    writeln!(writer, "  Average: {:.1}", stats.mean)?;
    writeln!(writer, "  Median: {}", stats.median)?;
    writeln!(writer, "  95th percentile: {}", stats.p95)?;
    writeln!(writer, "  99th percentile: {}", stats.p99)?;
    writeln!(writer, "  Std deviation: {:.1}", stats.std_dev)
}

fn write_threshold_report<W: Write>(
    writer: &mut W,
    recommendation: &ThresholdRecommendation,
) -> io::Result<()> {
    let threshold = recommendation.threshold;
    writeln!(writer, "Recommended threshold: {threshold} ({threshold:#X})")?;
    match recommendation.basis {
        ThresholdBasis::Midpoint {
            margin_below,
            margin_above,
        } => {
            writeln!(
                writer,
                "  Midpoint of normal p99 {} and intervention minimum {}",
                recommendation.normal_p99,
                recommendation.intervention_min.unwrap_or_default()
            )?;
            match recommendation.margin_below_percent() {
                Some(percent) => writeln!(
                    writer,
                    "  Above normal operation: {margin_below} counts ({percent:.1}%)"
                )?,
                None => writeln!(writer, "  Above normal operation: {margin_below} counts")?,
            }
            match recommendation.margin_above_percent() {
                Some(percent) => writeln!(
                    writer,
                    "  Below intervention: {margin_above} counts ({percent:.1}%)"
                )?,
                None => writeln!(writer, "  Below intervention: {margin_above} counts")?,
            }
        }
        ThresholdBasis::ConservativeEstimate => {
            writeln!(
                writer,
                "  150% of normal p99 {}",
                recommendation.normal_p99
            )?;
        }
    }
    for annotation in recommendation.annotations() {
        writeln!(writer, "  Warning: {annotation}")?;
    }
    writeln!(
        writer,
        "  Default {}: {}",
        recommendation.reference_default,
        recommendation.sensitivity()
    )?;
    for setting in recommendation.settings() {
        writeln!(writer, "  Set {setting}")?;
    }
    Ok(())
}

/// `calibrate-threshold` profile: normal capture, optional intervention capture.
pub fn run_calibrate_threshold<N, I, W>(
    normal: N,
    intervention: Option<I>,
    writer: &mut W,
    policy: CalibrationPolicy,
    window: Duration,
) -> io::Result<Option<ThresholdRecommendation>>
where
    N: Read,
    I: Read,
    W: Write,
{
    let mut session =
        CalibrationSession::<HostInstant, HOST_SAMPLE_CAPACITY>::new(policy, window);

    session
        .start_normal(HostInstant::now())
        .map_err(io::Error::other)?;
    for_each_record(normal, |record| {
        window_flow(session.record(
            HostInstant::now(),
            u64::from(record.effective_magnitude()),
        ))
    })?;
    match session.finish_normal() {
        Ok(stats) => {
            let stats = *stats;
            write_stats(writer, "Normal operation", &stats)?;
        }
        Err(error @ CalibrationError::InsufficientSamples { .. }) => {
            writeln!(writer, "No normal-operation data ({error}); recollect the capture")?;
            return Ok(None);
        }
        Err(error) => return Err(io::Error::other(error)),
    }

    if let Some(reader) = intervention {
        session
            .start_intervention(HostInstant::now())
            .map_err(io::Error::other)?;
        for_each_record(reader, |record| {
            window_flow(session.record(
                HostInstant::now(),
                u64::from(record.effective_magnitude()),
            ))
        })?;
        match session.finish_intervention() {
            Ok(stats) => {
                let stats = *stats;
                write_stats(writer, "Manual intervention", &stats)?;
            }
            Err(error @ CalibrationError::InsufficientSamples { .. }) => {
                writeln!(writer, "No intervention data ({error}); using conservative estimate")?;
            }
            Err(error) => return Err(io::Error::other(error)),
        }
    }

    let recommendation = session.recommend().map_err(io::Error::other)?.clone();
    writeln!(writer)?;
    write_threshold_report(writer, &recommendation)?;
    Ok(Some(recommendation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use interceptor_core::calibration::Annotation;
    use interceptor_core::checksum;
    use interceptor_core::link::{ChecksumPolicy, OverrideLevel};
    use std::io::Cursor;

    fn debug_capture(magnitudes: &[u16]) -> String {
        magnitudes
            .iter()
            .map(|magnitude| {
                format!(
                    "ADC0:{:08x} ADC1:{:08x} Mag:{magnitude:08x} Ovr:00000000\n",
                    1600 + magnitude,
                    1600
                )
            })
            .collect()
    }

    fn telemetry_line(pkt_idx: u8) -> String {
        let mut frame = [0, 0x40, 0x06, 0x0E, 0x06, 0, 0, pkt_idx];
        checksum::seal(&mut frame);
        let hex: String = frame.iter().map(|byte| format!("{byte:02X}")).collect();
        format!("301#{hex}\n")
    }

    #[test]
    fn profile_tags_round_trip() {
        for profile in [
            Profile::Frames,
            Profile::Debug,
            Profile::CalibrateSensors,
            Profile::CalibrateThreshold,
        ] {
            assert_eq!(Profile::from_tag(profile.tag()), Ok(profile));
        }
        assert!(Profile::from_tag("reboot").is_err());
    }

    #[test]
    fn frames_profile_counts_gaps_and_prints_summary() {
        let input: String = [0u8, 1, 4]
            .into_iter()
            .map(telemetry_line)
            .chain(["garbage\n".to_string(), "123#00\n".to_string()])
            .collect();
        let mut output = Vec::new();

        let stats = run_frames(
            Cursor::new(input),
            &mut output,
            LinkConfig {
                checksum: ChecksumPolicy::Strict,
                ..LinkConfig::DEFAULT
            },
        )
        .expect("in-memory io");

        assert_eq!(stats.total_frames, 4, "ignored identifiers still count");
        assert_eq!(stats.output_frames, 3);
        assert_eq!(stats.sequence_gaps, 1);
        let text = String::from_utf8(output).expect("utf8");
        assert!(text.contains("lost=2"), "{text}");
        assert!(text.contains("Sequence gaps: 1 (2 frames lost)"), "{text}");
    }

    #[test]
    fn debug_profile_grades_each_record() {
        let input = "boot\nADC0:00000700 ADC1:00000600 Mag:00000100 Ovr:00000001\nADC0:00000640 ADC1:00000600 Mag:00000040 Ovr:00000000";
        let mut output = Vec::new();
        let watch = run_debug(Cursor::new(input), &mut output, 200, None).expect("in-memory io");

        assert_eq!(watch.activations(), 1);
        assert_eq!(watch.clears(), 1);
        assert_eq!(watch.max_magnitude(), 256);
        let text = String::from_utf8(output).expect("utf8");
        assert!(text.contains(&OverrideLevel::Active.to_string()), "{text}");
        assert!(text.contains("Lines: 2 decoded, 1 unrecognized"), "{text}");
        assert!(text.contains("PASS"), "{text}");
    }

    #[test]
    fn debug_profile_reports_stability_and_drift() {
        let input = "ADC0:00000602 ADC1:0000062b\nADC0:00000690 ADC1:0000062b\nADC0:000006d0 ADC1:0000062b\n";
        let mut output = Vec::new();
        run_debug(Cursor::new(input), &mut output, 336, Some([1538, 1579])).expect("in-memory io");

        let text = String::from_utf8(output).expect("utf8");
        assert!(text.contains("ADC0 stability: range 206 (limit 200) UNSTABLE"), "{text}");
        assert!(text.contains("ADC1 stability: range 0 (limit 200) OK"), "{text}");
        assert!(
            text.contains("ADC0 drift: median 1680 is 142 from baseline 1538 (limit 150) OK"),
            "{text}"
        );
        assert!(
            text.contains("ADC1 drift: median 1579 is 0 from baseline 1579 (limit 150) OK"),
            "{text}"
        );
    }

    #[test]
    fn sensor_profile_recommends_ranges() {
        let input = "ADC0:00000640 ADC1:00000500\nADC0:00000642 ADC1:00000502\nADC0:0000063e ADC1:000004fe\n";
        let mut output = Vec::new();
        let recommendation = run_calibrate_sensors(
            Cursor::new(input),
            &mut output,
            CalibrationPolicy::DEFAULT,
            Duration::MAX,
        )
        .expect("in-memory io")
        .expect("three readings");

        assert_eq!(recommendation.channel_0.range.center, 0x640);
        assert_eq!(recommendation.channel_1.range.center, 0x500);
        assert_eq!(recommendation.channel_0.range.tolerance, 100);
        let text = String::from_utf8(output).expect("utf8");
        assert!(text.contains("adc_tolerance: 100"), "{text}");
    }

    #[test]
    fn sensor_profile_without_data_withholds_recommendation() {
        let mut output = Vec::new();
        let recommendation = run_calibrate_sensors(
            Cursor::new("boot banner\n"),
            &mut output,
            CalibrationPolicy::DEFAULT,
            Duration::MAX,
        )
        .expect("in-memory io");
        assert!(recommendation.is_none());
    }

    #[test]
    fn threshold_profile_uses_intervention_midpoint() {
        let normal = debug_capture(&(1..=100).collect::<Vec<_>>());
        let intervention = debug_capture(&[300, 320, 400]);
        let mut output = Vec::new();

        let recommendation = run_calibrate_threshold(
            Cursor::new(normal),
            Some(Cursor::new(intervention)),
            &mut output,
            CalibrationPolicy::DEFAULT,
            Duration::MAX,
        )
        .expect("in-memory io")
        .expect("recommendation");

        assert_eq!(recommendation.threshold, 200);
        assert!(!recommendation.is_unsafe());
        let text = String::from_utf8(output).expect("utf8");
        assert!(text.contains("override_threshold: 200"), "{text}");
    }

    #[test]
    fn threshold_profile_without_intervention_is_conservative() {
        let normal = debug_capture(&[200; 4]);
        let mut output = Vec::new();
        let recommendation = run_calibrate_threshold(
            Cursor::new(normal),
            None::<Cursor<String>>,
            &mut output,
            CalibrationPolicy::DEFAULT,
            Duration::MAX,
        )
        .expect("in-memory io")
        .expect("recommendation");

        assert_eq!(recommendation.threshold, 300);
        assert_eq!(
            recommendation.annotations(),
            &[Annotation::ConservativeEstimate]
        );
    }
}
