mod capture;
mod logger;
mod session;

use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use interceptor_core::calibration::{CalibrationPolicy, DEFAULT_OVERRIDE_THRESHOLD, ThresholdPolicy};
use interceptor_core::frames::Mode;
use interceptor_core::link::{ChecksumPolicy, LinkConfig};
use log::LevelFilter;

use logger::TranscriptLogger;
use session::Profile;

const USAGE: &str = "\
Usage: interceptor-monitor [--profile] <frames|debug|calibrate-sensors|calibrate-threshold> [options]

Options:
  --mode <differential|gas-pedal|N>  interceptor output mode (frames)
  --strict                           drop frames that fail the checksum (frames)
  --threshold <N|0xN>                override threshold (frames, debug, calibrate-threshold)
  --normal <PATH>                    normal-operation capture (default: stdin)
  --intervention <PATH>              manual-intervention capture (calibrate-threshold)
  --window <SECONDS>                 close calibration windows after SECONDS
  --baseline <ADC0,ADC1>             calibrated centers for the drift check (debug)
  --transcript <PATH>                write the log transcript to PATH instead of stderr
  -v                                 more log output; repeat for trace";

#[derive(Debug, PartialEq)]
struct Options {
    profile: Profile,
    mode: Mode,
    checksum: ChecksumPolicy,
    threshold: u32,
    normal: Option<PathBuf>,
    intervention: Option<PathBuf>,
    window: Duration,
    baseline: Option<[u16; 2]>,
    transcript: Option<PathBuf>,
    level: LevelFilter,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            profile: Profile::Frames,
            mode: Mode::Differential,
            checksum: ChecksumPolicy::Lenient,
            threshold: DEFAULT_OVERRIDE_THRESHOLD,
            normal: None,
            intervention: None,
            window: Duration::MAX,
            baseline: None,
            transcript: None,
            level: LevelFilter::Info,
        }
    }
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let logger = match &options.transcript {
        Some(path) => TranscriptLogger::to_file(path, options.level)?,
        None => TranscriptLogger::to_stderr(options.level),
    };
    logger.install().map_err(io::Error::other)?;
    log::info!("starting {} profile", options.profile.tag());

    let stdout = io::stdout();
    let mut writer = stdout.lock();

    match options.profile {
        Profile::Frames => {
            let config = LinkConfig {
                mode: options.mode,
                checksum: options.checksum,
                override_threshold: options.threshold,
            };
            match &options.normal {
                Some(path) => session::run_frames(BufReader::new(File::open(path)?), &mut writer, config)?,
                None => session::run_frames(io::stdin().lock(), &mut writer, config)?,
            };
        }
        Profile::Debug => {
            match &options.normal {
                Some(path) => session::run_debug(
                    File::open(path)?,
                    &mut writer,
                    options.threshold,
                    options.baseline,
                )?,
                None => session::run_debug(
                    io::stdin().lock(),
                    &mut writer,
                    options.threshold,
                    options.baseline,
                )?,
            };
        }
        Profile::CalibrateSensors => {
            let policy = CalibrationPolicy::DEFAULT;
            match &options.normal {
                Some(path) => session::run_calibrate_sensors(
                    File::open(path)?,
                    &mut writer,
                    policy,
                    options.window,
                )?,
                None => session::run_calibrate_sensors(
                    io::stdin().lock(),
                    &mut writer,
                    policy,
                    options.window,
                )?,
            };
        }
        Profile::CalibrateThreshold => {
            let policy = CalibrationPolicy {
                threshold: ThresholdPolicy {
                    reference_default: options.threshold,
                    ..CalibrationPolicy::DEFAULT.threshold
                },
                ..CalibrationPolicy::DEFAULT
            };
            let intervention = options.intervention.as_ref().map(File::open).transpose()?;
            match &options.normal {
                Some(path) => session::run_calibrate_threshold(
                    File::open(path)?,
                    intervention,
                    &mut writer,
                    policy,
                    options.window,
                )?,
                None => session::run_calibrate_threshold(
                    io::stdin().lock(),
                    intervention,
                    &mut writer,
                    policy,
                    options.window,
                )?,
            };
        }
    }

    log::logger().flush();
    Ok(())
}

fn parse_options(args: impl IntoIterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut profile_seen = false;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {name}"))
        };

        match flag.as_str() {
            "--profile" => {
                options.profile = Profile::from_tag(&value("--profile")?)?;
                profile_seen = true;
            }
            "--mode" => options.mode = parse_mode(&value("--mode")?)?,
            "--strict" => options.checksum = ChecksumPolicy::Strict,
            "--threshold" => options.threshold = parse_number(&value("--threshold")?)?,
            "--normal" => options.normal = Some(PathBuf::from(value("--normal")?)),
            "--intervention" => {
                options.intervention = Some(PathBuf::from(value("--intervention")?));
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value("--transcript")?)),
            "--window" => {
                let seconds = parse_number(&value("--window")?)?;
                options.window = Duration::from_secs(u64::from(seconds));
            }
            "--baseline" => options.baseline = Some(parse_baseline(&value("--baseline")?)?),
            "-v" => options.level = more_verbose(options.level),
            "-vv" => options.level = LevelFilter::Trace,
            "-h" | "--help" => return Err(String::from("Help requested")),
            other if other.starts_with('-') => return Err(format!("Unknown option `{other}`")),
            tag if !profile_seen => {
                options.profile = Profile::from_tag(tag)?;
                profile_seen = true;
            }
            extra => return Err(format!("Unexpected argument `{extra}`")),
        }
    }

    if options.intervention.is_some() && options.profile != Profile::CalibrateThreshold {
        return Err(String::from("--intervention only applies to calibrate-threshold"));
    }

    Ok(options)
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    if value.eq_ignore_ascii_case("differential") {
        Ok(Mode::Differential)
    } else if value.eq_ignore_ascii_case("gas-pedal") {
        Ok(Mode::GasPedal)
    } else {
        let raw = parse_number(value)?;
        u8::try_from(raw)
            .map(Mode::from_raw)
            .map_err(|_| format!("Mode `{value}` out of range"))
    }
}

fn parse_baseline(value: &str) -> Result<[u16; 2], String> {
    let (adc_0, adc_1) = value
        .split_once(',')
        .ok_or_else(|| format!("Baseline `{value}` must be ADC0,ADC1"))?;
    let center = |text: &str| {
        parse_number(text.trim()).and_then(|raw| {
            u16::try_from(raw).map_err(|_| format!("Baseline value `{text}` out of range"))
        })
    };
    Ok([center(adc_0)?, center(adc_1)?])
}

fn parse_number(value: &str) -> Result<u32, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("Invalid number `{value}`: {err}"))
}

fn more_verbose(level: LevelFilter) -> LevelFilter {
    match level {
        LevelFilter::Off | LevelFilter::Error | LevelFilter::Warn => LevelFilter::Info,
        LevelFilter::Info => LevelFilter::Debug,
        LevelFilter::Debug | LevelFilter::Trace => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        parse_options(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults_to_frames_profile() {
        assert_eq!(parse(&[]), Ok(Options::default()));
    }

    #[test]
    fn positional_and_flag_profiles_are_accepted() {
        assert_eq!(parse(&["debug"]).map(|o| o.profile), Ok(Profile::Debug));
        assert_eq!(
            parse(&["--profile=calibrate-sensors"]).map(|o| o.profile),
            Ok(Profile::CalibrateSensors)
        );
        assert!(parse(&["debug", "frames"]).is_err());
    }

    #[test]
    fn flags_fill_options() {
        let options = parse(&[
            "calibrate-threshold",
            "--threshold",
            "0x150",
            "--normal=normal.log",
            "--intervention",
            "turn.log",
            "--window",
            "10",
            "-v",
            "-v",
        ])
        .expect("valid arguments");

        assert_eq!(options.threshold, 0x150);
        assert_eq!(options.normal, Some(PathBuf::from("normal.log")));
        assert_eq!(options.intervention, Some(PathBuf::from("turn.log")));
        assert_eq!(options.window, Duration::from_secs(10));
        assert_eq!(options.level, LevelFilter::Trace);
    }

    #[test]
    fn baseline_takes_both_channels() {
        assert_eq!(
            parse(&["debug", "--baseline", "1538,0x62B"]).map(|o| o.baseline),
            Ok(Some([1538, 1579]))
        );
        assert!(parse(&["debug", "--baseline=1538"]).is_err());
        assert!(parse(&["debug", "--baseline=1538,70000"]).is_err());
    }

    #[test]
    fn mode_accepts_names_and_raw_values() {
        assert_eq!(parse_mode("gas-pedal"), Ok(Mode::GasPedal));
        assert_eq!(parse_mode("0"), Ok(Mode::Unconfigured));
        assert_eq!(parse_mode("9"), Ok(Mode::Unknown(9)));
        assert!(parse_mode("300").is_err());
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse(&["--threshold"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["frames", "--intervention", "x.log"]).is_err());
    }
}
