use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{LevelFilter, Log, Metadata, Record};

/// `log` backend writing timestamped transcript lines.
pub struct TranscriptLogger {
    writer: Mutex<Box<dyn Write + Send>>,
    started_at: Instant,
    level: LevelFilter,
}

impl TranscriptLogger {
    pub fn new(writer: Box<dyn Write + Send>, level: LevelFilter) -> Self {
        Self {
            writer: Mutex::new(writer),
            started_at: Instant::now(),
            level,
        }
    }

    /// Opens `path` for writing, creating parent directories, and writes the header.
    pub fn to_file(path: &Path, level: LevelFilter) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "# Interceptor monitor transcript")?;
        writeln!(writer, "# Timestamps are milliseconds since session start")?;
        writeln!(writer)?;
        writer.flush()?;

        Ok(Self::new(Box::new(writer), level))
    }

    pub fn to_stderr(level: LevelFilter) -> Self {
        Self::new(Box::new(io::stderr()), level)
    }

    /// Installs `self` as the global logger.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn append_line(&self, elapsed: Duration, record: &Record<'_>) -> io::Result<()> {
        let Ok(mut writer) = self.writer.lock() else {
            return Ok(());
        };
        writeln!(
            writer,
            "{}",
            format_line(elapsed, record.level(), record.target(), record.args())
        )?;
        writer.flush()
    }
}

pub fn format_line(
    elapsed: Duration,
    level: log::Level,
    target: &str,
    message: &std::fmt::Arguments<'_>,
) -> String {
    format!(
        "[+{:>6} ms] {:<5} {}: {}",
        elapsed.as_millis(),
        level,
        target,
        message
    )
}

impl Log for TranscriptLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // A failing transcript must not take the monitor down.
        let _ = self.append_line(self.started_at.elapsed(), record);
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
