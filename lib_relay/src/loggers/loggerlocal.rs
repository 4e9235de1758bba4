//! # Local Logger
//!
//! Installs a `fern` dispatcher with two outputs:
//!
//! - **Console**: timestamp in grey, level colored by severity, then target and
//!   message.
//! - **File** (optional): the same line without colors, appended to
//!   `<app>_<YYYY-mm-dd_HH-MM-SS>.log` inside the log directory.
//!
//! Before a new file is opened, older files of the same application are
//! rotated so the directory does not grow without bound.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use colored::{ColoredString, Colorize};
use glob::glob;
use log::{Level, LevelFilter};

/// Noisy dependency targets that are capped at `Warn` regardless of the
/// requested level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "tungstenite", "tokio_tungstenite"];

/// Maps a textual level to a [`LevelFilter`].
///
/// Accepts `off`, `error`, `warn`, `info`, `debug`, `trace` in any case.
/// Anything else falls back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// # Setup Logging
///
/// Installs the global logger. When `log_dir` is given, the directory is
/// created if needed, older logs are rotated, and a fresh timestamped file is
/// opened.
///
/// # Returns
/// The path of the log file being written, if any.
///
/// # Errors
/// Fails if the log directory or file cannot be created, or if a global
/// logger is already installed.
pub fn setup_logging(app_name: &str, log_dir: Option<&Path>, level: LevelFilter) -> Result<Option<PathBuf>> {
    let mut root = fern::Dispatch::new().level(level);
    for target in QUIET_TARGETS {
        root = root.level_for(*target, level.min(LevelFilter::Warn));
    }

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string().as_str().truecolor(128, 128, 128),
                colored_level(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());
    root = root.chain(console);

    let mut log_path = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        rotate_logs(app_name, dir, 1)?;

        let file_name = format!("{}_{}.log", app_name, Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(file_name);
        let file = fern::log_file(&path).with_context(|| format!("opening log file {}", path.display()))?;

        let file_output = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {} [{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .chain(file);
        root = root.chain(file_output);
        log_path = Some(path);
    }

    root.apply().context("installing the global logger")?;
    Ok(log_path)
}

/// # Rotate Logs
///
/// Keeps the `keep` newest log files of `app_name` in `log_dir` and deletes
/// the rest. Files are ordered by name, which sorts chronologically because
/// of the timestamp suffix. Files of other applications are left alone.
///
/// # Returns
/// The number of files deleted.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<usize> {
    let pattern = format!("{}/{}_*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("invalid log rotation pattern {}", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();

    // Newest first.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut deleted = 0;
    for old_file in log_files.iter().skip(keep) {
        match std::fs::remove_file(old_file) {
            Ok(()) => deleted += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(deleted)
}

fn colored_level(level: Level) -> ColoredString {
    let label = format!("{:<5}", level.as_str());
    match level {
        Level::Error => label.as_str().bright_red(),
        Level::Warn => label.as_str().bright_yellow(),
        Level::Info => label.as_str().bright_green(),
        Level::Debug => label.as_str().bright_white(),
        Level::Trace => label.as_str().bright_cyan(),
    }
}
