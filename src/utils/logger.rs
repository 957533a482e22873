use anyhow::{Context, Result};
use std::backtrace::Backtrace;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::shared::constants;

/// Where the log file for this run lives: next to the working directory.
pub fn log_path() -> PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push(constants::LOG_FILE);
    path
}

fn filter_for(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if verbose {
            constants::VERBOSE_LOG_FILTER
        } else {
            constants::DEFAULT_LOG_FILTER
        };
        EnvFilter::new(directive)
    })
}

/// Truncate the log file and write the session banner.
fn open_log(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))?;
    writeln!(file, "=== {} Log Started: {} ===", constants::APP_NAME, chrono::Local::now())?;
    Ok(file)
}

/// Route `tracing` output to the log file. The terminal belongs to the
/// display, so nothing is written to stdout.
pub fn init(verbose: bool) -> Result<PathBuf> {
    let path = log_path();
    let file = open_log(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbose))
        .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    install_panic_hook(path.clone());
    Ok(path)
}

fn install_panic_hook(path: PathBuf) {
    panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::capture();
        let msg = match info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };

        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        tracing::error!("CRITICAL PANIC at {}: {}\nBacktrace:\n{:?}", location, msg, backtrace);

        // Best effort: the display may still hold the terminal.
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::LeaveAlternateScreen,
            crossterm::cursor::Show
        );
        eprintln!("Application crashed. See {} for details.", path.display());
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn open_log_truncates_and_writes_banner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, "stale line\n").unwrap();

        drop(open_log(&path).unwrap());

        let mut text = String::new();
        File::open(&path).unwrap().read_to_string(&mut text).unwrap();
        assert!(text.starts_with("=== framestream Log Started:"));
        assert!(!text.contains("stale line"));
    }

    #[test]
    fn log_path_uses_log_file_name() {
        assert!(log_path().ends_with(constants::LOG_FILE));
    }
}
