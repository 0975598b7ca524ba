//! Tracing subscriber setup.
//!
//! Log levels:
//! - ERROR: startup failures that end the process
//! - WARN: dropped sends, skipped polls, truncated packets
//! - INFO: session lifecycle, sent messages
//! - DEBUG: individual configuration steps and packets
//! - TRACE: raw modem lines, bus claims

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log to stderr. Level comes from `RUST_LOG`, `info` if unset.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(filter("info")).init();
}

/// Log to a file, leaving the terminal to a full screen shell.
pub fn init_with_file(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter("info"))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

/// Test logging; safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
