//! Trace and summary loading from disk
//!
//! The loading boundary is the only asynchronous-ish edge in the system:
//! a run directory may still be mid-write when the viewer first looks, so
//! the retrying variant polls with a fixed backoff before giving up. A
//! successful load always hands the render cycle a fully parsed document;
//! nothing downstream streams or partially parses.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use smc_scope_core::trace::raw::{Summary, TraceFile};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read trace file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse trace file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load and parse a trace document.
pub fn load_trace(path: &Path) -> Result<TraceFile, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Load a trace, retrying on any failure with a fixed delay between
/// attempts. `retries` is the number of additional attempts after the
/// first.
pub fn load_trace_with_retry(
    path: &Path,
    retries: usize,
    delay: Duration,
) -> Result<TraceFile, LoadError> {
    let mut attempt = 0;
    loop {
        match load_trace(path) {
            Ok(trace) => return Ok(trace),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(
                    "loading {} failed ({err}), retry {attempt}/{retries}",
                    path.display()
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Load and parse the companion summary document.
pub fn load_summary(path: &Path) -> Result<Summary, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
