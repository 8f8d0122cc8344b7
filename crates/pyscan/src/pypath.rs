//! Python `sys.path` discovery.
//!
//! Runs the target interpreter with a one-line program that prints each
//! `sys.path` entry on its own line, then filters out entries that can never
//! contain scannable `.py` sources: empty lines (the script-dir placeholder),
//! zipped stdlib archives (`*.zip`), and compiled-extension directories
//! (`lib-dynload`).

use std::path::Path;
use std::process::Command;

/// Program handed to `python -c`. One `sys.path` element per stdout line.
const SYS_PATH_PROGRAM: &str = "import sys\nfor p in sys.path:\n    print(p)";

/// Errors produced while asking the interpreter for its search path.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    /// The interpreter process could not be spawned at all.
    #[error("failed to run interpreter: {0}")]
    Io(#[from] std::io::Error),

    /// The interpreter ran but exited with a non-zero status.
    #[error("interpreter exited with {status}: {stderr}")]
    CommandFailed {
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// The interpreter printed something that is not UTF-8.
    #[error("interpreter produced non-UTF-8 output")]
    InvalidOutput,
}

/// Ask `python` for its import search path.
///
/// Returns the `sys.path` entries, in interpreter order, minus entries that
/// are never scanned (empty, `*.zip`, `lib-dynload`). The entries are plain
/// strings; stale or non-existent directories are kept here and skipped
/// later by the file iterator.
pub fn discover_search_paths(python: &Path) -> Result<Vec<String>, DiscoverError> {
    let output = Command::new(python).arg("-c").arg(SYS_PATH_PROGRAM).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        log::warn!(
            "interpreter {} failed with {}: {}",
            python.display(),
            output.status,
            stderr.trim()
        );
        return Err(DiscoverError::CommandFailed {
            status: output.status,
            stderr,
        });
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| DiscoverError::InvalidOutput)?;
    Ok(filter_entries(stdout.lines()))
}

/// Drop entries that are never scanned for `.py` sources.
fn filter_entries<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .filter(|line| {
            !line.is_empty() && !line.ends_with(".zip") && !line.ends_with("lib-dynload")
        })
        .map(str::to_owned)
        .collect()
}
