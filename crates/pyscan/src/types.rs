//! Foundational public types for the pyscan library.
//!
//! This module defines the core data structures used throughout the library:
//! - [`SymbolKind`] / [`Symbol`] / [`OwnedSymbol`] — extracted symbol data
//! - [`ScanSettings`] — configuration for a whole scan
//! - [`FileReport`] — the per-file outcome produced by a scan job
//! - [`ScanReport`] — the aggregate result of a scan
//! - [`ScanError`] — top-level error variants

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pypath::DiscoverError;

/// The kind of a public module-level symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// A `class` definition.
    Class,
    /// A `def` definition.
    Function,
    /// A module-level assignment target.
    Variable,
}

/// A symbol borrowed from a parsed source buffer.
///
/// The name slice references the bytes handed to [`crate::parse::parse`];
/// it lives no longer than the parse handle that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'a> {
    pub kind: SymbolKind,
    pub name: &'a str,
}

impl Symbol<'_> {
    /// Detach the symbol from its source buffer.
    pub fn to_owned(self) -> OwnedSymbol {
        OwnedSymbol {
            kind: self.kind,
            name: self.name.to_string(),
        }
    }
}

/// The owned twin of [`Symbol`], carried in reports across thread boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedSymbol {
    pub kind: SymbolKind,
    pub name: String,
}

/// Configuration that governs a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Number of pool workers. `0` selects the machine's logical CPU count.
    pub max_threads: usize,

    /// Stack size for each worker thread, in bytes.
    /// Default: 1,048,576 bytes (1 MiB).
    pub stack_size: usize,

    /// Files larger than this are logged and skipped.
    /// Default: 16,777,216 bytes (16 MiB).
    pub max_file_bytes: usize,

    /// First-segment size of each job's growth arena.
    /// Default: 65,536 bytes (64 KiB).
    pub arena_seed_bytes: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_threads: 0,
            stack_size: 1 << 20,
            max_file_bytes: 16 << 20,
            arena_seed_bytes: 64 << 10,
        }
    }
}

impl ScanSettings {
    /// The effective worker count: `max_threads`, or the CPU count when 0,
    /// clamped to the pool's 14-bit spawned field.
    pub fn effective_threads(&self) -> usize {
        let n = if self.max_threads == 0 {
            num_cpus::get()
        } else {
            self.max_threads
        };
        n.clamp(1, crate::pool::MAX_THREADS)
    }
}

/// The outcome of scanning a single `.py` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// Absolute path of the scanned file.
    pub path: PathBuf,

    /// The search root the file was discovered under.
    pub root: PathBuf,

    /// Dotted module name resolved from the file's location, when resolvable.
    pub module: Option<String>,

    /// Public symbols extracted from the module scope.
    pub symbols: Vec<OwnedSymbol>,

    /// `None` on success; a human-readable description when the file was
    /// skipped (unreadable, oversize, parser declined). Per-file errors never
    /// abort the scan.
    pub error: Option<String>,
}

/// Aggregate result of a scan across all discovered files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// One report per discovered file, in completion order.
    pub files: Vec<FileReport>,

    /// Count of files scanned successfully.
    pub files_scanned: usize,

    /// Count of files skipped with an error.
    pub files_failed: usize,

    /// Total symbols across all successful files.
    pub total_symbols: usize,
}

/// Top-level library error. Per-file failures are reported inside
/// [`FileReport`]; only interpreter discovery can fail a scan outright.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// `sys.path` discovery failed.
    #[error(transparent)]
    Discover(#[from] DiscoverError),
}
