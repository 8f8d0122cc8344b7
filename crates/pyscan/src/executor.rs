//! Scan orchestration: discovery → file iteration → per-file pool jobs →
//! aggregated report.
//!
//! Each discovered file becomes one boxed [`ScanJob`] whose intrusive
//! [`Task`] is scheduled on the pool; the callback reconstitutes the box,
//! does the read/parse/extract work, and sends a [`FileReport`] over an mpsc
//! channel. The driver drains the channel until every job's sender has
//! dropped, so `shutdown` is only announced once all submitted work has
//! actually run — no queued job is ever abandoned mid-scan.
//!
//! Per-file failures (unreadable, oversize, parser declined) are logged,
//! recorded on the report, and never abort the scan.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::mpsc;

use crate::arena::GrowthArena;
use crate::extract::extract;
use crate::modpath::module_path;
use crate::parse::parse;
use crate::pool::{Batch, PoolConfig, Task, ThreadPool};
use crate::pypath::discover_search_paths;
use crate::types::{FileReport, ScanError, ScanReport, ScanSettings};
use crate::walker::{PyFile, PyFileIter};

/// Scan the import path of `python`: discover `sys.path`, then scan every
/// reachable `.py` file.
pub fn scan(python: &Path, settings: &ScanSettings) -> Result<ScanReport, ScanError> {
    let roots = discover_search_paths(python)?
        .into_iter()
        .map(PathBuf::from)
        .collect();
    Ok(scan_roots(roots, settings))
}

/// Scan every `.py` file under the given roots, in a fresh pool sized by
/// `settings`.
pub fn scan_roots(roots: Vec<PathBuf>, settings: &ScanSettings) -> ScanReport {
    let pool = ThreadPool::new(PoolConfig {
        max_threads: settings.effective_threads(),
        stack_size: settings.stack_size,
    });

    let limits = JobLimits {
        max_file_bytes: settings.max_file_bytes,
        arena_seed_bytes: settings.arena_seed_bytes,
    };

    let (tx, rx) = mpsc::channel::<FileReport>();
    let mut submitted: usize = 0;

    for file in PyFileIter::new(roots) {
        let job = Box::new(ScanJob {
            task: Task::new(ScanJob::callback),
            file,
            limits,
            tx: tx.clone(),
        });
        let raw = Box::into_raw(job);
        // Safety: the job box stays alive until its callback reconstitutes
        // it; the channel below is drained before shutdown, so every
        // scheduled job runs exactly once.
        unsafe {
            let batch = Batch::from_task(&(*raw).task);
            pool.schedule(batch);
        }
        submitted += 1;
    }

    // The driver's own sender must go away for disconnect to mean "done".
    drop(tx);

    let mut report = ScanReport::default();
    while let Ok(file_report) = rx.recv() {
        if file_report.error.is_none() {
            report.files_scanned += 1;
            report.total_symbols += file_report.symbols.len();
        } else {
            report.files_failed += 1;
        }
        report.files.push(file_report);
    }
    debug_assert_eq!(report.files.len(), submitted);

    pool.shutdown();
    pool.join();
    report
}

#[derive(Debug, Clone, Copy)]
struct JobLimits {
    max_file_bytes: usize,
    arena_seed_bytes: usize,
}

/// One per-file unit of work. The intrusive task must stay the first field:
/// the callback turns the task pointer back into the job pointer.
#[repr(C)]
struct ScanJob {
    task: Task,
    file: PyFile,
    limits: JobLimits,
    tx: mpsc::Sender<FileReport>,
}

impl ScanJob {
    /// Pool callback: recover the box, scan, report.
    ///
    /// # Safety
    /// `task` is the first field of a `ScanJob` allocated via
    /// `Box::into_raw` and scheduled exactly once.
    unsafe fn callback(task: NonNull<Task>) {
        let job = Box::from_raw(task.as_ptr().cast::<ScanJob>());
        let report = scan_file(&job.file, job.limits);
        if let Some(error) = &report.error {
            log::warn!("skipping {}: {error}", report.path.display());
        }
        // The receiver may already be gone if the driver is tearing down;
        // nothing useful to do with the report then.
        let _ = job.tx.send(report);
    }
}

/// Read, parse, and extract one file. Never panics on bad input; failures
/// land in `FileReport::error`.
fn scan_file(file: &PyFile, limits: JobLimits) -> FileReport {
    let path = file.abs_path();
    let mut report = FileReport {
        path: path.clone(),
        root: file.root.as_ref().clone(),
        module: None,
        symbols: Vec::new(),
        error: None,
    };

    let mut arena = GrowthArena::new(limits.arena_seed_bytes, limits.max_file_bytes);
    let source = match read_into_arena(&path, limits.max_file_bytes, &mut arena) {
        Ok(source) => source,
        Err(error) => {
            report.error = Some(error);
            return report;
        }
    };

    let handle = match parse(source) {
        Ok(handle) => handle,
        Err(error) => {
            report.error = Some(error.to_string());
            return report;
        }
    };

    report.symbols = extract(&handle).into_iter().map(|s| s.to_owned()).collect();
    report.module = module_path(&path).ok();
    report
}

/// Read the whole file into arena-backed memory.
fn read_into_arena<'a>(
    path: &Path,
    max_file_bytes: usize,
    arena: &'a mut GrowthArena,
) -> Result<&'a [u8], String> {
    let mut file = std::fs::File::open(path).map_err(|err| format!("open failed: {err}"))?;
    let len = file
        .metadata()
        .map_err(|err| format!("stat failed: {err}"))?
        .len();

    if len > max_file_bytes as u64 {
        return Err(format!("file too large ({len} bytes)"));
    }
    let len = len as usize;

    let buffer = arena
        .alloc_zeroed(len)
        .ok_or_else(|| format!("arena exhausted for {len} bytes"))?;

    // The file may shrink between stat and read; scan whatever was read.
    let mut filled = 0;
    while filled < len {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(format!("read failed: {err}")),
        }
    }
    Ok(&buffer[..filled])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn test_read_into_arena_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mod.py");
        write_file(&path, "X = 1\n");

        let mut arena = GrowthArena::new(16, 1 << 16);
        let bytes = read_into_arena(&path, 1 << 16, &mut arena).expect("read");
        assert_eq!(bytes, b"X = 1\n");
    }

    #[test]
    fn test_read_into_arena_rejects_oversize() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.py");
        write_file(&path, &"# filler\n".repeat(100));

        let mut arena = GrowthArena::new(16, 64);
        let err = read_into_arena(&path, 64, &mut arena).expect_err("too large");
        assert!(err.contains("too large"), "err: {err}");
    }

    #[test]
    fn test_scan_file_reports_symbols_and_module() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        write_file(&root.join("pkg/__init__.py"), "");
        write_file(&root.join("pkg/api.py"), "class Client: pass\nTIMEOUT = 30\n");

        let file = PyFile {
            root: std::sync::Arc::new(root),
            rel_path: PathBuf::from("pkg/api.py"),
        };
        let report = scan_file(
            &file,
            JobLimits {
                max_file_bytes: 1 << 20,
                arena_seed_bytes: 1 << 10,
            },
        );
        assert!(report.error.is_none(), "error: {:?}", report.error);
        assert_eq!(report.module.as_deref(), Some("pkg.api"));
        let names: Vec<&str> = report.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Client", "TIMEOUT"]);
    }

    #[test]
    fn test_scan_file_missing_file_sets_error() {
        let file = PyFile {
            root: std::sync::Arc::new(PathBuf::from("/nonexistent")),
            rel_path: PathBuf::from("gone.py"),
        };
        let report = scan_file(
            &file,
            JobLimits {
                max_file_bytes: 1 << 20,
                arena_seed_bytes: 1 << 10,
            },
        );
        assert!(report.error.is_some());
        assert!(report.symbols.is_empty());
    }
}
