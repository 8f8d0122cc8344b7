//! Recursive `.py` file iterator over an ordered list of search roots.
//!
//! [`PyFileIter`] is a stateful, single-consumer iterator. Each yielded
//! [`PyFile`] carries the root it was discovered under plus the path relative
//! to that root. Non-existent roots are skipped silently — `sys.path`
//! commonly contains stale entries — and any other traversal error is logged
//! and skipped so one unreadable directory never aborts a scan.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

/// A discovered Python source file.
#[derive(Debug, Clone)]
pub struct PyFile {
    /// The search root the file was found under. Shared across all files of
    /// the same root.
    pub root: Arc<PathBuf>,

    /// Path relative to `root`. Empty when the root itself is a `.py` file.
    pub rel_path: PathBuf,
}

impl PyFile {
    /// The file's full path (`root` joined with `rel_path`).
    pub fn abs_path(&self) -> PathBuf {
        if self.rel_path.as_os_str().is_empty() {
            return self.root.as_ref().clone();
        }
        self.root.join(&self.rel_path)
    }
}

/// Lazily walks each root in order, yielding every regular file whose name
/// ends in `.py`.
pub struct PyFileIter {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<(Arc<PathBuf>, walkdir::IntoIter)>,
}

impl PyFileIter {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        PyFileIter {
            roots: roots.into_iter(),
            current: None,
        }
    }

    /// Advance to the next root's walk.
    fn next_root(&mut self) -> bool {
        match self.roots.next() {
            Some(root) => {
                let walk = WalkDir::new(&root).into_iter();
                self.current = Some((Arc::new(root), walk));
                true
            }
            None => false,
        }
    }
}

impl Iterator for PyFileIter {
    type Item = PyFile;

    fn next(&mut self) -> Option<PyFile> {
        loop {
            let (root, walk) = match self.current.as_mut() {
                Some(current) => current,
                None => {
                    if !self.next_root() {
                        return None;
                    }
                    continue;
                }
            };

            let entry = match walk.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    // A missing root shows up as an error at depth 0; stale
                    // sys.path entries are normal, so stay quiet about them.
                    let missing_root = err.depth() == 0
                        && err
                            .io_error()
                            .map(|io| io.kind() == std::io::ErrorKind::NotFound)
                            .unwrap_or(false);
                    if !missing_root {
                        log::warn!("skipping unreadable entry under {}: {err}", root.display());
                    }
                    continue;
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if !is_py_file(entry.path()) {
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root.as_path())
                .unwrap_or(entry.path())
                .to_path_buf();
            return Some(PyFile {
                root: Arc::clone(root),
                rel_path,
            });
        }
    }
}

fn is_py_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(".py"))
        .unwrap_or(false)
}
