//! Module-path resolution: filesystem location → dotted Python module name.
//!
//! A file participates in a package for every ancestor directory that carries
//! an `__init__.py` marker; the climb stops at the first ancestor without
//! one. `pkg/sub/mod.py` with markers in `pkg/` and `pkg/sub/` resolves to
//! `pkg.sub.mod`; a bare `split.py` in a marker-less site-packages resolves
//! to `split`; a package's own `__init__.py` resolves to the package name.

use std::path::Path;

/// Errors produced by [`module_path`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModulePathError {
    /// The input does not name a `.py` file.
    #[error("not a .py file")]
    NotPyFile,
}

/// Resolve the dotted module name for a `.py` source file.
///
/// The result is deterministic in the path and the set of ancestor
/// `__init__.py` markers present on disk at call time.
pub fn module_path(path: &Path) -> Result<String, ModulePathError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(ModulePathError::NotPyFile)?;
    let stem = file_name
        .strip_suffix(".py")
        .filter(|stem| !stem.is_empty())
        .ok_or(ModulePathError::NotPyFile)?;

    // Innermost component: the file's stem, unless this is a package marker
    // itself, in which case the package directory supplies the name.
    let mut components: Vec<String> = Vec::new();
    if stem != "__init__" {
        components.push(stem.to_string());
    }

    // Climb ancestors while they carry an __init__.py marker.
    let mut dir = path.parent();
    while let Some(current) = dir {
        if !current.join("__init__.py").is_file() {
            break;
        }
        match current.file_name() {
            Some(name) => components.push(name.to_string_lossy().into_owned()),
            None => break,
        }
        dir = current.parent();
    }

    components.reverse();
    Ok(components.join("."))
}
