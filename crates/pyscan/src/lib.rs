// pyscan: scans a Python installation's import path and extracts the public
// module-level symbols of every reachable .py source file.

pub mod arena;
pub mod executor;
pub mod extract;
pub mod modpath;
pub mod parse;
pub mod pool;
pub mod pypath;
pub mod types;
pub mod walker;

pub use arena::GrowthArena;
pub use executor::{scan, scan_roots};
pub use extract::extract;
pub use modpath::module_path;
pub use parse::{parse, ParseHandle};
pub use pool::{Batch, PoolConfig, Task, ThreadPool};
pub use pypath::discover_search_paths;
pub use types::{
    FileReport, OwnedSymbol, ScanError, ScanReport, ScanSettings, Symbol, SymbolKind,
};
pub use walker::{PyFile, PyFileIter};
