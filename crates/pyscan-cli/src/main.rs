use clap::Parser;
use pyscan::{scan, ScanSettings};
use std::path::PathBuf;

/// Scan a Python installation's import path and emit its public symbols.
#[derive(Parser, Debug)]
#[command(
    name = "pyscan-cli",
    about = "Scan a Python installation's import path and emit its public symbols as JSON"
)]
struct Args {
    /// Path to the Python interpreter whose sys.path should be scanned
    python: PathBuf,

    /// Worker threads (default: logical CPU count)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Worker stack size in bytes
    #[arg(long, default_value_t = 1_048_576)]
    stack_size: usize,

    /// Skip files larger than this many bytes
    #[arg(long, default_value_t = 16_777_216)]
    max_file_bytes: usize,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let settings = ScanSettings {
        max_threads: args.threads,
        stack_size: args.stack_size,
        max_file_bytes: args.max_file_bytes,
        ..ScanSettings::default()
    };

    // Interpreter-invocation failure is the only fatal error; per-file
    // problems are recorded in the report and logged by the library.
    let report = match scan(&args.python, &settings) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("Error discovering sys.path: {err}");
            std::process::exit(1);
        }
    };

    // One JSON object per successfully scanned file, then a summary line.
    for file in report.files.iter().filter(|f| f.error.is_none()) {
        let json = if args.pretty {
            serde_json::to_string_pretty(file)
        } else {
            serde_json::to_string(file)
        }
        .expect("FileReport is always serializable");
        println!("{json}");
    }

    let summary = serde_json::json!({
        "files_scanned": report.files_scanned,
        "files_failed": report.files_failed,
        "total_symbols": report.total_symbols,
    });
    println!("{summary}");
}
