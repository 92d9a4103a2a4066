//! cntdump
//!
//! Prints the channel count, the first sample rows and the trigger list of
//! ANT EEP `.cnt` recordings.
//!
//! # Usage
//!
//! ```bash
//! # Ten rows of every file
//! cntdump subject01.cnt subject02.cnt
//!
//! # Every row, ignoring .trg files next to the recordings
//! cntdump --all --no-external-triggers subject01.cnt
//!
//! # Fail the exit status when any file could not be read
//! cntdump --strict *.cnt
//! ```

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::filter::{Directive, EnvFilter};

use eep::dump::{self, DumpConfig, SampleRows};
use eep::Library;

/// Dump ANT EEP continuous recordings
#[derive(Parser, Debug)]
#[command(
    name = "cntdump",
    version,
    about = "Print channels, samples and triggers of ANT EEP .cnt files"
)]
struct Args {
    /// Recordings to dump, processed in order
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Number of sample rows to print per file
    #[arg(short = 'n', long = "samples", value_name = "N", default_value_t = eep::DEFAULT_DUMP_ROWS)]
    samples: u64,

    /// Print every sample row
    #[arg(long, conflicts_with = "samples")]
    all: bool,

    /// Use only the triggers stored in the .cnt file
    #[arg(long)]
    no_external_triggers: bool,

    /// Exit with status 1 when any file failed
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (off, error, warn, info, debug, trace); per-file failures are always shown
    #[arg(long, default_value = "warn", env = "EEP_LOG")]
    log_level: String,
}

impl Args {
    fn dump_config(&self) -> DumpConfig {
        DumpConfig {
            rows: if self.all {
                SampleRows::All
            } else {
                SampleRows::Fixed(self.samples)
            },
            external_triggers: !self.no_external_triggers,
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args);
    debug!(?args, "starting");

    let config = args.dump_config();
    let mut lib = Library::init();

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let report = dump::run(&mut lib, &args.files, &config, &mut out);
    out.flush().context("failed to flush output")?;

    lib.exit();

    if args.strict && report.has_failures() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_new(format!("eep={level},cntdump={level}"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // 文件失败信息不受日志级别影响
    let filter = match format!("{}=error", dump::FAILURE_TARGET).parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .init();
}
