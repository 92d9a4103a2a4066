//! Text dump of recordings: channel count, the first sample rows and the
//! trigger list, one file after another.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{EepError, Result};
use crate::library::{Handle, Library};

/// Tracing target of the per-file failure lines, kept visible by `cntdump`
/// whatever log level is configured.
pub const FAILURE_TARGET: &str = "eep::dump::failures";

/// Why a file could not be dumped.
#[derive(Debug, Error)]
pub enum FileError {
    /// Nothing was printed for the file.
    #[error("error opening {}: {source}", .path.display())]
    Open { path: PathBuf, source: EepError },

    /// The file opened; its output stops where reading failed.
    #[error("error reading {}: {source}", .path.display())]
    Read { path: PathBuf, source: EepError },
}

impl FileError {
    pub fn path(&self) -> &Path {
        match self {
            FileError::Open { path, .. } | FileError::Read { path, .. } => path,
        }
    }
}

/// How many sample rows to print per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRows {
    Fixed(u64),
    All,
}

impl Default for SampleRows {
    fn default() -> Self {
        SampleRows::Fixed(crate::DEFAULT_DUMP_ROWS)
    }
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub rows: SampleRows,
    /// 优先使用同名.trg文件中的触发
    pub external_triggers: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            rows: SampleRows::default(),
            external_triggers: true,
        }
    }
}

/// What was printed for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub channels: usize,
    pub rows: u64,
    pub triggers: usize,
}

/// Outcome of [`run`] over a list of files.
#[derive(Debug, Default, Clone)]
pub struct DumpReport {
    pub succeeded: usize,
    pub failed: Vec<PathBuf>,
}

impl DumpReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Prints one recording
///
/// Output format:
///
/// ```text
/// channels: 2
/// sample[    0]: 1.000000 -2.500000
/// ...
/// triggers: 1
/// trigger(0, 128, 512)
/// ```
///
/// The handle is closed on every path once the open succeeded. A failed
/// open yields [`FileError::Open`]; any later failure, including one while
/// closing, yields [`FileError::Read`].
///
/// ```rust
/// use eep::{dump, Library};
///
/// # eep::doctest_utils::create_simple_test_file("dump_doc.cnt")?;
/// let mut lib = Library::init();
/// let mut out = Vec::new();
///
/// let summary = dump::handle_file(&mut lib, "dump_doc.cnt", &dump::DumpConfig::default(), &mut out)?;
/// let text = String::from_utf8(out).unwrap();
///
/// assert!(text.starts_with(&format!("channels: {}\n", summary.channels)));
/// assert_eq!(summary.rows, 10);
/// assert_eq!(lib.open_handles(), 0);
/// # std::fs::remove_file("dump_doc.cnt").ok();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn handle_file<P: AsRef<Path>, W: Write>(
    lib: &mut Library,
    path: P,
    config: &DumpConfig,
    out: &mut W,
) -> std::result::Result<FileSummary, FileError> {
    let path = path.as_ref();
    let opened = if config.external_triggers {
        lib.open_with_external_triggers(path)
    } else {
        lib.open(path)
    };
    let handle = opened.map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let result = print_recording(lib, handle, config, out);
    let closed = lib.close(handle);

    result
        .and_then(|summary| closed.map(|_| summary))
        .map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn print_recording<W: Write>(
    lib: &mut Library,
    handle: Handle,
    config: &DumpConfig,
    out: &mut W,
) -> Result<FileSummary> {
    let channels = lib.channel_count(handle)?;
    writeln!(out, "channels: {}", channels)?;

    let available = lib.sample_count(handle)?;
    let rows = match config.rows {
        SampleRows::All => available,
        SampleRows::Fixed(n) if n > available => {
            warn!(requested = n, available, "recording is shorter than the requested rows");
            available
        }
        SampleRows::Fixed(n) => n,
    };

    for s in 0..rows {
        let row = lib.samples(handle, s, s + 1)?;
        let mut line = format!("sample[{:5}]:", s);
        for value in &row {
            line.push_str(&format!(" {:.6}", value));
        }
        writeln!(out, "{}", line)?;
    }

    let trigger_count = lib.trigger_count(handle)?;
    writeln!(out, "triggers: {}", trigger_count)?;
    for i in 0..trigger_count {
        let (code, offset) = lib.trigger(handle, i)?;
        writeln!(out, "trigger({}, {}, {})", i, code, offset)?;
    }

    Ok(FileSummary {
        channels,
        rows,
        triggers: trigger_count,
    })
}

/// Dumps every file in order
///
/// A file that fails to open is reported as `error opening <file>` and
/// skipped; one that fails after opening is reported as
/// `error reading <file>`. Later files are still processed either way.
pub fn run<P: AsRef<Path>, W: Write>(
    lib: &mut Library,
    paths: &[P],
    config: &DumpConfig,
    out: &mut W,
) -> DumpReport {
    let mut report = DumpReport::default();

    for path in paths {
        let path = path.as_ref();
        match handle_file(lib, path, config, out) {
            Ok(summary) => {
                info!(
                    path = %path.display(),
                    channels = summary.channels,
                    rows = summary.rows,
                    triggers = summary.triggers,
                    "dumped"
                );
                report.succeeded += 1;
            }
            Err(e) => {
                error!(target: FAILURE_TARGET, "{}", e);
                report.failed.push(path.to_path_buf());
            }
        }
    }

    report
}
