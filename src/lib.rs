//! # ANT EEP Library for Rust
//!
//! A pure Rust library for reading and writing ANT EEP continuous (`.cnt`)
//! recordings: the RIFF/RF64 container, the RAW3 compressed sample stream,
//! embedded trigger tables and external `.trg` trigger files.
//!
//! ## Quick Start
//!
//! ### Reading a CNT file
//!
//! ```rust
//! use eep::{CntReader, Result};
//! # use std::fs;
//!
//! fn main() -> Result<()> {
//!     # // Create a test file first
//!     # eep::doctest_utils::create_multi_channel_test_file("quick_read.cnt")?;
//!     // Open a recording
//!     let mut reader = CntReader::open("quick_read.cnt")?;
//!
//!     // Get file information
//!     let header = reader.header();
//!     println!("Channels: {}", header.channel_count());
//!     println!("Duration: {:.2} seconds", header.duration());
//!
//!     // Read the first 1000 samples of every channel
//!     let samples = reader.read_samples(0, 1000)?;
//!     println!("Read {} values", samples.len());
//!
//!     # // Cleanup
//!     # drop(reader);
//!     # fs::remove_file("quick_read.cnt").ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Creating a CNT file
//!
//! ```rust
//! use eep::{ChannelInfo, CntWriter, FileType, Result};
//! # use std::fs;
//!
//! fn main() -> Result<()> {
//!     let channels = vec![
//!         ChannelInfo::new("Fp1", "", "uV"),
//!         ChannelInfo::new("Fp2", "", "uV"),
//!     ];
//!
//!     // RF64 for recordings that may grow beyond 4 GiB
//!     let mut writer = CntWriter::create("quick_write.cnt", 256.0, channels, FileType::Rf64)?;
//!
//!     // Rows are interleaved: one value per channel per sample
//!     let mut rows = Vec::new();
//!     for i in 0..256 {
//!         let t = i as f32 / 256.0;
//!         rows.push(50.0 * (2.0 * std::f32::consts::PI * 10.0 * t).sin());
//!         rows.push(0.0);
//!     }
//!
//!     writer.add_samples(&rows)?;
//!     writer.add_trigger(100, "stim")?;
//!     writer.finalize()?;
//!
//!     # // Cleanup
//!     # fs::remove_file("quick_write.cnt").ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Handle-based access
//!
//! [`Library`] keeps recordings open behind integer handles, in the style of
//! the libeep C interface:
//!
//! ```rust
//! use eep::Library;
//!
//! # eep::doctest_utils::create_simple_test_file("quick_handles.cnt")?;
//! let mut lib = Library::init();
//! let h = lib.open_with_external_triggers("quick_handles.cnt")?;
//!
//! for i in 0..lib.trigger_count(h)? {
//!     let (code, offset) = lib.trigger(h, i)?;
//!     println!("trigger({}, {}, {})", i, code, offset);
//! }
//!
//! lib.close(h)?;
//! lib.exit();
//! # std::fs::remove_file("quick_handles.cnt").ok();
//! # Ok::<(), eep::EepError>(())
//! ```
//!
//! ## Working with Sample Data
//!
//! ### Physical vs Raw Values
//!
//! Samples are stored as 32-bit integers. Each channel carries two factors,
//! `iscale` and `rscale`; the physical value is `raw * iscale * rscale`:
//!
//! ```rust
//! use eep::CntReader;
//!
//! # eep::doctest_utils::create_validation_test_file("quick_scale.cnt")?;
//! let mut reader = CntReader::open("quick_scale.cnt")?;
//! assert_eq!(reader.channel(0)?.scale(), 0.5);
//!
//! let raw = reader.read_raw_samples(0, 3)?;
//! assert_eq!(raw, vec![200, 100, 0]);
//!
//! let physical = reader.read_samples(0, 3)?;
//! assert_eq!(physical, vec![100.0, 50.0, 0.0]);
//! # std::fs::remove_file("quick_scale.cnt").ok();
//! # Ok::<(), eep::EepError>(())
//! ```

pub mod error;
pub mod types;
pub mod utils;
pub mod riff;
pub mod raw3;
pub mod trigger;
pub mod reader;
pub mod writer;
pub mod library;
pub mod dump;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{EepError, Result};
pub use types::{ChannelInfo, CntHeader, FileType, Trigger};
pub use reader::CntReader;
pub use writer::CntWriter;
pub use library::{Handle, Library};

// Important constants
pub const TRIGGER_CODE_LENGTH: usize = 8; // 磁盘上的触发代码字节数
pub const DEFAULT_RSCALE: f64 = 1.0 / 256.0;
pub const DEFAULT_EPOCH_LENGTH: u64 = 512;
pub const DEFAULT_DUMP_ROWS: u64 = 10;
pub const MAX_CHANNELS: usize = 2048;
pub const FILE_VERSION: &str = "4.4";

/// Library version
///
/// Returns the current version of the eep library.
///
/// # Examples
///
/// ```rust
/// let version = eep::version();
/// assert!(!version.is_empty());
/// assert!(version.contains('.'));
/// println!("EEP library version: {}", version);
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
