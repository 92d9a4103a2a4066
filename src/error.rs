use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EepError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Corrupt sample data: {0}")]
    Corrupt(String),

    #[error("Invalid handle {0}")]
    InvalidHandle(i32),

    #[error("Channel index {0} out of range")]
    InvalidChannelIndex(usize),

    #[error("Trigger index {0} out of range")]
    InvalidTriggerIndex(usize),

    #[error("Sample range {start}..{end} outside recording of {count} samples")]
    InvalidSampleRange { start: u64, end: u64, count: u64 },

    #[error("Writer state error: {0}")]
    WriterState(String),
}

pub type Result<T> = std::result::Result<T, EepError>;
