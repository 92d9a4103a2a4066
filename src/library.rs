//! Handle-based access to open recordings.
//!
//! [`Library`] owns every open [`CntReader`] and hands out small integer
//! [`Handle`]s for them. Every query validates its handle, so a closed or
//! never-issued handle yields [`EepError::InvalidHandle`] instead of touching
//! another recording.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{EepError, Result};
use crate::reader::CntReader;
use crate::types::ChannelInfo;

/// Token for a recording opened through [`Library`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(i32);

impl Handle {
    /// Sentinel that is never issued by [`Library`].
    pub const INVALID: Handle = Handle(-1);

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Handle {
    fn from(value: i32) -> Self {
        Handle(value)
    }
}

/// Table of open recordings
///
/// Closed slots are reused by the next open, so handle values stay small.
/// Dropping the library closes whatever is still open.
///
/// ```rust
/// use eep::{EepError, Handle, Library};
///
/// # eep::doctest_utils::create_simple_test_file("library_doc.cnt")?;
/// let mut lib = Library::init();
///
/// let h = lib.open("library_doc.cnt")?;
/// println!("{} channels at {} Hz", lib.channel_count(h)?, lib.sample_frequency(h)?);
///
/// let first_row = lib.samples(h, 0, 1)?;
/// assert_eq!(first_row.len(), lib.channel_count(h)?);
///
/// lib.close(h)?;
/// assert!(matches!(lib.channel_count(h), Err(EepError::InvalidHandle(_))));
/// assert!(lib.channel_count(Handle::INVALID).is_err());
///
/// lib.exit();
/// # std::fs::remove_file("library_doc.cnt").ok();
/// # Ok::<(), EepError>(())
/// ```
#[derive(Default)]
pub struct Library {
    slots: Vec<Option<CntReader>>,
}

impl Library {
    pub fn init() -> Self {
        debug!("library initialised");
        Library { slots: Vec::new() }
    }

    /// Closes every open recording and releases the library.
    pub fn exit(mut self) {
        self.close_all();
    }

    /// Opens a recording using its embedded trigger table.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<Handle> {
        let reader = CntReader::open(path)?;
        self.insert(reader)
    }

    /// Opens a recording, preferring triggers from a neighbouring `.trg` file.
    pub fn open_with_external_triggers<P: AsRef<Path>>(&mut self, path: P) -> Result<Handle> {
        let reader = CntReader::open_with_external_triggers(path)?;
        self.insert(reader)
    }

    fn insert(&mut self, reader: CntReader) -> Result<Handle> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let value = i32::try_from(index)
            .map_err(|_| EepError::InvalidFormat("too many open recordings".to_string()))?;
        info!(handle = value, path = %reader.path().display(), "open");
        self.slots[index] = Some(reader);
        Ok(Handle(value))
    }

    /// Closes a recording; the handle becomes invalid.
    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let slot = usize::try_from(handle.0)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(EepError::InvalidHandle(handle.0))?;

        match slot.take() {
            Some(reader) => {
                info!(handle = handle.0, path = %reader.path().display(), "close");
                Ok(())
            }
            None => Err(EepError::InvalidHandle(handle.0)),
        }
    }

    /// Number of recordings currently open.
    pub fn open_handles(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn reader(&self, handle: Handle) -> Result<&CntReader> {
        usize::try_from(handle.0)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or(EepError::InvalidHandle(handle.0))
    }

    pub fn reader_mut(&mut self, handle: Handle) -> Result<&mut CntReader> {
        usize::try_from(handle.0)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(EepError::InvalidHandle(handle.0))
    }

    pub fn channel_count(&self, handle: Handle) -> Result<usize> {
        Ok(self.reader(handle)?.channel_count())
    }

    pub fn sample_count(&self, handle: Handle) -> Result<u64> {
        Ok(self.reader(handle)?.sample_count())
    }

    pub fn sample_frequency(&self, handle: Handle) -> Result<f64> {
        Ok(self.reader(handle)?.sample_rate())
    }

    fn channel(&self, handle: Handle, index: usize) -> Result<&ChannelInfo> {
        self.reader(handle)?.channel(index)
    }

    pub fn channel_label(&self, handle: Handle, index: usize) -> Result<&str> {
        Ok(&self.channel(handle, index)?.label)
    }

    pub fn channel_unit(&self, handle: Handle, index: usize) -> Result<&str> {
        Ok(&self.channel(handle, index)?.unit)
    }

    pub fn channel_reference(&self, handle: Handle, index: usize) -> Result<&str> {
        Ok(&self.channel(handle, index)?.reference)
    }

    /// Factor turning stored integers into physical units.
    pub fn channel_scale(&self, handle: Handle, index: usize) -> Result<f64> {
        Ok(self.channel(handle, index)?.scale())
    }

    /// Interleaved physical values for samples `start..end`
    ///
    /// The buffer holds `(end - start) * channel_count` values, row by row.
    pub fn samples(&mut self, handle: Handle, start: u64, end: u64) -> Result<Vec<f32>> {
        self.reader_mut(handle)?.read_samples(start, end)
    }

    pub fn trigger_count(&self, handle: Handle) -> Result<usize> {
        Ok(self.reader(handle)?.triggers().len())
    }

    /// Code and sample offset of trigger `index`.
    pub fn trigger(&self, handle: Handle, index: usize) -> Result<(&str, u64)> {
        let trigger = self
            .reader(handle)?
            .triggers()
            .get(index)
            .ok_or(EepError::InvalidTriggerIndex(index))?;
        Ok((trigger.code.as_str(), trigger.sample))
    }

    fn close_all(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(reader) = slot.take() {
                warn!(handle = index, path = %reader.path().display(), "closing recording left open");
            }
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("slots", &self.slots.len())
            .field("open", &self.open_handles())
            .finish()
    }
}
