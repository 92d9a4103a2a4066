use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::{EepError, Result};
use crate::raw3;
use crate::riff::{self, LIST_ID};
use crate::trigger;
use crate::types::{ChannelInfo, FileType, Trigger};
use crate::utils::{datetime_to_ole, to_header_token};
use crate::{DEFAULT_EPOCH_LENGTH, FILE_VERSION, MAX_CHANNELS};

/// CNT file writer for continuous recordings
///
/// The writer streams compressed epochs straight to disk. The container,
/// `LIST raw3` and `chan` chunks are written by [`create`](Self::create);
/// the epoch table, triggers and ASCII header follow the sample data and
/// are written by [`finalize`](Self::finalize), which also patches every
/// size field.
///
/// # File Creation Workflow
///
/// 1. Create writer with `CntWriter::create()`
/// 2. Optionally set the epoch length and start time
/// 3. Append interleaved sample rows with `add_samples()`
/// 4. Add triggers with `add_trigger()` at any time
/// 5. Finalize the file with `finalize()`
///
/// # Examples
///
/// ```rust
/// use eep::{ChannelInfo, CntReader, CntWriter, FileType};
///
/// let channels = vec![
///     ChannelInfo::new("Fp1", "", "uV"),
///     ChannelInfo::new("Fp2", "", "uV"),
/// ];
/// let mut writer = CntWriter::create("writer_basic.cnt", 500.0, channels, FileType::Riff)?;
///
/// // 一秒钟的数据，按行交错
/// let mut rows = Vec::new();
/// for i in 0..500 {
///     let t = i as f32 / 500.0;
///     rows.push(50.0 * (2.0 * std::f32::consts::PI * 10.0 * t).sin());
///     rows.push(-20.0);
/// }
/// writer.add_samples(&rows)?;
/// writer.add_trigger(250, "1")?;
/// writer.finalize()?;
///
/// let mut reader = CntReader::open("writer_basic.cnt")?;
/// assert_eq!(reader.sample_count(), 500);
/// assert_eq!(reader.triggers().len(), 1);
/// assert_eq!(reader.read_samples(0, 1)?[1], -20.0);
///
/// # std::fs::remove_file("writer_basic.cnt").ok();
/// # Ok::<(), eep::EepError>(())
/// ```
pub struct CntWriter {
    file: BufWriter<File>,
    path: PathBuf,
    file_type: FileType,
    sample_rate: f64,
    channels: Vec<ChannelInfo>,
    epoch_length: u64,
    start_time: Option<NaiveDateTime>,
    /// 当前epoch缓冲（按通道）
    pending: Vec<Vec<i32>>,
    epoch_offsets: Vec<u64>,
    sample_count: u64,
    triggers: Vec<Trigger>,
    /// 已写入data块的字节数
    data_written: u64,
    list_size_pos: u64,
    data_size_pos: u64,
}

impl CntWriter {
    /// Creates a new CNT file for writing
    ///
    /// # Arguments
    ///
    /// * `path` - Output path, created or truncated
    /// * `sample_rate` - Sampling frequency in Hz, positive and finite
    /// * `channels` - Channel definitions, at least one
    /// * `file_type` - `FileType::Riff`, or `FileType::Rf64` for recordings
    ///   that may exceed 4 GiB
    ///
    /// # Errors
    ///
    /// * `EepError::FileNotFound` - Path can't be created
    /// * `EepError::InvalidFormat` - Bad sample rate or channel list
    ///
    /// ```rust
    /// use eep::{ChannelInfo, CntWriter, FileType};
    ///
    /// let result = CntWriter::create("no_channels.cnt", 256.0, vec![], FileType::Riff);
    /// assert!(result.is_err());
    ///
    /// let result = CntWriter::create(
    ///     "/invalid/path/file.cnt",
    ///     256.0,
    ///     vec![ChannelInfo::new("Cz", "", "uV")],
    ///     FileType::Riff,
    /// );
    /// assert!(result.is_err());
    /// ```
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: f64,
        channels: Vec<ChannelInfo>,
        file_type: FileType,
    ) -> Result<Self> {
        Self::validate(sample_rate, &channels)?;

        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| EepError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let mut file = BufWriter::new(file);

        let header_len = riff::chunk_header_len(file_type);

        // 容器头，大小在finalize时回填
        file.write_all(file_type.magic())?;
        file.write_all(&riff::encode_word(0, file_type)?)?;
        file.write_all(riff::CNT_FORM)?;

        let list_start = riff::first_chunk_offset(file_type);
        riff::write_chunk_header(&mut file, LIST_ID, 0, file_type)?;
        file.write_all(b"raw3")?;

        // 压缩顺序与通道顺序一致
        let order: Vec<u8> = (0..channels.len() as u16)
            .flat_map(|c| c.to_le_bytes())
            .collect();
        riff::write_chunk(&mut file, b"chan", &order, file_type)?;

        let data_start = list_start + header_len + 4 + header_len + order.len() as u64;
        riff::write_chunk_header(&mut file, b"data", 0, file_type)?;

        info!(
            path = %path.display(),
            channels = channels.len(),
            sample_rate,
            ?file_type,
            "created recording"
        );

        Ok(CntWriter {
            file,
            path: path.to_path_buf(),
            file_type,
            sample_rate,
            pending: vec![Vec::new(); channels.len()],
            channels,
            epoch_length: DEFAULT_EPOCH_LENGTH,
            start_time: None,
            epoch_offsets: Vec::new(),
            sample_count: 0,
            triggers: Vec::new(),
            data_written: 0,
            list_size_pos: list_start + 4,
            data_size_pos: data_start + 4,
        })
    }

    fn validate(sample_rate: f64, channels: &[ChannelInfo]) -> Result<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(EepError::InvalidFormat(format!("invalid sample rate {}", sample_rate)));
        }
        if channels.is_empty() || channels.len() > MAX_CHANNELS {
            return Err(EepError::InvalidFormat(format!(
                "channel count must be between 1 and {}, got {}",
                MAX_CHANNELS,
                channels.len()
            )));
        }

        for (i, ch) in channels.iter().enumerate() {
            if ch.label.trim().is_empty() || ch.unit.trim().is_empty() {
                return Err(EepError::InvalidFormat(format!("channel {} needs a label and a unit", i)));
            }
            // 头部中以';'或'['开头的行是注释或节名
            if ch.label.trim().starts_with([';', '[']) {
                return Err(EepError::InvalidFormat(format!(
                    "channel {} label {:?} cannot start with ';' or '['",
                    i, ch.label
                )));
            }
            let scale = ch.scale();
            if !scale.is_finite() || scale == 0.0 {
                return Err(EepError::InvalidFormat(format!(
                    "channel {} ({}) has unusable scale {}",
                    i, ch.label, scale
                )));
            }
        }

        Ok(())
    }

    /// Sets the number of samples per compressed epoch
    ///
    /// Only allowed before the first sample is added.
    ///
    /// ```rust
    /// use eep::{ChannelInfo, CntWriter, EepError, FileType};
    ///
    /// let mut writer = CntWriter::create(
    ///     "epoch_length.cnt", 100.0, vec![ChannelInfo::new("Cz", "", "uV")], FileType::Riff)?;
    /// writer.set_epoch_length(100)?;
    /// writer.add_samples(&[1.0, 2.0])?;
    ///
    /// // 写入数据后不能再修改
    /// assert!(matches!(writer.set_epoch_length(50), Err(EepError::WriterState(_))));
    /// writer.finalize()?;
    /// # std::fs::remove_file("epoch_length.cnt").ok();
    /// # Ok::<(), EepError>(())
    /// ```
    pub fn set_epoch_length(&mut self, epoch_length: u64) -> Result<()> {
        if self.sample_count > 0 {
            return Err(EepError::WriterState(
                "Cannot change epoch length after writing samples".to_string(),
            ));
        }
        if epoch_length == 0 {
            return Err(EepError::InvalidFormat("epoch length must be at least 1".to_string()));
        }
        self.epoch_length = epoch_length;
        Ok(())
    }

    /// Records the wall-clock start of the recording.
    pub fn set_start_time(&mut self, start_time: NaiveDateTime) {
        self.start_time = Some(start_time);
    }

    /// Appends interleaved sample rows
    ///
    /// `samples.len()` must be a multiple of the channel count; each group
    /// of `channels` values is one time sample. Values are quantised with
    /// [`ChannelInfo::to_raw`].
    pub fn add_samples(&mut self, samples: &[f32]) -> Result<()> {
        let channels = self.channels.len();
        if samples.len() % channels != 0 {
            return Err(EepError::InvalidFormat(format!(
                "{} values do not form whole rows of {} channels",
                samples.len(),
                channels
            )));
        }

        for row in samples.chunks_exact(channels) {
            for ((buf, ch), &value) in self.pending.iter_mut().zip(&self.channels).zip(row) {
                buf.push(ch.to_raw(value));
            }
            self.sample_count += 1;

            if self.pending[0].len() as u64 == self.epoch_length {
                self.flush_epoch()?;
            }
        }

        Ok(())
    }

    /// Adds a trigger at `sample` with an event code
    ///
    /// Codes longer than [`crate::TRIGGER_CODE_LENGTH`] bytes are truncated
    /// when the file is finalized.
    pub fn add_trigger(&mut self, sample: u64, code: &str) -> Result<()> {
        if code.is_empty() {
            return Err(EepError::InvalidFormat("trigger code cannot be empty".to_string()));
        }
        self.triggers.push(Trigger::new(sample, code));
        Ok(())
    }

    /// Number of sample rows added so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// 压缩并写出当前epoch
    fn flush_epoch(&mut self) -> Result<()> {
        if self.pending[0].is_empty() {
            return Ok(());
        }

        let bytes = raw3::encode_epoch(&self.pending);
        self.file.write_all(&bytes)?;
        self.epoch_offsets.push(self.data_written);
        self.data_written += bytes.len() as u64;

        debug!(
            epoch = self.epoch_offsets.len() - 1,
            samples = self.pending[0].len(),
            bytes = bytes.len(),
            "wrote epoch"
        );

        for buf in &mut self.pending {
            buf.clear();
        }
        Ok(())
    }

    fn header_text(&self) -> String {
        let mut text = format!(
            "[File Version]\n{}\n[Sampling Rate]\n{}\n[Samples]\n{}\n[Channels]\n{}\n",
            FILE_VERSION,
            self.sample_rate,
            self.sample_count,
            self.channels.len()
        );

        text.push_str("[Basic Channel Data]\n;label    calibration factor\n");
        for ch in &self.channels {
            let mut line = format!(
                "{} {:e} {:e} {}",
                to_header_token(ch.label.trim()),
                ch.iscale,
                ch.rscale,
                to_header_token(ch.unit.trim())
            );
            if !ch.reference.trim().is_empty() {
                line.push(' ');
                line.push_str(&to_header_token(ch.reference.trim()));
            }
            line.push('\n');
            text.push_str(&line);
        }

        if let Some((days, fraction)) = self.start_time.as_ref().and_then(datetime_to_ole) {
            text.push_str(&format!("[Start Time]\n{} {}\n", days, fraction));
        }

        text
    }

    /// Completes the file
    ///
    /// Flushes the last partial epoch, writes the epoch table, the trigger
    /// table and the ASCII header, then patches all chunk sizes. The file is
    /// incomplete until this returns `Ok`.
    ///
    /// # Errors
    ///
    /// * `EepError::InvalidFormat` - A `FileType::Riff` file outgrew 32-bit sizes
    /// * `EepError::Io` - Writing or seeking failed
    pub fn finalize(mut self) -> Result<()> {
        self.flush_epoch()?;

        let ft = self.file_type;
        if self.data_written % 2 == 1 {
            self.file.write_all(&[0])?;
        }
        riff::patch_word(&mut self.file, self.data_size_pos, self.data_written, ft)?;

        let mut table = riff::encode_word(self.epoch_length, ft)?;
        for &offset in &self.epoch_offsets {
            table.extend(riff::encode_word(offset, ft)?);
        }
        riff::write_chunk(&mut self.file, b"ep  ", &table, ft)?;

        // LIST负载从"raw3"开始
        let list_end = self.file.stream_position()?;
        let list_payload = list_end - (self.list_size_pos + ft.word_size() as u64);
        riff::patch_word(&mut self.file, self.list_size_pos, list_payload, ft)?;

        for t in &self.triggers {
            if t.sample >= self.sample_count {
                warn!(sample = t.sample, code = %t.code, "trigger beyond the last sample");
            }
        }
        let mut triggers = self.triggers.clone();
        triggers.sort_by_key(|t| t.sample);
        let evt = trigger::encode_table(&triggers, ft)?;
        riff::write_chunk(&mut self.file, b"evt ", &evt, ft)?;

        let header_text = self.header_text();
        riff::write_chunk(&mut self.file, b"eeph", header_text.as_bytes(), ft)?;

        let end = self.file.stream_position()?;
        riff::patch_word(&mut self.file, 4, end - riff::chunk_header_len(ft), ft)?;
        self.file.flush()?;

        info!(
            path = %self.path.display(),
            samples = self.sample_count,
            epochs = self.epoch_offsets.len(),
            triggers = triggers.len(),
            bytes = end,
            "finalized recording"
        );
        Ok(())
    }
}
