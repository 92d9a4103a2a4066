use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{EepError, Result};
use crate::raw3;
use crate::riff::{self, Chunk};
use crate::trigger;
use crate::types::{ChannelInfo, CntHeader, FileType, Trigger};
use crate::utils::{atof_nonlocalized, atoi_nonlocalized, ole_to_datetime, parse_sections};

/// CNT file reader for ANT/EEP continuous recordings
///
/// `CntReader` parses the RIFF (or RF64) container, the ASCII `eeph`
/// header, the `evt ` trigger table and the RAW3 epoch index. Sample data
/// is decompressed lazily, one epoch at a time.
///
/// # Examples
///
/// ```rust
/// use eep::CntReader;
///
/// # // Generate test file (hidden from docs)
/// # eep::doctest_utils::create_simple_test_file("reader_basic.cnt")?;
/// #
/// let mut reader = CntReader::open("reader_basic.cnt")?;
///
/// println!("Channels: {}", reader.channel_count());
/// println!("Duration: {:.1} seconds", reader.header().duration());
///
/// // First ten rows, interleaved by channel
/// let rows = reader.read_samples(0, 10)?;
/// assert_eq!(rows.len(), 10 * reader.channel_count());
///
/// for trigger in reader.triggers() {
///     println!("{} at sample {}", trigger.code, trigger.sample);
/// }
///
/// # // Cleanup (hidden from docs)
/// # std::fs::remove_file("reader_basic.cnt").ok();
/// # Ok::<(), eep::EepError>(())
/// ```
pub struct CntReader {
    file: BufReader<File>,
    path: PathBuf,
    header: CntHeader,
    /// 压缩流中的通道顺序
    chan_order: Vec<u16>,
    /// 每个epoch在data块中的字节偏移
    epoch_offsets: Vec<u64>,
    data_offset: u64,
    data_size: u64,
    triggers: Vec<Trigger>,
    /// 最近解码的epoch
    cache: Option<(u64, Vec<Vec<i32>>)>,
}

/// 原始块定位信息，解析头部前收集
#[derive(Default)]
struct Layout {
    eeph: Option<Chunk>,
    evt: Option<Chunk>,
    chan: Option<Chunk>,
    ep: Option<Chunk>,
    data: Option<Chunk>,
}

impl CntReader {
    /// Opens a CNT file for reading
    ///
    /// The embedded `evt ` table provides the triggers. Use
    /// [`open_with_external_triggers`](Self::open_with_external_triggers)
    /// to prefer a `.trg` file next to the recording.
    ///
    /// # Errors
    ///
    /// * `EepError::FileNotFound` - File doesn't exist or can't be opened
    /// * `EepError::UnsupportedFileType` - Not a RIFF/RF64 `CNT ` file
    /// * `EepError::InvalidHeader` - Missing or unreadable `eeph` header
    /// * `EepError::InvalidFormat` - Broken chunk layout or epoch table
    ///
    /// ```rust
    /// use eep::{CntReader, EepError};
    ///
    /// match CntReader::open("does_not_exist.cnt") {
    ///     Err(EepError::FileNotFound(msg)) => println!("File not found: {}", msg),
    ///     other => panic!("unexpected: {:?}", other.err()),
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| EepError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let file_len = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let file_type = riff::read_file_header(&mut reader)?;

        let layout = Self::locate_chunks(&mut reader, file_type, file_len)?;

        let eeph = layout
            .eeph
            .ok_or_else(|| EepError::InvalidHeader("missing eeph chunk".to_string()))?;
        let header_text = riff::read_payload(&mut reader, &eeph)?;
        let mut header = Self::parse_eeph(&String::from_utf8_lossy(&header_text), file_type)?;

        let missing = |name: &str| EepError::InvalidFormat(format!("raw3 data without {} chunk", name));
        let chan = layout.chan.ok_or_else(|| missing("chan"))?;
        let ep = layout.ep.ok_or_else(|| missing("ep"))?;
        let data = layout.data.ok_or_else(|| missing("data"))?;

        let chan_order = Self::parse_chan(&riff::read_payload(&mut reader, &chan)?, header.channel_count())?;
        let (epoch_length, epoch_offsets) =
            Self::parse_ep(&riff::read_payload(&mut reader, &ep)?, file_type, header.sample_count, data.size)?;
        header.epoch_length = epoch_length;

        let triggers = match &layout.evt {
            Some(evt) => trigger::decode_table(&riff::read_payload(&mut reader, evt)?, file_type)?,
            None => Vec::new(),
        };

        info!(
            path = %path.display(),
            channels = header.channel_count(),
            samples = header.sample_count,
            triggers = triggers.len(),
            "opened recording"
        );

        Ok(CntReader {
            file: reader,
            path: path.to_path_buf(),
            header,
            chan_order,
            epoch_offsets,
            data_offset: data.offset,
            data_size: data.size,
            triggers,
            cache: None,
        })
    }

    /// Opens a CNT file, taking triggers from `<stem>.trg` when present
    ///
    /// The external file replaces the embedded trigger table entirely.
    /// Without a `.trg` file this behaves like [`open`](Self::open).
    ///
    /// ```rust
    /// use eep::{CntReader, Trigger};
    /// use eep::trigger::write_trg_file;
    /// use std::path::Path;
    ///
    /// # eep::doctest_utils::create_simple_test_file("reader_ext.cnt")?;
    /// write_trg_file(Path::new("reader_ext.trg"), &[Trigger::new(128, "99")], 256.0)?;
    ///
    /// let reader = CntReader::open_with_external_triggers("reader_ext.cnt")?;
    /// assert_eq!(reader.triggers(), &[Trigger::new(128, "99")]);
    ///
    /// # std::fs::remove_file("reader_ext.cnt").ok();
    /// # std::fs::remove_file("reader_ext.trg").ok();
    /// # Ok::<(), eep::EepError>(())
    /// ```
    pub fn open_with_external_triggers<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = Self::open(&path)?;

        let trg_path = trigger::external_trigger_path(path.as_ref());
        if trg_path.is_file() {
            reader.triggers = trigger::read_trg_file(&trg_path)?;
            info!(
                path = %trg_path.display(),
                triggers = reader.triggers.len(),
                "using external trigger file"
            );
        } else {
            debug!(path = %trg_path.display(), "no external trigger file");
        }

        Ok(reader)
    }

    /// Gets a reference to the parsed header
    pub fn header(&self) -> &CntHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel_count(&self) -> usize {
        self.header.channel_count()
    }

    pub fn sample_count(&self) -> u64 {
        self.header.sample_count
    }

    pub fn sample_rate(&self) -> f64 {
        self.header.sample_rate
    }

    /// Channel metadata by index.
    pub fn channel(&self, index: usize) -> Result<&ChannelInfo> {
        self.header
            .channels
            .get(index)
            .ok_or(EepError::InvalidChannelIndex(index))
    }

    /// Triggers in file order.
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Reads physical sample values for `start..end`
    ///
    /// The result is interleaved: row `s` occupies
    /// `[(s - start) * channels .. (s - start + 1) * channels]`, in channel
    /// order. Values are raw integers multiplied by each channel's scale.
    ///
    /// # Errors
    ///
    /// * `EepError::InvalidSampleRange` - `start > end` or `end` past the last sample
    /// * `EepError::Corrupt` - Compressed data could not be decoded
    ///
    /// ```rust
    /// use eep::CntReader;
    ///
    /// # eep::doctest_utils::create_multi_channel_test_file("reader_rows.cnt")?;
    /// let mut reader = CntReader::open("reader_rows.cnt")?;
    /// let channels = reader.channel_count();
    ///
    /// let rows = reader.read_samples(100, 110)?;
    /// for (i, row) in rows.chunks(channels).enumerate() {
    ///     println!("sample {}: {:?}", 100 + i, row);
    /// }
    ///
    /// // 越界读取返回错误
    /// assert!(reader.read_samples(0, reader.sample_count() + 1).is_err());
    ///
    /// # std::fs::remove_file("reader_rows.cnt").ok();
    /// # Ok::<(), eep::EepError>(())
    /// ```
    pub fn read_samples(&mut self, start: u64, end: u64) -> Result<Vec<f32>> {
        let raw = self.read_raw_samples(start, end)?;
        let channels = &self.header.channels;

        Ok(raw
            .chunks(channels.len())
            .flat_map(|row| row.iter().zip(channels).map(|(&v, ch)| ch.to_physical(v)))
            .collect())
    }

    /// Reads the stored integer values for `start..end`, interleaved like
    /// [`read_samples`](Self::read_samples).
    pub fn read_raw_samples(&mut self, start: u64, end: u64) -> Result<Vec<i32>> {
        let count = self.header.sample_count;
        if start > end || end > count {
            return Err(EepError::InvalidSampleRange { start, end, count });
        }

        let channels = self.channel_count();
        let epoch_length = self.header.epoch_length;
        let mut out = Vec::with_capacity((end - start) as usize * channels);

        let mut sample = start;
        while sample < end {
            let epoch = sample / epoch_length;
            let epoch_start = epoch * epoch_length;
            let epoch_end = epoch_start.saturating_add(epoch_length).min(end);

            let data = self.load_epoch(epoch)?;
            for s in sample..epoch_end {
                let idx = (s - epoch_start) as usize;
                out.extend(data.iter().map(|channel| channel[idx]));
            }
            sample = epoch_end;
        }

        Ok(out)
    }

    /// 解码指定epoch（带单项缓存）
    fn load_epoch(&mut self, epoch: u64) -> Result<&Vec<Vec<i32>>> {
        let cached = matches!(&self.cache, Some((index, _)) if *index == epoch);

        if !cached {
            let index = epoch as usize;
            let start = self.epoch_offsets[index];
            let end = self
                .epoch_offsets
                .get(index + 1)
                .copied()
                .unwrap_or(self.data_size);

            let length = (self.header.sample_count - epoch * self.header.epoch_length)
                .min(self.header.epoch_length) as usize;

            let mut buf = vec![0u8; (end - start) as usize];
            self.file.seek(SeekFrom::Start(self.data_offset + start))?;
            self.file.read_exact(&mut buf)?;

            let decoded = raw3::decode_epoch(&buf, &self.chan_order, length)?;
            debug!(epoch, bytes = buf.len(), length, "decoded epoch");
            self.cache = Some((epoch, decoded));
        }

        match &self.cache {
            Some((_, data)) => Ok(data),
            None => Err(EepError::Corrupt(format!("epoch {} not loaded", epoch))),
        }
    }

    fn locate_chunks<R: Read + Seek>(reader: &mut R, file_type: FileType, file_len: u64) -> Result<Layout> {
        let mut layout = Layout::default();
        let top = riff::scan_chunks(reader, file_type, riff::first_chunk_offset(file_type), file_len)?;

        for chunk in top {
            let id = chunk.id;
            match &id {
                b"eeph" => layout.eeph = Some(chunk),
                b"evt " => layout.evt = Some(chunk),
                b"LIST" => {
                    let form = riff::read_list_form(reader, &chunk)?;
                    if &form != b"raw3" {
                        debug!(form = %String::from_utf8_lossy(&form), "skipping LIST chunk");
                        continue;
                    }
                    let inner = riff::scan_chunks(reader, file_type, chunk.offset + 4, chunk.offset + chunk.size)?;
                    for sub in inner {
                        let id = sub.id;
                        match &id {
                            b"chan" => layout.chan = Some(sub),
                            b"ep  " => layout.ep = Some(sub),
                            b"data" => layout.data = Some(sub),
                            _ => debug!(id = %sub.id_str(), "skipping raw3 sub-chunk"),
                        }
                    }
                }
                _ => debug!(id = %chunk.id_str(), "skipping chunk"),
            }
        }

        Ok(layout)
    }

    /// 解析eeph ASCII头部
    fn parse_eeph(text: &str, file_type: FileType) -> Result<CntHeader> {
        let sections = parse_sections(text);
        let file_version = find_section(&sections, "File Version")
            .and_then(|lines| lines.first().cloned())
            .unwrap_or_else(|| crate::FILE_VERSION.to_string());

        let sample_rate = atof_nonlocalized(first_line(&sections, "Sampling Rate")?)
            .filter(|r| *r > 0.0)
            .ok_or_else(|| EepError::InvalidHeader("invalid sampling rate".to_string()))?;

        let sample_count = atoi_nonlocalized(first_line(&sections, "Samples")?)
            .ok_or_else(|| EepError::InvalidHeader("invalid sample count".to_string()))?;

        let channel_count = atoi_nonlocalized(first_line(&sections, "Channels")?)
            .filter(|c| *c >= 1 && *c <= crate::MAX_CHANNELS as u64)
            .ok_or_else(|| EepError::InvalidHeader("invalid channel count".to_string()))?
            as usize;

        let channel_lines = find_section(&sections, "Basic Channel Data")
            .ok_or_else(|| EepError::InvalidHeader("missing [Basic Channel Data]".to_string()))?;
        if channel_lines.len() != channel_count {
            return Err(EepError::InvalidFormat(format!(
                "header declares {} channels but describes {}",
                channel_count,
                channel_lines.len()
            )));
        }
        let channels = channel_lines
            .iter()
            .map(|line| Self::parse_channel_line(line))
            .collect::<Result<Vec<_>>>()?;

        let start_time = match find_section(&sections, "Start Time").and_then(|lines| lines.first()) {
            Some(line) => {
                let mut fields = line.split_whitespace();
                let days = fields.next().and_then(atof_nonlocalized);
                let fraction = fields.next().and_then(atof_nonlocalized).unwrap_or(0.0);
                let parsed = days.and_then(|d| ole_to_datetime(d, fraction));
                if parsed.is_none() {
                    warn!(line = %line, "ignoring unreadable start time");
                }
                parsed
            }
            None => None,
        };

        Ok(CntHeader {
            file_type,
            file_version,
            sample_rate,
            sample_count,
            channels,
            epoch_length: 0, // 由ep块设置
            start_time,
        })
    }

    /// `label iscale rscale unit [reference]`
    fn parse_channel_line(line: &str) -> Result<ChannelInfo> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(EepError::InvalidFormat(format!("bad channel line {:?}", line)));
        }

        let scale = |s: &str| {
            atof_nonlocalized(s)
                .ok_or_else(|| EepError::InvalidFormat(format!("bad scale {:?} in {:?}", s, line)))
        };

        Ok(ChannelInfo {
            label: fields[0].to_string(),
            iscale: scale(fields[1])?,
            rscale: scale(fields[2])?,
            unit: fields[3].to_string(),
            reference: fields.get(4..).map(|r| r.join(" ")).unwrap_or_default(),
        })
    }

    /// 解析通道压缩顺序，必须是通道索引的一个排列
    fn parse_chan(payload: &[u8], channel_count: usize) -> Result<Vec<u16>> {
        if payload.len() != channel_count * 2 {
            return Err(EepError::InvalidFormat(format!(
                "chan chunk holds {} bytes for {} channels",
                payload.len(),
                channel_count
            )));
        }

        let order: Vec<u16> = payload
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();

        let mut seen = vec![false; channel_count];
        for &c in &order {
            match seen.get_mut(c as usize) {
                Some(flag) if !*flag => *flag = true,
                _ => {
                    return Err(EepError::InvalidFormat(format!(
                        "chan chunk is not a permutation (entry {})",
                        c
                    )))
                }
            }
        }

        Ok(order)
    }

    /// 解析epoch表：epoch长度 + 每个epoch的偏移
    fn parse_ep(
        payload: &[u8],
        file_type: FileType,
        sample_count: u64,
        data_size: u64,
    ) -> Result<(u64, Vec<u64>)> {
        let width = file_type.word_size();
        if payload.len() < width || payload.len() % width != 0 {
            return Err(EepError::InvalidFormat("malformed ep chunk".to_string()));
        }

        let words = payload
            .chunks_exact(width)
            .map(|w| riff::decode_word(w, file_type))
            .collect::<Result<Vec<u64>>>()?;
        let epoch_length = words[0];
        let offsets = words[1..].to_vec();

        if epoch_length == 0 {
            return Err(EepError::InvalidFormat("epoch length is zero".to_string()));
        }

        // 每个样本至少占1位
        if sample_count > data_size.saturating_mul(8) {
            return Err(EepError::InvalidFormat(format!(
                "{} samples cannot fit in {} bytes of data",
                sample_count, data_size
            )));
        }

        let needed = sample_count.div_ceil(epoch_length);
        if (offsets.len() as u64) < needed {
            return Err(EepError::InvalidFormat(format!(
                "{} samples need {} epochs, table lists {}",
                sample_count,
                needed,
                offsets.len()
            )));
        }

        let ordered = offsets.windows(2).all(|w| w[0] <= w[1]);
        if !ordered || offsets.last().is_some_and(|&o| o > data_size) {
            return Err(EepError::InvalidFormat("epoch offsets out of order or range".to_string()));
        }

        Ok((epoch_length, offsets))
    }
}

fn find_section<'a>(sections: &'a [(String, Vec<String>)], name: &str) -> Option<&'a [String]> {
    sections
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, lines)| lines.as_slice())
}

fn first_line<'a>(sections: &'a [(String, Vec<String>)], name: &str) -> Result<&'a str> {
    find_section(sections, name)
        .and_then(|lines| lines.first())
        .map(|s| s.as_str())
        .ok_or_else(|| EepError::InvalidHeader(format!("missing [{}]", name)))
}

impl std::fmt::Debug for CntReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CntReader")
            .field("path", &self.path)
            .field("channels", &self.header.channel_count())
            .field("samples", &self.header.sample_count)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}
