use chrono::NaiveDateTime;

/// Container flavour of a CNT file.
///
/// `Riff` uses 32-bit chunk sizes, epoch offsets and trigger samples,
/// `Rf64` widens all of them to 64 bits for recordings beyond 4 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Riff,
    Rf64,
}

impl FileType {
    /// 容器标识
    pub fn magic(&self) -> &'static [u8; 4] {
        match self {
            FileType::Riff => b"RIFF",
            FileType::Rf64 => b"RF64",
        }
    }

    /// 大小字段的字节数
    pub fn word_size(&self) -> usize {
        match self {
            FileType::Riff => 4,
            FileType::Rf64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub label: String,
    pub reference: String,
    pub unit: String,
    pub iscale: f64,
    pub rscale: f64,
}

impl ChannelInfo {
    /// Creates a channel with the default scaling used by [`crate::CntWriter`]
    ///
    /// ```rust
    /// use eep::ChannelInfo;
    ///
    /// let cz = ChannelInfo::new("Cz", "", "uV");
    /// assert_eq!(cz.scale(), 1.0 / 256.0);
    /// ```
    pub fn new(label: &str, reference: &str, unit: &str) -> Self {
        ChannelInfo {
            label: label.to_string(),
            reference: reference.to_string(),
            unit: unit.to_string(),
            iscale: 1.0,
            rscale: crate::DEFAULT_RSCALE,
        }
    }

    /// 计算物理值转换系数
    pub fn scale(&self) -> f64 {
        self.iscale * self.rscale
    }

    /// 将原始整数值转换为物理值
    pub fn to_physical(&self, raw: i32) -> f32 {
        (raw as f64 * self.scale()) as f32
    }

    /// 将物理值转换为原始整数值（饱和到i32范围）
    pub fn to_raw(&self, physical: f32) -> i32 {
        let raw = (physical as f64 / self.scale()).round();
        raw.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub sample: u64,          // 相对于记录开始的样本偏移
    pub code: String,         // 事件代码（磁盘上最多8字节）
}

impl Trigger {
    pub fn new(sample: u64, code: &str) -> Self {
        Trigger {
            sample,
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CntHeader {
    pub file_type: FileType,
    pub file_version: String,
    pub sample_rate: f64,
    pub sample_count: u64,
    pub channels: Vec<ChannelInfo>,
    pub epoch_length: u64,
    pub start_time: Option<NaiveDateTime>,
}

impl CntHeader {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Recording length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.sample_count as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}
