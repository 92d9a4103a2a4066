//! RAW3 residual compression for CNT sample data.
//!
//! Every epoch is a bit stream (most significant bit first) holding one
//! block per channel, in the order given by the `chan` chunk. A block starts
//! with a 4-bit method code followed by the residual widths:
//!
//! | code | method | width fields        | first sample |
//! |------|--------|---------------------|--------------|
//! | 0    | COPY   | `nbits:4 nexc:4`    | (all 16 bit) |
//! | 1-3  | TIME, TIME2, CHAN | `nbits:4 nexc:4` | 16 bit |
//! | 8    | COPY   | `nbits:6 nexc:6`    | (all 32 bit) |
//! | 9-11 | TIME, TIME2, CHAN | `nbits:6 nexc:6` | 32 bit |
//!
//! A width field of zero stands for the full field range (16 or 64).
//! Residuals are stored in `nbits`; the most negative `nbits` value is an
//! escape, after which the residual follows in `nexc` bits. Each epoch is
//! padded to a byte boundary.

use crate::error::{EepError, Result};

const METHOD_COPY: u64 = 0;
const METHOD_TIME: u64 = 1;
const METHOD_TIME2: u64 = 2;
const METHOD_CHAN: u64 = 3;
const WIDE_FLAG: u64 = 8;

/// Prediction used to form residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Samples stored verbatim.
    Copy,
    /// First difference in time.
    Time,
    /// Second difference in time.
    Time2,
    /// First difference minus the previous channel's first difference.
    Chan,
}

impl Method {
    fn code(self) -> u64 {
        match self {
            Method::Copy => METHOD_COPY,
            Method::Time => METHOD_TIME,
            Method::Time2 => METHOD_TIME2,
            Method::Chan => METHOD_CHAN,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            METHOD_COPY => Some(Method::Copy),
            METHOD_TIME => Some(Method::Time),
            METHOD_TIME2 => Some(Method::Time2),
            METHOD_CHAN => Some(Method::Chan),
            _ => None,
        }
    }
}

/// MSB-first bit packer.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the low `nbits` bits of `value` (1..=64).
    pub fn write_bits(&mut self, value: u64, nbits: u32) {
        debug_assert!((1..=64).contains(&nbits));
        let mut remaining = nbits;

        while remaining > 0 {
            let space = 8 - self.used;
            let take = space.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u64 << take) - 1)) as u8;

            self.current |= chunk << (space - take);
            self.used += take;
            remaining -= take;

            if self.used == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    pub fn write_signed(&mut self, value: i64, nbits: u32) {
        self.write_bits(value as u64 & mask(nbits), nbits);
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align(&mut self) {
        if self.used > 0 {
            self.bytes.push(self.current);
            self.current = 0;
            self.used = 0;
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.used as usize
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }
}

/// MSB-first bit reader over a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    pub fn read_bits(&mut self, nbits: u32) -> Result<u64> {
        if self.pos + nbits as usize > self.data.len() * 8 {
            return Err(EepError::Corrupt(format!(
                "bit stream exhausted at bit {} reading {} bits",
                self.pos, nbits
            )));
        }

        let mut value = 0u64;
        let mut remaining = nbits;

        while remaining > 0 {
            let byte = self.data[self.pos / 8];
            let offset = (self.pos % 8) as u32;
            let available = 8 - offset;
            let take = available.min(remaining);
            let bits = (byte >> (available - take)) & (((1u16 << take) - 1) as u8);

            value = (value << take) | bits as u64;
            self.pos += take as usize;
            remaining -= take;
        }

        Ok(value)
    }

    /// Reads `nbits` bits and sign-extends them.
    pub fn read_signed(&mut self, nbits: u32) -> Result<i64> {
        let raw = self.read_bits(nbits)?;
        if nbits == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - nbits;
        Ok(((raw << shift) as i64) >> shift)
    }
}

fn mask(nbits: u32) -> u64 {
    if nbits >= 64 {
        u64::MAX
    } else {
        (1u64 << nbits) - 1
    }
}

/// Number of bits needed to hold `value` as a two's complement integer.
fn signed_width(value: i64) -> u32 {
    let magnitude = if value < 0 { !value } else { value };
    65 - magnitude.leading_zeros()
}

fn escape_value(nbits: u32) -> i64 {
    if nbits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (nbits - 1))
    }
}

fn fits_without_escape(value: i64, nbits: u32) -> bool {
    signed_width(value) <= nbits && value != escape_value(nbits)
}

fn residuals(method: Method, x: &[i32], prev: Option<&[i32]>) -> Option<Vec<i64>> {
    let mut out = Vec::with_capacity(x.len().saturating_sub(1));

    for i in 1..x.len() {
        let d = x[i] as i64 - x[i - 1] as i64;
        let r = match method {
            Method::Copy => return None,
            Method::Time => d,
            Method::Time2 if i == 1 => d,
            Method::Time2 => d - (x[i - 1] as i64 - x[i - 2] as i64),
            Method::Chan => {
                let y = prev?;
                d - (y[i] as i64 - y[i - 1] as i64)
            }
        };
        out.push(r);
    }

    Some(out)
}

/// Picks `(nbits, nexcbits, payload_bits)` for a residual set.
fn best_widths(res: &[i64]) -> (u32, u32, usize) {
    let nexc = res.iter().map(|&r| signed_width(r)).max().unwrap_or(1).max(1);

    let mut best = (nexc, nexc, usize::MAX);
    for nbits in 1..=nexc {
        let escapes = res.iter().filter(|&&r| !fits_without_escape(r, nbits)).count();
        let cost = res.len() * nbits as usize + escapes * nexc as usize;
        if cost < best.2 {
            best = (nbits, nexc, cost);
        }
    }

    best
}

fn width_field(width: u32, wide: bool) -> u64 {
    let full = if wide { 64 } else { 16 };
    if width == full {
        0
    } else {
        width as u64
    }
}

/// Encodes one channel of one epoch using 32-bit methods.
///
/// `prev` is the previously encoded channel of the same epoch, which
/// enables the CHAN method.
pub fn encode_channel(out: &mut BitWriter, x: &[i32], prev: Option<&[i32]>) {
    let mut chosen: Option<(Method, u32, u32, Vec<i64>)> = None;
    let mut chosen_cost = 16 + 32 * x.len();

    for method in [Method::Time, Method::Time2, Method::Chan] {
        let Some(res) = residuals(method, x, prev) else {
            continue;
        };
        let (nbits, nexc, payload) = best_widths(&res);
        let cost = 16 + 32 + payload;
        if cost < chosen_cost {
            chosen_cost = cost;
            chosen = Some((method, nbits, nexc, res));
        }
    }

    match chosen {
        None => {
            out.write_bits(Method::Copy.code() | WIDE_FLAG, 4);
            out.write_bits(0, 6);
            out.write_bits(0, 6);
            for &v in x {
                out.write_signed(v as i64, 32);
            }
        }
        Some((method, nbits, nexc, res)) => {
            out.write_bits(method.code() | WIDE_FLAG, 4);
            out.write_bits(width_field(nbits, true), 6);
            out.write_bits(width_field(nexc, true), 6);
            if let Some(&first) = x.first() {
                out.write_signed(first as i64, 32);
            }
            let escape = escape_value(nbits);
            for r in res {
                if fits_without_escape(r, nbits) {
                    out.write_signed(r, nbits);
                } else {
                    out.write_signed(escape, nbits);
                    out.write_signed(r, nexc);
                }
            }
        }
    }
}

fn read_width(input: &mut BitReader<'_>, field_bits: u32, full: u32) -> Result<u32> {
    let w = input.read_bits(field_bits)? as u32;
    Ok(if w == 0 { full } else { w })
}

fn to_sample(value: i64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| EepError::Corrupt(format!("decoded sample {} out of range", value)))
}

/// Decodes one channel block of `length` samples.
pub fn decode_channel(
    input: &mut BitReader<'_>,
    length: usize,
    prev: Option<&[i32]>,
) -> Result<Vec<i32>> {
    let code = input.read_bits(4)?;
    let wide = code & WIDE_FLAG != 0;
    let method = Method::from_code(code & !WIDE_FLAG)
        .ok_or_else(|| EepError::Corrupt(format!("unknown compression method {}", code)))?;

    let (field_bits, full, sample_bits) = if wide { (6, 64, 32) } else { (4, 16, 16) };
    let nbits = read_width(input, field_bits, full)?;
    let nexc = read_width(input, field_bits, full)?;

    let mut x = Vec::with_capacity(length);

    if method == Method::Copy {
        for _ in 0..length {
            x.push(to_sample(input.read_signed(sample_bits)?)?);
        }
        return Ok(x);
    }

    if length == 0 {
        return Ok(x);
    }

    let y = match method {
        Method::Chan => Some(prev.ok_or_else(|| {
            EepError::Corrupt("CHAN method used on the first channel".to_string())
        })?),
        _ => None,
    };

    x.push(to_sample(input.read_signed(sample_bits)?)?);
    let escape = escape_value(nbits);

    for i in 1..length {
        let mut r = input.read_signed(nbits)?;
        if r == escape {
            r = input.read_signed(nexc)?;
        }

        let last = x[i - 1] as i64;
        let value = match (method, y) {
            (Method::Time, _) => last.checked_add(r),
            (Method::Time2, _) if i == 1 => last.checked_add(r),
            (Method::Time2, _) => (2 * last - x[i - 2] as i64).checked_add(r),
            (Method::Chan, Some(y)) => {
                let dy = y[i] as i64 - y[i - 1] as i64;
                last.checked_add(r).and_then(|v| v.checked_add(dy))
            }
            _ => None,
        }
        .ok_or_else(|| EepError::Corrupt("residual overflow".to_string()))?;

        x.push(to_sample(value)?);
    }

    Ok(x)
}

/// Compresses one epoch. `channels` is given in compression order and all
/// channels must hold the same number of samples.
pub fn encode_epoch(channels: &[Vec<i32>]) -> Vec<u8> {
    let mut out = BitWriter::new();
    let mut prev: Option<&[i32]> = None;

    for samples in channels {
        encode_channel(&mut out, samples, prev);
        prev = Some(samples);
    }

    out.into_bytes()
}

/// Decompresses one epoch of `length` samples.
///
/// `order` maps stream position to channel index; the result is indexed by
/// channel.
pub fn decode_epoch(data: &[u8], order: &[u16], length: usize) -> Result<Vec<Vec<i32>>> {
    // 每个样本至少1位，超出即为损坏
    if length.saturating_mul(order.len()) > data.len().saturating_mul(8) {
        return Err(EepError::Corrupt(format!(
            "{} bytes cannot hold {} samples of {} channels",
            data.len(),
            length,
            order.len()
        )));
    }

    let mut input = BitReader::new(data);
    let mut channels: Vec<Vec<i32>> = vec![Vec::new(); order.len()];
    let mut prev: Option<usize> = None;

    for &channel in order {
        let channel = channel as usize;
        if channel >= channels.len() {
            return Err(EepError::Corrupt(format!("channel {} not in order table", channel)));
        }
        let prev_samples = prev.map(|p| channels[p].as_slice());
        let samples = decode_channel(&mut input, length, prev_samples)?;
        channels[channel] = samples;
        prev = Some(channel);
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(channels: Vec<Vec<i32>>) {
        let length = channels[0].len();
        let order: Vec<u16> = (0..channels.len() as u16).collect();
        let bytes = encode_epoch(&channels);
        let decoded = decode_epoch(&bytes, &order, length).unwrap();
        assert_eq!(decoded, channels);
    }

    #[test]
    fn test_bit_writer_reader() {
        let mut w = BitWriter::new();
        w.write_bits(0b1011, 4);
        w.write_signed(-3, 6);
        w.write_bits(u64::MAX, 64);
        w.write_signed(i64::MIN, 64);
        w.write_bits(1, 1);
        assert_eq!(w.bit_len(), 4 + 6 + 64 + 64 + 1);

        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(4).unwrap(), 0b1011);
        assert_eq!(r.read_signed(6).unwrap(), -3);
        assert_eq!(r.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(r.read_signed(64).unwrap(), i64::MIN);
        assert_eq!(r.read_bits(1).unwrap(), 1);
        // 末尾的填充位之后没有数据
        assert!(r.read_bits(16).is_err());
    }

    #[test]
    fn test_signed_width() {
        assert_eq!(signed_width(0), 1);
        assert_eq!(signed_width(-1), 1);
        assert_eq!(signed_width(1), 2);
        assert_eq!(signed_width(-2), 2);
        assert_eq!(signed_width(127), 8);
        assert_eq!(signed_width(-128), 8);
        assert_eq!(signed_width(i64::MIN), 64);
    }

    #[test]
    fn test_constant_channel_is_tiny() {
        let channels = vec![vec![1234; 1024]];
        let bytes = encode_epoch(&channels);
        // 头部 + 首样本 + 1位残差
        assert!(bytes.len() < 140, "got {} bytes", bytes.len());
        round_trip(channels);
    }

    #[test]
    fn test_ramp_and_sine() {
        let ramp: Vec<i32> = (0..512).map(|i| i * 7 - 1000).collect();
        let sine: Vec<i32> = (0..512)
            .map(|i| (2000.0 * (i as f64 * 0.05).sin()) as i32)
            .collect();
        round_trip(vec![ramp, sine]);
    }

    #[test]
    fn test_correlated_channels() {
        let base: Vec<i32> = (0..256).map(|i| ((i * 37) % 101) * 50).collect();
        let shifted: Vec<i32> = base.iter().map(|v| v + 3).collect();
        round_trip(vec![base, shifted]);
    }

    #[test]
    fn test_extreme_values() {
        let wild: Vec<i32> = (0..64)
            .map(|i| if i % 2 == 0 { i32::MAX } else { i32::MIN })
            .collect();
        let spikes: Vec<i32> = (0..64).map(|i| if i == 30 { 1 << 30 } else { i }).collect();
        round_trip(vec![wild, spikes, vec![0; 64]]);
    }

    #[test]
    fn test_single_sample_epoch() {
        round_trip(vec![vec![-5], vec![7]]);
    }

    #[test]
    fn test_permuted_channel_order() {
        let a: Vec<i32> = (0..100).collect();
        let b: Vec<i32> = (0..100).map(|v| -v * 3).collect();

        // 按 [1, 0] 顺序压缩
        let bytes = encode_epoch(&[b.clone(), a.clone()]);
        let decoded = decode_epoch(&bytes, &[1, 0], 100).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn test_decode_narrow_time_block() {
        // 16位TIME方法：nbits=4, nexc=8, 首样本100, 残差 [1, -2, escape(60)]
        let mut w = BitWriter::new();
        w.write_bits(METHOD_TIME, 4);
        w.write_bits(4, 4);
        w.write_bits(8, 4);
        w.write_signed(100, 16);
        w.write_signed(1, 4);
        w.write_signed(-2, 4);
        w.write_signed(-8, 4);
        w.write_signed(60, 8);
        let bytes = w.into_bytes();

        let decoded = decode_epoch(&bytes, &[0], 4).unwrap();
        assert_eq!(decoded[0], vec![100, 101, 99, 159]);
    }

    #[test]
    fn test_decode_narrow_copy_block() {
        let mut w = BitWriter::new();
        w.write_bits(METHOD_COPY, 4);
        w.write_bits(0, 4);
        w.write_bits(0, 4);
        for v in [-32768i64, 0, 32767] {
            w.write_signed(v, 16);
        }
        let decoded = decode_epoch(&w.into_bytes(), &[0], 3).unwrap();
        assert_eq!(decoded[0], vec![-32768, 0, 32767]);
    }

    #[test]
    fn test_unknown_method_is_corrupt() {
        let mut w = BitWriter::new();
        w.write_bits(5, 4);
        w.write_bits(0, 12);
        let err = decode_epoch(&w.into_bytes(), &[0], 1).unwrap_err();
        assert!(matches!(err, EepError::Corrupt(_)));
    }

    #[test]
    fn test_chan_on_first_channel_is_corrupt() {
        let mut w = BitWriter::new();
        w.write_bits(METHOD_CHAN | WIDE_FLAG, 4);
        w.write_bits(2, 6);
        w.write_bits(2, 6);
        w.write_signed(0, 32);
        w.write_signed(0, 2);
        let err = decode_epoch(&w.into_bytes(), &[0], 2).unwrap_err();
        assert!(matches!(err, EepError::Corrupt(_)));
    }

    #[test]
    fn test_truncated_epoch_is_corrupt() {
        let channels = vec![(0..100).map(|i| i * i).collect::<Vec<i32>>()];
        let bytes = encode_epoch(&channels);
        let err = decode_epoch(&bytes[..bytes.len() / 2], &[0], 100).unwrap_err();
        assert!(matches!(err, EepError::Corrupt(_)));
    }

    #[test]
    fn test_impossible_length_is_corrupt() {
        // 8字节不可能容纳2^40个样本，不能预先分配
        let err = decode_epoch(&[0u8; 8], &[0], 1usize << 40).unwrap_err();
        assert!(matches!(err, EepError::Corrupt(_)));
    }
}
