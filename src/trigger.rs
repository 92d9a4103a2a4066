//! Trigger tables: the `evt ` chunk inside a CNT file and the external
//! `.trg` text file that may sit next to it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::riff::{decode_word, encode_word};
use crate::types::{FileType, Trigger};
use crate::utils::atof_nonlocalized;
use crate::TRIGGER_CODE_LENGTH;

/// Truncates a code to [`TRIGGER_CODE_LENGTH`] bytes on a character boundary
/// and NUL-pads it.
pub fn code_to_bytes(code: &str) -> [u8; TRIGGER_CODE_LENGTH] {
    let mut end = code.len().min(TRIGGER_CODE_LENGTH);
    while !code.is_char_boundary(end) {
        end -= 1;
    }

    let mut out = [0u8; TRIGGER_CODE_LENGTH];
    out[..end].copy_from_slice(&code.as_bytes()[..end]);
    out
}

fn code_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Decodes the payload of an `evt ` chunk.
pub fn decode_table(data: &[u8], file_type: FileType) -> Result<Vec<Trigger>> {
    let entry_len = file_type.word_size() + TRIGGER_CODE_LENGTH;
    let trailing = data.len() % entry_len;
    if trailing != 0 {
        warn!(trailing, "trigger table has a partial entry, ignoring it");
    }

    data.chunks_exact(entry_len)
        .map(|entry| {
            let (sample, code) = entry.split_at(file_type.word_size());
            Ok(Trigger {
                sample: decode_word(sample, file_type)?,
                code: code_from_bytes(code),
            })
        })
        .collect()
}

/// Encodes triggers into an `evt ` chunk payload.
pub fn encode_table(triggers: &[Trigger], file_type: FileType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(triggers.len() * (file_type.word_size() + TRIGGER_CODE_LENGTH));

    for trigger in triggers {
        if trigger.code.len() > TRIGGER_CODE_LENGTH {
            warn!(code = %trigger.code, "trigger code truncated to {} bytes", TRIGGER_CODE_LENGTH);
        }
        out.extend(encode_word(trigger.sample, file_type)?);
        out.extend_from_slice(&code_to_bytes(&trigger.code));
    }

    Ok(out)
}

/// Path of the external trigger file belonging to a recording:
/// the same stem with a `.trg` extension.
///
/// ```rust
/// use std::path::Path;
/// use eep::trigger::external_trigger_path;
///
/// assert_eq!(
///     external_trigger_path(Path::new("/data/subject01.cnt")),
///     Path::new("/data/subject01.trg")
/// );
/// ```
pub fn external_trigger_path(cnt_path: &Path) -> PathBuf {
    cnt_path.with_extension("trg")
}

/// Parses an external trigger file.
///
/// The first line holds the sampling period in seconds. Every following
/// line is `time offset code`; the sample is derived from `time / period`
/// and the legacy byte offset column is ignored. Codes may contain spaces.
pub fn parse_trg(text: &str) -> Result<Vec<Trigger>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (_, first) = lines
        .next()
        .ok_or_else(|| EepError::InvalidFormat("empty trigger file".to_string()))?;
    let period = atof_nonlocalized(first)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| EepError::InvalidFormat(format!("invalid sampling period {:?}", first)))?;

    let mut triggers = Vec::new();
    for (line_no, line) in lines {
        let mut fields = line.split_whitespace();
        let time = fields.next().and_then(atof_nonlocalized);
        let offset = fields.next();
        let code = fields.collect::<Vec<_>>().join(" ");

        let time = match (time, offset) {
            (Some(time), Some(_)) if !code.is_empty() && time >= 0.0 => time,
            _ => {
                return Err(EepError::InvalidFormat(format!(
                    "trigger file line {}: expected `time offset code`, got {:?}",
                    line_no, line
                )))
            }
        };

        triggers.push(Trigger {
            sample: (time / period).round() as u64,
            code,
        });
    }

    debug!(count = triggers.len(), period, "parsed external triggers");
    Ok(triggers)
}

/// Reads an external trigger file from disk.
pub fn read_trg_file(path: &Path) -> Result<Vec<Trigger>> {
    let text = fs::read_to_string(path)
        .map_err(|e| EepError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    parse_trg(&text)
}

/// Formats triggers in the external trigger file layout.
pub fn format_trg(triggers: &[Trigger], sample_rate: f64) -> Result<String> {
    if !(sample_rate > 0.0) {
        return Err(EepError::InvalidFormat(format!("invalid sample rate {}", sample_rate)));
    }

    let period = 1.0 / sample_rate;
    let mut out = format!("{:.10}\n", period);
    for trigger in triggers {
        let time = trigger.sample as f64 * period;
        out.push_str(&format!("{:>14.6} {:>10} {}\n", time, trigger.sample, trigger.code));
    }
    Ok(out)
}

/// Writes an external trigger file.
pub fn write_trg_file(path: &Path, triggers: &[Trigger], sample_rate: f64) -> Result<()> {
    fs::write(path, format_trg(triggers, sample_rate)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_to_bytes() {
        assert_eq!(&code_to_bytes("1"), b"1\0\0\0\0\0\0\0");
        assert_eq!(&code_to_bytes("TOOLONGCODE"), b"TOOLONGC");
        // 多字节字符不会被截断成一半
        assert_eq!(&code_to_bytes("abcdefgé"), b"abcdefg\0");
    }

    #[test]
    fn test_table_round_trip_both_widths() {
        let triggers = vec![Trigger::new(0, "1"), Trigger::new(70_000, "Rest"), Trigger::new(5, "255")];

        for file_type in [FileType::Riff, FileType::Rf64] {
            let bytes = encode_table(&triggers, file_type).unwrap();
            assert_eq!(bytes.len(), 3 * (file_type.word_size() + 8));
            assert_eq!(decode_table(&bytes, file_type).unwrap(), triggers);
        }
    }

    #[test]
    fn test_table_ignores_partial_entry() {
        let mut bytes = encode_table(&[Trigger::new(3, "A")], FileType::Riff).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        let decoded = decode_table(&bytes, FileType::Riff).unwrap();
        assert_eq!(decoded, vec![Trigger::new(3, "A")]);
    }

    #[test]
    fn test_riff_table_rejects_huge_sample() {
        let err = encode_table(&[Trigger::new(u64::MAX, "x")], FileType::Riff).unwrap_err();
        assert!(matches!(err, EepError::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_trg() {
        let text = "0.0019531250\n      0.500000        256 1\n      1.000000        512 Eyes closed\n\n";
        let triggers = parse_trg(text).unwrap();

        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0], Trigger::new(256, "1"));
        assert_eq!(triggers[1], Trigger::new(512, "Eyes closed"));
    }

    #[test]
    fn test_parse_trg_uses_time_not_offset() {
        let triggers = parse_trg("0.001\n0.250 999999 7\n").unwrap();
        assert_eq!(triggers, vec![Trigger::new(250, "7")]);
    }

    #[test]
    fn test_parse_trg_errors() {
        assert!(parse_trg("").is_err());
        assert!(parse_trg("0\n").is_err());
        assert!(parse_trg("0.001\n0.5 10\n").is_err());
        assert!(parse_trg("0.001\nabc 10 1\n").is_err());
    }

    #[test]
    fn test_format_then_parse() {
        let triggers = vec![Trigger::new(1, "a"), Trigger::new(1_000_003, "b c")];
        for rate in [512.0, 1000.0, 3.0] {
            let text = format_trg(&triggers, rate).unwrap();
            assert_eq!(parse_trg(&text).unwrap(), triggers, "rate {}", rate);
        }
        assert!(format_trg(&triggers, 0.0).is_err());
    }
}
