use chrono::{Duration, NaiveDate, NaiveDateTime};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// 超出该范围的OLE日期视为无效（约±27000年）
const MAX_OLE_DAYS: f64 = 1.0e7;

/// 非本地化的整数解析（避免受系统locale影响）
pub fn atoi_nonlocalized(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    s.strip_prefix('+').unwrap_or(s).parse().ok()
}

/// 非本地化的浮点数解析
pub fn atof_nonlocalized(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    s.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Splits bracketed header text into `(section, lines)` pairs.
///
/// Section names are returned without brackets. Blank lines and lines
/// starting with `;` are dropped, remaining lines are trimmed. Text before
/// the first section is ignored.
pub fn parse_sections(text: &str) -> Vec<(String, Vec<String>)> {
    let mut sections: Vec<(String, Vec<String>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.push((name, Vec::new()));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line.to_string());
        }
    }

    sections
}

/// 替换空白和非ASCII字符，保证头部字段可以按空白分割
pub fn to_header_token(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_graphic() { c } else { '_' })
        .collect()
}

fn ole_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)
}

/// Converts an OLE automation date (days since 1899-12-30) plus a
/// sub-second fraction into a timestamp.
///
/// ```rust
/// use eep::utils::ole_to_datetime;
///
/// let t = ole_to_datetime(2.5, 0.0).unwrap();
/// assert_eq!(t.to_string(), "1900-01-01 12:00:00");
/// ```
pub fn ole_to_datetime(days: f64, fraction: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() || !fraction.is_finite() || days.abs() > MAX_OLE_DAYS {
        return None;
    }
    if !(0.0..1.0).contains(&fraction) {
        return None;
    }

    let seconds = (days * SECONDS_PER_DAY).round() as i64;
    let nanos = (fraction * 1.0e9).round() as i64;

    ole_epoch()?
        .checked_add_signed(Duration::seconds(seconds))?
        .checked_add_signed(Duration::nanoseconds(nanos))
}

/// Inverse of [`ole_to_datetime`]: whole seconds go into the day count,
/// the sub-second part into the fraction.
pub fn datetime_to_ole(time: &NaiveDateTime) -> Option<(f64, f64)> {
    let delta = time.signed_duration_since(ole_epoch()?);
    let seconds = delta.num_seconds();
    let nanos = (delta - Duration::seconds(seconds)).num_nanoseconds()?;

    // 负的时间差时纳秒部分也为负，向下借位
    let (seconds, nanos) = if nanos < 0 {
        (seconds - 1, nanos + 1_000_000_000)
    } else {
        (seconds, nanos)
    };

    Some((seconds as f64 / SECONDS_PER_DAY, nanos as f64 / 1.0e9))
}
