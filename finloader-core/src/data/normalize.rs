//! Turn provider CSV bodies into canonical bars.

use super::canonicalize::canonicalize;
use super::provider::DataError;
use crate::domain::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Layout of a provider's CSV export.
#[derive(Debug, Clone, Copy)]
pub struct CsvLayout {
    pub delimiter: u8,
    /// Header of the timestamp column (`timestamp`, `datetime`, ...).
    pub time_column: &'static str,
}

/// Parse a CSV body into bars sorted ascending with unique timestamps.
///
/// `open`, `high`, `low`, `close` are required; a missing `volume` column
/// yields zero volume.
pub fn bars_from_csv(body: &str, layout: CsvLayout) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(layout.delimiter)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DataError::ResponseFormatChanged(format!("unreadable CSV header: {e}")))?
        .clone();
    let index_of = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("CSV has no '{name}' column")))
    };

    let time_idx = index_of(layout.time_column)?;
    let open_idx = index_of("open")?;
    let high_idx = index_of("high")?;
    let low_idx = index_of("low")?;
    let close_idx = index_of("close")?;
    let volume_idx = index_of("volume").ok();

    let mut bars = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| DataError::ResponseFormatChanged(format!("CSV row {row}: {e}")))?;
        let field = |idx: usize| record.get(idx).unwrap_or_default();
        let number = |idx: usize, name: &str| -> Result<f64, DataError> {
            field(idx).parse::<f64>().map_err(|_| {
                DataError::ResponseFormatChanged(format!(
                    "CSV row {row}: invalid {name} '{}'",
                    field(idx)
                ))
            })
        };

        let time = parse_utc(field(time_idx)).ok_or_else(|| {
            DataError::ResponseFormatChanged(format!(
                "CSV row {row}: invalid timestamp '{}'",
                field(time_idx)
            ))
        })?;
        let volume = match volume_idx {
            Some(idx) if !field(idx).is_empty() => number(idx, "volume")?,
            _ => 0.0,
        };

        bars.push(Bar {
            time,
            open: number(open_idx, "open")?,
            high: number(high_idx, "high")?,
            low: number(low_idx, "low")?,
            close: number(close_idx, "close")?,
            volume,
        });
    }

    Ok(canonicalize(bars))
}

/// Parse a provider timestamp that is already in UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and plain
/// dates (midnight).
pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const COMMA: CsvLayout = CsvLayout {
        delimiter: b',',
        time_column: "timestamp",
    };

    #[test]
    fn parses_timestamps() {
        let midnight = Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2024, 2, 15, 14, 30, 0).unwrap();

        assert_eq!(parse_utc("2024-02-15"), Some(midnight));
        assert_eq!(parse_utc("2024-02-15 14:30:00"), Some(afternoon));
        assert_eq!(parse_utc("2024-02-15T14:30:00"), Some(afternoon));
        assert_eq!(parse_utc("2024-02-15T15:30:00+01:00"), Some(afternoon));
        assert_eq!(parse_utc("15/02/2024"), None);
    }

    #[test]
    fn sorts_and_defaults_volume() {
        let body = "timestamp,open,high,low,close\n\
                    2024-02-16,1.0760,1.0790,1.0740,1.0775\n\
                    2024-02-15,1.0730,1.0770,1.0720,1.0760\n";
        let bars = bars_from_csv(body, COMMA).unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars[0].time < bars[1].time);
        assert_eq!(bars[0].close, 1.0760);
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn reads_volume_when_present() {
        let body = "datetime;open;high;low;close;volume\n2024-02-15;1;2;0.5;1.5;42\n";
        let layout = CsvLayout {
            delimiter: b';',
            time_column: "datetime",
        };
        let bars = bars_from_csv(body, layout).unwrap();
        assert_eq!(bars[0].volume, 42.0);
    }

    #[test]
    fn header_only_is_empty() {
        assert!(bars_from_csv("timestamp,open,high,low,close\n", COMMA)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_column_is_a_format_change() {
        let err = bars_from_csv("timestamp,open,high,close\n2024-02-15,1,1,1\n", COMMA).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
        assert!(err.to_string().contains("'low'"), "{err}");
    }

    #[test]
    fn bad_number_is_a_format_change() {
        let err = bars_from_csv("timestamp,open,high,low,close\n2024-02-15,1,x,1,1\n", COMMA)
            .unwrap_err();
        assert!(err.to_string().contains("invalid high"), "{err}");
    }
}
