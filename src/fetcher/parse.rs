use chrono::DateTime;
use serde_json::Value;

use super::FetchError;
use crate::models::{PriceBar, PriceSeries};

/// Turn raw candle rows into a series
///
/// Any bad row fails the whole response; partial series are never returned.
pub fn parse_rows(symbol: &str, rows: Vec<Vec<Value>>) -> Result<PriceSeries, FetchError> {
    let bars = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            parse_row(row).map_err(|detail| FetchError::MalformedRow { index, detail })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PriceSeries::new(symbol, bars)?)
}

fn parse_row(row: &[Value]) -> Result<PriceBar, String> {
    let [ts, open, high, low, close, volume] = row else {
        return Err(format!("expected 6 fields, got {}", row.len()));
    };

    let ts = ts.as_str().ok_or_else(|| format!("timestamp is not a string: {}", ts))?;
    let timestamp =
        DateTime::parse_from_rfc3339(ts).map_err(|e| format!("bad timestamp {:?}: {}", ts, e))?;

    Ok(PriceBar {
        timestamp,
        open: as_float(open, "open")?,
        high: as_float(high, "high")?,
        low: as_float(low, "low")?,
        close: as_float(close, "close")?,
        volume: as_int(volume)?,
    })
}

fn as_float(value: &Value, field: &str) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{} is not numeric: {}", field, value))
}

/// Integer coercion truncates fractional volumes
fn as_int(value: &Value) -> Result<i64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    };

    parsed.ok_or_else(|| format!("volume is not numeric: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Vec<Value>> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_numeric_rows() {
        let series = parse_rows(
            "SBIN",
            rows(json!([
                ["2025-01-01T00:00:00+05:30", 800.0, 810.5, 795.0, 805.25, 1200345],
                ["2025-01-02T00:00:00+05:30", 805, 812, 801, 811, 998877]
            ])),
        )
        .unwrap();

        assert_eq!(series.symbol(), "SBIN");
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].close, 805.25);
        assert_eq!(series.bars()[1].open, 805.0);
        assert_eq!(series.bars()[1].volume, 998877);
    }

    #[test]
    fn test_string_values_coerced() {
        let series = parse_rows(
            "SBIN",
            rows(json!([["2025-01-01T00:00:00+05:30", "800", "810.5", "795", "805.25", "1200.9"]])),
        )
        .unwrap();

        assert_eq!(series.bars()[0].high, 810.5);
        assert_eq!(series.bars()[0].volume, 1200);
    }

    #[test]
    fn test_fractional_volume_truncated() {
        let series = parse_rows(
            "SBIN",
            rows(json!([["2025-01-01T00:00:00+05:30", 1, 1, 1, 1, 42.7]])),
        )
        .unwrap();
        assert_eq!(series.bars()[0].volume, 42);
    }

    #[test]
    fn test_one_bad_row_fails_everything() {
        let err = parse_rows(
            "SBIN",
            rows(json!([
                ["2025-01-01T00:00:00+05:30", 1, 1, 1, 1, 1],
                ["2025-01-02T00:00:00+05:30", 1, "n/a", 1, 1, 1]
            ])),
        )
        .unwrap_err();

        assert!(matches!(err, FetchError::MalformedRow { index: 1, .. }));
    }

    #[test]
    fn test_wrong_arity() {
        let err = parse_rows("SBIN", rows(json!([["2025-01-01T00:00:00+05:30", 1, 1, 1, 1]]))).unwrap_err();
        assert!(matches!(err, FetchError::MalformedRow { index: 0, ref detail } if detail.contains("6 fields")));
    }

    #[test]
    fn test_bad_timestamp() {
        let err = parse_rows("SBIN", rows(json!([["yesterday", 1, 1, 1, 1, 1]]))).unwrap_err();
        assert!(matches!(err, FetchError::MalformedRow { index: 0, .. }));
    }

    #[test]
    fn test_out_of_order_rows_rejected() {
        let err = parse_rows(
            "SBIN",
            rows(json!([
                ["2025-01-02T00:00:00+05:30", 1, 1, 1, 1, 1],
                ["2025-01-01T00:00:00+05:30", 1, 1, 1, 1, 1]
            ])),
        )
        .unwrap_err();

        assert!(matches!(err, FetchError::InvalidSeries(_)));
    }
}
