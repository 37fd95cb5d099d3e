//! Snowflake result type mappings.
//!
//! The SQL API returns every cell as a string (or JSON null) in its `jsonv2`
//! encoding. Cells are decoded in two phases:
//! 1. `categorize_type` classifies the column's SQL API type
//! 2. `decode_cell` converts the raw string for that category
//!
//! Values that don't parse as their declared type are passed through as
//! strings rather than failing the whole result.

use crate::models::ColumnMetadata;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use serde_json::Value as JsonValue;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// Logical category for Snowflake column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Decimal,
    Float,
    Boolean,
    Date,
    Time,
    TimestampNtz,
    TimestampLtz,
    TimestampTz,
    SemiStructured,
    Text,
}

/// Classify a SQL API `rowType.type` value.
pub fn categorize_type(column: &ColumnMetadata) -> TypeCategory {
    match column.type_name.to_ascii_lowercase().as_str() {
        "fixed" => match column.scale {
            Some(scale) if scale > 0 => TypeCategory::Decimal,
            _ => TypeCategory::Integer,
        },
        "real" | "float" | "double" => TypeCategory::Float,
        "boolean" => TypeCategory::Boolean,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "timestamp_ntz" | "timestamp" => TypeCategory::TimestampNtz,
        "timestamp_ltz" => TypeCategory::TimestampLtz,
        "timestamp_tz" => TypeCategory::TimestampTz,
        "variant" | "object" | "array" => TypeCategory::SemiStructured,
        _ => TypeCategory::Text,
    }
}

/// Decode one raw cell.
pub fn decode_cell(raw: Option<&str>, column: &ColumnMetadata) -> JsonValue {
    let Some(raw) = raw else {
        return JsonValue::Null;
    };

    let decoded = match categorize_type(column) {
        TypeCategory::Integer => raw.parse::<i64>().ok().map(JsonValue::from),
        TypeCategory::Decimal | TypeCategory::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number),
        TypeCategory::Boolean => match raw {
            "true" | "1" => Some(JsonValue::Bool(true)),
            "false" | "0" => Some(JsonValue::Bool(false)),
            _ => None,
        },
        TypeCategory::Date => decode_date(raw).map(JsonValue::String),
        TypeCategory::Time => decode_time(raw).map(JsonValue::String),
        TypeCategory::TimestampNtz => decode_timestamp_ntz(raw).map(JsonValue::String),
        TypeCategory::TimestampLtz => decode_timestamp_ltz(raw).map(JsonValue::String),
        TypeCategory::TimestampTz => decode_timestamp_tz(raw).map(JsonValue::String),
        TypeCategory::SemiStructured => serde_json::from_str(raw).ok(),
        TypeCategory::Text => None,
    };

    decoded.unwrap_or_else(|| JsonValue::String(raw.to_string()))
}

/// Split `"<secs>.<fraction>"` into whole seconds and nanoseconds, flooring
/// negative values so that nanoseconds are always non-negative.
fn parse_epoch(raw: &str) -> Option<(i64, u32)> {
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    let secs: i64 = int.parse().ok()?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(9).collect();
        format!("{:0<9}", digits).parse().ok()?
    };

    match (negative, nanos) {
        (false, _) => Some((secs, nanos)),
        (true, 0) => Some((-secs, 0)),
        (true, n) => Some((-secs - 1, 1_000_000_000 - n)),
    }
}

fn decode_date(raw: &str) -> Option<String> {
    let days: i32 = raw.parse().ok()?;
    let date = NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_CE_DAYS.checked_add(days)?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn decode_time(raw: &str) -> Option<String> {
    let (secs, nanos) = parse_epoch(raw)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)?;
    Some(time.format("%H:%M:%S%.f").to_string())
}

fn decode_timestamp_ntz(raw: &str) -> Option<String> {
    let (secs, nanos) = parse_epoch(raw)?;
    let ts = DateTime::from_timestamp(secs, nanos)?.naive_utc();
    Some(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn decode_timestamp_ltz(raw: &str) -> Option<String> {
    let (secs, nanos) = parse_epoch(raw)?;
    let ts = DateTime::from_timestamp(secs, nanos)?;
    Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// `"<epoch secs> <offset minutes + 1440>"`
fn decode_timestamp_tz(raw: &str) -> Option<String> {
    let (epoch, offset) = raw.split_once(' ')?;
    let (secs, nanos) = parse_epoch(epoch)?;
    let offset_minutes: i32 = offset.trim().parse::<i32>().ok()? - 1440;
    let offset = FixedOffset::east_opt(offset_minutes * 60)?;
    let ts = DateTime::from_timestamp(secs, nanos)?.with_timezone(&offset);
    Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn col(type_name: &str) -> ColumnMetadata {
        ColumnMetadata::new("C", type_name, true)
    }

    #[test]
    fn test_categorize_fixed_by_scale() {
        assert_eq!(categorize_type(&col("fixed").with_scale(0)), TypeCategory::Integer);
        assert_eq!(categorize_type(&col("FIXED").with_scale(2)), TypeCategory::Decimal);
        assert_eq!(categorize_type(&col("fixed")), TypeCategory::Integer);
        assert_eq!(categorize_type(&col("text")), TypeCategory::Text);
        assert_eq!(categorize_type(&col("binary")), TypeCategory::Text);
    }

    #[test]
    fn test_decode_null() {
        assert_eq!(decode_cell(None, &col("text")), JsonValue::Null);
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(decode_cell(Some("42"), &col("fixed").with_scale(0)), json!(42));
        assert_eq!(decode_cell(Some("12.50"), &col("fixed").with_scale(2)), json!(12.5));
        assert_eq!(decode_cell(Some("1.5e3"), &col("real")), json!(1500.0));
        // out of i64 range stays textual
        assert_eq!(
            decode_cell(Some("99999999999999999999"), &col("fixed").with_scale(0)),
            json!("99999999999999999999")
        );
        assert_eq!(decode_cell(Some("NaN"), &col("real")), json!("NaN"));
    }

    #[test]
    fn test_decode_boolean() {
        assert_eq!(decode_cell(Some("true"), &col("boolean")), json!(true));
        assert_eq!(decode_cell(Some("0"), &col("boolean")), json!(false));
    }

    #[test]
    fn test_decode_date_and_time() {
        assert_eq!(decode_cell(Some("0"), &col("date")), json!("1970-01-01"));
        assert_eq!(decode_cell(Some("19723"), &col("date")), json!("2024-01-01"));
        assert_eq!(decode_cell(Some("-1"), &col("date")), json!("1969-12-31"));
        assert_eq!(decode_cell(Some("3723.500000000"), &col("time")), json!("01:02:03.500"));
    }

    #[test]
    fn test_decode_timestamps() {
        assert_eq!(
            decode_cell(Some("1704067200.000000000"), &col("timestamp_ntz")),
            json!("2024-01-01T00:00:00")
        );
        assert_eq!(
            decode_cell(Some("1704067200.123000000"), &col("timestamp_ltz")),
            json!("2024-01-01T00:00:00.123Z")
        );
        assert_eq!(
            decode_cell(Some("1704067200.000000000 1560"), &col("timestamp_tz")),
            json!("2024-01-01T02:00:00+02:00")
        );
        assert_eq!(
            decode_cell(Some("-0.5"), &col("timestamp_ntz")),
            json!("1969-12-31T23:59:59.500")
        );
    }

    #[test]
    fn test_decode_semi_structured() {
        assert_eq!(
            decode_cell(Some("{\n  \"a\": [1, 2]\n}"), &col("variant")),
            json!({"a": [1, 2]})
        );
        assert_eq!(decode_cell(Some("not json"), &col("object")), json!("not json"));
    }

    #[test]
    fn test_decode_garbage_falls_back_to_string() {
        assert_eq!(decode_cell(Some("abc"), &col("date")), json!("abc"));
        assert_eq!(decode_cell(Some("x y"), &col("timestamp_tz")), json!("x y"));
    }
}
