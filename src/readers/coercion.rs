use crate::models::schema::ColumnType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// A source field after coercion to its column's type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue<'a> {
    Null,
    Timestamp(NaiveDateTime),
    Narrow(f32),
    Wide(f64),
    Integer(i32),
    Text(&'a str),
}

/// Why a field could not be coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Required field was empty or a null token
    EmptyTimestamp,
    UnparseableTimestamp,
    /// Record too short to hold the required field
    MalformedRow,
    /// Optional numeric field failed to parse and was stored as null
    UnparseableNumber,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::EmptyTimestamp => "empty_timestamp",
            Rejection::UnparseableTimestamp => "unparseable_timestamp",
            Rejection::MalformedRow => "malformed_row",
            Rejection::UnparseableNumber => "unparseable_number",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Null tokens recognised in raw fields.
#[derive(Debug, Clone)]
pub struct NullTokens {
    tokens: Vec<String>,
}

impl NullTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.tokens.iter().any(|t| t == trimmed)
    }
}

impl Default for NullTokens {
    fn default() -> Self {
        Self::new(crate::utils::constants::DEFAULT_NULL_TOKENS)
    }
}

/// Coerce one raw field to the given type tag.
///
/// Null tokens become [`TypedValue::Null`] for every tag except the timestamp,
/// which is required and yields [`Rejection::EmptyTimestamp`] instead.
pub fn coerce<'a>(
    raw: &'a str,
    kind: ColumnType,
    nulls: &NullTokens,
) -> Result<TypedValue<'a>, Rejection> {
    let trimmed = raw.trim();

    if nulls.is_null(trimmed) {
        return match kind {
            ColumnType::Timestamp => Err(Rejection::EmptyTimestamp),
            _ => Ok(TypedValue::Null),
        };
    }

    match kind {
        ColumnType::Timestamp => parse_timestamp(trimmed)
            .map(TypedValue::Timestamp)
            .ok_or(Rejection::UnparseableTimestamp),
        ColumnType::NarrowFloat => parse_finite(trimmed)
            .map(|v| v as f32)
            .and_then(|v| {
                if v.is_finite() {
                    Ok(TypedValue::Narrow(v))
                } else {
                    Err(Rejection::UnparseableNumber)
                }
            }),
        ColumnType::WideFloat => parse_finite(trimmed).map(TypedValue::Wide),
        ColumnType::Integer => parse_integer(trimmed).map(TypedValue::Integer),
        ColumnType::Categorical => Ok(TypedValue::Text(trimmed)),
    }
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_finite(s: &str) -> Result<f64, Rejection> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Rejection::UnparseableNumber),
    }
}

fn parse_integer(s: &str) -> Result<i32, Rejection> {
    if let Ok(v) = s.parse::<i32>() {
        return Ok(v);
    }

    // Station ids sometimes arrive as "12.0"
    let v = parse_finite(s)?;
    if v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
        Ok(v as i32)
    } else {
        Err(Rejection::UnparseableNumber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_timestamp_layouts() {
        let nulls = NullTokens::default();
        for raw in [
            "2024-08-31 23:00",
            "2024-08-31 23:00:00",
            "2024/08/31 23:00",
            "2024-08-31T23:00:00",
        ] {
            match coerce(raw, ColumnType::Timestamp, &nulls) {
                Ok(TypedValue::Timestamp(ts)) => {
                    assert_eq!(ts.year(), 2024);
                    assert_eq!(ts.hour(), 23);
                }
                other => panic!("{} coerced to {:?}", raw, other),
            }
        }

        let midnight = parse_timestamp("2016/11/25").unwrap();
        assert_eq!(midnight.hour(), 0);
    }

    #[test]
    fn test_timestamp_rejections() {
        let nulls = NullTokens::default();
        assert_eq!(
            coerce("", ColumnType::Timestamp, &nulls),
            Err(Rejection::EmptyTimestamp)
        );
        assert_eq!(
            coerce("NA", ColumnType::Timestamp, &nulls),
            Err(Rejection::EmptyTimestamp)
        );
        assert_eq!(
            coerce("yesterday", ColumnType::Timestamp, &nulls),
            Err(Rejection::UnparseableTimestamp)
        );
        assert_eq!(
            coerce("2024-13-45 10:00", ColumnType::Timestamp, &nulls),
            Err(Rejection::UnparseableTimestamp)
        );
    }

    #[test]
    fn test_numeric_narrowing_within_tolerance() {
        let nulls = NullTokens::default();
        for raw in ["0.1", "12.345678", "487.9", "1999.999", "0"] {
            let original: f64 = raw.parse().unwrap();
            match coerce(raw, ColumnType::NarrowFloat, &nulls) {
                Ok(TypedValue::Narrow(v)) => {
                    let rel = (v as f64 - original).abs() / original.abs().max(1.0);
                    assert!(rel < 1e-3, "{} narrowed to {}", raw, v);
                }
                other => panic!("{} coerced to {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_null_tokens_keep_nullness() {
        let nulls = NullTokens::default();
        for raw in ["", "-", "NA", "N/A", "null", "NULL", "  "] {
            assert_eq!(coerce(raw, ColumnType::NarrowFloat, &nulls), Ok(TypedValue::Null));
            assert_eq!(coerce(raw, ColumnType::Categorical, &nulls), Ok(TypedValue::Null));
        }
    }

    #[test]
    fn test_unparseable_numbers() {
        let nulls = NullTokens::default();
        assert_eq!(
            coerce("abc", ColumnType::NarrowFloat, &nulls),
            Err(Rejection::UnparseableNumber)
        );
        assert_eq!(
            coerce("NaN", ColumnType::WideFloat, &nulls),
            Err(Rejection::UnparseableNumber)
        );
        assert_eq!(
            coerce("12.5", ColumnType::Integer, &nulls),
            Err(Rejection::UnparseableNumber)
        );
        assert_eq!(coerce("12.0", ColumnType::Integer, &nulls), Ok(TypedValue::Integer(12)));
    }

    #[test]
    fn test_categorical_is_trimmed() {
        let nulls = NullTokens::new(["ND"]);
        assert_eq!(
            coerce(" Good ", ColumnType::Categorical, &nulls),
            Ok(TypedValue::Text("Good"))
        );
        assert_eq!(coerce("ND", ColumnType::Categorical, &nulls), Ok(TypedValue::Null));
    }
}
