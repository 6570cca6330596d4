//! Decoding of raw JSON cells into typed [`Value`]s.
//!
//! Cells arrive loosely typed: numbers may be JSON numbers or strings, nested
//! values may be JSON lists or their text form, and nulls may be JSON `null`
//! or the literal string `NULL`. Decoding is driven entirely by the declared
//! [`DataType`] and never touches shared state, so one [`RowDecoder`] per
//! schema can be reused for every page of a query.

use crate::error::{QuarryLinkError, Result};
use crate::models::SchemaField;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use super::data_type::DataType;
use super::interval::Interval;
use super::value::{Row, Value};

const NULL_LITERAL: &str = "NULL";

fn mismatch(ty: &DataType, cell: &JsonValue, reason: &str) -> QuarryLinkError {
    QuarryLinkError::TypeError(format!(
        "cannot decode {} as {}: {}",
        truncate_cell(cell),
        ty,
        reason
    ))
}

fn truncate_cell(cell: &JsonValue) -> String {
    let text = cell.to_string();
    if text.len() > 64 {
        let cut = (0..=64).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text
    }
}

/// Decode one cell against its declared type.
pub fn decode_value(ty: &DataType, cell: &JsonValue) -> Result<Value> {
    let inner = ty.non_null();
    if matches!(inner, DataType::Null) {
        return Ok(Value::Null);
    }

    let is_null_literal = cell.as_str() == Some(NULL_LITERAL);
    if cell.is_null() || is_null_literal {
        if ty.is_nullable() {
            return Ok(Value::Null);
        }
        // A non-nullable text column may legitimately hold the text "NULL".
        if is_null_literal && matches!(inner, DataType::String) {
            return Ok(Value::String(NULL_LITERAL.to_string()));
        }
        return Err(mismatch(ty, cell, "null in a non-nullable column"));
    }

    decode_non_null(inner, cell)
}

fn decode_non_null(ty: &DataType, cell: &JsonValue) -> Result<Value> {
    match ty {
        DataType::Null => Ok(Value::Null),
        DataType::Boolean => decode_bool(ty, cell).map(Value::Boolean),
        DataType::Int8 => decode_signed(ty, cell).map(Value::Int8),
        DataType::Int16 => decode_signed(ty, cell).map(Value::Int16),
        DataType::Int32 => decode_signed(ty, cell).map(Value::Int32),
        DataType::Int64 => decode_signed(ty, cell).map(Value::Int64),
        DataType::UInt8 => decode_unsigned(ty, cell).map(Value::UInt8),
        DataType::UInt16 => decode_unsigned(ty, cell).map(Value::UInt16),
        DataType::UInt32 => decode_unsigned(ty, cell).map(Value::UInt32),
        DataType::UInt64 => decode_unsigned(ty, cell).map(Value::UInt64),
        DataType::Float32 => decode_float(ty, cell).map(|v| Value::Float32(v as f32)),
        DataType::Float64 => decode_float(ty, cell).map(Value::Float64),
        DataType::Decimal { .. } => {
            let text = scalar_text(ty, cell)?;
            BigDecimal::from_str(text.trim())
                .map(Value::Decimal)
                .map_err(|e| mismatch(ty, cell, &e.to_string()))
        },
        DataType::String => Ok(Value::String(match cell {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })),
        DataType::Date => {
            let text = scalar_text(ty, cell)?;
            parse_date(text.trim())
                .map(Value::Date)
                .ok_or_else(|| mismatch(ty, cell, "no accepted date format matched"))
        },
        DataType::Timestamp => {
            let text = scalar_text(ty, cell)?;
            parse_timestamp(text.trim())
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(ty, cell, "no accepted timestamp format matched"))
        },
        DataType::Interval => {
            let text = scalar_text(ty, cell)?;
            Interval::from_str(&text).map(Value::Interval)
        },
        DataType::Variant => Ok(Value::Variant(match cell {
            JsonValue::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone()))
            },
            other => other.clone(),
        })),
        DataType::Binary => {
            let text = scalar_text(ty, cell)?;
            Ok(decode_hex_or_text(&text, false))
        },
        DataType::Geometry | DataType::Geography => {
            let text = scalar_text(ty, cell)?;
            Ok(decode_hex_or_text(&text, true))
        },
        DataType::Bitmap => Ok(Value::String(scalar_text(ty, cell)?)),
        DataType::EmptyArray => Ok(Value::Array(Vec::new())),
        DataType::EmptyMap => Ok(Value::Map(Vec::new())),
        DataType::Array(element) => {
            let items = nested(ty, cell)?;
            let items = match items {
                JsonValue::Array(items) => items,
                other => return Err(mismatch(ty, &other, "expected a list")),
            };
            items
                .iter()
                .map(|item| decode_element(element, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        },
        DataType::Map(key_ty, value_ty) => decode_map(ty, key_ty, value_ty, cell),
        DataType::Tuple(members) => {
            let items = match nested(ty, cell)? {
                JsonValue::Array(items) => items,
                other => return Err(mismatch(ty, &other, "expected a list")),
            };
            if items.len() != members.len() {
                return Err(mismatch(
                    ty,
                    cell,
                    &format!("expected {} members, got {}", members.len(), items.len()),
                ));
            }
            members
                .iter()
                .zip(items.iter())
                .map(|(member, item)| decode_value(member, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Tuple)
        },
        DataType::Nullable(inner) => decode_value(inner, cell),
        DataType::Unknown(_) => Ok(match cell {
            JsonValue::String(s) => Value::String(s.clone()),
            other => Value::Variant(other.clone()),
        }),
    }
}

/// Null elements inside a collection are kept even when the element type is
/// declared non-nullable.
fn decode_element(element: &DataType, item: &JsonValue) -> Result<Value> {
    if item.is_null() {
        return Ok(Value::Null);
    }
    decode_value(element, item)
}

fn decode_map(
    ty: &DataType,
    key_ty: &DataType,
    value_ty: &DataType,
    cell: &JsonValue,
) -> Result<Value> {
    match nested(ty, cell)? {
        JsonValue::Object(entries) => entries
            .iter()
            .map(|(k, v)| {
                Ok((
                    decode_value(key_ty, &JsonValue::String(k.clone()))?,
                    decode_element(value_ty, v)?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Map),
        JsonValue::Array(pairs) => pairs
            .iter()
            .map(|pair| match pair {
                JsonValue::Array(kv) if kv.len() == 2 => {
                    Ok((decode_value(key_ty, &kv[0])?, decode_element(value_ty, &kv[1])?))
                },
                other => Err(mismatch(ty, other, "expected a [key, value] pair")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Map),
        other => Err(mismatch(ty, &other, "expected an object or pair list")),
    }
}

/// Nested values may arrive as JSON or as their JSON text.
fn nested(ty: &DataType, cell: &JsonValue) -> Result<JsonValue> {
    match cell {
        JsonValue::String(text) => serde_json::from_str(text)
            .map_err(|e| mismatch(ty, cell, &format!("invalid nested value: {}", e))),
        other => Ok(other.clone()),
    }
}

fn scalar_text(ty: &DataType, cell: &JsonValue) -> Result<String> {
    match cell {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(mismatch(ty, other, "expected a scalar")),
    }
}

fn decode_bool(ty: &DataType, cell: &JsonValue) -> Result<bool> {
    match cell {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(mismatch(ty, cell, "expected 0 or 1")),
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(mismatch(ty, cell, "expected true or false")),
        },
        _ => Err(mismatch(ty, cell, "expected a boolean")),
    }
}

fn decode_signed<T>(ty: &DataType, cell: &JsonValue) -> Result<T>
where
    T: TryFrom<i64> + FromStr,
{
    match cell {
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| mismatch(ty, cell, "out of range")),
        JsonValue::String(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| mismatch(ty, cell, "not an integer in range")),
        _ => Err(mismatch(ty, cell, "expected an integer")),
    }
}

fn decode_unsigned<T>(ty: &DataType, cell: &JsonValue) -> Result<T>
where
    T: TryFrom<u64> + FromStr,
{
    match cell {
        JsonValue::Number(n) => n
            .as_u64()
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| mismatch(ty, cell, "out of range")),
        JsonValue::String(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| mismatch(ty, cell, "not an unsigned integer in range")),
        _ => Err(mismatch(ty, cell, "expected an unsigned integer")),
    }
}

fn decode_float(ty: &DataType, cell: &JsonValue) -> Result<f64> {
    match cell {
        JsonValue::Number(n) => n.as_f64().ok_or_else(|| mismatch(ty, cell, "not a float")),
        JsonValue::String(s) => {
            let text = s.trim();
            match text {
                "NaN" | "nan" | "-nan" => Ok(f64::NAN),
                "Infinity" | "+Infinity" | "inf" | "+inf" => Ok(f64::INFINITY),
                "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
                _ => text.parse::<f64>().map_err(|_| mismatch(ty, cell, "not a float")),
            }
        },
        _ => Err(mismatch(ty, cell, "expected a float")),
    }
}

/// Try the accepted textual encodings in order; the first match wins:
/// epoch seconds, ISO8601, `yyyy-MM-dd HH:mm:ss.SSS`, `yyyy-MM-dd HH:mm:ss`,
/// `yyyy-MM-dd`.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = text.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    parse_timestamp(text).map(|ts| ts.date_naive())
}

/// Hex text decodes to bytes; anything else stays text. Geometry payloads
/// additionally must start with a WKB byte-order marker (`00` or `01`).
fn decode_hex_or_text(text: &str, require_wkb_marker: bool) -> Value {
    if looks_like_hex(text, require_wkb_marker) {
        if let Ok(bytes) = hex::decode(text) {
            return Value::Bytes(bytes);
        }
    }
    Value::String(text.to_string())
}

fn looks_like_hex(text: &str, require_wkb_marker: bool) -> bool {
    if text.is_empty() || text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    !require_wkb_marker || text.starts_with("00") || text.starts_with("01")
}

/// Decoder for the rows of one result schema.
///
/// Column types are parsed once; decoding a row is then a pure function of
/// the cells, which makes the decoder safe to share between pages.
#[derive(Debug, Clone, Default)]
pub struct RowDecoder {
    names: Vec<String>,
    types: Vec<DataType>,
}

impl RowDecoder {
    pub fn new(schema: &[SchemaField]) -> Result<Self> {
        let types = schema
            .iter()
            .map(SchemaField::parsed_type)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: schema.iter().map(|f| f.name.clone()).collect(),
            types,
        })
    }

    pub fn types(&self) -> &[DataType] {
        &self.types
    }

    pub fn decode_row(&self, cells: &[JsonValue]) -> Result<Row> {
        if cells.len() != self.types.len() {
            return Err(QuarryLinkError::TypeError(format!(
                "row has {} cells but schema has {} columns",
                cells.len(),
                self.types.len()
            )));
        }
        self.types
            .iter()
            .zip(cells)
            .enumerate()
            .map(|(i, (ty, cell))| {
                decode_value(ty, cell).map_err(|e| match e {
                    QuarryLinkError::TypeError(msg) => {
                        QuarryLinkError::TypeError(format!("column '{}': {}", self.names[i], msg))
                    },
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Row::new)
    }

    pub fn decode_page(&self, data: &[Vec<JsonValue>]) -> Result<Vec<Row>> {
        data.iter().map(|cells| self.decode_row(cells)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn ty(raw: &str) -> DataType {
        raw.parse().unwrap()
    }

    fn decode(raw: &str, cell: JsonValue) -> Result<Value> {
        decode_value(&ty(raw), &cell)
    }

    #[test]
    fn test_integers_accept_numbers_and_strings() {
        assert_eq!(decode("Int8", json!(-5)).unwrap(), Value::Int8(-5));
        assert_eq!(decode("Int32", json!("42")).unwrap(), Value::Int32(42));
        assert_eq!(decode("UInt16", json!("65535")).unwrap(), Value::UInt16(65535));
        assert!(decode("Int8", json!(300)).is_err());
        assert!(decode("UInt32", json!("-1")).is_err());
    }

    #[test]
    fn test_uint64_beyond_signed_range() {
        assert_eq!(
            decode("UInt64", json!("18446744073709551615")).unwrap(),
            Value::UInt64(u64::MAX)
        );
        assert_eq!(decode("UInt64", json!(u64::MAX)).unwrap(), Value::UInt64(u64::MAX));
    }

    #[test]
    fn test_float_special_literals() {
        match decode("Float64", json!("NaN")).unwrap() {
            Value::Float64(v) => assert!(v.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(decode("Float64", json!("nan")).unwrap(), Value::Float64(v) if v.is_nan()));
        assert_eq!(decode("Float64", json!("Infinity")).unwrap(), Value::Float64(f64::INFINITY));
        assert_eq!(decode("Float32", json!("inf")).unwrap(), Value::Float32(f32::INFINITY));
        assert_eq!(
            decode("Float64", json!("-Infinity")).unwrap(),
            Value::Float64(f64::NEG_INFINITY)
        );
        assert_eq!(decode("Float32", json!("1.5")).unwrap(), Value::Float32(1.5));
    }

    #[test]
    fn test_null_cells() {
        assert_eq!(decode("Nullable(Int32)", JsonValue::Null).unwrap(), Value::Null);
        assert_eq!(decode("Nullable(Int32)", json!("NULL")).unwrap(), Value::Null);
        assert_eq!(decode("NULL", json!("anything")).unwrap(), Value::Null);
        assert!(matches!(
            decode("Int32", JsonValue::Null),
            Err(QuarryLinkError::TypeError(_))
        ));
        assert!(matches!(
            decode("Date", json!("NULL")),
            Err(QuarryLinkError::TypeError(_))
        ));
        assert_eq!(
            decode("String", json!("NULL")).unwrap(),
            Value::String("NULL".into())
        );
    }

    #[test]
    fn test_decimal_keeps_precision() {
        let value = decode("Decimal(38, 10)", json!("12345678901234567890.0123456789")).unwrap();
        assert_eq!(
            value,
            Value::Decimal(BigDecimal::from_str("12345678901234567890.0123456789").unwrap())
        );
    }

    #[test]
    fn test_timestamp_formats_in_order() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(6, 7, 8, 123)
            .unwrap()
            .and_utc();
        for text in [
            "2024-03-05T06:07:08.123Z",
            "2024-03-05T06:07:08.123+00:00",
            "2024-03-05 06:07:08.123",
            "2024-03-05 06:07:08.123000",
        ] {
            assert_eq!(
                decode("Timestamp", json!(text)).unwrap(),
                Value::Timestamp(expected),
                "{}",
                text
            );
        }

        match decode("Timestamp", json!("2024-03-05 06:07:08")).unwrap() {
            Value::Timestamp(ts) => assert_eq!((ts.hour(), ts.nanosecond()), (6, 0)),
            other => panic!("unexpected {:?}", other),
        }
        match decode("Timestamp", json!(1_700_000_000)).unwrap() {
            Value::Timestamp(ts) => assert_eq!(ts.timestamp(), 1_700_000_000),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode("Timestamp", json!("yesterday")).is_err());
    }

    #[test]
    fn test_date_round_trip() {
        let value = decode("Date", json!("2023-12-31")).unwrap();
        match &value {
            Value::Date(d) => assert_eq!((d.year(), d.month(), d.day()), (2023, 12, 31)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(value.to_string(), "2023-12-31");
        assert!(decode("Date", json!("31/12/2023")).is_err());
    }

    #[test]
    fn test_interval_round_trip() {
        let value = decode("Interval", json!("1 day 02:00:00.5")).unwrap();
        let text = value.to_string();
        assert_eq!(decode("Interval", json!(text)).unwrap(), value);
        assert_eq!(
            decode("Interval", json!(1_500_000)).unwrap(),
            Value::Interval(Interval::from_micros(1_500_000))
        );
    }

    #[test]
    fn test_arrays_decode_recursively_and_keep_nulls() {
        assert_eq!(
            decode("Array(Nullable(Int32))", json!("[1,null,3]")).unwrap(),
            Value::Array(vec![Value::Int32(1), Value::Null, Value::Int32(3)])
        );
        assert_eq!(
            decode("Array(Array(String))", json!([["a"], []])).unwrap(),
            Value::Array(vec![
                Value::Array(vec![Value::String("a".into())]),
                Value::Array(vec![])
            ])
        );
        assert_eq!(
            decode("Array(Int64)", json!([7, null])).unwrap(),
            Value::Array(vec![Value::Int64(7), Value::Null])
        );
        assert!(decode("Array(Int32)", json!("not a list")).is_err());
    }

    #[test]
    fn test_map_and_tuple() {
        assert_eq!(
            decode("Map(String, Int32)", json!("{\"a\":1}")).unwrap(),
            Value::Map(vec![(Value::String("a".into()), Value::Int32(1))])
        );
        assert_eq!(
            decode("Map(Int32, String)", json!([[1, "x"]])).unwrap(),
            Value::Map(vec![(Value::Int32(1), Value::String("x".into()))])
        );
        assert_eq!(
            decode("Tuple(Int32, String)", json!("[1,\"b\"]")).unwrap(),
            Value::Tuple(vec![Value::Int32(1), Value::String("b".into())])
        );
        assert!(decode("Tuple(Int32, String)", json!([1])).is_err());
    }

    #[test]
    fn test_variant_parses_json_text() {
        assert_eq!(
            decode("Variant", json!("{\"k\":[1,2]}")).unwrap(),
            Value::Variant(json!({"k": [1, 2]}))
        );
        assert_eq!(
            decode("Variant", json!("plain")).unwrap(),
            Value::Variant(json!("plain"))
        );
    }

    #[test]
    fn test_binary_and_geometry() {
        assert_eq!(
            decode("Binary", json!("DEADBEEF")).unwrap(),
            Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(decode("Binary", json!("abc")).unwrap(), Value::String("abc".into()));
        assert_eq!(
            decode("Geometry", json!("0101000000")).unwrap(),
            Value::Bytes(vec![0x01, 0x01, 0x00, 0x00, 0x00])
        );
        assert_eq!(
            decode("Geometry", json!("POINT(1 2)")).unwrap(),
            Value::String("POINT(1 2)".into())
        );
        // Hex-shaped but not starting with a byte-order marker
        assert_eq!(decode("Geometry", json!("ABCD")).unwrap(), Value::String("ABCD".into()));
    }

    #[test]
    fn test_row_decoder() {
        let schema = vec![
            SchemaField::new("id", "UInt64"),
            SchemaField::new("name", "Nullable(String)"),
        ];
        let decoder = RowDecoder::new(&schema).unwrap();
        let rows = decoder
            .decode_page(&[vec![json!("1"), json!("a")], vec![json!("2"), JsonValue::Null]])
            .unwrap();
        assert_eq!(rows[0].values(), &[Value::UInt64(1), Value::String("a".into())]);
        assert_eq!(rows[1][1], Value::Null);

        let err = decoder.decode_row(&[JsonValue::Null, json!("x")]).unwrap_err();
        assert!(err.to_string().contains("column 'id'"));
        assert!(decoder.decode_row(&[json!("1")]).is_err());
    }
}
