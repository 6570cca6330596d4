//! Declared column types, parsed from the server's raw type strings.

use crate::error::{QuarryLinkError, Result};
use std::fmt;
use std::str::FromStr;

/// Column type as declared in a result schema.
///
/// Parsed from strings such as `UInt64`, `Nullable(String)`,
/// `Array(Nullable(Int32))`, `Decimal(38, 10)`, `Map(String, Int64)` or
/// `Tuple(a Int32, b String)`. A trailing ` NULL` marker is treated the same
/// as a `Nullable(..)` wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal { precision: u8, scale: u8 },
    String,
    Date,
    Timestamp,
    Interval,
    Variant,
    Binary,
    Bitmap,
    Geometry,
    Geography,
    EmptyArray,
    EmptyMap,
    Array(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Tuple(Vec<DataType>),
    Nullable(Box<DataType>),
    /// A type name this client does not know; cells pass through untyped.
    Unknown(String),
}

impl DataType {
    /// Whether cells of this type may be null.
    pub fn is_nullable(&self) -> bool {
        matches!(self, DataType::Null | DataType::Nullable(_))
    }

    /// The type with any `Nullable` wrapper removed.
    pub fn non_null(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner.non_null(),
            other => other,
        }
    }

    pub fn nullable(self) -> DataType {
        if self.is_nullable() {
            self
        } else {
            DataType::Nullable(Box::new(self))
        }
    }

    fn from_name(name: &str) -> DataType {
        match name.to_ascii_lowercase().as_str() {
            "null" | "nothing" => DataType::Null,
            "boolean" | "bool" => DataType::Boolean,
            "int8" | "tinyint" => DataType::Int8,
            "int16" | "smallint" => DataType::Int16,
            "int32" | "int" | "integer" => DataType::Int32,
            "int64" | "bigint" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "uint64" => DataType::UInt64,
            "float32" | "float" => DataType::Float32,
            "float64" | "double" => DataType::Float64,
            "string" | "varchar" | "text" => DataType::String,
            "date" => DataType::Date,
            "timestamp" | "datetime" => DataType::Timestamp,
            "interval" => DataType::Interval,
            "variant" | "json" => DataType::Variant,
            "binary" | "varbinary" => DataType::Binary,
            "bitmap" => DataType::Bitmap,
            "geometry" => DataType::Geometry,
            "geography" => DataType::Geography,
            "emptyarray" => DataType::EmptyArray,
            "emptymap" => DataType::EmptyMap,
            _ => DataType::Unknown(name.to_string()),
        }
    }
}

fn type_error(raw: &str, reason: &str) -> QuarryLinkError {
    QuarryLinkError::TypeError(format!("invalid column type '{}': {}", raw, reason))
}

/// Split `a, b(c, d), e` on top-level commas.
fn split_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(args[start..i].trim());
                start = i + 1;
            },
            _ => {},
        }
    }
    let last = args[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Parse a tuple member, which may carry a field name: `a Int32`.
fn parse_tuple_member(member: &str) -> Result<DataType> {
    let parsed: DataType = member.parse()?;
    if !matches!(parsed, DataType::Unknown(_)) {
        return Ok(parsed);
    }
    match member.split_once(char::is_whitespace) {
        Some((_, ty)) => ty.trim().parse(),
        None => Ok(parsed),
    }
}

impl FromStr for DataType {
    type Err = QuarryLinkError;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(type_error(raw, "empty type"));
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(stripped) = upper.strip_suffix(" NOT NULL") {
            return trimmed[..stripped.len()].parse();
        }
        if upper != "NULL" {
            if let Some(stripped) = upper.strip_suffix(" NULL") {
                let inner: DataType = trimmed[..stripped.len()].parse()?;
                return Ok(inner.nullable());
            }
        }

        let Some(open) = trimmed.find('(') else {
            return Ok(DataType::from_name(trimmed));
        };
        if !trimmed.ends_with(')') {
            return Err(type_error(raw, "unbalanced parentheses"));
        }
        let name = trimmed[..open].trim();
        let args = split_args(&trimmed[open + 1..trimmed.len() - 1]);

        match name.to_ascii_lowercase().as_str() {
            "nullable" => match args.as_slice() {
                [inner] => Ok(inner.parse::<DataType>()?.nullable()),
                _ => Err(type_error(raw, "Nullable takes one argument")),
            },
            "array" => match args.as_slice() {
                [inner] => Ok(DataType::Array(Box::new(inner.parse()?))),
                _ => Err(type_error(raw, "Array takes one argument")),
            },
            "map" => match args.as_slice() {
                [key, value] => Ok(DataType::Map(
                    Box::new(key.parse()?),
                    Box::new(value.parse()?),
                )),
                _ => Err(type_error(raw, "Map takes two arguments")),
            },
            "tuple" => {
                let members = args
                    .iter()
                    .map(|member| parse_tuple_member(member))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataType::Tuple(members))
            },
            "decimal" => {
                let precision = args
                    .first()
                    .map(|p| p.parse::<u8>())
                    .transpose()
                    .map_err(|_| type_error(raw, "invalid precision"))?
                    .unwrap_or(38);
                let scale = args
                    .get(1)
                    .map(|s| s.parse::<u8>())
                    .transpose()
                    .map_err(|_| type_error(raw, "invalid scale"))?
                    .unwrap_or(0);
                Ok(DataType::Decimal { precision, scale })
            },
            // Length or precision arguments carry no decoding information.
            _ => match DataType::from_name(name) {
                DataType::Unknown(_) => Ok(DataType::Unknown(trimmed.to_string())),
                known => Ok(known),
            },
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "NULL"),
            DataType::Boolean => write!(f, "Boolean"),
            DataType::Int8 => write!(f, "Int8"),
            DataType::Int16 => write!(f, "Int16"),
            DataType::Int32 => write!(f, "Int32"),
            DataType::Int64 => write!(f, "Int64"),
            DataType::UInt8 => write!(f, "UInt8"),
            DataType::UInt16 => write!(f, "UInt16"),
            DataType::UInt32 => write!(f, "UInt32"),
            DataType::UInt64 => write!(f, "UInt64"),
            DataType::Float32 => write!(f, "Float32"),
            DataType::Float64 => write!(f, "Float64"),
            DataType::Decimal { precision, scale } => write!(f, "Decimal({}, {})", precision, scale),
            DataType::String => write!(f, "String"),
            DataType::Date => write!(f, "Date"),
            DataType::Timestamp => write!(f, "Timestamp"),
            DataType::Interval => write!(f, "Interval"),
            DataType::Variant => write!(f, "Variant"),
            DataType::Binary => write!(f, "Binary"),
            DataType::Bitmap => write!(f, "Bitmap"),
            DataType::Geometry => write!(f, "Geometry"),
            DataType::Geography => write!(f, "Geography"),
            DataType::EmptyArray => write!(f, "EmptyArray"),
            DataType::EmptyMap => write!(f, "EmptyMap"),
            DataType::Array(inner) => write!(f, "Array({})", inner),
            DataType::Map(key, value) => write!(f, "Map({}, {})", key, value),
            DataType::Tuple(members) => {
                write!(f, "Tuple(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", member)?;
                }
                write!(f, ")")
            },
            DataType::Nullable(inner) => write!(f, "Nullable({})", inner),
            DataType::Unknown(name) => write!(f, "{}", name),
        }
    }
}
