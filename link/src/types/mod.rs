//! Wire type decoding.
//!
//! Turns the loosely typed JSON cells of a result page into [`Value`]s
//! according to each column's declared [`DataType`].

mod data_type;
mod decode;
mod interval;
mod value;

pub use data_type::DataType;
pub use decode::{decode_value, RowDecoder};
pub use interval::Interval;
pub use value::{Row, Value};
