use serde::{Deserialize, Serialize};

use crate::types::DataType;
use crate::error::Result;

/// A column in the result schema of a query
///
/// # Example (JSON representation)
///
/// ```json
/// {"name": "number", "type": "UInt64"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Column name
    pub name: String,

    /// Default value expression, if the column has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expr: Option<String>,

    /// Raw server type string, e.g. `Nullable(Int32)` or `Array(String)`
    #[serde(rename = "type", alias = "data_type")]
    pub data_type: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_expr: None,
            data_type: data_type.into(),
        }
    }

    /// Parse the raw type string of this column.
    pub fn parsed_type(&self) -> Result<DataType> {
        self.data_type.parse()
    }
}
