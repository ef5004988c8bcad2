//! Shape command implementation.

use super::{CommandError, Format};
use objcache_codec::from_json;
use objcache_core::{QueryDescriptor, Record, Selector};
use serde::Serialize;

/// Shape of one filter.
#[derive(Debug, Serialize)]
pub struct ShapeResult {
    /// Hex SHA-256 of the canonical query shape.
    pub shape: String,
    /// Number of bound fields.
    pub fields: usize,
    /// Canonical CBOR of the shape, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cbor: Option<String>,
}

/// Computes the shape of a JSON filter.
pub fn shape_of(filter: &str, with_cbor: bool) -> Result<ShapeResult, CommandError> {
    let json: serde_json::Value =
        serde_json::from_str(filter).map_err(|e| CommandError::Input(e.to_string()))?;
    let fields = Record::from_value(&from_json(&json)?)?;
    let count = fields.len();
    let query = QueryDescriptor::new(Selector::from_record(fields));

    let cbor = with_cbor.then(|| {
        query
            .shape_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    });
    Ok(ShapeResult {
        shape: query.shape_key().to_hex(),
        fields: count,
        cbor,
    })
}

/// Runs the shape command.
pub fn run(filter: &str, with_cbor: bool, format: &str) -> Result<(), CommandError> {
    let format = Format::parse(format)?;
    let result = shape_of(filter, with_cbor)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => {
            println!("shape:  {}", result.shape);
            println!("fields: {}", result.fields);
            if let Some(cbor) = &result.cbor {
                println!("cbor:   {cbor}");
            }
        }
    }
    Ok(())
}
