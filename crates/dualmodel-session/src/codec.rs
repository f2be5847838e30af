//! Conversion between instance values and stored column values.

use dualmodel_core::decimal;
use dualmodel_core::{ColumnDescriptor, ColumnStorage, DumpOptions, Error, Result, Value};

/// Value as written to `column`.
///
/// JSON columns hold serialized text; fixed-point columns are quantized to
/// their declared scale.
pub fn to_stored(column: &ColumnDescriptor, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match column.storage {
        ColumnStorage::Json => {
            let json = value.to_json(&DumpOptions::default());
            Ok(Value::Text(serde_json::to_string(&json)?))
        }
        ColumnStorage::Scalar => match (column.sql_type.decimal_scale(), value) {
            (Some(scale), Value::Decimal(text)) => match decimal::parse(&text) {
                Some(value) => {
                    let quantized = decimal::quantize(value, u32::from(scale));
                    Ok(Value::Decimal(quantized.to_string()))
                }
                None => Err(Error::Storage(format!(
                    "{}: `{text}` is not a decimal",
                    column.name
                ))),
            },
            (_, Value::Model(instance)) => Err(Error::Storage(format!(
                "{}: cannot store an instance of {} in a scalar column",
                column.name,
                instance.model_name()
            ))),
            (_, other) => Ok(other),
        },
    }
}

/// Value read back from `column`.
pub fn from_stored(column: &ColumnDescriptor, value: Value) -> Result<Value> {
    match (column.storage, value) {
        (ColumnStorage::Json, Value::Text(text)) => {
            let json: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
                Error::Storage(format!("{}: stored JSON is invalid: {err}", column.name))
            })?;
            Ok(Value::from_json(json))
        }
        (_, other) => Ok(other),
    }
}
