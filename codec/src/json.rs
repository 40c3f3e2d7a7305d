//! JSON reading and writing.

use serde_json::{Map, Value as JsonValue};

use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::record::{RecordSet, Row, Value};

/// Column used for array elements that are not objects.
const SCALAR_COLUMN: &str = "value";

pub(crate) fn parse(bytes: &[u8]) -> Result<RecordSet> {
    let document: JsonValue =
        serde_json::from_slice(bytes).map_err(|e| CodecError::parse(Format::Json, e))?;

    let records = match document {
        JsonValue::Array(items) => items.into_iter().map(element_row).collect(),
        JsonValue::Object(mut object) => {
            let table_key = object.iter().find_map(|(key, value)| {
                let is_table = value
                    .as_array()
                    .is_some_and(|items| !items.is_empty() && items.iter().all(JsonValue::is_object));
                is_table.then(|| key.clone())
            });

            match table_key.and_then(|key| object.remove(&key)) {
                Some(JsonValue::Array(items)) => items.into_iter().map(element_row).collect(),
                _ => std::iter::once(object_row(object)).collect(),
            }
        }
        scalar => {
            return Err(CodecError::parse(
                Format::Json,
                format!("expected an array or object, found {scalar}"),
            ));
        }
    };

    Ok(records)
}

fn element_row(element: JsonValue) -> Row {
    match element {
        JsonValue::Object(object) => object_row(object),
        other => {
            let mut row = Row::new();
            row.insert(SCALAR_COLUMN.to_string(), Value::from_json(other));
            row
        }
    }
}

fn object_row(object: Map<String, JsonValue>) -> Row {
    object
        .into_iter()
        .map(|(key, value)| (key, Value::from_json(value)))
        .collect()
}

pub(crate) fn render(records: &RecordSet) -> Result<Vec<u8>> {
    let columns = records.columns();

    let document: Vec<JsonValue> = records
        .rows()
        .iter()
        .map(|row| {
            let object: Map<String, JsonValue> = columns
                .iter()
                .map(|column| {
                    let value = row.get(*column).map_or(JsonValue::Null, Value::to_json);
                    ((*column).to_string(), value)
                })
                .collect();
            JsonValue::Object(object)
        })
        .collect();

    let mut out =
        serde_json::to_vec_pretty(&document).map_err(|e| CodecError::render(Format::Json, e))?;
    out.push(b'\n');
    Ok(out)
}
