//! CSV reading and writing.

use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::record::{RecordSet, Row, Value};

/// Pick the delimiter that occurs most often on the header line.
fn detect_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| (header.iter().filter(|b| *b == d).count(), *d == b','))
        .unwrap_or(b',')
}

pub(crate) fn parse(bytes: &[u8]) -> Result<RecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(detect_delimiter(bytes))
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CodecError::parse(Format::Csv, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = RecordSet::new();
    for result in reader.records() {
        let record = result.map_err(|e| CodecError::parse(Format::Csv, e))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let row: Row = record
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let column = headers
                    .get(idx)
                    .filter(|h| !h.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("column_{}", idx + 1));
                (column, Value::text(field))
            })
            .collect();
        records.push(row);
    }

    Ok(records)
}

pub(crate) fn render(records: &RecordSet) -> Result<Vec<u8>> {
    let columns = records.columns();
    let mut writer = csv::Writer::from_writer(Vec::new());

    if !columns.is_empty() {
        writer
            .write_record(&columns)
            .map_err(|e| CodecError::render(Format::Csv, e))?;
    }

    for row in records.rows() {
        let fields = columns
            .iter()
            .map(|c| row.get(*c).map(Value::as_text).unwrap_or_default());
        writer
            .write_record(fields.map(|f| f.into_owned()))
            .map_err(|e| CodecError::render(Format::Csv, e))?;
    }

    writer
        .into_inner()
        .map_err(|e| CodecError::render(Format::Csv, e))
}
