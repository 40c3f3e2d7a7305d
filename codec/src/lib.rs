//! # Format Codec
//!
//! Pure conversion between raw file contents and a [`RecordSet`], the
//! format-neutral table every other part of the pipeline works with.
//!
//! ## Formats
//!
//! - **CSV**: header row, `,` `;` or tab delimited, values read as text
//! - **JSON**: array of objects (or an object wrapping one)
//! - **XML**: one element per row, fields as child elements/attributes
//! - **Spreadsheet**: first sheet of an xlsx/xls workbook, header row first
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Format Codec                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  raw bytes ──► parse(format) ──► RecordSet ──► render(format)  │
//! │                                     │                           │
//! │                                     ▼                           │
//! │                          columns = union of row keys           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod delimited;
pub mod error;
pub mod format;
mod json;
pub mod record;
mod spreadsheet;
mod xml;

pub use error::{CodecError, Result};
pub use format::Format;
pub use record::{RecordSet, Row, Value};

/// Parse raw bytes declared to be in `format`.
pub fn parse(bytes: &[u8], format: Format) -> Result<RecordSet> {
    let records = match format {
        Format::Csv => delimited::parse(bytes)?,
        Format::Json => json::parse(bytes)?,
        Format::Xml => xml::parse(bytes)?,
        Format::Spreadsheet => spreadsheet::parse(bytes)?,
    };
    tracing::trace!("parsed {} rows of {format}", records.len());
    Ok(records)
}

/// Render a record set as `format`.
pub fn render(records: &RecordSet, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Csv => delimited::render(records),
        Format::Json => json::render(records),
        Format::Xml => xml::render(records),
        Format::Spreadsheet => spreadsheet::render(records),
    }
}

/// Parse `name` as a target format, e.g. from a command argument.
pub fn target_format(name: &str) -> Result<Format> {
    name.parse()
}
