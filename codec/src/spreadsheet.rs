//! Spreadsheet reading (xlsx/xls via calamine) and xlsx writing.
//!
//! Output workbooks are the smallest valid SpreadsheetML package: one sheet,
//! inline strings, no styles.

use std::io::{Cursor, Write};

use calamine::{Data, Reader};
use quick_xml::escape::escape;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::record::{RecordSet, Row, Value};

const SHEET_NAME: &str = "Sheet1";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Largest float that still converts to an integer without loss.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::Int(i) => Some(Value::Integer(*i)),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT => {
            Some(Value::Integer(*f as i64))
        }
        Data::Float(f) => Some(Value::Float(*f)),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::String(s) => Some(Value::text(s)),
        other => Some(Value::text(other.to_string())),
    }
}

pub(crate) fn parse(bytes: &[u8]) -> Result<RecordSet> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| CodecError::parse(Format::Spreadsheet, e))?;

    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(RecordSet::new());
    };
    let range = range.map_err(|e| CodecError::parse(Format::Spreadsheet, e))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(RecordSet::new());
    };
    let columns: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell {
            Data::Empty => format!("column_{}", idx + 1),
            other => other.to_string().trim().to_string(),
        })
        .collect();

    let mut records = RecordSet::new();
    for cells in rows {
        let row: Row = cells
            .iter()
            .zip(&columns)
            .filter_map(|(cell, column)| cell_value(cell).map(|v| (column.clone(), v)))
            .collect();
        if !row.is_empty() {
            records.push(row);
        }
    }

    Ok(records)
}

/// Spreadsheet column letters for a zero-based index (`0 → A`, `26 → AA`).
fn column_letters(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn inline_string(reference: &str, text: &str) -> String {
    format!(
        r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        escape(text)
    )
}

fn cell_xml(reference: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(format!(r#"<c r="{reference}" t="b"><v>{}</v></c>"#, u8::from(*b))),
        Value::Integer(i) => Some(format!(r#"<c r="{reference}"><v>{i}</v></c>"#)),
        Value::Float(f) if f.is_finite() => Some(format!(r#"<c r="{reference}"><v>{f}</v></c>"#)),
        Value::Float(f) => Some(inline_string(reference, &f.to_string())),
        Value::Text(s) => Some(inline_string(reference, s)),
    }
}

fn sheet_xml(records: &RecordSet) -> String {
    let columns = records.columns();
    let letters: Vec<String> = (0..columns.len()).map(column_letters).collect();

    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    if !columns.is_empty() {
        sheet.push_str(r#"<row r="1">"#);
        for (column, letter) in columns.iter().zip(&letters) {
            sheet.push_str(&inline_string(&format!("{letter}1"), column));
        }
        sheet.push_str("</row>");
    }

    for (idx, row) in records.rows().iter().enumerate() {
        let line = idx + 2;
        sheet.push_str(&format!(r#"<row r="{line}">"#));
        for (column, letter) in columns.iter().zip(&letters) {
            if let Some(cell) = row
                .get(*column)
                .and_then(|v| cell_xml(&format!("{letter}{line}"), v))
            {
                sheet.push_str(&cell);
            }
        }
        sheet.push_str("</row>");
    }

    sheet.push_str("</sheetData></worksheet>");
    sheet
}

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{SHEET_NAME}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    )
}

pub(crate) fn render(records: &RecordSet) -> Result<Vec<u8>> {
    let err = |e: zip::result::ZipError| CodecError::render(Format::Spreadsheet, e);
    let io_err = |e: std::io::Error| CodecError::render(Format::Spreadsheet, e);

    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(records)),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in parts {
        zip.start_file(name, options).map_err(err)?;
        zip.write_all(body.as_bytes()).map_err(io_err)?;
    }

    Ok(zip.finish().map_err(err)?.into_inner())
}
