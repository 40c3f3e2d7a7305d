//! Supported file formats and format detection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Bytes inspected when sniffing content.
const SNIFF_LEN: usize = 4096;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// A structured/tabular file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Comma (or semicolon/tab) separated values with a header row.
    Csv,

    /// JSON array of objects.
    Json,

    /// XML document with one element per row.
    Xml,

    /// Spreadsheet workbook, header row = column names.
    Spreadsheet,
}

impl Format {
    /// All supported formats.
    pub const ALL: [Format; 4] = [Self::Csv, Self::Json, Self::Xml, Self::Spreadsheet];

    /// Map a file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "xml" => Some(Self::Xml),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    /// Map a path's extension to a format.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Guess the format from the leading bytes of a file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            return Some(Self::Spreadsheet);
        }

        let head = &bytes[..bytes.len().min(SNIFF_LEN)];
        let text = leading_text(head)?;
        let trimmed = text.trim_start_matches('\u{feff}').trim_start();

        match trimmed.chars().next()? {
            '<' => Some(Self::Xml),
            '{' | '[' => Some(Self::Json),
            _ => {
                let first_line = trimmed.lines().next().unwrap_or_default();
                first_line
                    .contains([',', ';', '\t'])
                    .then_some(Self::Csv)
            }
        }
    }

    /// Extension used when writing this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Spreadsheet => "xlsx",
        }
    }

    /// Name used on the command surface.
    pub fn name(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Spreadsheet => "excel",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "excel" | "xlsx" | "spreadsheet" => Ok(Self::Spreadsheet),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Decode the sniffing window as text, tolerating a multi-byte character
/// cut off at the end of the window. Returns `None` for binary content.
fn leading_text(head: &[u8]) -> Option<&str> {
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => {
            std::str::from_utf8(&head[..e.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };

    let binary = text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'));
    (!binary).then_some(text)
}
