//! XML reading and writing.
//!
//! Documents are read into a small element tree first. Rows are the children
//! of the root element; a wrapper such as `<company><employees>…` is
//! descended into when the root's only child holds the actual rows.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::record::{RecordSet, Row, Value};

const ROOT_ELEMENT: &str = "records";
const ROW_ELEMENT: &str = "record";

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| CodecError::parse(Format::Xml, e))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::parse(Format::Xml, e))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn has_element_children(&self) -> bool {
        !self.children.is_empty()
    }
}

fn read_tree(bytes: &[u8]) -> Result<Element> {
    let text = std::str::from_utf8(bytes).map_err(|e| CodecError::parse(Format::Xml, e))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CodecError::parse(Format::Xml, e))?;

        match event {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    CodecError::parse(Format::Xml, "closing tag without matching opening tag")
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    let unescaped = t.unescape().map_err(|e| CodecError::parse(Format::Xml, e))?;
                    current.text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::parse(Format::Xml, "unexpected end of document"));
    }
    root.ok_or_else(|| CodecError::parse(Format::Xml, "document has no root element"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(CodecError::parse(
                Format::Xml,
                "document has more than one root element",
            ));
        }
    }
    Ok(())
}

fn insert_unique(row: &mut Row, key: String, value: Value) {
    if !row.contains_key(&key) {
        row.insert(key, value);
        return;
    }
    let mut n = 2;
    while row.contains_key(&format!("{key}_{n}")) {
        n += 1;
    }
    row.insert(format!("{key}_{n}"), value);
}

fn flatten_into(row: &mut Row, prefix: &str, element: &Element) {
    for (key, value) in &element.attributes {
        insert_unique(row, format!("{prefix}{key}"), Value::text(value));
    }
    for child in &element.children {
        let key = format!("{prefix}{}", child.name);
        if child.has_element_children() {
            flatten_into(row, &format!("{key}."), child);
        } else {
            for (attr, value) in &child.attributes {
                insert_unique(row, format!("{key}.{attr}"), Value::text(value));
            }
            insert_unique(row, key, Value::text(child.text.trim()));
        }
    }
}

fn element_row(element: &Element) -> Row {
    let mut row = Row::new();
    flatten_into(&mut row, "", element);
    if !element.has_element_children() && !element.text.trim().is_empty() {
        insert_unique(&mut row, element.name.clone(), Value::text(element.text.trim()));
    }
    row
}

/// Whether an element looks like a list of rows: repeated children of one
/// name, each with fields of its own.
fn holds_rows(element: &Element) -> bool {
    let Some(first) = element.children.first() else {
        return false;
    };
    element
        .children
        .iter()
        .all(|child| child.name == first.name && child.has_element_children())
}

pub(crate) fn parse(bytes: &[u8]) -> Result<RecordSet> {
    let root = read_tree(bytes)?;

    let mut container = &root;
    while let [only] = container.children.as_slice() {
        if !holds_rows(only) {
            break;
        }
        container = only;
    }

    Ok(container.children.iter().map(element_row).collect())
}

fn write_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::render(Format::Xml, e)
}

/// Turn an arbitrary column name into a valid XML element name.
fn element_name(column: &str) -> String {
    let mut name: String = column
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match name.chars().next() {
        None => "field".to_string(),
        Some(first) if !(first.is_alphabetic() || first == '_') => {
            name.insert(0, '_');
            name
        }
        Some(_) => name,
    }
}

pub(crate) fn render(records: &RecordSet) -> Result<Vec<u8>> {
    let columns = records.columns();
    let names: Vec<String> = columns.iter().map(|c| element_name(c)).collect();
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_err)?;

    if records.is_empty() {
        writer
            .write_event(Event::Empty(BytesStart::new(ROOT_ELEMENT)))
            .map_err(write_err)?;
    } else {
        writer
            .write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))
            .map_err(write_err)?;
        for row in records.rows() {
            writer
                .write_event(Event::Start(BytesStart::new(ROW_ELEMENT)))
                .map_err(write_err)?;
            for (column, name) in columns.iter().zip(&names) {
                match row.get(*column).filter(|v| !v.is_null()) {
                    None => writer
                        .write_event(Event::Empty(BytesStart::new(name.as_str())))
                        .map_err(write_err)?,
                    Some(value) => {
                        writer
                            .write_event(Event::Start(BytesStart::new(name.as_str())))
                            .map_err(write_err)?;
                        writer
                            .write_event(Event::Text(BytesText::new(&value.as_text())))
                            .map_err(write_err)?;
                        writer
                            .write_event(Event::End(BytesEnd::new(name.as_str())))
                            .map_err(write_err)?;
                    }
                }
            }
            writer
                .write_event(Event::End(BytesEnd::new(ROW_ELEMENT)))
                .map_err(write_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
            .map_err(write_err)?;
    }

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}
