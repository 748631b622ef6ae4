//! Native `.xlsx` reader and CSV writer.
//!
//! Reads the first worksheet of an OOXML workbook straight from the ZIP
//! container and writes it as CSV, so spreadsheets can be uploaded as
//! `text/csv` without an office suite. Values are kept as stored: numbers
//! keep their raw text, booleans become `TRUE`/`FALSE`, dates stay serial
//! numbers unless the workbook stored them as strings.

use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ConversionError;

/// Maximum decompressed bytes read from one ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum populated cells read from the sheet.
const MAX_CELLS: usize = 1_000_000;
/// Maximum size of the dense grid (rows × columns).
const MAX_GRID: usize = 10_000_000;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// First worksheet as a dense grid of cell texts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// CSV rendering: `\n` line endings, minimal quoting.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let line = row
                .iter()
                .map(|field| csv_field(field))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Convert the first sheet of `input` to CSV at `output`. Returns the row count.
pub fn xlsx_to_csv(input: &Path, output: &Path) -> Result<usize, ConversionError> {
    let bytes = std::fs::read(input)?;
    let sheet = read_first_sheet(&bytes)?;
    std::fs::write(output, sheet.to_csv())?;
    Ok(sheet.rows.len())
}

pub fn read_first_sheet(bytes: &[u8]) -> Result<Sheet, ConversionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ConversionError::Spreadsheet(e.to_string()))?;

    let shared = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet_name = first_sheet_entry(&mut archive)?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet_name)?;
    let cells = read_sheet_cells(&xml, &shared)?;
    build_grid(cells)
}

fn spreadsheet_err(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Spreadsheet(e.to_string())
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
) -> Result<Vec<u8>, ConversionError> {
    let entry = archive.by_name(name).map_err(spreadsheet_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(spreadsheet_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ConversionError::Spreadsheet(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Resolve the ZIP entry of the first sheet listed in the workbook.
fn first_sheet_entry(archive: &mut Archive<'_>) -> Result<String, ConversionError> {
    if has_entry(archive, "xl/workbook.xml") && has_entry(archive, "xl/_rels/workbook.xml.rels") {
        let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
        if let Some(rel_id) = first_sheet_rel_id(&workbook)? {
            let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels")?;
            if let Some(target) = relationship_target(&rels, &rel_id)? {
                let entry = match target.strip_prefix('/') {
                    Some(absolute) => absolute.to_string(),
                    None => format!("xl/{}", target),
                };
                if has_entry(archive, &entry) {
                    return Ok(entry);
                }
            }
        }
    }

    // Fall back to the lowest-numbered worksheet part.
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
        .ok_or_else(|| ConversionError::Spreadsheet("workbook has no worksheets".to_string()))
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>, ConversionError> {
    for attr in e.attributes() {
        let attr = attr.map_err(spreadsheet_err)?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value().map_err(spreadsheet_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn first_sheet_rel_id(xml: &[u8]) -> Result<Option<String>, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(spreadsheet_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                return attr_value(&e, b"id");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn relationship_target(xml: &[u8], id: &str) -> Result<Option<String>, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(spreadsheet_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr_value(&e, b"Id")?.as_deref() == Some(id) {
                    return attr_value(&e, b"Target");
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ConversionError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_phonetic = false;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(spreadsheet_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t => {
                current.push_str(&te.unescape().map_err(spreadsheet_err)?);
            }
            Event::CData(cd) if in_t => {
                current.push_str(&String::from_utf8_lossy(&cd));
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `B7` → (7, 2). Both 1-based.
fn parse_cell_ref(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    let row = digits.parse::<usize>().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}

struct PendingCell {
    row: usize,
    col: usize,
    kind: Option<String>,
    value: String,
}

fn read_sheet_cells(
    xml: &[u8],
    shared: &[String],
) -> Result<Vec<(usize, usize, String)>, ConversionError> {
    let mut cells = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row = 0usize;
    let mut next_col = 1usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_v = false;
    let mut in_inline = false;
    let mut in_phonetic = false;
    let mut in_t = false;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(spreadsheet_err)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"row" => {
                        row = match attr_value(e, b"r")? {
                            Some(r) => r.parse().map_err(spreadsheet_err)?,
                            None => row + 1,
                        };
                        next_col = 1;
                    }
                    b"c" => {
                        let (r, c) = match attr_value(e, b"r")? {
                            Some(reference) => parse_cell_ref(&reference).ok_or_else(|| {
                                ConversionError::Spreadsheet(format!(
                                    "bad cell reference '{}'",
                                    reference
                                ))
                            })?,
                            None => (row.max(1), next_col),
                        };
                        next_col = c + 1;
                        if !is_empty {
                            cell = Some(PendingCell {
                                row: r,
                                col: c,
                                kind: attr_value(e, b"t")?,
                                value: String::new(),
                            });
                        }
                    }
                    b"v" if !is_empty => in_v = true,
                    b"is" if !is_empty => in_inline = true,
                    b"rPh" if !is_empty => in_phonetic = true,
                    b"t" if !is_empty && in_inline && !in_phonetic => in_t = true,
                    _ => {}
                }
            }
            Event::Text(ref te) if in_v || in_t => {
                if let Some(cell) = cell.as_mut() {
                    cell.value.push_str(&te.unescape().map_err(spreadsheet_err)?);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"is" => in_inline = false,
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        let text = resolve_value(done.kind.as_deref(), done.value, shared)?;
                        if !text.is_empty() {
                            if cells.len() >= MAX_CELLS {
                                return Err(ConversionError::Spreadsheet(format!(
                                    "sheet exceeds {} cells",
                                    MAX_CELLS
                                )));
                            }
                            cells.push((done.row, done.col, text));
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}

fn resolve_value(
    kind: Option<&str>,
    raw: String,
    shared: &[String],
) -> Result<String, ConversionError> {
    match kind {
        Some("s") => {
            if raw.trim().is_empty() {
                return Ok(String::new());
            }
            let idx: usize = raw.trim().parse().map_err(spreadsheet_err)?;
            shared.get(idx).cloned().ok_or_else(|| {
                ConversionError::Spreadsheet(format!("shared string index {} out of range", idx))
            })
        }
        Some("b") => Ok(match raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        }),
        _ => Ok(raw),
    }
}

fn build_grid(cells: Vec<(usize, usize, String)>) -> Result<Sheet, ConversionError> {
    let max_row = cells.iter().map(|(r, _, _)| *r).max().unwrap_or(0);
    let max_col = cells.iter().map(|(_, c, _)| *c).max().unwrap_or(0);
    if max_row.saturating_mul(max_col) > MAX_GRID {
        return Err(ConversionError::Spreadsheet(format!(
            "sheet dimensions {}x{} too large",
            max_row, max_col
        )));
    }

    let mut rows = vec![vec![String::new(); max_col]; max_row];
    for (r, c, text) in cells {
        rows[r - 1][c - 1] = text;
    }
    Ok(Sheet { rows })
}
