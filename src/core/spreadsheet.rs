//! Single-sheet `.xlsx` writer.
//!
//! The workbook is a minimal OOXML package assembled with `zip`: one
//! worksheet with inline strings, a bold header row frozen in place, and
//! date cells stored as serial numbers with a date number format.

use crate::domain::model::{Cell, Document, DocumentRows};
use crate::utils::error::{EtlError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

const STYLE_HEADER: u32 = 1;
const STYLE_DATE: u32 = 2;
const MAX_SHEET_NAME: usize = 31;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// cellXfs: 0 default, 1 bold header, 2 date
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy-mm-dd hh:mm"/></numFmts><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/><xf numFmtId="164" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

#[derive(Debug, Clone)]
pub struct SpreadsheetBuilder {
    max_column_width: usize,
}

impl SpreadsheetBuilder {
    pub fn new(max_column_width: usize) -> Self {
        Self { max_column_width }
    }

    pub fn build(&self, rows: &DocumentRows) -> Result<Document> {
        for (index, row) in rows.rows.iter().enumerate() {
            if row.cells.len() != rows.headers.len() {
                return Err(EtlError::BuildError {
                    message: format!(
                        "row {} of '{}' has {} cells for {} headers",
                        index,
                        rows.key(),
                        row.cells.len(),
                        rows.headers.len()
                    ),
                });
            }
        }

        let sheet_name = sanitize_sheet_name(&rows.name);
        let worksheet = self.worksheet_xml(rows);
        let workbook = workbook_xml(&sheet_name, rows);

        let bytes = {
            let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
            let parts: [(&str, &str); 6] = [
                ("[Content_Types].xml", CONTENT_TYPES),
                ("_rels/.rels", ROOT_RELS),
                ("xl/workbook.xml", workbook.as_str()),
                ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
                ("xl/styles.xml", STYLES),
                ("xl/worksheets/sheet1.xml", worksheet.as_str()),
            ];
            for (name, content) in parts {
                zip.start_file::<_, ()>(name, FileOptions::default())?;
                zip.write_all(content.as_bytes())?;
            }
            zip.finish()?.into_inner()
        };

        tracing::debug!(
            "Built '{}' ({} rows, {} bytes)",
            rows.key(),
            rows.rows.len(),
            bytes.len()
        );

        Ok(Document {
            file_name: sanitize_file_name(&rows.name),
            subdir: rows.subdir.clone(),
            bytes,
            row_count: rows.rows.len(),
        })
    }

    /// `min(longest display text + 2, max_column_width)` per column.
    pub fn column_widths(&self, rows: &DocumentRows) -> Vec<usize> {
        rows.headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let longest = rows
                    .rows
                    .iter()
                    .filter_map(|r| r.cells.get(i))
                    .map(|c| c.display().chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or(0);
                (longest + 2).min(self.max_column_width)
            })
            .collect()
    }

    fn worksheet_xml(&self, rows: &DocumentRows) -> String {
        let columns = rows.headers.len();
        let last_row = rows.rows.len() + 1;
        let range = if columns > 0 {
            format!("A1:{}{}", column_letter(columns - 1), last_row)
        } else {
            "A1".to_string()
        };

        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        );
        let _ = write!(xml, r#"<dimension ref="{}"/>"#, range);
        xml.push_str(r#"<sheetViews><sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/></sheetView></sheetViews>"#);
        xml.push_str(r#"<sheetFormatPr defaultRowHeight="15"/>"#);

        if columns > 0 {
            xml.push_str("<cols>");
            for (i, width) in self.column_widths(rows).into_iter().enumerate() {
                let _ = write!(
                    xml,
                    r#"<col min="{0}" max="{0}" width="{1}" customWidth="1"/>"#,
                    i + 1,
                    width
                );
            }
            xml.push_str("</cols>");
        }

        xml.push_str("<sheetData>");
        xml.push_str(r#"<row r="1">"#);
        for (i, header) in rows.headers.iter().enumerate() {
            push_text_cell(&mut xml, &cell_ref(i, 1), header, Some(STYLE_HEADER));
        }
        xml.push_str("</row>");

        for (index, row) in rows.rows.iter().enumerate() {
            let r = index + 2;
            let _ = write!(xml, r#"<row r="{}">"#, r);
            for (i, cell) in row.cells.iter().enumerate() {
                let reference = cell_ref(i, r);
                match cell {
                    Cell::Empty => {}
                    Cell::Text(text) => push_text_cell(&mut xml, &reference, text, None),
                    Cell::Number(n) => {
                        let _ = write!(xml, r#"<c r="{}"><v>{}</v></c>"#, reference, n);
                    }
                    Cell::DateTime(dt) => {
                        let _ = write!(
                            xml,
                            r#"<c r="{}" s="{}"><v>{}</v></c>"#,
                            reference,
                            STYLE_DATE,
                            date_serial(dt)
                        );
                    }
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData>");

        if rows.autofilter && columns > 0 {
            let _ = write!(xml, r#"<autoFilter ref="{}"/>"#, range);
        }
        xml.push_str(r#"<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>"#);
        xml.push_str("</worksheet>");
        xml
    }
}

fn workbook_xml(sheet_name: &str, rows: &DocumentRows) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView/></bookViews><sheets>"#,
    );
    let _ = write!(
        xml,
        r#"<sheet name="{}" sheetId="1" r:id="rId1"/></sheets>"#,
        escape_xml(sheet_name)
    );
    if rows.autofilter && !rows.headers.is_empty() {
        let reference = format!(
            "'{}'!$A$1:${}${}",
            sheet_name.replace('\'', "''"),
            column_letter(rows.headers.len() - 1),
            rows.rows.len() + 1
        );
        let _ = write!(
            xml,
            r#"<definedNames><definedName name="_xlnm._FilterDatabase" localSheetId="0" hidden="1">{}</definedName></definedNames>"#,
            escape_xml(&reference)
        );
    }
    xml.push_str("</workbook>");
    xml
}

fn push_text_cell(xml: &mut String, reference: &str, text: &str, style: Option<u32>) {
    let style = style.map(|s| format!(r#" s="{}""#, s)).unwrap_or_default();
    let _ = write!(
        xml,
        r#"<c r="{}"{} t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        reference,
        style,
        escape_xml(text)
    );
}

/// Zero-based column index to spreadsheet letters (`0` → `A`, `26` → `AA`).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.iter().rev().map(|&b| b as char).collect()
}

fn cell_ref(column: usize, row: usize) -> String {
    format!("{}{}", column_letter(column), row)
}

/// Days since 1899-12-30, the spreadsheet epoch.
pub fn date_serial(dt: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let seconds = (*dt - epoch).num_seconds() as f64;
    seconds / 86_400.0
}

/// Escapes markup characters and drops control characters XML 1.0 forbids.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

/// Sheet names: no `[]:*?/\`, at most 31 characters, never empty.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .take(MAX_SHEET_NAME)
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned.to_string()
    }
}

/// File names for every document, with `.xlsx` appended if missing.
pub fn sanitize_file_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len() + 5);
    for c in name.chars() {
        match c {
            '\n' | '\r' | '\t' => cleaned.push(' '),
            '<' | '>' | '\\' | '|' => cleaned.push('_'),
            '/' => cleaned.push('+'),
            ':' | '"' | '?' | '*' => {}
            c => cleaned.push(c),
        }
    }
    let mut cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        cleaned = format!("_{}", cleaned);
    }
    if !cleaned.to_lowercase().ends_with(".xlsx") {
        cleaned.push_str(".xlsx");
    }
    cleaned
}
