// 📗 Output Workbooks - xlsx writing with lazily created sheets
//
// A category sheet only exists in the output once its first row arrives.
// The summary sheet is the exception: it is always present, header-only
// when there is nothing to summarize.

use crate::cell::Cell;
use crate::error::Result;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::collections::HashSet;

/// Last writable row index in an xlsx sheet
pub const MAX_SHEET_ROWS: u32 = 1_048_576;
/// Excel refuses longer strings in a cell
pub const MAX_CELL_CHARS: usize = 32_767;
/// Excel limits sheet names to 31 characters
pub const MAX_SHEET_NAME_CHARS: usize = 31;
/// File-name budget for per-entity workbooks
pub const MAX_FILE_STEM_CHARS: usize = 150;

// ============================================================================
// CELL WRITING
// ============================================================================

pub fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> Result<()> {
    match cell {
        Cell::Empty => {}
        Cell::Text(s) => {
            if s.chars().count() > MAX_CELL_CHARS {
                let cut: String = s.chars().take(MAX_CELL_CHARS).collect();
                sheet.write_string(row, col, cut)?;
            } else {
                sheet.write_string(row, col, s)?;
            }
        }
        Cell::Int(i) => {
            // Long identifiers lose precision as f64; keep them as text
            if i.unsigned_abs() > (1u64 << 53) {
                sheet.write_string(row, col, i.to_string())?;
            } else {
                sheet.write_number(row, col, *i as f64)?;
            }
        }
        Cell::Float(f) if f.is_finite() => {
            sheet.write_number(row, col, *f)?;
        }
        Cell::Float(_) => {}
        Cell::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Cell::DateTime(_) => {
            sheet.write_string(row, col, cell.to_normalized_string())?;
        }
    }
    Ok(())
}

pub fn write_row(sheet: &mut Worksheet, row: u32, cells: &[Cell]) -> Result<()> {
    for (col, cell) in cells.iter().enumerate() {
        write_cell(sheet, row, col as u16, cell)?;
    }
    Ok(())
}

pub fn write_header(sheet: &mut Worksheet, header: &[String]) -> Result<()> {
    for (col, name) in header.iter().enumerate() {
        sheet.write_string(0, col as u16, name)?;
    }
    Ok(())
}

// ============================================================================
// LAZY SHEET
// ============================================================================

/// Sheet that materializes on its first row.
///
/// Rows beyond the xlsx limit spill into "{name}_2", "{name}_3", ...
pub struct LazySheet {
    name: String,
    header: Vec<String>,
    pages: Vec<Worksheet>,
    next_row: u32,
    rows_written: usize,
}

impl LazySheet {
    pub fn new(name: impl Into<String>, header: Vec<String>) -> Self {
        LazySheet {
            name: name.into(),
            header,
            pages: Vec::new(),
            next_row: 0,
            rows_written: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_created(&self) -> bool {
        !self.pages.is_empty()
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn open_page(&mut self) -> Result<()> {
        let mut sheet = Worksheet::new();
        let name = if self.pages.is_empty() {
            self.name.clone()
        } else {
            let suffix = format!("_{}", self.pages.len() + 1);
            let room = MAX_SHEET_NAME_CHARS.saturating_sub(suffix.chars().count());
            format!("{}{}", self.name.chars().take(room).collect::<String>(), suffix)
        };
        sheet.set_name(name)?;
        write_header(&mut sheet, &self.header)?;
        self.pages.push(sheet);
        self.next_row = 1;
        Ok(())
    }

    pub fn push_row(&mut self, cells: &[Cell]) -> Result<()> {
        if self.pages.is_empty() || self.next_row >= MAX_SHEET_ROWS {
            self.open_page()?;
        }
        let row = self.next_row;
        if let Some(sheet) = self.pages.last_mut() {
            write_row(sheet, row, cells)?;
        }
        self.next_row += 1;
        self.rows_written += 1;
        Ok(())
    }

    pub fn push_rows<'a, I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [Cell]>,
    {
        for row in rows {
            self.push_row(row)?;
        }
        Ok(())
    }

    /// Hand the pages to the workbook; a sheet that never got a row is dropped.
    pub fn finish(self, workbook: &mut Workbook) -> bool {
        let created = self.is_created();
        for page in self.pages {
            workbook.push_worksheet(page);
        }
        created
    }

    /// Like `finish`, but writes a header-only sheet when no row arrived.
    pub fn finish_always(mut self, workbook: &mut Workbook) -> Result<()> {
        if !self.is_created() {
            self.open_page()?;
        }
        self.finish(workbook);
        Ok(())
    }
}

// ============================================================================
// FILE NAMES
// ============================================================================

/// Sanitized, length-limited file stem for a per-entity workbook
pub fn safe_file_stem(name: &str) -> String {
    let cleaned = crate::normalizer::sanitize_filename(name.trim());
    let cut: String = cleaned.chars().take(MAX_FILE_STEM_CHARS).collect();
    let cut = cut.trim_end_matches(['.', ' ']).to_string();
    if cut.is_empty() {
        "_".to_string()
    } else {
        cut
    }
}

/// Safe stems for a batch of workbooks, made unique up front.
///
/// Repeats get `_2`, `_3`, … in input order. Comparison ignores case so the
/// names stay distinct on case-insensitive file systems.
pub fn reserve_stems<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let base = safe_file_stem(name);
            let stem = std::iter::once(base.clone())
                .chain((2u32..).map(|k| format!("{}_{}", base, k)))
                .find(|candidate| !taken.contains(&candidate.to_lowercase()))
                .unwrap_or(base);
            taken.insert(stem.to_lowercase());
            stem
        })
        .collect()
}
