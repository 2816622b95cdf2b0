// 📒 Statistics Ledger - pre-existing serial assignments
//
// The investigation team keeps a "统计表" workbook where every acquired
// account already has a serial. Its header sits on a fixed row (5 by default);
// only three columns matter here.

use crate::cell::Cell;
use crate::error::{RegisterError, Result};
use crate::normalizer::normalize_number;
use crate::table::Table;
use calamine::{open_workbook_auto, Reader};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SERIAL_COLUMN: &str = "已取序号手动添加";
pub const ACCOUNT_COLUMN: &str = "账号";
pub const CARD_COLUMN: &str = "卡号";

/// One row of the statistics ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsEntry {
    pub serial: Option<u32>,
    pub account: Option<String>,
    pub card: Option<String>,
}

impl StatisticsEntry {
    fn from_cells(serial: &Cell, account: &Cell, card: &Cell) -> Self {
        StatisticsEntry {
            serial: parse_serial(serial),
            account: normalize_number(account),
            card: normalize_number(card),
        }
    }
}

/// Where the ledger header lives
#[derive(Debug, Clone)]
pub struct StatisticsLayout {
    pub sheet: String,
    /// 1-based row number of the header
    pub header_row: u32,
}

impl Default for StatisticsLayout {
    fn default() -> Self {
        StatisticsLayout {
            sheet: "统计表".to_string(),
            header_row: 5,
        }
    }
}

/// "12", "12.0", 12.0 → 12; anything else → None
pub fn parse_serial(cell: &Cell) -> Option<u32> {
    match cell {
        Cell::Int(i) => u32::try_from(*i).ok(),
        Cell::Float(f) if f.is_finite() && *f >= 0.0 => Some(f.trunc() as u32),
        Cell::Text(s) => s.trim().split('.').next()?.trim().parse().ok(),
        _ => None,
    }
}

/// Read the ledger from .xlsx/.xlsm/.xls (calamine) or .csv.
pub fn read_statistics(path: &Path, layout: &StatisticsLayout) -> Result<Vec<StatisticsEntry>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let table = if is_csv {
        read_csv_table(path, layout)?
    } else {
        read_sheet_table(path, layout)?
    };

    Ok(entries_from_table(&table))
}

pub fn entries_from_table(table: &Table) -> Vec<StatisticsEntry> {
    let serial = table.column_index(SERIAL_COLUMN);
    let account = table.column_index(ACCOUNT_COLUMN);
    let card = table.column_index(CARD_COLUMN);

    let pick = |row: usize, idx: Option<usize>| -> Cell {
        idx.map(|i| table.cell(row, i).clone()).unwrap_or_default()
    };

    (0..table.len())
        .map(|row| {
            StatisticsEntry::from_cells(&pick(row, serial), &pick(row, account), &pick(row, card))
        })
        .collect()
}

fn read_sheet_table(path: &Path, layout: &StatisticsLayout) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| RegisterError::workbook_read(path, e))?;

    let names = workbook.sheet_names();
    // Fall back to the first sheet, as the workbook's active sheet usually is
    let sheet = if names.iter().any(|n| n == &layout.sheet) {
        layout.sheet.clone()
    } else {
        names.first().cloned().ok_or_else(|| RegisterError::MissingSheet {
            path: path.to_path_buf(),
            sheet: layout.sheet.clone(),
        })?
    };

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| RegisterError::workbook_read(path, e))?;

    Ok(Table::from_range(&range, Some(layout.header_row.saturating_sub(1))))
}

fn read_csv_table(path: &Path, layout: &StatisticsLayout) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let header_index = layout.header_row.saturating_sub(1) as usize;
    let mut headers = Vec::new();
    let mut rows = Vec::new();

    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i < header_index {
            continue;
        }
        if i == header_index {
            headers = record.iter().map(|s| s.trim().to_string()).collect();
            continue;
        }
        let row: Vec<Cell> = record
            .iter()
            .map(|s| if s.trim().is_empty() { Cell::Empty } else { Cell::from(s) })
            .collect();
        if !row.iter().all(Cell::is_empty) {
            rows.push(row);
        }
    }

    Ok(Table::new(headers, rows))
}
