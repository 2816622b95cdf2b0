// 📑 Registration Ledger - "登记信息.xlsx" and the JSON run report
//
// One row per processed file. Rows from an earlier run are kept on top; new
// rows follow, sorted by serial. The file is replaced atomically so a crash
// or a locked target never leaves a half-written ledger behind.

use crate::cell::Cell;
use crate::error::{RegisterError, Result};
use crate::workbook::{write_header, write_row};
use calamine::{open_workbook_auto, Reader};
use chrono::{DateTime, Local};
use rust_xlsxwriter::{Workbook, Worksheet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

pub const LEDGER_HEADER: [&str; 14] = [
    "文件名",
    "已取序号",
    "是否整理",
    "币种",
    "账户名",
    "开户行",
    "账号",
    "卡号",
    "是否取得",
    "取得时间",
    "*详细说明",
    "*是否需重取",
    "⑤编制人",
    "已取得交易期间",
];

pub const DUPLICATE_SERIAL_PREFIX: &str = "已取序号";
pub const LOCKED_LEDGER_MESSAGE: &str = "保存失败：请关闭正在打开的《登记信息.xlsx》后重试。";

// ============================================================================
// SERIAL CELL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialCell {
    /// Skipped records carry no serial
    Blank,
    /// Freshly allocated; written as a number
    Fresh(u32),
    /// Reused; written as "已取序号N"
    Existing(u32),
}

impl SerialCell {
    pub fn to_cell(&self) -> Cell {
        match self {
            SerialCell::Blank => Cell::Empty,
            SerialCell::Fresh(n) => Cell::Int(i64::from(*n)),
            SerialCell::Existing(n) => Cell::Text(format!("{}{}", DUPLICATE_SERIAL_PREFIX, n)),
        }
    }

    /// Ordering key; rows without a serial sort last
    pub fn sort_key(&self) -> u32 {
        match self {
            SerialCell::Blank => u32::MAX,
            SerialCell::Fresh(n) | SerialCell::Existing(n) => *n,
        }
    }
}

// ============================================================================
// LEDGER ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub file_name: String,
    pub serial: SerialCell,
    pub organized: String,
    pub currency: String,
    pub account_name: String,
    pub bank: String,
    pub account: String,
    pub cards: String,
    pub acquired: String,
    pub acquire_time: String,
    pub detail: String,
    pub needs_reacquire: String,
    pub reviewer: String,
    pub trading_period: String,
}

impl LedgerRow {
    /// Row with only the file name filled in
    pub fn for_file(file_name: impl Into<String>) -> Self {
        LedgerRow {
            file_name: file_name.into(),
            serial: SerialCell::Blank,
            organized: String::new(),
            currency: String::new(),
            account_name: String::new(),
            bank: String::new(),
            account: String::new(),
            cards: String::new(),
            acquired: String::new(),
            acquire_time: String::new(),
            detail: String::new(),
            needs_reacquire: String::new(),
            reviewer: String::new(),
            trading_period: String::new(),
        }
    }

    pub fn to_cells(&self) -> Vec<Cell> {
        let text = |s: &str| {
            if s.is_empty() {
                Cell::Empty
            } else {
                Cell::from(s)
            }
        };
        vec![
            text(&self.file_name),
            self.serial.to_cell(),
            text(&self.organized),
            text(&self.currency),
            text(&self.account_name),
            text(&self.bank),
            text(&self.account),
            text(&self.cards),
            text(&self.acquired),
            text(&self.acquire_time),
            text(&self.detail),
            text(&self.needs_reacquire),
            text(&self.reviewer),
            text(&self.trading_period),
        ]
    }
}

/// Stable sort by serial, rows without a serial last.
pub fn sort_rows(rows: &mut [LedgerRow]) {
    rows.sort_by_key(|r| r.serial.sort_key());
}

// ============================================================================
// READ / WRITE
// ============================================================================

/// Data rows of an existing ledger; empty when the file does not exist.
pub fn read_existing_rows(path: &Path) -> Result<Vec<Vec<Cell>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut workbook =
        open_workbook_auto(path).map_err(|e| RegisterError::workbook_read(path, e))?;
    let sheet = match workbook.sheet_names().first() {
        Some(name) => name.clone(),
        None => return Ok(Vec::new()),
    };
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| RegisterError::workbook_read(path, e))?;

    Ok(range
        .rows()
        .skip(1)
        .map(|row| row.iter().cloned().map(Cell::from).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(Cell::is_empty))
        .collect())
}

/// Build the ledger workbook from preserved rows followed by new rows.
pub fn build_ledger(existing: &[Vec<Cell>], rows: &[LedgerRow]) -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let mut sheet = Worksheet::new();
    sheet.set_name("Sheet")?;

    let header: Vec<String> = LEDGER_HEADER.iter().map(|s| s.to_string()).collect();
    write_header(&mut sheet, &header)?;

    let mut row_index = 1u32;
    for cells in existing {
        write_row(&mut sheet, row_index, cells)?;
        row_index += 1;
    }
    for row in rows {
        write_row(&mut sheet, row_index, &row.to_cells())?;
        row_index += 1;
    }

    workbook.push_worksheet(sheet);
    Ok(workbook)
}

/// Write the ledger through a temp file in the same directory, then rename
/// over the target. A target held open elsewhere maps to `LedgerLocked`.
pub fn write_ledger(path: &Path, rows: &[LedgerRow]) -> Result<()> {
    let existing = read_existing_rows(path)?;
    let mut workbook = build_ledger(&existing, rows)?;
    let buffer = workbook.save_to_buffer()?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

    let mut temp = tempfile::Builder::new()
        .prefix(".ledger-")
        .suffix(".tmp.xlsx")
        .tempfile_in(dir)?;
    temp.write_all(&buffer)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| replace_error(path, e.error))?;

    info!(
        "登记信息已写入 {} (保留 {} 行, 新增 {} 行)",
        path.display(),
        existing.len(),
        rows.len()
    );
    Ok(())
}

/// Replacing a file Excel holds open fails with PermissionDenied on Windows.
fn replace_error(path: &Path, e: io::Error) -> RegisterError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        RegisterError::LedgerLocked(path.to_path_buf())
    } else {
        RegisterError::Io(e)
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub registered: usize,
    pub duplicate: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub statistics_path: String,
    pub folder: String,
    pub workers: usize,
    pub counts: RunCounts,
    pub rows: Vec<LedgerRow>,
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| RegisterError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(file: &str, serial: SerialCell) -> LedgerRow {
        LedgerRow {
            serial,
            account_name: "张三".into(),
            ..LedgerRow::for_file(file)
        }
    }

    #[test]
    fn test_serial_cell_rendering() {
        assert_eq!(SerialCell::Fresh(3).to_cell(), Cell::Int(3));
        assert_eq!(SerialCell::Existing(7).to_cell(), Cell::from("已取序号7"));
        assert_eq!(SerialCell::Blank.to_cell(), Cell::Empty);
    }

    #[test]
    fn test_sort_rows_blank_last() {
        let mut rows = vec![
            row("c", SerialCell::Blank),
            row("b", SerialCell::Existing(7)),
            row("a", SerialCell::Fresh(2)),
            row("d", SerialCell::Fresh(9)),
        ];
        sort_rows(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_write_ledger_and_preserve_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("登记信息.xlsx");

        write_ledger(&path, &[row("first.xlsx", SerialCell::Fresh(1))]).unwrap();
        write_ledger(&path, &[row("second.xlsx", SerialCell::Existing(1))]).unwrap();

        let mut reader = open_workbook_auto(&path).unwrap();
        let range = reader.worksheet_range("Sheet").unwrap();
        assert_eq!(range.height(), 3);
        assert_eq!(range.get((0, 0)), Some(&calamine::Data::String("文件名".into())));
        assert_eq!(range.get((1, 0)), Some(&calamine::Data::String("first.xlsx".into())));
        assert_eq!(range.get((1, 1)), Some(&calamine::Data::Float(1.0)));
        assert_eq!(
            range.get((2, 1)),
            Some(&calamine::Data::String("已取序号1".into()))
        );

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_report.json");
        let now = Local::now();
        let report = RunReport {
            started_at: now,
            finished_at: now,
            statistics_path: "统计表.xlsx".into(),
            folder: ".".into(),
            workers: 2,
            counts: RunCounts {
                registered: 1,
                duplicate: 0,
                skipped: 0,
            },
            rows: vec![row("a.xlsx", SerialCell::Fresh(1))],
        };
        write_report(&path, &report).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["counts"]["registered"], 1);
        assert_eq!(value["rows"][0]["serial"]["Fresh"], 1);
    }

    #[test]
    fn test_permission_denied_means_locked() {
        let path = Path::new("/tmp/登记信息.xlsx");
        let locked = replace_error(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(locked, RegisterError::LedgerLocked(p) if p == path));

        let other = replace_error(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(other, RegisterError::Io(_)));
    }
}
