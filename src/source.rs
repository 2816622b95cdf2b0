// 📂 Source Workbook - one split bank-statement file per account
//
// Each file carries:
//   提取       - extracted statement rows (required)
//   整理表     - organised rows, only used for the currency column (optional)
//   账户信息*  - bank-side account metadata, possibly several sheets
//
// Sheets named "关联子账户信息*" describe linked sub-accounts and are excluded.

use crate::error::{RegisterError, Result};
use crate::table::Table;
use calamine::{open_workbook_auto, Reader};
use regex::Regex;
use std::path::Path;
use tracing::warn;

pub const EXTRACTION_SHEET: &str = "提取";
pub const ORGANIZE_SHEET: &str = "整理表";

pub const DEFAULT_ACCOUNT_INFO_ALLOW: &str = r"^\s*账户信息(\d+)?\s*$";
pub const DEFAULT_ACCOUNT_INFO_DENY: &str = r"关联子账户信息";

// ============================================================================
// SHEET SELECTION
// ============================================================================

/// Include/exclude patterns for the account-info sheets
#[derive(Debug, Clone)]
pub struct SheetFilter {
    allow: Regex,
    deny: Regex,
}

impl SheetFilter {
    pub fn new(allow: &str, deny: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                RegisterError::Config(format!("bad sheet pattern '{}': {}", pattern, e))
            })
        };
        Ok(SheetFilter {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn accepts(&self, sheet: &str) -> bool {
        !self.deny.is_match(sheet) && self.allow.is_match(sheet)
    }

    pub fn pick<'a>(&self, names: &'a [String]) -> Vec<&'a String> {
        names.iter().filter(|n| self.accepts(n)).collect()
    }
}

impl Default for SheetFilter {
    fn default() -> Self {
        SheetFilter {
            allow: Regex::new(DEFAULT_ACCOUNT_INFO_ALLOW).expect("static pattern"),
            deny: Regex::new(DEFAULT_ACCOUNT_INFO_DENY).expect("static pattern"),
        }
    }
}

// ============================================================================
// SOURCE WORKBOOK
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SourceWorkbook {
    pub extraction: Table,
    /// Empty when the sheet is missing or unreadable
    pub organize: Table,
    /// All accepted account-info sheets, concatenated
    pub account_info: Table,
}

/// Read a split statement file.
///
/// Only the extraction sheet is mandatory; problems with the other sheets are
/// logged and yield empty tables.
pub fn read_source_workbook(path: &Path, filter: &SheetFilter) -> Result<SourceWorkbook> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| RegisterError::workbook_read(path, e))?;
    let names = workbook.sheet_names();
    let file_name = display_name(path);

    if !names.iter().any(|n| n == EXTRACTION_SHEET) {
        return Err(RegisterError::MissingSheet {
            path: path.to_path_buf(),
            sheet: EXTRACTION_SHEET.to_string(),
        });
    }
    let extraction = workbook
        .worksheet_range(EXTRACTION_SHEET)
        .map(|range| Table::from_range(&range, None))
        .map_err(|e| RegisterError::workbook_read(path, e))?;

    let organize = if names.iter().any(|n| n == ORGANIZE_SHEET) {
        match workbook.worksheet_range(ORGANIZE_SHEET) {
            Ok(range) => Table::from_range(&range, None),
            Err(e) => {
                warn!("整理表读取失败：{} | {}", file_name, e);
                Table::default()
            }
        }
    } else {
        Table::default()
    };

    let mut info_tables = Vec::new();
    for sheet in filter.pick(&names) {
        match workbook.worksheet_range(sheet) {
            Ok(range) => {
                let table = Table::from_range(&range, None);
                if !table.is_empty() {
                    info_tables.push(table);
                }
            }
            Err(e) => warn!("读取账户信息工作表失败: {} | {} | {}", sheet, file_name, e),
        }
    }

    Ok(SourceWorkbook {
        extraction,
        organize,
        account_info: Table::concat(info_tables),
    })
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Spreadsheet extensions picked up from the working folder
pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xls" | "xlsx" | "xlsm"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sheet_filter_default() {
        let filter = SheetFilter::default();
        assert!(filter.accepts("账户信息"));
        assert!(filter.accepts("账户信息2"));
        assert!(filter.accepts(" 账户信息12 "));
        assert!(!filter.accepts("关联子账户信息"));
        assert!(!filter.accepts("关联子账户信息1"));
        assert!(!filter.accepts("账户信息汇总"));
        assert!(!filter.accepts("提取"));
    }

    #[test]
    fn test_sheet_filter_pick_keeps_order() {
        let names: Vec<String> = ["提取", "账户信息2", "关联子账户信息", "账户信息"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let picked = SheetFilter::default().pick(&names);
        assert_eq!(picked, vec!["账户信息2", "账户信息"]);
    }

    #[test]
    fn test_sheet_filter_rejects_bad_pattern() {
        assert!(SheetFilter::new("(", "x").is_err());
    }

    #[test]
    fn test_is_spreadsheet() {
        assert!(is_spreadsheet(&PathBuf::from("a.XLSX")));
        assert!(is_spreadsheet(&PathBuf::from("a.xls")));
        assert!(!is_spreadsheet(&PathBuf::from("a.csv")));
        assert!(!is_spreadsheet(&PathBuf::from("noext")));
    }

    #[test]
    fn test_read_source_workbook_requires_extraction_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_extract.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet().set_name("整理表").unwrap();
        workbook.save(&path).unwrap();

        let err = read_source_workbook(&path, &SheetFilter::default()).unwrap_err();
        assert!(matches!(err, RegisterError::MissingSheet { .. }));
    }

    #[test]
    fn test_read_source_workbook_merges_account_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();

        let sheet = workbook.add_worksheet();
        sheet.set_name("提取").unwrap();
        sheet.write_string(0, 0, "本账号名称").unwrap();
        sheet.write_string(1, 0, "张三").unwrap();

        for (name, bank) in [("账户信息", "工商银行"), ("账户信息2", "建设银行"), ("关联子账户信息", "农业银行")] {
            let sheet = workbook.add_worksheet();
            sheet.set_name(name).unwrap();
            sheet.write_string(0, 0, "账号开户银行").unwrap();
            sheet.write_string(1, 0, bank).unwrap();
        }
        workbook.save(&path).unwrap();

        let source = read_source_workbook(&path, &SheetFilter::default()).unwrap();
        assert_eq!(source.extraction.unique_values("本账号名称"), vec!["张三"]);
        assert!(source.organize.is_empty());
        assert_eq!(
            source.account_info.unique_values("账号开户银行"),
            vec!["工商银行", "建设银行"]
        );
    }
}
