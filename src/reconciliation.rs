// ⚖️ Balance Check - scan a statement's per-row balance verification column
//
// Every extracted row carries a "公式校验" value:
//   previous_balance + credit - debit - balance
// A value away from zero means the statement does not add up on that row.
// The engine reports the first and last month with a discrepancy and the
// largest absolute discrepancy seen.

use crate::table::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CHECK_COLUMN: &str = "公式校验";
pub const DATE_COLUMN: &str = "日期";

// ============================================================================
// DISCREPANCY SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    /// Date of the first discrepant row, in row order
    pub first: NaiveDate,
    /// Date of the last discrepant row, in row order
    pub last: NaiveDate,
    /// Signed value with the largest magnitude
    pub max_difference: f64,
    pub discrepant_rows: usize,
}

impl BalanceDiscrepancy {
    /// "2023年01月至2023年06月存在余额差异 余额差异最大为150"
    pub fn describe(&self) -> String {
        format!(
            "{}至{}存在余额差异 余额差异最大为{}",
            self.first.format("%Y年%m月"),
            self.last.format("%Y年%m月"),
            format_amount(self.max_difference)
        )
    }
}

/// Whole amounts print without decimals, everything else with two.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

// ============================================================================
// BALANCE CHECK ENGINE
// ============================================================================

pub struct BalanceCheckEngine {
    /// Values within this distance of zero count as balanced (default: 0.005)
    pub tolerance: f64,
}

impl BalanceCheckEngine {
    pub fn new() -> Self {
        BalanceCheckEngine { tolerance: 0.005 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        BalanceCheckEngine { tolerance }
    }

    /// Scan the extraction table.
    ///
    /// Rows whose check value or date does not parse are ignored. Returns
    /// `None` when either column is missing or every valid row balances.
    pub fn check(&self, extraction: &Table) -> Option<BalanceDiscrepancy> {
        if !extraction.has_column(CHECK_COLUMN) || !extraction.has_column(DATE_COLUMN) {
            return None;
        }

        let valid: Vec<(f64, NaiveDate)> = extraction
            .column(CHECK_COLUMN)
            .zip(extraction.column(DATE_COLUMN))
            .filter_map(|(check, date)| Some((check.to_f64_or_none()?, date.to_date_or_none()?)))
            .collect();

        self.summarize(&valid)
    }

    /// Same as [`check`](Self::check) over already-parsed (value, date) pairs.
    pub fn summarize(&self, rows: &[(f64, NaiveDate)]) -> Option<BalanceDiscrepancy> {
        let discrepant: Vec<&(f64, NaiveDate)> = rows
            .iter()
            .filter(|(value, _)| value.abs() > self.tolerance)
            .collect();

        let first = discrepant.first()?;
        let last = discrepant.last()?;

        // First row wins on equal magnitude
        let max_difference = rows
            .iter()
            .map(|(value, _)| *value)
            .fold(None::<f64>, |best, v| match best {
                Some(b) if b.abs() >= v.abs() => Some(b),
                _ => Some(v),
            })?;

        Some(BalanceDiscrepancy {
            first: first.1,
            last: last.1,
            max_difference,
            discrepant_rows: discrepant.len(),
        })
    }
}

impl Default for BalanceCheckEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn statement(rows: &[(&str, Cell)]) -> Table {
        Table::new(
            vec![DATE_COLUMN.to_string(), CHECK_COLUMN.to_string()],
            rows.iter()
                .map(|(date, check)| vec![Cell::from(*date), check.clone()])
                .collect(),
        )
    }

    #[test]
    fn test_balanced_statement() {
        let engine = BalanceCheckEngine::new();
        let table = statement(&[
            ("2023-01-05", Cell::Float(0.0)),
            ("2023-02-05", Cell::Float(0.004)),
            ("2023-03-05", Cell::Float(-0.003)),
        ]);

        assert_eq!(engine.check(&table), None);
    }

    #[test]
    fn test_discrepancy_range_and_max() {
        let engine = BalanceCheckEngine::new();
        let table = statement(&[
            ("2023-01-05", Cell::Float(0.0)),
            ("2023-02-10", Cell::Float(20.0)),
            ("2023-03-01", Cell::from("nan")),
            ("2023-04-11", Cell::Float(-150.0)),
            ("2023-06-30", Cell::from("35.5")),
            ("2023-07-01", Cell::Float(0.0)),
        ]);

        let found = engine.check(&table).unwrap();
        assert_eq!(found.first, NaiveDate::from_ymd_opt(2023, 2, 10).unwrap());
        assert_eq!(found.last, NaiveDate::from_ymd_opt(2023, 6, 30).unwrap());
        assert_eq!(found.max_difference, -150.0);
        assert_eq!(found.discrepant_rows, 3);
        assert_eq!(
            found.describe(),
            "2023年02月至2023年06月存在余额差异 余额差异最大为-150"
        );
    }

    #[test]
    fn test_row_order_not_date_order() {
        let engine = BalanceCheckEngine::new();
        let table = statement(&[
            ("2023-05-01", Cell::Float(1.25)),
            ("2023-01-01", Cell::Float(2.0)),
        ]);

        let found = engine.check(&table).unwrap();
        assert_eq!(found.first.format("%m").to_string(), "05");
        assert_eq!(found.last.format("%m").to_string(), "01");
        assert_eq!(found.describe(), "2023年05月至2023年01月存在余额差异 余额差异最大为2");
    }

    #[test]
    fn test_unparseable_dates_are_ignored() {
        let engine = BalanceCheckEngine::new();
        let table = statement(&[("不是日期", Cell::Float(99.0)), ("20230301", Cell::Float(0.0))]);

        assert_eq!(engine.check(&table), None);
    }

    #[test]
    fn test_missing_columns() {
        let engine = BalanceCheckEngine::new();
        let table = Table::new(vec![DATE_COLUMN.to_string()], vec![vec![Cell::from("2023-01-01")]]);

        assert_eq!(engine.check(&table), None);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(150.0), "150");
        assert_eq!(format_amount(-3.456), "-3.46");
        assert_eq!(format_amount(0.5), "0.50");
    }

    #[test]
    fn test_custom_tolerance() {
        let engine = BalanceCheckEngine::with_tolerance(1.0);
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        assert_eq!(engine.summarize(&[(0.9, day)]), None);
        assert!(engine.summarize(&[(1.5, day)]).is_some());
    }
}
