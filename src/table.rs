// 📋 Table - header + rows of Cells, addressed by column name
//
// Thin in-memory view over one sheet (or several concatenated sheets).
// Missing columns read as empty rather than failing.

use crate::cell::Cell;
use crate::normalizer::normalize_number;
use calamine::{Data, Range};
use std::collections::HashSet;

static EMPTY: Cell = Cell::Empty;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Table { headers, rows }
    }

    /// Build from a calamine range.
    ///
    /// `header_row` is the absolute 0-based sheet row holding the header;
    /// `None` uses the first row of the used range. Fully blank rows are dropped.
    pub fn from_range(range: &Range<Data>, header_row: Option<u32>) -> Self {
        let start_row = range.start().map(|(r, _)| r).unwrap_or(0);
        let header_offset = match header_row {
            Some(abs) if abs < start_row => None,
            Some(abs) => Some((abs - start_row) as usize),
            None => Some(0),
        };

        let mut rows = range.rows();
        let headers: Vec<String> = match header_offset {
            Some(offset) => rows
                .nth(offset)
                .map(|row| {
                    row.iter()
                        .map(|c| Cell::from(c.clone()).to_normalized_string())
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let rows: Vec<Vec<Cell>> = rows
            .map(|row| row.iter().cloned().map(Cell::from).collect::<Vec<_>>())
            .filter(|row| !row.iter().all(Cell::is_empty))
            .collect();

        Table { headers, rows }
    }

    /// Union of columns (first-seen order); rows re-aligned by header name.
    pub fn concat(tables: Vec<Table>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for table in &tables {
            for h in &table.headers {
                if !headers.contains(h) {
                    headers.push(h.clone());
                }
            }
        }

        let mut rows = Vec::new();
        for table in tables {
            let mapping: Vec<Option<usize>> =
                headers.iter().map(|h| table.column_index(h)).collect();
            for row in table.rows {
                rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                        .collect(),
                );
            }
        }

        Table { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Header lookup tolerant of stray line breaks and padding in header cells
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = clean_header(name);
        self.headers.iter().position(|h| clean_header(h) == wanted)
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&EMPTY)
    }

    /// Cells of a named column; empty iterator when the column is missing.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Cell> + 'a {
        let index = self.column_index(name);
        self.rows.iter().map(move |row| match index {
            Some(i) => row.get(i).unwrap_or(&EMPTY),
            None => &EMPTY,
        })
    }

    /// Distinct non-blank values of a column, first-seen order, ".0" removed.
    pub fn unique_values(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.column(name)
            .filter_map(normalize_number)
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Keep rows satisfying the predicate.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&[Cell]) -> bool,
    {
        Table {
            headers: self.headers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row.as_slice()))
                .cloned()
                .collect(),
        }
    }
}

fn clean_header(h: &str) -> String {
    h.replace(['\n', '\r'], "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec!["本账号名称".into(), "本账号".into()],
            vec![
                vec![Cell::from("张三"), Cell::from("6222.0")],
                vec![Cell::from("张三"), Cell::Float(6222.0)],
                vec![Cell::Empty, Cell::from("nan")],
                vec![Cell::from("李四"), Cell::from("7333")],
            ],
        )
    }

    #[test]
    fn test_unique_values_preserves_order() {
        let table = sample();
        assert_eq!(table.unique_values("本账号名称"), vec!["张三", "李四"]);
        assert_eq!(table.unique_values("本账号"), vec!["6222", "7333"]);
        assert!(table.unique_values("不存在").is_empty());
    }

    #[test]
    fn test_column_index_ignores_line_breaks() {
        let table = Table::new(vec!["已取序号\n手动添加".into()], vec![]);
        assert_eq!(table.column_index("已取序号手动添加"), Some(0));
    }

    #[test]
    fn test_concat_aligns_columns() {
        let a = Table::new(vec!["交易账号".into()], vec![vec![Cell::from("1")]]);
        let b = Table::new(
            vec!["开户网点".into(), "交易账号".into()],
            vec![vec![Cell::from("西湖支行"), Cell::from("2")]],
        );
        let merged = Table::concat(vec![a, b]);

        assert_eq!(merged.headers(), &["交易账号".to_string(), "开户网点".to_string()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.cell(0, 1), &Cell::Empty);
        assert_eq!(merged.cell(1, 0), &Cell::from("2"));
        assert_eq!(merged.cell(1, 1), &Cell::from("西湖支行"));
    }

    #[test]
    fn test_missing_column_reads_empty() {
        let table = sample();
        assert_eq!(table.column("不存在").count(), 4);
        assert!(table.column("不存在").all(Cell::is_empty));
    }
}
