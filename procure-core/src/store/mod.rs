//! Tabular Store Abstraction
//!
//! Abstract interface over a rectangular grid of string cells, addressed by
//! sheet name + row + column. Rows are 1-indexed (matching spreadsheet
//! conventions), columns are 0-indexed offsets from column A.
//!
//! Implementations target the Google Sheets values API (production) or an
//! in-memory grid (tests, demos).

pub mod memory;
pub mod sheets;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::InMemoryStore;
pub use sheets::SheetsStore;

/// A rectangular cell range. `end_row`/`end_col` are inclusive; `None` means
/// open-ended along that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRange {
    /// 1-indexed first row.
    pub start_row: usize,
    /// 0-indexed first column.
    pub start_col: usize,
    pub end_row: Option<usize>,
    pub end_col: Option<usize>,
}

impl GridRange {
    /// Every column, from `start_row` down to the last populated row.
    pub fn rows_from(start_row: usize) -> Self {
        Self {
            start_row,
            start_col: 0,
            end_row: None,
            end_col: None,
        }
    }

    /// A single column, from `start_row` down.
    pub fn single_column(col: usize, start_row: usize) -> Self {
        Self {
            start_row,
            start_col: col,
            end_row: None,
            end_col: Some(col),
        }
    }

    /// A single row spanning columns `start_col..=end_col`.
    pub fn single_row(row: usize, start_col: usize, end_col: usize) -> Self {
        Self {
            start_row: row,
            start_col,
            end_row: Some(row),
            end_col: Some(end_col),
        }
    }

    /// Render as A1 notation, e.g. `'ORDERS'!B7:AX7`.
    pub fn to_a1(&self, sheet: &str) -> String {
        let start = format!("{}{}", column_letter(self.start_col), self.start_row);
        let end = match (self.end_col, self.end_row) {
            (Some(c), Some(r)) => format!("{}{}", column_letter(c), r),
            (Some(c), None) => column_letter(c),
            (None, Some(r)) => r.to_string(),
            (None, None) => String::new(),
        };
        if end.is_empty() {
            format!("'{}'!{}", sheet, start)
        } else {
            format!("'{}'!{}:{}", sheet, start, end)
        }
    }
}

/// Spreadsheet column letter for a 0-indexed column (0 -> A, 26 -> AA).
pub fn column_letter(col: usize) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// One cell write, absolute-addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    /// 1-indexed row.
    pub row: usize,
    /// 0-indexed column.
    pub col: usize,
    pub value: String,
}

impl CellWrite {
    pub fn new(row: usize, col: usize, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAxis {
    Rows,
    Columns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCapacity {
    pub rows: usize,
    pub cols: usize,
}

/// Abstract tabular store.
///
/// No transactional guarantees: every read-then-write sequence built on top
/// of this trait races with concurrent writers unless serialized externally
/// (see the sequence allocator). Writes must stay scoped to the minimum
/// necessary cell set; whole-row rewrites clobber formula cells.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Read a rectangular range. Trailing empty rows/cells may be omitted;
    /// callers index defensively.
    async fn get_range(&self, sheet: &str, range: GridRange) -> Result<Vec<Vec<String>>, StoreError>;

    /// Write individual cells in one batch.
    async fn batch_write(&self, sheet: &str, writes: &[CellWrite]) -> Result<(), StoreError>;

    /// Append a row after the last populated row, starting at column A.
    async fn append_row(&self, sheet: &str, values: &[String]) -> Result<(), StoreError>;

    /// Current row/column capacity of the sheet.
    async fn capacity(&self, sheet: &str) -> Result<GridCapacity, StoreError>;

    /// Grow the sheet along one axis by `amount` blank rows/columns.
    async fn grow(&self, sheet: &str, axis: GridAxis, amount: usize) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(1), "B");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
    }

    #[test]
    fn a1_rendering() {
        let r = GridRange::single_row(7, 1, 4);
        assert_eq!(r.to_a1("ORDERS"), "'ORDERS'!B7:E7");

        let c = GridRange::single_column(34, 8);
        assert_eq!(c.to_a1("ORDERS"), "'ORDERS'!AI8:AI");

        let open = GridRange::rows_from(2);
        assert_eq!(open.to_a1("PO_MASTER"), "'PO_MASTER'!A2");
    }
}
