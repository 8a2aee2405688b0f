//! In-memory tabular store
//!
//! Backing grid for tests and demos. Mirrors the spreadsheet API's behavior
//! closely enough for the engine's contracts to hold: reads clamp to
//! populated cells, writes past capacity fail until the sheet is grown.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::{CellWrite, GridAxis, GridCapacity, GridRange, TabularStore};

struct SheetGrid {
    cells: Vec<Vec<String>>,
    capacity: GridCapacity,
}

/// In-memory implementation of [`TabularStore`].
pub struct InMemoryStore {
    sheets: RwLock<HashMap<String, SheetGrid>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sheets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a sheet with initial rows. Capacity defaults to the larger of
    /// the seeded extent and 1000x40, roughly a fresh spreadsheet tab.
    pub async fn add_sheet(&self, name: &str, rows: Vec<Vec<String>>) {
        let max_cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let capacity = GridCapacity {
            rows: rows.len().max(1000),
            cols: max_cols.max(40),
        };
        self.sheets.write().await.insert(
            name.to_string(),
            SheetGrid {
                cells: rows,
                capacity,
            },
        );
    }

    /// Full snapshot of a sheet's populated cells, for assertions.
    pub async fn snapshot(&self, name: &str) -> Option<Vec<Vec<String>>> {
        self.sheets.read().await.get(name).map(|g| g.cells.clone())
    }

    /// Single cell value (trailing blanks read as empty).
    pub async fn cell(&self, name: &str, row: usize, col: usize) -> Option<String> {
        let sheets = self.sheets.read().await;
        let grid = sheets.get(name)?;
        Some(
            grid.cells
                .get(row - 1)
                .and_then(|r| r.get(col))
                .cloned()
                .unwrap_or_default(),
        )
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TabularStore for InMemoryStore {
    async fn get_range(&self, sheet: &str, range: GridRange) -> Result<Vec<Vec<String>>, StoreError> {
        let sheets = self.sheets.read().await;
        let grid = sheets
            .get(sheet)
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))?;

        let last_row = range.end_row.unwrap_or(grid.cells.len());
        let mut out = Vec::new();
        for row_ix in range.start_row..=last_row.max(range.start_row.saturating_sub(1)) {
            let Some(row) = grid.cells.get(row_ix - 1) else {
                break;
            };
            let end_col = range.end_col.map(|c| c + 1).unwrap_or(row.len());
            let cells = row
                .iter()
                .skip(range.start_col)
                .take(end_col.saturating_sub(range.start_col))
                .cloned()
                .collect();
            out.push(cells);
        }
        Ok(out)
    }

    async fn batch_write(&self, sheet: &str, writes: &[CellWrite]) -> Result<(), StoreError> {
        let mut sheets = self.sheets.write().await;
        let grid = sheets
            .get_mut(sheet)
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))?;

        for w in writes {
            if w.row > grid.capacity.rows || w.col >= grid.capacity.cols {
                return Err(StoreError::OutOfCapacity {
                    sheet: sheet.to_string(),
                    row: w.row,
                    col: w.col,
                });
            }
        }
        for w in writes {
            if grid.cells.len() < w.row {
                grid.cells.resize(w.row, Vec::new());
            }
            let row = &mut grid.cells[w.row - 1];
            if row.len() <= w.col {
                row.resize(w.col + 1, String::new());
            }
            row[w.col] = w.value.clone();
        }
        Ok(())
    }

    async fn append_row(&self, sheet: &str, values: &[String]) -> Result<(), StoreError> {
        let mut sheets = self.sheets.write().await;
        let grid = sheets
            .get_mut(sheet)
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))?;
        grid.cells.push(values.to_vec());
        if grid.cells.len() > grid.capacity.rows {
            grid.capacity.rows = grid.cells.len();
        }
        Ok(())
    }

    async fn capacity(&self, sheet: &str) -> Result<GridCapacity, StoreError> {
        let sheets = self.sheets.read().await;
        let grid = sheets
            .get(sheet)
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))?;
        Ok(grid.capacity)
    }

    async fn grow(&self, sheet: &str, axis: GridAxis, amount: usize) -> Result<(), StoreError> {
        let mut sheets = self.sheets.write().await;
        let grid = sheets
            .get_mut(sheet)
            .ok_or_else(|| StoreError::UnknownSheet(sheet.to_string()))?;
        match axis {
            GridAxis::Rows => grid.capacity.rows += amount,
            GridAxis::Columns => grid.capacity.cols += amount,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn range_reads_clamp_to_populated_cells() {
        let store = InMemoryStore::new();
        store
            .add_sheet(
                "S",
                vec![row(&["h1", "h2"]), row(&["a", "b", "c"]), row(&["d"])],
            )
            .await;

        let all = store.get_range("S", GridRange::rows_from(2)).await.unwrap();
        assert_eq!(all, vec![row(&["a", "b", "c"]), row(&["d"])]);

        let col = store
            .get_range("S", GridRange::single_column(1, 2))
            .await
            .unwrap();
        assert_eq!(col, vec![row(&["b"]), row(&[])]);
    }

    #[tokio::test]
    async fn writes_past_capacity_fail_until_grown() {
        let store = InMemoryStore::new();
        store.add_sheet("S", vec![row(&["h"])]).await;

        let too_far = [CellWrite::new(1, 200, "x")];
        let err = store.batch_write("S", &too_far).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfCapacity { .. }));

        store.grow("S", GridAxis::Columns, 200).await.unwrap();
        store.batch_write("S", &too_far).await.unwrap();
        assert_eq!(store.cell("S", 1, 200).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn unknown_sheet_is_an_error() {
        let store = InMemoryStore::new();
        let err = store
            .get_range("MISSING", GridRange::rows_from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownSheet(_)));
    }
}
