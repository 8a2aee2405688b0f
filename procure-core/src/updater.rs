//! Row Updater / Cross-Sheet Join
//!
//! Resolves business identifiers (UID, PO number, quotation number) to
//! physical row indexes and writes values into specific named columns,
//! leaving every other cell untouched. Whole-row rewrites are never issued;
//! they would clobber formula cells and unrelated columns.

use tracing::debug;

use crate::error::{NotFoundError, WorkflowError};
use crate::schema::Bindings;
use crate::store::{CellWrite, GridAxis, GridRange, TabularStore};

/// One named-field write.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub field: String,
    pub value: String,
}

impl FieldUpdate {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Updates for one business key in a batch.
#[derive(Debug, Clone)]
pub struct KeyedUpdate {
    pub key_value: String,
    pub updates: Vec<FieldUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// 1-indexed physical row the key resolved to.
    pub row: usize,
    pub cells_written: usize,
}

/// Resolve a business key to a physical row index.
///
/// Scans the key column top-to-bottom from the first data row; the first row
/// whose trimmed cell equals the trimmed key wins. Duplicates are tolerated
/// by convention. Zero matches is a [`NotFoundError`].
pub async fn resolve_row_by_key(
    store: &dyn TabularStore,
    bindings: &Bindings,
    key_field: &str,
    key_value: &str,
) -> Result<usize, WorkflowError> {
    let col = bindings.absolute_col("key resolution", key_field)?;
    let start = bindings.data_start_row();
    let cells = store
        .get_range(bindings.sheet(), GridRange::single_column(col, start))
        .await?;
    find_key_row(&cells, start, key_value).ok_or_else(|| {
        NotFoundError::RowNotFound {
            sheet: bindings.sheet().to_string(),
            key_field: key_field.to_string(),
            key_value: key_value.to_string(),
        }
        .into()
    })
}

fn find_key_row(column: &[Vec<String>], start_row: usize, key_value: &str) -> Option<usize> {
    let needle = key_value.trim();
    column.iter().enumerate().find_map(|(i, row)| {
        let cell = row.first().map(|s| s.trim()).unwrap_or("");
        (cell == needle).then_some(start_row + i)
    })
}

/// Update named fields on the row matching one key.
pub async fn update_by_key(
    store: &dyn TabularStore,
    bindings: &Bindings,
    key_field: &str,
    key_value: &str,
    updates: &[FieldUpdate],
) -> Result<UpdateOutcome, WorkflowError> {
    let row = resolve_row_by_key(store, bindings, key_field, key_value).await?;
    write_fields(store, bindings, row, updates).await
}

/// Batch form: resolve every key first (scanning the key column once), then
/// accumulate all cell writes into a single batched call. A key with zero
/// matches fails the whole batch before any write happens.
pub async fn update_many_by_key(
    store: &dyn TabularStore,
    bindings: &Bindings,
    key_field: &str,
    batch: &[KeyedUpdate],
) -> Result<Vec<UpdateOutcome>, WorkflowError> {
    let col = bindings.absolute_col("key resolution", key_field)?;
    let start = bindings.data_start_row();
    let cells = store
        .get_range(bindings.sheet(), GridRange::single_column(col, start))
        .await?;

    let mut writes: Vec<CellWrite> = Vec::new();
    let mut outcomes = Vec::with_capacity(batch.len());
    for keyed in batch {
        let row = find_key_row(&cells, start, &keyed.key_value).ok_or_else(|| {
            NotFoundError::RowNotFound {
                sheet: bindings.sheet().to_string(),
                key_field: key_field.to_string(),
                key_value: keyed.key_value.clone(),
            }
        })?;
        let mut cells_written = 0;
        for update in &keyed.updates {
            let col = bindings.absolute_col("field update", &update.field)?;
            writes.push(CellWrite::new(row, col, update.value.clone()));
            cells_written += 1;
        }
        outcomes.push(UpdateOutcome { row, cells_written });
    }

    flush_writes(store, bindings.sheet(), &writes).await?;
    Ok(outcomes)
}

/// Write named fields into a known row.
pub async fn write_fields(
    store: &dyn TabularStore,
    bindings: &Bindings,
    row: usize,
    updates: &[FieldUpdate],
) -> Result<UpdateOutcome, WorkflowError> {
    let mut writes = Vec::with_capacity(updates.len());
    for update in updates {
        let col = bindings.absolute_col("field update", &update.field)?;
        writes.push(CellWrite::new(row, col, update.value.clone()));
    }
    flush_writes(store, bindings.sheet(), &writes).await?;
    Ok(UpdateOutcome {
        row,
        cells_written: writes.len(),
    })
}

/// Grow the sheet if any write lands past current capacity, then batch-write.
async fn flush_writes(
    store: &dyn TabularStore,
    sheet: &str,
    writes: &[CellWrite],
) -> Result<(), WorkflowError> {
    if writes.is_empty() {
        return Ok(());
    }
    let max_row = writes.iter().map(|w| w.row).max().unwrap_or(0);
    let max_col = writes.iter().map(|w| w.col).max().unwrap_or(0);
    let capacity = store.capacity(sheet).await?;
    if max_row > capacity.rows {
        let amount = max_row - capacity.rows;
        debug!(sheet, amount, "growing sheet rows before write");
        store.grow(sheet, GridAxis::Rows, amount).await?;
    }
    if max_col >= capacity.cols {
        let amount = max_col + 1 - capacity.cols;
        debug!(sheet, amount, "growing sheet columns before write");
        store.grow(sheet, GridAxis::Columns, amount).await?;
    }
    store.batch_write(sheet, writes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotFoundError;
    use crate::schema::FieldSpec;
    use crate::store::InMemoryStore;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn bindings() -> Bindings {
        Bindings::from_fields(
            "ORDERS",
            1,
            0,
            &[
                FieldSpec::new("UID", 0),
                FieldSpec::new("STATUS", 1),
                FieldSpec::new("PO_NUMBER", 2),
                FieldSpec::new("PO_LINK", 3),
            ],
        )
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .add_sheet(
                "ORDERS",
                vec![
                    row(&["UID", "STATUS", "PO_NUMBER", "PO_LINK"]),
                    row(&["REQ_001", "PENDING", "", ""]),
                    row(&["REQ_002", "PENDING", "", ""]),
                    row(&["REQ_002", "DUPLICATE", "", ""]),
                ],
            )
            .await;
        store
    }

    #[tokio::test]
    async fn update_touches_only_named_cells() {
        let store = seeded_store().await;
        let before = store.snapshot("ORDERS").await.unwrap();

        let outcome = update_by_key(
            &store,
            &bindings(),
            "UID",
            "REQ_002",
            &[
                FieldUpdate::new("PO_NUMBER", "PO_004"),
                FieldUpdate::new("PO_LINK", "https://example.com/PO_004"),
            ],
        )
        .await
        .unwrap();
        assert_eq!(outcome.row, 3);
        assert_eq!(outcome.cells_written, 2);

        let after = store.snapshot("ORDERS").await.unwrap();
        for (r, row_before) in before.iter().enumerate() {
            for (c, cell_before) in row_before.iter().enumerate() {
                if r == 2 && (c == 2 || c == 3) {
                    continue;
                }
                assert_eq!(&after[r][c], cell_before, "cell ({}, {}) changed", r, c);
            }
        }
        assert_eq!(after[2][2], "PO_004");
    }

    #[tokio::test]
    async fn first_match_wins_on_duplicate_keys() {
        let store = seeded_store().await;
        let row_ix = resolve_row_by_key(&store, &bindings(), "UID", "REQ_002")
            .await
            .unwrap();
        assert_eq!(row_ix, 3);
    }

    #[tokio::test]
    async fn key_matching_trims_both_sides() {
        let store = seeded_store().await;
        let row_ix = resolve_row_by_key(&store, &bindings(), "UID", "  REQ_001 ")
            .await
            .unwrap();
        assert_eq!(row_ix, 2);
    }

    #[tokio::test]
    async fn missing_key_performs_zero_writes() {
        let store = seeded_store().await;
        let before = store.snapshot("ORDERS").await.unwrap();

        let err = update_by_key(
            &store,
            &bindings(),
            "UID",
            "REQ_999",
            &[FieldUpdate::new("STATUS", "APPROVED")],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NotFound(NotFoundError::RowNotFound { .. })
        ));
        assert_eq!(store.snapshot("ORDERS").await.unwrap(), before);
    }

    #[tokio::test]
    async fn batch_fails_whole_before_any_write_on_missing_key() {
        let store = seeded_store().await;
        let before = store.snapshot("ORDERS").await.unwrap();

        let batch = vec![
            KeyedUpdate {
                key_value: "REQ_001".to_string(),
                updates: vec![FieldUpdate::new("STATUS", "APPROVED")],
            },
            KeyedUpdate {
                key_value: "REQ_404".to_string(),
                updates: vec![FieldUpdate::new("STATUS", "APPROVED")],
            },
        ];
        let err = update_many_by_key(&store, &bindings(), "UID", &batch)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
        assert_eq!(store.snapshot("ORDERS").await.unwrap(), before);
    }

    #[tokio::test]
    async fn batch_writes_all_keys_in_one_call() {
        let store = seeded_store().await;
        let batch = vec![
            KeyedUpdate {
                key_value: "REQ_001".to_string(),
                updates: vec![FieldUpdate::new("STATUS", "APPROVED")],
            },
            KeyedUpdate {
                key_value: "REQ_002".to_string(),
                updates: vec![FieldUpdate::new("STATUS", "REJECTED")],
            },
        ];
        let outcomes = update_many_by_key(&store, &bindings(), "UID", &batch)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(store.cell("ORDERS", 2, 1).await.unwrap(), "APPROVED");
        assert_eq!(store.cell("ORDERS", 3, 1).await.unwrap(), "REJECTED");
    }

    #[tokio::test]
    async fn writes_past_capacity_grow_the_sheet_first() {
        let store = seeded_store().await;
        // Bind a field far past the seeded 40-column capacity.
        let wide = Bindings::from_fields(
            "ORDERS",
            1,
            0,
            &[FieldSpec::new("UID", 0), FieldSpec::new("FAR", 120)],
        );
        let outcome = update_by_key(
            &store,
            &wide,
            "UID",
            "REQ_001",
            &[FieldUpdate::new("FAR", "x")],
        )
        .await
        .unwrap();
        assert_eq!(outcome.cells_written, 1);
        assert_eq!(store.cell("ORDERS", 2, 120).await.unwrap(), "x");
    }
}
