//! End-to-end engine tests over the in-memory store: stage gating through
//! the full resolve-fetch-filter path, serialized sequence allocation
//! against a live counter column, and document issuance including the
//! compensating cleanup on partial failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;

use procure_core::{
    complete_stage, stage_rows, BlobStore, CellWrite, CounterSpec, DocumentField, DocumentKind,
    DocumentPipeline, DocumentRequest, GridAxis, GridCapacity, GridRange, HandlebarsRenderer,
    InMemoryStore, KeyedSheetUpdate, MemoryBlobStore, RowAppend, SequenceAllocator, SequenceKey,
    StageCatalog, StoreError, TabularStore, WorkflowError, MRN_SHEET, ORDERS_SHEET, PO_SHEET,
    QUOTATIONS_SHEET,
};

/// Seed a sheet from its catalog schema: banner rows, a header row matching
/// the declared fields, then data rows given as (field, value) pairs.
async fn seed_sheet(
    store: &InMemoryStore,
    catalog: &StageCatalog,
    sheet: &str,
    data_rows: Vec<Vec<(&str, &str)>>,
) {
    let schema = catalog.schema(sheet).expect("sheet in catalog");
    let width = schema.origin_col + schema.fields.iter().map(|f| f.offset).max().unwrap() + 1;

    let mut rows: Vec<Vec<String>> = (1..schema.header_row).map(|_| Vec::new()).collect();
    let mut header = vec![String::new(); width];
    for f in &schema.fields {
        header[schema.origin_col + f.offset] = f.name.clone();
    }
    rows.push(header);

    let by_offset: HashMap<&str, usize> = schema
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.offset))
        .collect();
    for data in data_rows {
        let mut row = vec![String::new(); width];
        for (field, value) in data {
            row[schema.origin_col + by_offset[field]] = value.to_string();
        }
        rows.push(row);
    }
    store.add_sheet(sheet, rows).await;
}

#[tokio::test]
async fn pending_rows_flow_through_resolve_fetch_filter() {
    let store = InMemoryStore::new();
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &store,
        &catalog,
        ORDERS_SHEET,
        vec![
            vec![("UID", "1"), ("PLANNED_3", "2024-01-01")],
            vec![("UID", "2")],
            vec![
                ("UID", "3"),
                ("PLANNED_3", "2024-01-02"),
                ("ACTUAL_3", "2024-01-03"),
            ],
        ],
    )
    .await;

    let rows = stage_rows(&store, &catalog, "quotation").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["UID"], "1");
}

#[tokio::test]
async fn stage_completion_moves_a_row_down_the_pipeline() {
    let store = InMemoryStore::new();
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &store,
        &catalog,
        ORDERS_SHEET,
        vec![vec![("UID", "REQ_001"), ("PLANNED_2", "2024-02-01")]],
    )
    .await;

    for (from, to) in [("indent", "quotation"), ("quotation", "quotation-approval")] {
        assert_eq!(stage_rows(&store, &catalog, from).await.unwrap().len(), 1);
        complete_stage(&store, &catalog, from, "REQ_001", "2024-02-02", vec![])
            .await
            .unwrap();
        assert!(stage_rows(&store, &catalog, from).await.unwrap().is_empty());
        assert_eq!(stage_rows(&store, &catalog, to).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn concurrent_allocations_against_one_counter_never_collide() {
    let store = Arc::new(InMemoryStore::new());
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &store,
        &catalog,
        QUOTATIONS_SHEET,
        vec![
            vec![("QUOTATION_NO", "QUO_004")],
            vec![("QUOTATION_NO", "junk")],
        ],
    )
    .await;
    let bindings = Arc::new(catalog.bindings(store.as_ref(), QUOTATIONS_SHEET).await.unwrap());
    let allocator = Arc::new(SequenceAllocator::new());

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        let bindings = bindings.clone();
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            let col = bindings.absolute_col("counter", "QUOTATION_NO").unwrap();
            let start = bindings.data_start_row();
            let read_store = store.clone();
            let write_store = store.clone();
            allocator
                .allocate(
                    SequenceKey::new(QUOTATIONS_SHEET, "QUOTATION_NO"),
                    "QUO_",
                    3,
                    move || {
                        async move {
                            let rows = read_store
                                .get_range(
                                    QUOTATIONS_SHEET,
                                    GridRange::single_column(col, start),
                                )
                                .await?;
                            Ok(rows
                                .into_iter()
                                .map(|r| r.into_iter().next().unwrap_or_default())
                                .collect())
                        }
                        .boxed()
                    },
                    move |id| {
                        async move {
                            let mut row = vec![String::new(); col + 1];
                            row[col] = id;
                            write_store.append_row(QUOTATIONS_SHEET, &row).await?;
                            Ok(())
                        }
                        .boxed()
                    },
                )
                .await
                .unwrap()
        }));
    }

    let mut issued = Vec::new();
    for h in handles {
        issued.push(h.await.unwrap());
    }
    issued.sort();
    // Both see QUO_004 initially; serialization makes the second observe the
    // first's QUO_005 and compute QUO_006.
    assert_eq!(issued, ["QUO_005", "QUO_006"]);
}

fn po_request(orders: procure_core::Bindings, po: procure_core::Bindings) -> DocumentRequest {
    DocumentRequest {
        kind: DocumentKind::PurchaseOrder,
        counter: CounterSpec {
            bindings: po.clone(),
            field: "PO_NUMBER".to_string(),
            prefix: "PO_".to_string(),
            width: 3,
        },
        data: json!({ "UID": "REQ_001", "VENDOR": "Acme", "RATE": "120" }),
        appends: vec![RowAppend {
            bindings: po,
            values: vec![
                DocumentField::document_id("PO_NUMBER"),
                DocumentField::literal("UID", "REQ_001"),
                DocumentField::literal("VENDOR", "Acme"),
                DocumentField::literal("RATE", "120"),
                DocumentField::document_url("PO_LINK"),
            ],
        }],
        updates: vec![KeyedSheetUpdate {
            bindings: orders,
            key_field: "UID".to_string(),
            key_value: "REQ_001".to_string(),
            updates: vec![
                DocumentField::document_id("PO_NUMBER"),
                DocumentField::document_url("PO_LINK"),
                DocumentField::literal("ACTUAL_5", "2024-03-01"),
                DocumentField::literal("PLANNED_6", "2024-03-01"),
            ],
        }],
    }
}

#[tokio::test]
async fn document_issuance_allocates_uploads_and_persists() {
    let store = Arc::new(InMemoryStore::new());
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &store,
        &catalog,
        ORDERS_SHEET,
        vec![vec![("UID", "REQ_001"), ("PLANNED_5", "2024-02-20")]],
    )
    .await;
    seed_sheet(
        &store,
        &catalog,
        PO_SHEET,
        vec![
            vec![("PO_NUMBER", "PO_001")],
            vec![("PO_NUMBER", "PO_003")],
            vec![("PO_NUMBER", "PO_not_a_number")],
        ],
    )
    .await;

    let orders = catalog.bindings(store.as_ref(), ORDERS_SHEET).await.unwrap();
    let po = catalog.bindings(store.as_ref(), PO_SHEET).await.unwrap();

    let blob = Arc::new(MemoryBlobStore::new());
    let pipeline = DocumentPipeline::new(
        store.clone(),
        blob.clone(),
        Arc::new(HandlebarsRenderer::new().unwrap()),
        Arc::new(SequenceAllocator::new()),
        "documents",
    );

    let issued = pipeline
        .issue(po_request(orders.clone(), po))
        .await
        .unwrap();
    assert_eq!(issued.id, "PO_004");
    assert!(blob.exists(&issued.blob_ref).await.unwrap());

    // Appended master row.
    let snapshot = store.snapshot(PO_SHEET).await.unwrap();
    let appended = snapshot.last().unwrap();
    assert_eq!(appended[0], "PO_004");
    assert_eq!(appended[6], "Acme");

    // Metadata written into ORDERS (PO_NUMBER is offset 34, column 35).
    let po_col = orders.absolute_col("test", "PO_NUMBER").unwrap();
    assert_eq!(store.cell(ORDERS_SHEET, 8, po_col).await.unwrap(), "PO_004");
    let link_col = orders.absolute_col("test", "PO_LINK").unwrap();
    assert_eq!(
        store.cell(ORDERS_SHEET, 8, link_col).await.unwrap(),
        issued.url
    );

    // Row left stage 5, entered stage 6.
    assert!(stage_rows(store.as_ref(), &catalog, "po").await.unwrap().is_empty());
    assert_eq!(
        stage_rows(store.as_ref(), &catalog, "material-receipt")
            .await
            .unwrap()
            .len(),
        1
    );
}

/// Store wrapper that fails every batch write, simulating a spreadsheet
/// outage between upload and metadata persistence.
struct WriteFailingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl TabularStore for WriteFailingStore {
    async fn get_range(&self, sheet: &str, range: GridRange) -> Result<Vec<Vec<String>>, StoreError> {
        self.inner.get_range(sheet, range).await
    }

    async fn batch_write(&self, _sheet: &str, _writes: &[CellWrite]) -> Result<(), StoreError> {
        Err(StoreError::Api {
            status: 503,
            message: "backend unavailable".to_string(),
        })
    }

    async fn append_row(&self, sheet: &str, values: &[String]) -> Result<(), StoreError> {
        self.inner.append_row(sheet, values).await
    }

    async fn capacity(&self, sheet: &str) -> Result<GridCapacity, StoreError> {
        self.inner.capacity(sheet).await
    }

    async fn grow(&self, sheet: &str, axis: GridAxis, amount: usize) -> Result<(), StoreError> {
        self.inner.grow(sheet, axis, amount).await
    }
}

#[tokio::test]
async fn metadata_write_failure_reports_partial_and_cleans_the_orphan() {
    let inner = InMemoryStore::new();
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &inner,
        &catalog,
        ORDERS_SHEET,
        vec![vec![("UID", "REQ_001"), ("PLANNED_5", "2024-02-20")]],
    )
    .await;
    seed_sheet(&inner, &catalog, PO_SHEET, vec![vec![("PO_NUMBER", "PO_001")]]).await;

    let orders = catalog.bindings(&inner, ORDERS_SHEET).await.unwrap();
    let po = catalog.bindings(&inner, PO_SHEET).await.unwrap();

    let store = Arc::new(WriteFailingStore { inner });
    let blob = Arc::new(MemoryBlobStore::new());
    let pipeline = DocumentPipeline::new(
        store,
        blob.clone(),
        Arc::new(HandlebarsRenderer::new().unwrap()),
        Arc::new(SequenceAllocator::new()),
        "documents",
    );

    let err = pipeline
        .issue(po_request(orders, po))
        .await
        .unwrap_err();
    match err {
        WorkflowError::Partial(partial) => {
            assert_eq!(partial.failed_step, "metadata_write");
            assert!(partial.orphan_cleaned);
            assert!(partial.completed.iter().any(|s| s == "upload"));
        }
        other => panic!("expected PartialFailure, got {:?}", other),
    }
    // Compensating delete removed the uploaded document.
    assert!(!blob.exists("memory://documents/PO_002.html").await.unwrap());
}

#[tokio::test]
async fn mrn_master_schema_resolves_against_its_header() {
    let store = InMemoryStore::new();
    let catalog = StageCatalog::procurement();
    seed_sheet(
        &store,
        &catalog,
        MRN_SHEET,
        vec![vec![("MRN_NUMBER", "MRN_003"), ("PO_NUMBER", "PO_001")]],
    )
    .await;
    let bindings = catalog.bindings(&store, MRN_SHEET).await.unwrap();
    assert_eq!(bindings.data_start_row(), 2);
    assert_eq!(bindings.offset("MRN_LINK"), Some(6));
}
