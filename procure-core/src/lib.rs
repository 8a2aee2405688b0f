//! procure-core
//!
//! Stage-gate engine for a procurement pipeline whose system of record is a
//! shared spreadsheet. The engine deduplicates what used to be ~10
//! near-identical route handlers into five components:
//!
//! - [`store`] — the tabular store port (Google Sheets adapter + in-memory)
//! - [`schema`] — logical-field-to-column-offset resolution with header
//!   drift detection
//! - [`stage`] — the declarative stage-gate filter (PLANNED/ACTUAL pairs,
//!   single-sided gates, status exclusion)
//! - [`sequence`] — monotonic prefixed-ID allocation, serialized per counter
//! - [`updater`] — key-to-row resolution and scoped named-column writes
//!
//! [`document`] orchestrates render → allocate → upload → persist with a
//! compensating delete on partial failure, and [`stages`] carries the
//! declarative catalog of the twelve pipeline stages.

pub mod blob;
pub mod config;
pub mod document;
pub mod error;
pub mod schema;
pub mod sequence;
pub mod stage;
pub mod stages;
pub mod store;
pub mod updater;

pub use blob::{BlobStore, DriveBlobStore, LocalBlobStore, MemoryBlobStore, StoredBlob};
pub use config::EngineConfig;
pub use document::{
    CounterSpec, DocumentField, DocumentKind, DocumentPipeline, DocumentRenderer, DocumentRequest,
    HandlebarsRenderer, IssuedDocument, KeyedSheetUpdate, RowAppend,
};
pub use error::{
    BlobStoreError, ConfigError, NotFoundError, PartialFailure, RendererError, SchemaError,
    StageRuleError, StoreError, ValidationError, WorkflowError,
};
pub use schema::{Bindings, FieldSpec, HeaderMismatch, ResolvedSchema, SheetSchema};
pub use sequence::{next_id, SequenceAllocator, SequenceKey};
pub use stage::{filter_rows, ProjectedRow, StageRule, ACTION_FIELD};
pub use stages::{
    complete_stage, empty_stage_error, stage_rows, StageCatalog, StageDefinition, MRN_SHEET,
    ORDERS_SHEET, PO_SHEET, QUOTATIONS_SHEET,
};
pub use store::{
    CellWrite, GridAxis, GridCapacity, GridRange, InMemoryStore, SheetsStore, TabularStore,
};
pub use updater::{
    resolve_row_by_key, update_by_key, update_many_by_key, write_fields, FieldUpdate, KeyedUpdate,
    UpdateOutcome,
};
