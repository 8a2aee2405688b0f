//! Document rendering and issuance
//!
//! Rendering is a pure function behind [`DocumentRenderer`]: structured data
//! in, document bytes out. [`DocumentPipeline`] is the orchestration around
//! it: render, allocate the document's sequence number, upload the blob,
//! append master-sheet rows and write metadata back, all under the counter's
//! allocator lock so concurrent issuance cannot double-allocate.
//!
//! Upload and metadata write are treated as one logical transaction: a write
//! failure after upload triggers a compensating blob delete, and the outcome
//! is reported as a [`PartialFailure`] naming the completed sub-steps.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use crate::blob::BlobStore;
use crate::error::{PartialFailure, RendererError, WorkflowError};
use crate::schema::Bindings;
use crate::sequence::{next_id, SequenceAllocator, SequenceKey};
use crate::store::{GridRange, TabularStore};
use crate::updater::{update_by_key, FieldUpdate};

/// The document kinds the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Quotation,
    Indent,
    PurchaseOrder,
    MaterialReceipt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotation => "quotation",
            Self::Indent => "indent",
            Self::PurchaseOrder => "purchase_order",
            Self::MaterialReceipt => "material_receipt",
        }
    }
}

/// Rendered document bytes plus their content type.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Pure renderer seam. A production deployment plugs a PDF engine in here;
/// the built-in implementation renders printable HTML from templates.
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        kind: DocumentKind,
        data: &serde_json::Value,
    ) -> Result<RenderedDocument, RendererError>;
}

/// Handlebars-backed renderer with one template per document kind.
pub struct HandlebarsRenderer {
    registry: handlebars::Handlebars<'static>,
}

const DOCUMENT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{title}}</title></head>
<body>
<h1>{{title}}</h1>
<p>Date: {{date}}</p>
<table border="1" cellspacing="0" cellpadding="4">
{{#each fields}}
<tr><th align="left">{{@key}}</th><td>{{this}}</td></tr>
{{/each}}
</table>
</body>
</html>
"#;

impl HandlebarsRenderer {
    pub fn new() -> Result<Self, RendererError> {
        let mut registry = handlebars::Handlebars::new();
        for kind in [
            DocumentKind::Quotation,
            DocumentKind::Indent,
            DocumentKind::PurchaseOrder,
            DocumentKind::MaterialReceipt,
        ] {
            registry.register_template_string(kind.as_str(), DOCUMENT_TEMPLATE)?;
        }
        Ok(Self { registry })
    }

    fn title_for(kind: DocumentKind) -> &'static str {
        match kind {
            DocumentKind::Quotation => "Quotation",
            DocumentKind::Indent => "Indent",
            DocumentKind::PurchaseOrder => "Purchase Order",
            DocumentKind::MaterialReceipt => "Material Receipt Note",
        }
    }
}

impl DocumentRenderer for HandlebarsRenderer {
    fn render(
        &self,
        kind: DocumentKind,
        data: &serde_json::Value,
    ) -> Result<RenderedDocument, RendererError> {
        if !self.registry.has_template(kind.as_str()) {
            return Err(RendererError::UnknownKind(kind.as_str().to_string()));
        }
        let context = json!({
            "title": Self::title_for(kind),
            "date": chrono::Utc::now().format("%Y-%m-%d").to_string(),
            "fields": data,
        });
        let html = self.registry.render(kind.as_str(), &context)?;
        Ok(RenderedDocument {
            bytes: html.into_bytes(),
            content_type: "text/html",
            extension: "html",
        })
    }
}

/// Value written during issuance; the allocated ID and URL are only known
/// mid-pipeline, so callers reference them symbolically.
#[derive(Debug, Clone)]
pub enum DocumentValue {
    Literal(String),
    DocumentId,
    DocumentUrl,
}

#[derive(Debug, Clone)]
pub struct DocumentField {
    pub field: String,
    pub value: DocumentValue,
}

impl DocumentField {
    pub fn literal(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: DocumentValue::Literal(value.into()),
        }
    }

    pub fn document_id(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: DocumentValue::DocumentId,
        }
    }

    pub fn document_url(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: DocumentValue::DocumentUrl,
        }
    }

    fn resolve(&self, id: &str, url: &str) -> FieldUpdate {
        let value = match &self.value {
            DocumentValue::Literal(v) => v.clone(),
            DocumentValue::DocumentId => id.to_string(),
            DocumentValue::DocumentUrl => url.to_string(),
        };
        FieldUpdate::new(self.field.clone(), value)
    }
}

/// The counter a document draws its number from.
#[derive(Debug, Clone)]
pub struct CounterSpec {
    pub bindings: Bindings,
    pub field: String,
    pub prefix: String,
    pub width: usize,
}

/// A master-sheet row created alongside the document.
#[derive(Debug, Clone)]
pub struct RowAppend {
    pub bindings: Bindings,
    pub values: Vec<DocumentField>,
}

/// Named-field updates on an existing row, keyed by business identifier.
#[derive(Debug, Clone)]
pub struct KeyedSheetUpdate {
    pub bindings: Bindings,
    pub key_field: String,
    pub key_value: String,
    pub updates: Vec<DocumentField>,
}

/// Everything one issuance needs.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub kind: DocumentKind,
    pub counter: CounterSpec,
    pub data: serde_json::Value,
    pub appends: Vec<RowAppend>,
    pub updates: Vec<KeyedSheetUpdate>,
}

#[derive(Debug, Clone)]
pub struct IssuedDocument {
    pub id: String,
    pub url: String,
    pub blob_ref: String,
}

/// Orchestrates render → allocate → upload → persist.
pub struct DocumentPipeline {
    store: Arc<dyn TabularStore>,
    blob: Arc<dyn BlobStore>,
    renderer: Arc<dyn DocumentRenderer>,
    allocator: Arc<SequenceAllocator>,
    folder: String,
}

impl DocumentPipeline {
    pub fn new(
        store: Arc<dyn TabularStore>,
        blob: Arc<dyn BlobStore>,
        renderer: Arc<dyn DocumentRenderer>,
        allocator: Arc<SequenceAllocator>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blob,
            renderer,
            allocator,
            folder: folder.into(),
        }
    }

    /// Issue one document. The whole read-counter → upload → persist window
    /// runs under the counter's lock; see the sequence allocator for why.
    pub async fn issue(&self, req: DocumentRequest) -> Result<IssuedDocument, WorkflowError> {
        // Pure step first; a render failure costs nothing.
        let rendered = self.renderer.render(req.kind, &req.data)?;

        let counter = &req.counter;
        let key = SequenceKey::new(counter.bindings.sheet(), counter.field.clone());
        let _guard = self.allocator.lock(&key).await;

        let col = counter
            .bindings
            .absolute_col("sequence counter", &counter.field)?;
        let existing_rows = self
            .store
            .get_range(
                counter.bindings.sheet(),
                GridRange::single_column(col, counter.bindings.data_start_row()),
            )
            .await?;
        let existing: Vec<String> = existing_rows
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect();
        let id = next_id(&existing, &counter.prefix, counter.width);

        let blob_key = format!("{}/{}.{}", self.folder, id, rendered.extension);
        let stored = self
            .blob
            .store(&blob_key, &rendered.bytes, rendered.content_type)
            .await?;
        if let Err(e) = self.blob.set_public_readable(&stored.blob_ref).await {
            return Err(self
                .compensate(&stored.blob_ref, &id, "set_public_readable", e.to_string(), vec!["render".into(), "upload".into()])
                .await);
        }

        let mut completed = vec![
            "render".to_string(),
            "upload".to_string(),
            "set_public_readable".to_string(),
        ];

        // Master-sheet appends.
        for append in &req.appends {
            if let Err(e) = self.append_row(append, &id, &stored.public_url).await {
                return Err(self
                    .compensate(&stored.blob_ref, &id, "append_row", e.to_string(), completed.clone())
                    .await);
            }
        }
        if !req.appends.is_empty() {
            completed.push("append_rows".to_string());
        }

        // Keyed metadata writes.
        for update in &req.updates {
            let resolved: Vec<FieldUpdate> = update
                .updates
                .iter()
                .map(|f| f.resolve(&id, &stored.public_url))
                .collect();
            if let Err(e) = update_by_key(
                self.store.as_ref(),
                &update.bindings,
                &update.key_field,
                &update.key_value,
                &resolved,
            )
            .await
            {
                return Err(self
                    .compensate(&stored.blob_ref, &id, "metadata_write", e.to_string(), completed.clone())
                    .await);
            }
        }

        info!(
            kind = req.kind.as_str(),
            id = %id,
            url = %stored.public_url,
            "document issued"
        );
        Ok(IssuedDocument {
            id,
            url: stored.public_url,
            blob_ref: stored.blob_ref,
        })
    }

    async fn append_row(
        &self,
        append: &RowAppend,
        id: &str,
        url: &str,
    ) -> Result<(), WorkflowError> {
        let bindings = &append.bindings;
        let width = bindings.origin_col() + bindings.max_offset() + 1;
        let mut row = vec![String::new(); width];
        for f in append.values.iter() {
            let col = bindings.absolute_col("row append", &f.field)?;
            row[col] = f.resolve(id, url).value;
        }
        self.store.append_row(bindings.sheet(), &row).await?;
        Ok(())
    }

    /// Compensating action: the document exists in the blob store but its
    /// metadata never landed. Delete the orphan; if even that fails, log it
    /// for manual reconciliation.
    async fn compensate(
        &self,
        blob_ref: &str,
        id: &str,
        failed_step: &str,
        detail: String,
        completed: Vec<String>,
    ) -> WorkflowError {
        let orphan_cleaned = match self.blob.delete(blob_ref).await {
            Ok(()) => {
                warn!(id, blob_ref, failed_step, "issuance failed, uploaded blob deleted");
                true
            }
            Err(e) => {
                error!(
                    id,
                    blob_ref,
                    failed_step,
                    delete_error = %e,
                    "issuance failed AND orphan cleanup failed, manual reconciliation needed"
                );
                false
            }
        };
        PartialFailure {
            completed,
            failed_step: failed_step.to_string(),
            detail,
            orphan_cleaned,
        }
        .into()
    }
}
