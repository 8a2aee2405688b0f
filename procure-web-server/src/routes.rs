//! Procurement REST API routes
//!
//! Every data endpoint is one lookup into the stage catalog plus the shared
//! engine; there is no per-stage handler logic left. Wire format kept from
//! the original frontend contract:
//!
//! - `GET  /api/<stage>-data`            pending rows, 404 when none
//! - `POST /api/<stage>-save`            complete a stage for a UID
//! - `POST /api/update-<stage>`          alias of the above
//! - `POST /api/submit-requirement`      append a new requirement row
//! - `POST /api/create-po`               PO document issuance
//! - `POST /api/save-MRN-data`           batch MRN issuance
//! - `POST /api/update-approval`         batch approve/reject
//!
//! Errors always come back as `{error, details}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error};

use procure_core::{
    complete_stage, empty_stage_error, stage_rows, update_by_key, Bindings, CounterSpec,
    DocumentField, DocumentKind, DocumentPipeline, DocumentRequest, FieldUpdate, GridRange,
    KeyedSheetUpdate, RowAppend, SequenceAllocator, SequenceKey, StageCatalog, TabularStore,
    ValidationError, WorkflowError, MRN_SHEET, ORDERS_SHEET, PO_SHEET,
};

// ============================================================================
// State and error mapping
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TabularStore>,
    pub catalog: Arc<StageCatalog>,
    pub allocator: Arc<SequenceAllocator>,
    pub pipeline: Arc<DocumentPipeline>,
}

/// Error wrapper mapping the engine taxonomy onto HTTP status codes and the
/// `{error, details}` body shape. Expected conditions stay quiet in the
/// logs; unexpected ones carry full context.
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, class) = match &self.0 {
            WorkflowError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            WorkflowError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            WorkflowError::Partial(_) => (StatusCode::INTERNAL_SERVER_ERROR, "partial_failure"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let details = self.0.to_string();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                debug!(%details, "request rejected")
            }
            _ => error!(%details, "request failed"),
        }
        (status, Json(json!({ "error": class, "details": details }))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/submit-requirement", post(submit_requirement))
        .route("/api/create-po", post(create_po))
        .route("/api/save-MRN-data", post(save_mrn_data))
        .route("/api/update-approval", post(update_approval))
        // All remaining <stage>-data / <stage>-save / update-<stage>
        // endpoints dispatch through the catalog.
        .route("/api/:endpoint", get(stage_data).post(stage_save))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}

// ============================================================================
// Generic stage endpoints
// ============================================================================

async fn stage_data(Path(endpoint): Path<String>, State(state): State<AppState>) -> ApiResult {
    let Some(slug) = endpoint.strip_suffix("-data") else {
        return Err(ValidationError::UnknownStage(endpoint).into());
    };
    let rows = stage_rows(state.store.as_ref(), &state.catalog, slug).await?;
    if rows.is_empty() {
        return Err(empty_stage_error(&state.catalog, slug).into());
    }
    Ok(Json(json!({ "data": rows })))
}

#[derive(Debug, Deserialize)]
struct StageSaveRequest {
    uid: String,
    #[serde(default)]
    values: HashMap<String, String>,
}

async fn stage_save(
    Path(endpoint): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<StageSaveRequest>,
) -> ApiResult {
    let slug = endpoint
        .strip_suffix("-save")
        .or_else(|| endpoint.strip_prefix("update-"))
        .ok_or_else(|| ValidationError::UnknownStage(endpoint.clone()))?;
    let uid = require_non_empty("uid", &payload.uid)?;

    let extra: Vec<FieldUpdate> = payload
        .values
        .iter()
        .map(|(field, value)| FieldUpdate::new(field.clone(), value.clone()))
        .collect();
    complete_stage(
        state.store.as_ref(),
        &state.catalog,
        slug,
        uid,
        &now_stamp(),
        extra,
    )
    .await?;
    Ok(Json(json!({
        "message": format!("{} recorded for {}", slug, uid)
    })))
}

// ============================================================================
// Requirement submission
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubmitRequirementRequest {
    site_name: String,
    material: String,
    qty: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    requested_by: String,
}

async fn submit_requirement(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequirementRequest>,
) -> ApiResult {
    require_non_empty("site_name", &payload.site_name)?;
    require_non_empty("material", &payload.material)?;
    require_non_negative_number("qty", &payload.qty)?;

    let bindings = state
        .catalog
        .bindings(state.store.as_ref(), ORDERS_SHEET)
        .await?;
    let stamp = now_stamp();

    let store = state.store.clone();
    let persist_bindings = bindings.clone();
    let uid = state
        .allocator
        .allocate(
            SequenceKey::new(ORDERS_SHEET, "UID"),
            "REQ_",
            3,
            column_reader(state.store.clone(), bindings, "UID"),
            move |id| {
                async move {
                    let values = [
                        ("UID", id.clone()),
                        ("REQ_NO", id.clone()),
                        ("SITE_NAME", payload.site_name.clone()),
                        ("MATERIAL", payload.material.clone()),
                        ("QTY", payload.qty.clone()),
                        ("UNIT", payload.unit.clone()),
                        ("REQUESTED_BY", payload.requested_by.clone()),
                        ("PLANNED_1", stamp.clone()),
                    ];
                    let row = padded_row(&persist_bindings, &values)?;
                    store.append_row(ORDERS_SHEET, &row).await?;
                    Ok(())
                }
                .boxed()
            },
        )
        .await?;

    Ok(Json(json!({
        "message": format!("requirement {} submitted", uid),
        "uid": uid,
    })))
}

// ============================================================================
// PO issuance
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreatePoRequest {
    uid: String,
    vendor: String,
    rate: String,
    #[serde(default)]
    po_date: String,
}

async fn create_po(
    State(state): State<AppState>,
    Json(payload): Json<CreatePoRequest>,
) -> ApiResult {
    let uid = require_non_empty("uid", &payload.uid)?.to_string();
    require_non_empty("vendor", &payload.vendor)?;
    require_non_negative_number("rate", &payload.rate)?;

    let orders = state
        .catalog
        .bindings(state.store.as_ref(), ORDERS_SHEET)
        .await?;
    let po = state
        .catalog
        .bindings(state.store.as_ref(), PO_SHEET)
        .await?;

    let row = read_row_fields(
        state.store.as_ref(),
        &orders,
        "UID",
        &uid,
        &["SITE_NAME", "MATERIAL", "QTY"],
    )
    .await?;
    let stamp = now_stamp();
    let po_date = if payload.po_date.trim().is_empty() {
        stamp.clone()
    } else {
        payload.po_date.clone()
    };

    let issued = state
        .pipeline
        .issue(DocumentRequest {
            kind: DocumentKind::PurchaseOrder,
            counter: CounterSpec {
                bindings: po.clone(),
                field: "PO_NUMBER".to_string(),
                prefix: "PO_".to_string(),
                width: 3,
            },
            data: json!({
                "UID": uid,
                "SITE_NAME": row.get("SITE_NAME").cloned().unwrap_or_default(),
                "MATERIAL": row.get("MATERIAL").cloned().unwrap_or_default(),
                "QTY": row.get("QTY").cloned().unwrap_or_default(),
                "VENDOR": payload.vendor,
                "RATE": payload.rate,
                "PO_DATE": po_date,
            }),
            appends: vec![RowAppend {
                bindings: po,
                values: vec![
                    DocumentField::document_id("PO_NUMBER"),
                    DocumentField::literal("UID", uid.clone()),
                    DocumentField::literal(
                        "SITE_NAME",
                        row.get("SITE_NAME").cloned().unwrap_or_default(),
                    ),
                    DocumentField::literal(
                        "MATERIAL",
                        row.get("MATERIAL").cloned().unwrap_or_default(),
                    ),
                    DocumentField::literal("QTY", row.get("QTY").cloned().unwrap_or_default()),
                    DocumentField::literal("RATE", payload.rate.clone()),
                    DocumentField::literal("VENDOR", payload.vendor.clone()),
                    DocumentField::literal("PO_DATE", po_date),
                    DocumentField::document_url("PO_LINK"),
                ],
            }],
            updates: vec![KeyedSheetUpdate {
                bindings: orders,
                key_field: "UID".to_string(),
                key_value: uid.clone(),
                updates: vec![
                    DocumentField::document_id("PO_NUMBER"),
                    DocumentField::document_url("PO_LINK"),
                    DocumentField::literal("ACTUAL_5", stamp.clone()),
                    DocumentField::literal("PLANNED_6", stamp),
                ],
            }],
        })
        .await?;

    Ok(Json(json!({
        "message": format!("purchase order {} created", issued.id),
        "po_number": issued.id,
        "document_url": issued.url,
    })))
}

// ============================================================================
// MRN issuance (batch)
// ============================================================================

#[derive(Debug, Deserialize)]
struct MrnEntry {
    uid: String,
    po_number: String,
    received_qty: String,
    #[serde(default)]
    received_date: String,
    #[serde(default)]
    condition: String,
}

#[derive(Debug, Deserialize)]
struct SaveMrnRequest {
    entries: Vec<MrnEntry>,
}

async fn save_mrn_data(
    State(state): State<AppState>,
    Json(payload): Json<SaveMrnRequest>,
) -> ApiResult {
    if payload.entries.is_empty() {
        return Err(ValidationError::MissingField("entries".to_string()).into());
    }
    // Validate the whole batch before the first side effect; a bad trailing
    // entry must not leave earlier entries already issued.
    for entry in &payload.entries {
        require_non_empty("uid", &entry.uid)?;
        require_non_empty("po_number", &entry.po_number)?;
        require_non_negative_number("received_qty", &entry.received_qty)?;
    }

    let orders = state
        .catalog
        .bindings(state.store.as_ref(), ORDERS_SHEET)
        .await?;
    let mrn = state
        .catalog
        .bindings(state.store.as_ref(), MRN_SHEET)
        .await?;

    let mut issued_numbers = Vec::with_capacity(payload.entries.len());
    for entry in &payload.entries {
        let uid = entry.uid.trim().to_string();
        let stamp = now_stamp();
        let received_date = if entry.received_date.trim().is_empty() {
            stamp.clone()
        } else {
            entry.received_date.clone()
        };

        let issued = state
            .pipeline
            .issue(DocumentRequest {
                kind: DocumentKind::MaterialReceipt,
                counter: CounterSpec {
                    bindings: mrn.clone(),
                    field: "MRN_NUMBER".to_string(),
                    prefix: "MRN_".to_string(),
                    width: 3,
                },
                data: json!({
                    "UID": uid,
                    "PO_NUMBER": entry.po_number,
                    "RECEIVED_QTY": entry.received_qty,
                    "RECEIVED_DATE": received_date,
                    "CONDITION": entry.condition,
                }),
                appends: vec![RowAppend {
                    bindings: mrn.clone(),
                    values: vec![
                        DocumentField::document_id("MRN_NUMBER"),
                        DocumentField::literal("PO_NUMBER", entry.po_number.clone()),
                        DocumentField::literal("UID", uid.clone()),
                        DocumentField::literal("RECEIVED_QTY", entry.received_qty.clone()),
                        DocumentField::literal("RECEIVED_DATE", received_date),
                        DocumentField::literal("CONDITION", entry.condition.clone()),
                        DocumentField::document_url("MRN_LINK"),
                    ],
                }],
                updates: vec![KeyedSheetUpdate {
                    bindings: orders.clone(),
                    key_field: "UID".to_string(),
                    key_value: uid,
                    updates: vec![
                        DocumentField::document_id("MRN_NUMBER"),
                        DocumentField::document_url("MRN_LINK"),
                        DocumentField::literal("ACTUAL_8", stamp.clone()),
                        DocumentField::literal("PLANNED_9", stamp),
                    ],
                }],
            })
            .await?;
        issued_numbers.push(issued.id);
    }

    Ok(Json(json!({
        "message": format!("{} MRN(s) recorded", issued_numbers.len()),
        "mrn_numbers": issued_numbers,
    })))
}

// ============================================================================
// Approval (batch)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApprovalDecision {
    uid: String,
    decision: String,
}

#[derive(Debug, Deserialize)]
struct UpdateApprovalRequest {
    decisions: Vec<ApprovalDecision>,
}

#[derive(Debug, Clone, Copy)]
enum Verdict {
    Approved,
    Rejected,
}

async fn update_approval(
    State(state): State<AppState>,
    Json(payload): Json<UpdateApprovalRequest>,
) -> ApiResult {
    if payload.decisions.is_empty() {
        return Err(ValidationError::MissingField("decisions".to_string()).into());
    }
    // Validate the whole batch before the first write; a bad trailing
    // decision must not leave earlier rows approved and stamped.
    let mut validated = Vec::with_capacity(payload.decisions.len());
    for decision in &payload.decisions {
        let uid = require_non_empty("uid", &decision.uid)?.to_string();
        let verdict = match decision.decision.trim().to_uppercase().as_str() {
            "APPROVED" => Verdict::Approved,
            "REJECTED" => Verdict::Rejected,
            other => {
                return Err(ValidationError::InvalidValue {
                    field: "decision".to_string(),
                    value: other.to_string(),
                    reason: "expected APPROVED or REJECTED".to_string(),
                }
                .into());
            }
        };
        validated.push((uid, verdict));
    }

    let bindings = state
        .catalog
        .bindings(state.store.as_ref(), ORDERS_SHEET)
        .await?;

    let mut approved = Vec::new();
    let mut rejected = Vec::new();
    for (uid, verdict) in validated {
        let stamp = now_stamp();
        match verdict {
            Verdict::Rejected => {
                update_by_key(
                    state.store.as_ref(),
                    &bindings,
                    "UID",
                    &uid,
                    &[
                        FieldUpdate::new("STATUS", "REJECTED"),
                        FieldUpdate::new("ACTUAL_1", stamp),
                    ],
                )
                .await?;
                rejected.push(uid);
            }
            Verdict::Approved => {
                let store = state.store.clone();
                let persist_bindings = bindings.clone();
                let persist_uid = uid.clone();
                let approval_no = state
                    .allocator
                    .allocate(
                        SequenceKey::new(ORDERS_SHEET, "APPROVAL_NO"),
                        "APP_",
                        3,
                        column_reader(state.store.clone(), bindings.clone(), "APPROVAL_NO"),
                        move |id| {
                            async move {
                                update_by_key(
                                    store.as_ref(),
                                    &persist_bindings,
                                    "UID",
                                    &persist_uid,
                                    &[
                                        FieldUpdate::new("STATUS", "APPROVED"),
                                        FieldUpdate::new("APPROVAL_NO", id),
                                        FieldUpdate::new("ACTUAL_1", stamp.clone()),
                                        FieldUpdate::new("PLANNED_2", stamp),
                                    ],
                                )
                                .await?;
                                Ok(())
                            }
                            .boxed()
                        },
                    )
                    .await?;
                debug!(uid = %uid, approval_no = %approval_no, "requirement approved");
                approved.push(uid);
            }
        }
    }

    Ok(Json(json!({
        "message": format!("{} approved, {} rejected", approved.len(), rejected.len()),
        "approved": approved,
        "rejected": rejected,
    })))
}

// ============================================================================
// Helpers
// ============================================================================

fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field.to_string()).into());
    }
    Ok(trimmed)
}

fn require_non_negative_number(field: &str, value: &str) -> Result<f64, ApiError> {
    let parsed: f64 = value.trim().parse().map_err(|_| ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "not a number".to_string(),
    })?;
    if parsed < 0.0 || !parsed.is_finite() {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be a non-negative number".to_string(),
        }
        .into());
    }
    Ok(parsed)
}

/// Read-existing closure for the sequence allocator: one counter column,
/// data rows only.
fn column_reader(
    store: Arc<dyn TabularStore>,
    bindings: Bindings,
    field: &'static str,
) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<String>, WorkflowError>> + Send {
    move || {
        async move {
            let col = bindings.absolute_col("sequence counter", field)?;
            let rows = store
                .get_range(
                    bindings.sheet(),
                    GridRange::single_column(col, bindings.data_start_row()),
                )
                .await?;
            Ok(rows
                .into_iter()
                .map(|r| r.into_iter().next().unwrap_or_default())
                .collect())
        }
        .boxed()
    }
}

/// Build a full-width row with values placed at their bound columns.
fn padded_row(bindings: &Bindings, values: &[(&str, String)]) -> Result<Vec<String>, WorkflowError> {
    let width = bindings.origin_col() + bindings.max_offset() + 1;
    let mut row = vec![String::new(); width];
    for (field, value) in values {
        let col = bindings.absolute_col("row append", field)?;
        row[col] = value.clone();
    }
    Ok(row)
}

/// Read named fields from the row a key resolves to.
async fn read_row_fields(
    store: &dyn TabularStore,
    bindings: &Bindings,
    key_field: &str,
    key_value: &str,
    fields: &[&str],
) -> Result<HashMap<String, String>, WorkflowError> {
    let row = procure_core::resolve_row_by_key(store, bindings, key_field, key_value).await?;
    let rows = store
        .get_range(
            bindings.sheet(),
            GridRange::single_row(
                row,
                bindings.origin_col(),
                bindings.origin_col() + bindings.max_offset(),
            ),
        )
        .await?;
    let cells = rows.into_iter().next().unwrap_or_default();
    let mut out = HashMap::new();
    for field in fields {
        let offset = bindings.require("row read", field)?;
        let value = cells.get(offset).map(|s| s.trim().to_string()).unwrap_or_default();
        out.insert(field.to_string(), value);
    }
    Ok(out)
}
