//! Procurement stage catalog
//!
//! The declarative registry that replaces per-stage copy-pasted handlers:
//! one entry per pipeline stage, naming its sheet, its gate rule and its
//! projection. Handlers look stages up by slug and run the shared engine.
//!
//! Sheet layout:
//! - `ORDERS`: the pipeline sheet. Header on row 7 (rows 1-6 are banner),
//!   data starts at column B. Carries the PLANNED_n/ACTUAL_n pairs for
//!   stages 1-12 plus issued document numbers and links.
//! - `QUOTATIONS` (header row 8), `PO_MASTER` and `MRN_MASTER` (header
//!   row 1): one row per issued document.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{NotFoundError, ValidationError, WorkflowError};
use crate::schema::{self, Bindings, FieldSpec, SheetSchema};
use crate::stage::{filter_rows, ProjectedRow, StageRule, ACTION_FIELD};
use crate::store::{GridRange, TabularStore};
use crate::updater::{update_by_key, FieldUpdate};

pub const ORDERS_SHEET: &str = "ORDERS";
pub const QUOTATIONS_SHEET: &str = "QUOTATIONS";
pub const PO_SHEET: &str = "PO_MASTER";
pub const MRN_SHEET: &str = "MRN_MASTER";

/// Number of gated stages on the ORDERS sheet.
pub const STAGE_COUNT: usize = 12;

/// One stage of the procurement pipeline.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub slug: &'static str,
    pub title: &'static str,
    pub sheet: &'static str,
    pub rule: StageRule,
    pub projection: Vec<String>,
    /// ACTUAL column stamped when the stage completes.
    pub actual_field: Option<String>,
    /// PLANNED column of the following stage, stamped at the same time.
    pub next_planned_field: Option<String>,
}

/// The full catalog: stage definitions plus the sheet schemas they resolve
/// against.
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
    schemas: HashMap<&'static str, SheetSchema>,
}

fn orders_fields() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::new("UID", 0),
        FieldSpec::new("REQ_NO", 1),
        FieldSpec::new("SITE_NAME", 2),
        FieldSpec::new("MATERIAL", 3),
        FieldSpec::new("QTY", 4),
        FieldSpec::new("UNIT", 5),
        FieldSpec::new("REQUESTED_BY", 6),
        FieldSpec::new("STATUS", 7),
    ];
    let mut offset = 8;
    for n in 1..=STAGE_COUNT {
        fields.push(FieldSpec::new(format!("PLANNED_{}", n), offset));
        fields.push(FieldSpec::new(format!("ACTUAL_{}", n), offset + 1));
        offset += 2;
    }
    for name in [
        "INDENT_NUMBER",
        "QUOTATION_NO",
        "PO_NUMBER",
        "MRN_NUMBER",
        "QUOTATION_LINK",
        "PO_LINK",
        "MRN_LINK",
        "INDENT_LINK",
        "APPROVAL_NO",
    ] {
        fields.push(FieldSpec::new(name, offset));
        offset += 1;
    }
    fields
}

fn quotations_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("QUOTATION_NO", 0),
        FieldSpec::new("UID", 1),
        FieldSpec::new("VENDOR", 2),
        FieldSpec::new("RATE", 3),
        FieldSpec::new("VALIDITY", 4),
        FieldSpec::new("QUOTATION_LINK", 5),
    ]
}

fn po_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("PO_NUMBER", 0),
        FieldSpec::new("UID", 1),
        FieldSpec::new("SITE_NAME", 2),
        FieldSpec::new("MATERIAL", 3),
        FieldSpec::new("QTY", 4),
        FieldSpec::new("RATE", 5),
        FieldSpec::new("VENDOR", 6),
        FieldSpec::new("PO_DATE", 7),
        FieldSpec::new("PO_LINK", 8),
    ]
}

fn mrn_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("MRN_NUMBER", 0),
        FieldSpec::new("PO_NUMBER", 1),
        FieldSpec::new("UID", 2),
        FieldSpec::new("RECEIVED_QTY", 3),
        FieldSpec::new("RECEIVED_DATE", 4),
        FieldSpec::new("CONDITION", 5),
        FieldSpec::new("MRN_LINK", 6),
    ]
}

fn base_projection() -> Vec<String> {
    [
        "UID",
        "REQ_NO",
        "SITE_NAME",
        "MATERIAL",
        "QTY",
        "UNIT",
        "REQUESTED_BY",
        ACTION_FIELD,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl StageCatalog {
    /// The procurement pipeline as shipped.
    pub fn procurement() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            ORDERS_SHEET,
            SheetSchema {
                sheet: ORDERS_SHEET.to_string(),
                header_row: 7,
                origin_col: 1,
                fields: orders_fields(),
                // ORDERS headers drift often enough that a blank strip still
                // has to resolve.
                fallback: Some(orders_fields()),
            },
        );
        schemas.insert(
            QUOTATIONS_SHEET,
            SheetSchema {
                sheet: QUOTATIONS_SHEET.to_string(),
                header_row: 8,
                origin_col: 0,
                fields: quotations_fields(),
                fallback: None,
            },
        );
        schemas.insert(
            PO_SHEET,
            SheetSchema {
                sheet: PO_SHEET.to_string(),
                header_row: 1,
                origin_col: 0,
                fields: po_fields(),
                fallback: None,
            },
        );
        schemas.insert(
            MRN_SHEET,
            SheetSchema {
                sheet: MRN_SHEET.to_string(),
                header_row: 1,
                origin_col: 0,
                fields: mrn_fields(),
                fallback: None,
            },
        );

        let titles: [(&str, &str); STAGE_COUNT] = [
            ("approval", "Approval"),
            ("indent", "Indent"),
            ("quotation", "Get Quotation"),
            ("quotation-approval", "Quotation Approval"),
            ("po", "Generate PO"),
            ("material-receipt", "Material Receipt"),
            ("final-receipt", "Final Receipt"),
            ("mrn", "MRN"),
            ("bill-upload", "Bill Upload"),
            ("bill-check", "Bill Check"),
            ("bill-tally", "Bill Tally"),
            ("payment", "Payment"),
        ];

        let mut stages = Vec::with_capacity(STAGE_COUNT);
        for (i, (slug, title)) in titles.into_iter().enumerate() {
            let n = i + 1;
            let rule = match n {
                // Stage 1 gates on terminal status, not a marker pair.
                1 => StageRule::exclude_status("STATUS", ["APPROVED", "REJECTED"]),
                // Stage 8 is single-sided on purpose; it ignores PLANNED_8.
                8 => StageRule::actual_pending_only("ACTUAL_8"),
                _ => StageRule::planned_pending_actual(
                    format!("PLANNED_{}", n),
                    format!("ACTUAL_{}", n),
                ),
            };
            let mut projection = base_projection();
            if let StageRule::PlannedPendingActual { planned, .. } = &rule {
                projection.push(planned.clone());
            }
            stages.push(StageDefinition {
                slug,
                title,
                sheet: ORDERS_SHEET,
                rule,
                projection,
                actual_field: Some(format!("ACTUAL_{}", n)),
                next_planned_field: (n < STAGE_COUNT).then(|| format!("PLANNED_{}", n + 1)),
            });
        }

        Self { stages, schemas }
    }

    pub fn stage(&self, slug: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.slug == slug)
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }

    pub fn schema(&self, sheet: &str) -> Option<&SheetSchema> {
        self.schemas.get(sheet)
    }

    /// Resolve bindings for a sheet the catalog knows about.
    pub async fn bindings(
        &self,
        store: &dyn TabularStore,
        sheet: &str,
    ) -> Result<Bindings, WorkflowError> {
        let schema = self
            .schema(sheet)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "sheet".to_string(),
                value: sheet.to_string(),
                reason: "not in the stage catalog".to_string(),
            })?;
        Ok(schema::resolve(store, schema).await?.bindings)
    }
}

/// Rows currently pending at a stage, projected for the frontend.
///
/// An empty result is normal filtering, not an error; the HTTP layer decides
/// how to present it (the data endpoints answer 404 with the rule echoed
/// back).
pub async fn stage_rows(
    store: &dyn TabularStore,
    catalog: &StageCatalog,
    slug: &str,
) -> Result<Vec<ProjectedRow>, WorkflowError> {
    let def = catalog
        .stage(slug)
        .ok_or_else(|| ValidationError::UnknownStage(slug.to_string()))?;
    let bindings = catalog.bindings(store, def.sheet).await?;
    let rows = store
        .get_range(
            def.sheet,
            GridRange {
                start_row: bindings.data_start_row(),
                start_col: bindings.origin_col(),
                end_row: None,
                end_col: Some(bindings.origin_col() + bindings.max_offset()),
            },
        )
        .await?;
    debug!(stage = slug, rows = rows.len(), "stage filter input");
    Ok(filter_rows(&rows, &def.rule, &bindings, &def.projection)?)
}

/// Error describing an empty stage, for the HTTP layer's 404 body.
pub fn empty_stage_error(catalog: &StageCatalog, slug: &str) -> WorkflowError {
    match catalog.stage(slug) {
        Some(def) => NotFoundError::EmptyStage {
            sheet: def.sheet.to_string(),
            filter: def.rule.describe(),
        }
        .into(),
        None => ValidationError::UnknownStage(slug.to_string()).into(),
    }
}

/// Complete a stage for one row: stamp its ACTUAL column and the next
/// stage's PLANNED column with the same timestamp, plus any caller-supplied
/// field values. The stamp makes the row invisible to this stage's filter
/// and eligible for the next stage's in one write.
pub async fn complete_stage(
    store: &dyn TabularStore,
    catalog: &StageCatalog,
    slug: &str,
    uid: &str,
    stamp: &str,
    extra: Vec<FieldUpdate>,
) -> Result<(), WorkflowError> {
    let def = catalog
        .stage(slug)
        .ok_or_else(|| ValidationError::UnknownStage(slug.to_string()))?;
    let bindings = catalog.bindings(store, def.sheet).await?;

    let mut updates = extra;
    if let Some(actual) = &def.actual_field {
        updates.push(FieldUpdate::new(actual.clone(), stamp));
    }
    if let Some(planned) = &def.next_planned_field {
        updates.push(FieldUpdate::new(planned.clone(), stamp));
    }
    update_by_key(store, &bindings, "UID", uid, &updates).await?;
    debug!(stage = slug, uid, "stage completed");
    Ok(())
}
