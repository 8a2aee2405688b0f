//! Column Schema Resolver
//!
//! Maps logical field names to fixed column offsets for a sheet and checks
//! the sheet's actual header row against the declared names. Header text
//! varies slightly across sheets ("Site Name" vs "SITE_NAME"), so mismatches
//! are warnings, not errors: the declared offsets are used either way.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{SchemaError, StageRuleError, WorkflowError};
use crate::store::{GridRange, TabularStore};

/// One expected header: logical name at a fixed offset from the origin column.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub offset: usize,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, offset: usize) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

/// Declared shape of one sheet: where the header row sits, which absolute
/// column is offset 0, and the expected fields. `fallback` is used when the
/// header row is entirely blank (some sheets carry decorative banners above
/// real data and an empty header strip).
#[derive(Debug, Clone)]
pub struct SheetSchema {
    pub sheet: String,
    /// 1-indexed header row.
    pub header_row: usize,
    /// 0-indexed absolute column of offset 0.
    pub origin_col: usize,
    pub fields: Vec<FieldSpec>,
    pub fallback: Option<Vec<FieldSpec>>,
}

/// A header cell that did not match its declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMismatch {
    pub offset: usize,
    pub expected: String,
    pub actual: String,
}

/// Logical-name -> offset mapping for one sheet, plus the addressing context
/// every downstream component needs.
#[derive(Debug, Clone)]
pub struct Bindings {
    sheet: String,
    origin_col: usize,
    header_row: usize,
    map: HashMap<String, usize>,
}

impl Bindings {
    pub fn from_fields(
        sheet: impl Into<String>,
        header_row: usize,
        origin_col: usize,
        fields: &[FieldSpec],
    ) -> Self {
        Self {
            sheet: sheet.into(),
            origin_col,
            header_row,
            map: fields.iter().map(|f| (f.name.clone(), f.offset)).collect(),
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// First data row (the row after the header).
    pub fn data_start_row(&self) -> usize {
        self.header_row + 1
    }

    pub fn offset(&self, field: &str) -> Option<usize> {
        self.map.get(field).copied()
    }

    /// Offset lookup that fails fast. A missing binding is a config defect,
    /// never to be read as "column is empty".
    pub fn require(&self, context: &str, field: &str) -> Result<usize, StageRuleError> {
        self.offset(field).ok_or_else(|| StageRuleError::UnboundField {
            context: context.to_string(),
            field: field.to_string(),
            sheet: self.sheet.clone(),
        })
    }

    /// Absolute 0-indexed column for a bound field.
    pub fn absolute_col(&self, context: &str, field: &str) -> Result<usize, StageRuleError> {
        Ok(self.origin_col + self.require(context, field)?)
    }

    /// Largest bound offset, for sizing header reads and appended rows.
    pub fn max_offset(&self) -> usize {
        self.map.values().copied().max().unwrap_or(0)
    }

    pub fn origin_col(&self) -> usize {
        self.origin_col
    }
}

/// Resolver output: usable bindings plus any header drift observed.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub bindings: Bindings,
    pub mismatches: Vec<HeaderMismatch>,
}

/// Normalize header text for display: trim, collapse internal whitespace to
/// single underscores, uppercase.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Key used for comparison: normalized form with underscores removed, so
/// "Site Name", "SITE_NAME" and "SiteName" all compare equal.
fn comparison_key(raw: &str) -> String {
    normalize_header(raw).replace('_', "")
}

/// Fetch the sheet's header row and resolve the declared fields against it.
///
/// Mismatched headers are collected and logged, never fatal. A blank or
/// absent header row falls back to the schema's fallback field set when one
/// is defined; otherwise the request fails with [`SchemaError`].
pub async fn resolve(
    store: &dyn TabularStore,
    schema: &SheetSchema,
) -> Result<ResolvedSchema, WorkflowError> {
    let max_offset = schema.fields.iter().map(|f| f.offset).max().unwrap_or(0);
    let range = GridRange::single_row(
        schema.header_row,
        schema.origin_col,
        schema.origin_col + max_offset,
    );
    let rows = store.get_range(&schema.sheet, range).await?;
    let header: Vec<String> = rows.into_iter().next().unwrap_or_default();

    if header.iter().all(|cell| cell.trim().is_empty()) {
        let fields = schema.fallback.as_ref().ok_or(SchemaError::UnusableHeader {
            sheet: schema.sheet.clone(),
            row: schema.header_row,
        })?;
        warn!(
            sheet = %schema.sheet,
            row = schema.header_row,
            "header row blank, using fallback field set"
        );
        return Ok(ResolvedSchema {
            bindings: Bindings::from_fields(
                &schema.sheet,
                schema.header_row,
                schema.origin_col,
                fields,
            ),
            mismatches: Vec::new(),
        });
    }

    let mut mismatches = Vec::new();
    for field in &schema.fields {
        let actual = header
            .get(field.offset)
            .map(|s| s.as_str())
            .unwrap_or_default();
        if comparison_key(actual) != comparison_key(&field.name) {
            mismatches.push(HeaderMismatch {
                offset: field.offset,
                expected: field.name.clone(),
                actual: actual.to_string(),
            });
        }
    }
    if !mismatches.is_empty() {
        warn!(
            sheet = %schema.sheet,
            count = mismatches.len(),
            first = ?mismatches.first(),
            "header mismatches, proceeding with declared offsets"
        );
    }

    Ok(ResolvedSchema {
        bindings: Bindings::from_fields(
            &schema.sheet,
            schema.header_row,
            schema.origin_col,
            &schema.fields,
        ),
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn schema(fallback: bool) -> SheetSchema {
        SheetSchema {
            sheet: "S".to_string(),
            header_row: 2,
            origin_col: 1,
            fields: vec![
                FieldSpec::new("UID", 0),
                FieldSpec::new("SITE_NAME", 1),
                FieldSpec::new("QTY", 2),
            ],
            fallback: fallback.then(|| vec![FieldSpec::new("UID", 0)]),
        }
    }

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("  Site   Name "), "SITE_NAME");
        assert_eq!(normalize_header("SITE_NAME"), "SITE_NAME");
        assert_eq!(normalize_header("qty"), "QTY");
    }

    #[tokio::test]
    async fn matching_headers_resolve_cleanly() {
        let store = InMemoryStore::new();
        store
            .add_sheet(
                "S",
                vec![
                    row(&["banner"]),
                    row(&["", "uid", "Site Name", " QTY "]),
                ],
            )
            .await;

        let resolved = resolve(&store, &schema(false)).await.unwrap();
        assert!(resolved.mismatches.is_empty());
        assert_eq!(resolved.bindings.offset("SITE_NAME"), Some(1));
        assert_eq!(resolved.bindings.data_start_row(), 3);
        assert_eq!(resolved.bindings.absolute_col("test", "QTY").unwrap(), 3);
    }

    #[tokio::test]
    async fn drifted_headers_are_warnings_not_errors() {
        let store = InMemoryStore::new();
        store
            .add_sheet(
                "S",
                vec![row(&[]), row(&["", "UID", "Vendor", "QTY"])],
            )
            .await;

        let resolved = resolve(&store, &schema(false)).await.unwrap();
        assert_eq!(resolved.mismatches.len(), 1);
        assert_eq!(resolved.mismatches[0].expected, "SITE_NAME");
        assert_eq!(resolved.mismatches[0].actual, "Vendor");
        // Declared offsets still usable.
        assert_eq!(resolved.bindings.offset("SITE_NAME"), Some(1));
    }

    #[tokio::test]
    async fn blank_header_uses_fallback_or_fails() {
        let store = InMemoryStore::new();
        store
            .add_sheet("S", vec![row(&[]), row(&["", "  ", ""])])
            .await;

        let resolved = resolve(&store, &schema(true)).await.unwrap();
        assert_eq!(resolved.bindings.offset("UID"), Some(0));
        assert_eq!(resolved.bindings.offset("SITE_NAME"), None);

        let err = resolve(&store, &schema(false)).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Schema(SchemaError::UnusableHeader { .. })
        ));
    }

    #[test]
    fn require_fails_fast_on_unbound_field() {
        let bindings = Bindings::from_fields("S", 1, 0, &[FieldSpec::new("UID", 0)]);
        let err = bindings.require("rule PLANNED/ACTUAL", "PLANNED_3").unwrap_err();
        assert!(matches!(err, StageRuleError::UnboundField { .. }));
    }
}
