//! Stage-Gate Filter
//!
//! The predicate engine behind every "<stage>-data" endpoint: given the raw
//! rows of a sheet and a declarative rule over one or two named columns,
//! decide which rows are pending at that stage and project them into the
//! shape the frontend consumes.
//!
//! Three rule shapes exist in the pipeline and they are deliberately kept
//! distinct. The single-sided `ActualPendingOnly` rule (the MRN stage) is not
//! a degenerate `PlannedPendingActual`; it intentionally ignores its PLANNED
//! column.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StageRuleError;
use crate::schema::Bindings;

/// Reserved projection field consumed by the UI only; always projected as
/// empty, never read from the row.
pub const ACTION_FIELD: &str = "Action";

/// Declarative per-stage predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRule {
    /// Pending: stage was scheduled (PLANNED set) but has not completed
    /// (ACTUAL empty).
    PlannedPendingActual { planned: String, actual: String },
    /// Pending: stage has not completed, regardless of scheduling.
    ActualPendingOnly { actual: String },
    /// Visible: status column's trimmed, uppercased value is not excluded.
    ExcludeStatus {
        status: String,
        excluded: BTreeSet<String>,
    },
}

impl StageRule {
    pub fn planned_pending_actual(planned: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::PlannedPendingActual {
            planned: planned.into(),
            actual: actual.into(),
        }
    }

    pub fn actual_pending_only(actual: impl Into<String>) -> Self {
        Self::ActualPendingOnly {
            actual: actual.into(),
        }
    }

    pub fn exclude_status<I, S>(status: impl Into<String>, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ExcludeStatus {
            status: status.into(),
            excluded: excluded.into_iter().map(|s| s.into().to_uppercase()).collect(),
        }
    }

    /// Human-readable description, echoed back in "no data" responses.
    pub fn describe(&self) -> String {
        match self {
            Self::PlannedPendingActual { planned, actual } => {
                format!("{} set and {} empty", planned, actual)
            }
            Self::ActualPendingOnly { actual } => format!("{} empty", actual),
            Self::ExcludeStatus { status, excluded } => {
                let values: Vec<&str> = excluded.iter().map(|s| s.as_str()).collect();
                format!("{} not in {{{}}}", status, values.join(", "))
            }
        }
    }

    /// Resolve every column the rule needs, failing fast on unbound fields.
    fn resolve_offsets(&self, bindings: &Bindings) -> Result<ResolvedRule, StageRuleError> {
        let context = format!("stage rule [{}]", self.describe());
        Ok(match self {
            Self::PlannedPendingActual { planned, actual } => ResolvedRule::PlannedPendingActual {
                planned: bindings.require(&context, planned)?,
                actual: bindings.require(&context, actual)?,
            },
            Self::ActualPendingOnly { actual } => ResolvedRule::ActualPendingOnly {
                actual: bindings.require(&context, actual)?,
            },
            Self::ExcludeStatus { status, excluded } => ResolvedRule::ExcludeStatus {
                status: bindings.require(&context, status)?,
                excluded: excluded.clone(),
            },
        })
    }
}

enum ResolvedRule {
    PlannedPendingActual { planned: usize, actual: usize },
    ActualPendingOnly { actual: usize },
    ExcludeStatus {
        status: usize,
        excluded: BTreeSet<String>,
    },
}

impl ResolvedRule {
    fn passes(&self, row: &[String]) -> bool {
        match self {
            Self::PlannedPendingActual { planned, actual } => {
                !cell(row, *planned).is_empty() && cell(row, *actual).is_empty()
            }
            Self::ActualPendingOnly { actual } => cell(row, *actual).is_empty(),
            Self::ExcludeStatus { status, excluded } => {
                !excluded.contains(&cell(row, *status).to_uppercase())
            }
        }
    }
}

/// Trimmed cell at an offset; offsets past the row's populated extent read
/// as empty (ranges come back ragged from the store).
fn cell(row: &[String], offset: usize) -> &str {
    row.get(offset).map(|s| s.trim()).unwrap_or("")
}

/// Row projection exposed to callers. BTreeMap keeps JSON key order
/// deterministic across requests.
pub type ProjectedRow = BTreeMap<String, String>;

/// Filter `rows` (origin-relative, starting at the sheet's first data row)
/// by `rule` and project matches through `projection`.
///
/// Pure over its inputs: rows failing the predicate are dropped silently,
/// all-blank sentinel rows are skipped, and projected objects carrying no
/// payload beyond reserved fields are discarded. Row order is preserved.
pub fn filter_rows(
    rows: &[Vec<String>],
    rule: &StageRule,
    bindings: &Bindings,
    projection: &[String],
) -> Result<Vec<ProjectedRow>, StageRuleError> {
    let resolved = rule.resolve_offsets(bindings)?;

    // Resolve projection offsets up front so a misdeclared field map fails
    // loudly instead of producing confusing empty output.
    let mut projected_offsets: Vec<(String, Option<usize>)> = Vec::with_capacity(projection.len());
    for name in projection {
        if name == ACTION_FIELD {
            projected_offsets.push((name.clone(), None));
        } else {
            let offset = bindings.require("projection field map", name)?;
            projected_offsets.push((name.clone(), Some(offset)));
        }
    }

    let mut out = Vec::new();
    for row in rows {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue; // sentinel row
        }
        if !resolved.passes(row) {
            continue;
        }

        let mut projected = ProjectedRow::new();
        let mut has_payload = false;
        for (name, offset) in &projected_offsets {
            let value = match offset {
                Some(o) => cell(row, *o).to_string(),
                None => String::new(),
            };
            if offset.is_some() && !value.is_empty() {
                has_payload = true;
            }
            projected.insert(name.clone(), value);
        }
        // A stray cell can make a row "material" while the projected fields
        // carry nothing; those rows are noise, not data.
        if has_payload {
            out.push(projected);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use rand::Rng;

    fn bindings() -> Bindings {
        Bindings::from_fields(
            "ORDERS",
            1,
            0,
            &[
                FieldSpec::new("UID", 0),
                FieldSpec::new("STATUS", 1),
                FieldSpec::new("PLANNED_3", 2),
                FieldSpec::new("ACTUAL_3", 3),
            ],
        )
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn projection() -> Vec<String> {
        vec!["UID".to_string(), ACTION_FIELD.to_string()]
    }

    #[test]
    fn planned_pending_actual_selects_exactly_pending_rows() {
        // Scenario: one pending, one unscheduled, one completed.
        let rows = vec![
            row(&["1", "", "2024-01-01", ""]),
            row(&["2", "", "", ""]),
            row(&["3", "", "2024-01-02", "2024-01-03"]),
        ];
        let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["UID"], "1");
        assert_eq!(out[0][ACTION_FIELD], "");
    }

    #[test]
    fn whitespace_only_cells_count_as_empty() {
        let mut rng = rand::thread_rng();
        let ws_chars = [' ', '\t', '\u{a0}'];
        for _ in 0..50 {
            let len = rng.gen_range(0..6);
            let ws: String = (0..len)
                .map(|_| ws_chars[rng.gen_range(0..ws_chars.len())])
                .collect();
            let rows = vec![row(&["1", "", &ws, &ws])];
            let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
            let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
            assert!(
                out.is_empty(),
                "whitespace-only PLANNED {:?} must be treated as empty",
                ws
            );
        }
    }

    #[test]
    fn actual_pending_only_ignores_planned() {
        let rows = vec![
            row(&["1", "", "", ""]),
            row(&["2", "", "set", "done"]),
        ];
        let rule = StageRule::actual_pending_only("ACTUAL_3");
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["UID"], "1");
    }

    #[test]
    fn exclude_status_is_case_insensitive() {
        let rows = vec![
            row(&["1", "approved", "", ""]),
            row(&["2", "Pending", "", ""]),
            row(&["3", " REJECTED ", "", ""]),
        ];
        let rule = StageRule::exclude_status("STATUS", ["APPROVED", "REJECTED"]);
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["UID"], "2");
    }

    #[test]
    fn sentinel_rows_are_skipped() {
        let rows = vec![
            row(&["", "  ", "", ""]),
            row(&[]),
            row(&["1", "", "x", ""]),
        ];
        let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn payloadless_projections_are_dropped() {
        // Row is material via STATUS, but the projection only reads UID,
        // which is blank.
        let rows = vec![row(&["", "stray", "x", ""])];
        let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn unbound_rule_field_fails_fast() {
        let rows = vec![row(&["1", "", "x", ""])];
        let rule = StageRule::planned_pending_actual("PLANNED_9", "ACTUAL_9");
        let err = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap_err();
        assert!(matches!(err, StageRuleError::UnboundField { .. }));
    }

    #[test]
    fn filtering_is_idempotent() {
        let rows = vec![
            row(&["1", "", "a", ""]),
            row(&["2", "", "b", "c"]),
        ];
        let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
        let first = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        let second = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn row_order_is_preserved() {
        let rows = vec![
            row(&["9", "", "x", ""]),
            row(&["1", "", "x", ""]),
            row(&["5", "", "x", ""]),
        ];
        let rule = StageRule::planned_pending_actual("PLANNED_3", "ACTUAL_3");
        let out = filter_rows(&rows, &rule, &bindings(), &projection()).unwrap();
        let uids: Vec<&str> = out.iter().map(|r| r["UID"].as_str()).collect();
        assert_eq!(uids, ["9", "1", "5"]);
    }
}
