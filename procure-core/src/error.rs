//! Error taxonomy for the stage-gate engine
//!
//! Expected, frequent conditions (validation failures, empty filters, missing
//! keys) get their own variants so handlers can map them to 4xx responses
//! without string matching. Schema, rule and store errors indicate config or
//! infrastructure defects and surface as 5xx.

use thiserror::Error;

/// Crate-level error, aggregating every sub-concern.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Stage rule error: {0}")]
    StageRule(#[from] StageRuleError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("Render error: {0}")]
    Render(#[from] RendererError),

    #[error("Partial failure: {0}")]
    Partial(#[from] PartialFailure),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Header row unreadable or unusable and no fallback defined for the sheet.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("sheet '{sheet}': header row {row} is blank and no fallback field set is defined")]
    UnusableHeader { sheet: String, row: usize },
}

/// A rule or projection references a column with no binding. Indicates a
/// programming/config defect, not a data issue; never treated as "no data".
#[derive(Error, Debug)]
pub enum StageRuleError {
    #[error("{context}: field '{field}' has no column binding in sheet '{sheet}'")]
    UnboundField {
        context: String,
        field: String,
        sheet: String,
    },
}

/// A business key or filter matched zero rows. Frequent and non-fatal.
#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("no row in sheet '{sheet}' where {key_field} = '{key_value}'")]
    RowNotFound {
        sheet: String,
        key_field: String,
        key_value: String,
    },

    #[error("no rows matched filter [{filter}] on sheet '{sheet}'")]
    EmptyStage { sheet: String, filter: String },
}

/// Caller-supplied payload failed basic shape/type checks.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' has invalid value '{value}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("unknown workflow stage '{0}'")]
    UnknownStage(String),
}

/// Tabular store adapter failure (network, quota, permission, capacity).
/// Transient from the engine's point of view; no automatic retries here,
/// retries around sequence allocation risk duplicate IDs.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),

    #[error("write to sheet '{sheet}' at row {row}, column {col} exceeds current capacity")]
    OutOfCapacity {
        sheet: String,
        row: usize,
        col: usize,
    },

    #[error("malformed store response: {0}")]
    MalformedResponse(String),
}

/// Blob store adapter failure.
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("blob API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("blob not found: {0}")]
    NotFound(String),
}

/// Document renderer failure.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("template registration failed: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("template rendering failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("no template registered for document kind '{0}'")]
    UnknownKind(String),
}

/// A document pipeline run that succeeded partway: the caller needs to know
/// which sub-steps completed to reconcile (orphaned uploads in particular).
#[derive(Error, Debug)]
#[error(
    "document pipeline failed at step '{failed_step}': {detail} \
     (completed: {completed:?}, orphan cleaned: {orphan_cleaned})"
)]
pub struct PartialFailure {
    pub completed: Vec<String>,
    pub failed_step: String,
    pub detail: String,
    /// Whether the compensating blob delete succeeded.
    pub orphan_cleaned: bool,
}

/// Environment configuration failure at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable '{0}'")]
    MissingVar(String),

    #[error("environment variable '{var}' has invalid value '{value}'")]
    InvalidVar { var: String, value: String },
}
