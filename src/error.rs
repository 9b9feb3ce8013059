//! Custom error types for the application.
//!
//! This module defines the primary error type, `LabError`, for the entire crate.
//! Using the `thiserror` crate, it provides one consistent way to report the
//! failures that can happen while syncing with stations, reconciling tabular
//! uploads, and mutating the experiment store.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: An upload or request does not match the expected schema
//!   (unknown columns, missing parameter columns, empty cells, uncastable values).
//!   The operation is aborted before anything is written.
//! - **`Remote`**: A station could not be reached or answered with a non-2xx status.
//! - **`NotFound`**: An unknown station, routine, parameter, design, stage, run or value id.
//! - **`Unauthorized`**: The acting user does not own the design being mutated, or
//!   lacks the administrator role for catalog administration.
//! - **`WorkbookRead`**: An uploaded `.xlsx` file could not be opened.
//! - **`Config`**, **`Io`**, **`Csv`**, **`WorkbookWrite`**, **`Json`**, **`Storage`**:
//!   ambient failures from configuration loading, file access, spreadsheet
//!   encoding, JSON handling and the store.
//!
//! By using `#[from]`, `LabError` can be created from the underlying error types,
//! so the `?` operator works throughout the crate.

use std::fmt;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LabError>;

/// Kind of entity referenced by a [`LabError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Station,
    Routine,
    Parameter,
    Design,
    Stage,
    Run,
    Value,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Station => "station",
            EntityKind::Routine => "routine",
            EntityKind::Parameter => "parameter",
            EntityKind::Design => "design",
            EntityKind::Stage => "stage",
            EntityKind::Run => "run",
            EntityKind::Value => "value",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LabError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Station at {address} answered with HTTP {status}: {body}")]
    RemoteStatus {
        address: String,
        status: u16,
        body: String,
    },

    #[error("Station at {address} is unreachable: {reason}")]
    RemoteUnreachable { address: String, reason: String },

    #[error("Unexpected response from station at {address}: {reason}")]
    RemoteProtocol { address: String, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unreadable workbook: {0}")]
    WorkbookRead(#[from] calamine::XlsxError),

    #[error("Workbook write error: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LabError {
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        LabError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LabError::Validation(message.into())
    }

    /// True for failures caused by the station rather than by local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            LabError::RemoteStatus { .. }
                | LabError::RemoteUnreachable { .. }
                | LabError::RemoteProtocol { .. }
        )
    }

    /// HTTP status an outer web layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LabError::Validation(_) | LabError::WorkbookRead(_) => 400,
            LabError::RemoteStatus { .. }
            | LabError::RemoteUnreachable { .. }
            | LabError::RemoteProtocol { .. } => 502,
            LabError::NotFound { .. } => 404,
            LabError::Unauthorized(_) => 403,
            LabError::Config(_)
            | LabError::Configuration(_)
            | LabError::Io(_)
            | LabError::Csv(_)
            | LabError::WorkbookWrite(_)
            | LabError::Json(_)
            | LabError::Storage(_) => 500,
        }
    }
}
