//! Reconciliation between spreadsheets and the run/value model.
//!
//! A stage is exchanged as one table: the first column is `run_id`, the
//! remaining columns are named after the routine's parameters. Rows with an
//! empty `run_id` create runs; rows with an id update that run's values.
//! Tables travel as `.xlsx` workbooks by default, CSV is accepted as well.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = ReconciliationEngine::new(store.clone());
//! let export = engine.export_stage(stage_id, true)?;
//! // ... edit export.bytes in a spreadsheet tool ...
//! let summary = engine.import_stage(stage_id, SpreadsheetFormat::Xlsx, &edited, true)?;
//! ```

pub mod export;
pub mod import;
pub mod table;

use std::sync::Arc;

use tracing::info;

use crate::error::{AppResult, LabError};
use crate::model::StageId;
use crate::store::{ParameterScope, Store};

pub use export::{export_filename, StageExport};
pub use import::ImportSummary;
pub use table::{SpreadsheetFormat, Table};

/// Name of the run identifier column.
pub const RUN_ID_COLUMN: &str = "run_id";

/// Format of an upload, from its name. Only `.xlsx` and `.csv` files are read.
pub fn validate_upload_filename(filename: &str) -> AppResult<SpreadsheetFormat> {
    if filename.trim().is_empty() {
        return Err(LabError::validation("No file selected."));
    }
    SpreadsheetFormat::from_filename(filename).ok_or_else(|| {
        LabError::validation(format!(
            "File '{filename}' is not a .xlsx or .csv file."
        ))
    })
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    store: Arc<Store>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Export a stage as an `.xlsx` workbook.
    pub fn export_stage(&self, stage_id: StageId, dynamic_only: bool) -> AppResult<StageExport> {
        self.export_stage_as(stage_id, dynamic_only, SpreadsheetFormat::Xlsx)
    }

    pub fn export_stage_as(
        &self,
        stage_id: StageId,
        dynamic_only: bool,
        format: SpreadsheetFormat,
    ) -> AppResult<StageExport> {
        let scope = ParameterScope::from_dynamic_only(dynamic_only);
        let export = self
            .store
            .read(|t| export::export_stage(t, stage_id, scope, format))?;
        info!(stage = %stage_id, file = %export.filename, bytes = export.bytes.len(), "stage exported");
        Ok(export)
    }

    /// Current stage contents as a table, without serializing.
    pub fn stage_table(&self, stage_id: StageId, dynamic_only: bool) -> AppResult<Table> {
        let scope = ParameterScope::from_dynamic_only(dynamic_only);
        self.store.read(|t| export::stage_table(t, stage_id, scope))
    }

    pub fn import_stage(
        &self,
        stage_id: StageId,
        format: SpreadsheetFormat,
        bytes: &[u8],
        dynamic_only: bool,
    ) -> AppResult<ImportSummary> {
        let table = Table::parse(format, bytes)?;
        self.import_table(stage_id, table, dynamic_only)
    }

    pub fn import_table(&self, stage_id: StageId, table: Table, dynamic_only: bool) -> AppResult<ImportSummary> {
        let scope = ParameterScope::from_dynamic_only(dynamic_only);
        let rows = table.rows.len();
        let summary = self
            .store
            .write(|t| import::import_stage(t, stage_id, table, scope))?;
        info!(
            stage = %stage_id,
            rows,
            created = summary.created.len(),
            updated = summary.updated.len(),
            "stage imported"
        );
        Ok(summary)
    }
}
