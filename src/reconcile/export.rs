//! Stage to spreadsheet.

use crate::error::AppResult;
use crate::model::StageId;
use crate::store::{ParameterScope, Tables};

use super::table::{SpreadsheetFormat, Table};
use super::RUN_ID_COLUMN;

/// A downloadable spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExport {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub fn export_filename(
    sanitized_stage_name: &str,
    scope: ParameterScope,
    format: SpreadsheetFormat,
) -> String {
    let kind = match scope {
        ParameterScope::DynamicOnly => "dynamic",
        ParameterScope::All => "all",
    };
    format!("{sanitized_stage_name}_{kind}_parameters.{}", format.extension())
}

/// Build the table for a stage: `run_id` then the routine's parameters in
/// declared order. Static parameters show the catalog default; a missing
/// dynamic value is an empty cell. A stage without runs yields the header only.
pub(crate) fn stage_table(t: &Tables, stage_id: StageId, scope: ParameterScope) -> AppResult<Table> {
    let stage = t.stage(stage_id)?;
    let params = t.routine_parameters(stage.routine_id, scope)?;

    let mut headers = Vec::with_capacity(params.len() + 1);
    headers.push(RUN_ID_COLUMN.to_string());
    headers.extend(params.iter().map(|p| p.name.clone()));
    let mut table = Table::new(headers);

    for run in t.stage_runs(stage_id) {
        let mut row = Vec::with_capacity(params.len() + 1);
        row.push(run.id.to_string());
        for param in &params {
            let cell = if param.is_static {
                param.default_value.to_string()
            } else {
                t.find_value(run.id, param.id)
                    .map(|v| v.value.to_string())
                    .unwrap_or_default()
            };
            row.push(cell);
        }
        table.rows.push(row);
    }
    Ok(table)
}

pub(crate) fn export_stage(
    t: &Tables,
    stage_id: StageId,
    scope: ParameterScope,
    format: SpreadsheetFormat,
) -> AppResult<StageExport> {
    let table = stage_table(t, stage_id, scope)?;
    let stage = t.stage(stage_id)?;
    Ok(StageExport {
        filename: export_filename(&stage.sanitized_name(), scope, format),
        content_type: format.content_type(),
        bytes: table.encode(format)?,
    })
}
