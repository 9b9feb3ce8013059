//! Spreadsheet to stage.
//!
//! The whole file is validated and every row is resolved against the locked
//! tables before the first write. Any failure leaves the store untouched.

use std::collections::HashSet;

use crate::error::{AppResult, EntityKind, LabError};
use crate::model::{Parameter, ParameterId, RunId, StageId, TypedValue, ValueId};
use crate::runs::{insert_run, insert_value};
use crate::store::{ParameterScope, Tables};

use super::table::Table;
use super::RUN_ID_COLUMN;

/// Runs touched by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: Vec<RunId>,
    pub updated: Vec<RunId>,
}

enum RowPlan {
    Create(Vec<(ParameterId, TypedValue)>),
    Update(RunId, Vec<(ValueId, TypedValue)>),
}

/// Check the column layout against the routine's parameter names.
fn validate_columns(table: &Table, params: &[&Parameter]) -> AppResult<()> {
    for (col, name) in table.headers.iter().enumerate() {
        if name == RUN_ID_COLUMN {
            continue;
        }
        if table.rows.iter().any(|row| row[col].is_empty()) {
            return Err(LabError::validation(format!(
                "The parameter {name} contains empty values."
            )));
        }
    }

    let allowed: HashSet<&str> = std::iter::once(RUN_ID_COLUMN)
        .chain(params.iter().map(|p| p.name.as_str()))
        .collect();
    if let Some(unknown) = table.headers.iter().find(|h| !allowed.contains(h.as_str())) {
        return Err(LabError::validation(format!(
            "The dataset contains parameters that are not present in the routine ({unknown})."
        )));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = table.headers.iter().find(|h| !seen.insert(h.as_str())) {
        return Err(LabError::validation(format!(
            "The dataset contains the column {dup} more than once."
        )));
    }

    if table.headers.len() != params.len() + 1 {
        return Err(LabError::validation(format!(
            "The number of parameters in the dataset ({}) does not match the number of parameters in the routine ({}).",
            table.headers.len() - 1,
            params.len()
        )));
    }
    Ok(())
}

/// Parse a `run_id` cell. Spreadsheet tools sometimes write `7.0`.
fn parse_run_id(cell: &str, row_number: usize) -> AppResult<RunId> {
    if let Ok(id) = cell.parse::<RunId>() {
        return Ok(id);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v >= 1.0 && v < u64::MAX as f64 => Ok(RunId(v as u64)),
        _ => Err(LabError::validation(format!(
            "Row {row_number}: run_id '{cell}' is not a valid run id."
        ))),
    }
}

fn plan_rows(
    t: &Tables,
    stage_id: StageId,
    table: &Table,
    params: &[&Parameter],
) -> AppResult<Vec<RowPlan>> {
    let run_col = table.column_index(RUN_ID_COLUMN);
    // Column index to parameter; run_id maps to None.
    let columns: Vec<Option<&Parameter>> = table
        .headers
        .iter()
        .map(|h| params.iter().copied().find(|p| &p.name == h))
        .collect();

    let mut touched = HashSet::new();
    let mut plans = Vec::with_capacity(table.rows.len());
    for (index, row) in table.rows.iter().enumerate() {
        let row_number = index + 2;
        let mut cells = Vec::with_capacity(params.len());
        for (col, param) in columns.iter().enumerate() {
            let Some(param) = param else { continue };
            let value = TypedValue::cast(param.data_type, &row[col]).map_err(|e| {
                LabError::validation(format!("Row {row_number}: parameter {}: {e}", param.name))
            })?;
            // Static parameters report the catalog default; nothing to store.
            if !param.is_static {
                cells.push((*param, value));
            }
        }

        let run_cell = run_col.map(|c| row[c].as_str()).unwrap_or("");
        if run_cell.is_empty() {
            plans.push(RowPlan::Create(
                cells.into_iter().map(|(p, v)| (p.id, v)).collect(),
            ));
            continue;
        }

        let run_id = parse_run_id(run_cell, row_number)?;
        let run = t.run(run_id)?;
        if run.stage_id != stage_id {
            return Err(LabError::validation(format!(
                "Row {row_number}: run {run_id} does not belong to this stage."
            )));
        }
        if !touched.insert(run_id) {
            return Err(LabError::validation(format!(
                "Row {row_number}: run {run_id} appears more than once."
            )));
        }
        let mut updates = Vec::with_capacity(cells.len());
        for (param, value) in cells {
            let existing = t.find_value(run_id, param.id).ok_or_else(|| {
                LabError::not_found(
                    EntityKind::Value,
                    format!("for run {run_id} and parameter {}", param.name),
                )
            })?;
            updates.push((existing.id, value));
        }
        plans.push(RowPlan::Update(run_id, updates));
    }
    Ok(plans)
}

/// Validate `table` against the stage's routine and apply it in one step.
pub(crate) fn import_stage(
    t: &mut Tables,
    stage_id: StageId,
    mut table: Table,
    scope: ParameterScope,
) -> AppResult<ImportSummary> {
    if table.column_index(RUN_ID_COLUMN).is_none() {
        table.push_column(RUN_ID_COLUMN, "");
    }

    let plans = {
        let stage = t.stage(stage_id)?;
        let params = t.routine_parameters(stage.routine_id, scope)?;
        validate_columns(&table, &params)?;
        plan_rows(t, stage_id, &table, &params)?
    };

    let mut summary = ImportSummary::default();
    for plan in plans {
        match plan {
            RowPlan::Create(values) => {
                let run = insert_run(t, stage_id);
                for (pid, value) in values {
                    insert_value(t, run.id, pid, value);
                }
                summary.created.push(run.id);
            }
            RowPlan::Update(run_id, values) => {
                for (value_id, value) in values {
                    t.value_mut(value_id)?.value = value;
                }
                summary.updated.push(run_id);
            }
        }
    }
    Ok(summary)
}
