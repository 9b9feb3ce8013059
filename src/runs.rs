//! Runs and their per-parameter values.
//!
//! A run carries exactly one value per dynamic parameter of its stage's
//! routine. Static parameters are never stored per run; readers substitute the
//! catalog default.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AppResult, LabError};
use crate::model::{
    ParameterId, Run, RunId, RunStatus, StageId, TypedValue, Value, ValueId,
};
use crate::store::{ParameterScope, Store, Tables};

/// `(parameter name, value)` pairs of a run in routine order.
pub type ParameterValuePairs = Vec<(String, TypedValue)>;

/// Collect a run's pairs from locked tables.
///
/// Static parameters report their default. A dynamic parameter without a
/// stored value is left out.
pub(crate) fn collect_pairs(
    t: &Tables,
    run_id: RunId,
    scope: ParameterScope,
) -> AppResult<ParameterValuePairs> {
    let run = t.run(run_id)?;
    let routine = t.stage_routine(run.stage_id)?;
    let mut pairs = Vec::new();
    for param in t.routine_parameters(routine.id, scope)? {
        if param.is_static {
            pairs.push((param.name.clone(), param.default_value.clone()));
        } else if let Some(value) = t.find_value(run_id, param.id) {
            pairs.push((param.name.clone(), value.value.clone()));
        }
    }
    Ok(pairs)
}

/// Check that `parameter_id` belongs to the routine of `stage_id`.
pub(crate) fn ensure_stage_parameter(
    t: &Tables,
    stage_id: StageId,
    parameter_id: ParameterId,
) -> AppResult<()> {
    let routine = t.stage_routine(stage_id)?;
    if routine.parameter_ids.contains(&parameter_id) {
        Ok(())
    } else {
        Err(LabError::validation(format!(
            "Parameter {parameter_id} is not part of routine '{}'",
            routine.name
        )))
    }
}

pub(crate) fn insert_run(t: &mut Tables, stage_id: StageId) -> Run {
    let id = RunId(t.allocate_id());
    let run = Run {
        id,
        stage_id,
        status: RunStatus::Pending,
    };
    t.runs.insert(id, run.clone());
    run
}

pub(crate) fn insert_value(
    t: &mut Tables,
    run_id: RunId,
    parameter_id: ParameterId,
    value: TypedValue,
) -> Value {
    let id = ValueId(t.allocate_id());
    let row = Value {
        id,
        run_id,
        parameter_id,
        value,
    };
    t.insert_value(row.clone());
    row
}

/// Cast `raw` for a parameter, naming the parameter in the error.
pub(crate) fn cast_for(t: &Tables, parameter_id: ParameterId, raw: &str) -> AppResult<TypedValue> {
    let param = t.parameter(parameter_id)?;
    TypedValue::cast(param.data_type, raw)
        .map_err(|e| LabError::validation(format!("Parameter {}: {e}", param.name)))
}

#[derive(Debug, Clone)]
pub struct RunStore {
    store: Arc<Store>,
}

impl RunStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn add_run(&self, stage_id: StageId) -> AppResult<Run> {
        self.store.write(|t| {
            t.stage(stage_id)?;
            Ok(insert_run(t, stage_id))
        })
    }

    /// Create a run together with its values.
    ///
    /// `raw_values` must cover every dynamic parameter of the stage's routine
    /// exactly once and nothing else. Nothing is written if a value is
    /// missing, fails to cast, or names a static or foreign parameter.
    pub fn add_run_with_values(
        &self,
        stage_id: StageId,
        raw_values: &[(ParameterId, String)],
    ) -> AppResult<(Run, Vec<Value>)> {
        let (run, values) = self.store.write(|t| {
            t.stage(stage_id)?;
            let mut seen = HashSet::new();
            let mut planned = Vec::with_capacity(raw_values.len());
            for (pid, raw) in raw_values {
                ensure_stage_parameter(t, stage_id, *pid)?;
                if !seen.insert(*pid) {
                    return Err(LabError::validation(format!(
                        "Parameter {pid} supplied twice"
                    )));
                }
                let param = t.parameter(*pid)?;
                if param.is_static {
                    return Err(LabError::validation(format!(
                        "The parameter {} is static and takes its default value.",
                        param.name
                    )));
                }
                planned.push((*pid, cast_for(t, *pid, raw)?));
            }
            let routine_id = t.stage_routine(stage_id)?.id;
            if let Some(missing) = t
                .routine_parameters(routine_id, ParameterScope::DynamicOnly)?
                .into_iter()
                .find(|p| !seen.contains(&p.id))
            {
                return Err(LabError::validation(format!(
                    "The parameter {} is missing a value.",
                    missing.name
                )));
            }

            let run = insert_run(t, stage_id);
            let values = planned
                .into_iter()
                .map(|(pid, value)| insert_value(t, run.id, pid, value))
                .collect::<Vec<_>>();
            Ok((run, values))
        })?;
        info!(run = %run.id, stage = %stage_id, values = values.len(), "run added");
        Ok((run, values))
    }

    /// Store the first value of a parameter for a run.
    pub fn add_value(&self, parameter_id: ParameterId, raw: &str, run_id: RunId) -> AppResult<Value> {
        self.store.write(|t| {
            let stage_id = t.run(run_id)?.stage_id;
            ensure_stage_parameter(t, stage_id, parameter_id)?;
            if t.find_value(run_id, parameter_id).is_some() {
                return Err(LabError::validation(format!(
                    "Run {run_id} already has a value for parameter {parameter_id}"
                )));
            }
            let value = cast_for(t, parameter_id, raw)?;
            Ok(insert_value(t, run_id, parameter_id, value))
        })
    }

    /// Replace a stored value in place.
    pub fn update_value(&self, value_id: ValueId, raw: &str) -> AppResult<Value> {
        self.store.write(|t| {
            let parameter_id = t.value(value_id)?.parameter_id;
            let cast = cast_for(t, parameter_id, raw)?;
            let row = t.value_mut(value_id)?;
            row.value = cast;
            debug!(value = %value_id, "value updated");
            Ok(row.clone())
        })
    }

    pub fn value(&self, run_id: RunId, parameter_id: ParameterId) -> AppResult<Option<Value>> {
        self.store.read(|t| Ok(t.find_value(run_id, parameter_id).cloned()))
    }

    pub fn run(&self, run_id: RunId) -> AppResult<Run> {
        self.store.read(|t| t.run(run_id).cloned())
    }

    pub fn runs_in_stage(&self, stage_id: StageId) -> AppResult<Vec<Run>> {
        self.store.read(|t| {
            t.stage(stage_id)?;
            Ok(t.stage_runs(stage_id).into_iter().cloned().collect())
        })
    }

    pub fn parameter_value_pairs(&self, run_id: RunId, scope: ParameterScope) -> AppResult<ParameterValuePairs> {
        self.store.read(|t| collect_pairs(t, run_id, scope))
    }

    pub fn set_status(&self, run_id: RunId, status: RunStatus) -> AppResult<()> {
        self.store.write(|t| {
            t.run_mut(run_id)?.status = status;
            Ok(())
        })
    }

    /// Delete a run and its values.
    pub fn delete_run(&self, run_id: RunId) -> AppResult<()> {
        let removed = self.store.write(|t| t.remove_run(run_id))?;
        info!(run = %run_id, values = removed, "run deleted");
        Ok(())
    }
}
