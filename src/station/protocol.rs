//! Station HTTP API payloads.
//!
//! | Endpoint                      | Method | Body                      | Reply                          |
//! |-------------------------------|--------|---------------------------|--------------------------------|
//! | `/api/get_experiment_types`   | GET    | -                         | `{routine: {parameters: {..}}}` |
//! | `/api/add_experiment`         | POST   | form, flat                | 2xx or error text              |
//! | `/api/get_updates`            | POST   | form `from_timestamp`     | `{timestamp, updates}`         |
//! | `/api/station_run_tables`     | POST   | -                         | `[{state, parameters}, ..]`    |
//! | `/api/station_overview`       | POST   | -                         | status summary                 |
//! | `/api/start`, `/api/stop`     | POST   | -                         | ignored                        |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::catalog::{ParameterDefinition, RoutineDefinition};
use crate::model::TypedValue;

pub const EXPERIMENT_TYPES_PATH: &str = "get_experiment_types";
pub const ADD_EXPERIMENT_PATH: &str = "add_experiment";
pub const UPDATES_PATH: &str = "get_updates";
pub const RUN_TABLES_PATH: &str = "station_run_tables";
pub const OVERVIEW_PATH: &str = "station_overview";
pub const START_PATH: &str = "start";
pub const STOP_PATH: &str = "stop";

/// State a run table entry reports while the station executes it.
pub const RUNNING_STATE: &str = "Running";

// =============================================================================
// Routine catalog
// =============================================================================

/// Parse the `get_experiment_types` reply, keeping the station's ordering.
///
/// Each parameter is `[dataType, unit]`; a missing or null unit is empty.
/// A routine with a missing or null `parameters` entry has no parameters.
pub fn parse_experiment_types(body: &JsonValue) -> Result<Vec<RoutineDefinition>, String> {
    let routines = body
        .as_object()
        .ok_or_else(|| "experiment types must be a JSON object".to_string())?;

    let mut definitions = Vec::with_capacity(routines.len());
    for (routine_name, entry) in routines {
        let empty = Map::new();
        let parameters = match entry.get("parameters") {
            None | Some(JsonValue::Null) => &empty,
            Some(JsonValue::Object(map)) => map,
            Some(_) => {
                return Err(format!(
                    "routine '{routine_name}' has no parameters object"
                ))
            }
        };

        let mut defs = Vec::with_capacity(parameters.len());
        for (name, spec) in parameters {
            let (data_type, unit) = parse_parameter_spec(spec).ok_or_else(|| {
                format!("parameter '{name}' of routine '{routine_name}' is not [dataType, unit]")
            })?;
            defs.push(ParameterDefinition {
                name: name.clone(),
                data_type,
                unit,
            });
        }
        definitions.push(RoutineDefinition {
            name: routine_name.clone(),
            parameters: defs,
        });
    }
    Ok(definitions)
}

fn parse_parameter_spec(spec: &JsonValue) -> Option<(String, String)> {
    let items = spec.as_array()?;
    let data_type = items.first()?.as_str()?.to_string();
    let unit = match items.get(1) {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    Some((data_type, unit))
}

// =============================================================================
// Experiment dispatch
// =============================================================================

/// Flat form sent to `add_experiment`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentPayload {
    /// `{design}-{stage}-{run}`
    pub experiment_id: String,
    /// Routine name.
    pub experiment_type: String,
    pub parameters: Vec<(String, TypedValue)>,
}

impl ExperimentPayload {
    pub fn experiment_id(design_name: &str, sanitized_stage_name: &str, run_id: impl std::fmt::Display) -> String {
        format!("{design_name}-{sanitized_stage_name}-{run_id}")
    }

    /// Form fields: metadata first, then parameters in routine order. A
    /// parameter sharing a metadata key replaces it.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("experiment_id".to_string(), self.experiment_id.clone()),
            ("experiment_type".to_string(), self.experiment_type.clone()),
        ];
        for (name, value) in &self.parameters {
            let value = value.to_string();
            match form.iter_mut().find(|(key, _)| key == name) {
                Some(slot) => slot.1 = value,
                None => form.push((name.clone(), value)),
            }
        }
        form
    }
}

// =============================================================================
// Monitoring
// =============================================================================

/// Summary shown on the station overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationOverview {
    pub status: String,
    #[serde(default)]
    pub running_experiment_name: JsonValue,
    #[serde(default)]
    pub total_experiments_queued: JsonValue,
    #[serde(default)]
    pub current_run_number: JsonValue,
}

impl StationOverview {
    /// Overview of a station that could not be reached.
    pub fn offline() -> Self {
        let offline = JsonValue::String("offline".to_string());
        Self {
            status: "offline".to_string(),
            running_experiment_name: offline.clone(),
            total_experiments_queued: offline.clone(),
            current_run_number: offline,
        }
    }

    /// Make the raw station status readable.
    ///
    /// - `paused` at run 0 has not started yet;
    /// - `ready` without a run number has finished its queue, so the current
    ///   run is reported as the queue length.
    pub fn normalized(mut self) -> Self {
        let status = self.status.to_lowercase();
        if status == "idle" {
            return self;
        }
        if status == "paused" && is_zero(&self.current_run_number) {
            self.status = format!("{} - Not started", self.status);
        } else if status == "ready" && is_blank(&self.current_run_number) {
            self.status = format!("{} - Queue finished", self.status);
            self.running_experiment_name = JsonValue::String("all experiments finished".to_string());
            self.current_run_number = self.total_experiments_queued.clone();
        }
        self
    }
}

fn is_zero(value: &JsonValue) -> bool {
    value.as_f64() == Some(0.0)
}

fn is_blank(value: &JsonValue) -> bool {
    value.as_str() == Some("")
}

/// One entry of `station_run_tables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTableEntry {
    pub state: String,
    #[serde(default)]
    pub parameters: Map<String, JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Parameters of the first running entry, if any.
pub fn active_parameters(entries: &[RunTableEntry]) -> Option<Map<String, JsonValue>> {
    entries
        .iter()
        .find(|e| e.state == RUNNING_STATE)
        .map(|e| e.parameters.clone())
}

/// Reply of `get_updates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    pub timestamp: JsonValue,
    #[serde(default)]
    pub updates: JsonValue,
}

impl UpdatesResponse {
    /// Value to send as `from_timestamp` on the next poll.
    pub fn next_from_timestamp(&self) -> Option<String> {
        match &self.timestamp {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
