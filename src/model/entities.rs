//! Rows of the experiment store.
//!
//! Ownership is acyclic: a design owns its stages, a stage owns its runs and a
//! run owns its values. Stations, routines and parameters are referenced by
//! id, never owned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    DesignId, GroupId, ParameterId, RoutineId, RunId, StageId, StationId, UserId, ValueId,
};
use super::value::{DataType, TypedValue};

// =============================================================================
// Catalog
// =============================================================================

/// A physical experiment controller reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    /// `host:port`; the scheme is added from configuration.
    pub address: String,
    /// Opaque credential sent as basic auth with user `apikey`.
    pub api_key: Option<String>,
    pub location: Option<String>,
    /// Routines this station exposes.
    pub routine_ids: Vec<RoutineId>,
}

/// Named experiment type with an ordered parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub id: RoutineId,
    pub name: String,
    pub note: Option<String>,
    /// Declared order; exports and payloads follow it.
    pub parameter_ids: Vec<ParameterId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
    pub unit: String,
    pub note: Option<String>,
    pub data_type: DataType,
    /// Static parameters report `default_value` for every run.
    pub is_static: bool,
    pub default_value: TypedValue,
}

// =============================================================================
// Experiments
// =============================================================================

/// User-owned collection of stages for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub id: DesignId,
    pub name: String,
    pub owner: UserId,
    pub station_id: StationId,
    pub created_at: DateTime<Utc>,
    pub shared_users: Vec<UserId>,
    pub shared_groups: Vec<GroupId>,
}

/// One routine-bound phase of a design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    pub owner: UserId,
    pub design_id: DesignId,
    pub routine_id: RoutineId,
    pub created_at: DateTime<Utc>,
}

impl Stage {
    /// Name usable inside identifiers and file names.
    pub fn sanitized_name(&self) -> String {
        strip_control_whitespace(&self.name)
    }
}

/// Dispatch state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Sent,
}

impl RunStatus {
    /// Numeric code shown to users (`0` pending, `1` sent).
    pub fn as_code(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Sent => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub stage_id: StageId,
    pub status: RunStatus,
}

/// Value of one dynamic parameter for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub id: ValueId,
    pub run_id: RunId,
    pub parameter_id: ParameterId,
    pub value: TypedValue,
}

// =============================================================================
// Name helpers
// =============================================================================

/// Normalize a user-supplied design or stage name: tabs, newlines and carriage
/// returns become spaces, then every pair of spaces is removed.
pub fn sanitize_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect();
    replaced.replace("  ", "")
}

/// Drop tabs, newlines and carriage returns.
pub fn strip_control_whitespace(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
