//! In-memory relational store with JSON snapshots.
//!
//! All tables live behind one `RwLock`. Every mutating operation takes the
//! write lock once, so a multi-entity operation either applies completely or
//! not at all. Callers that need several steps (the spreadsheet import) plan
//! against the locked tables first and mutate only after the plan succeeded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::{AppResult, EntityKind, LabError};
use crate::model::{
    Design, DesignId, Parameter, ParameterId, Routine, RoutineId, Run, RunId, Stage, StageId,
    Station, StationId, Value, ValueId,
};

/// Which parameters of a routine an operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterScope {
    All,
    /// Non-static parameters only.
    DynamicOnly,
}

impl ParameterScope {
    pub fn from_dynamic_only(dynamic_only: bool) -> Self {
        if dynamic_only {
            ParameterScope::DynamicOnly
        } else {
            ParameterScope::All
        }
    }

    pub fn includes(self, parameter: &Parameter) -> bool {
        match self {
            ParameterScope::All => true,
            ParameterScope::DynamicOnly => !parameter.is_static,
        }
    }
}

/// Every table of the store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Tables {
    next_id: u64,
    pub stations: BTreeMap<StationId, Station>,
    pub routines: BTreeMap<RoutineId, Routine>,
    pub parameters: BTreeMap<ParameterId, Parameter>,
    pub designs: BTreeMap<DesignId, Design>,
    pub stages: BTreeMap<StageId, Stage>,
    pub runs: BTreeMap<RunId, Run>,
    values: BTreeMap<ValueId, Value>,
    /// `(run, parameter)` to value row. Rebuilt from `values` on load.
    #[serde(skip)]
    value_index: BTreeMap<(RunId, ParameterId), ValueId>,
}

impl Tables {
    /// Allocate a fresh row id. Ids are unique across all tables.
    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn station(&self, id: StationId) -> AppResult<&Station> {
        self.stations
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Station, id))
    }

    pub fn station_mut(&mut self, id: StationId) -> AppResult<&mut Station> {
        self.stations
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Station, id))
    }

    pub fn routine(&self, id: RoutineId) -> AppResult<&Routine> {
        self.routines
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Routine, id))
    }

    pub fn routine_mut(&mut self, id: RoutineId) -> AppResult<&mut Routine> {
        self.routines
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Routine, id))
    }

    pub fn parameter(&self, id: ParameterId) -> AppResult<&Parameter> {
        self.parameters
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Parameter, id))
    }

    pub fn parameter_mut(&mut self, id: ParameterId) -> AppResult<&mut Parameter> {
        self.parameters
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Parameter, id))
    }

    pub fn design(&self, id: DesignId) -> AppResult<&Design> {
        self.designs
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Design, id))
    }

    pub fn design_mut(&mut self, id: DesignId) -> AppResult<&mut Design> {
        self.designs
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Design, id))
    }

    pub fn stage(&self, id: StageId) -> AppResult<&Stage> {
        self.stages
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Stage, id))
    }

    pub fn run(&self, id: RunId) -> AppResult<&Run> {
        self.runs
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Run, id))
    }

    pub fn run_mut(&mut self, id: RunId) -> AppResult<&mut Run> {
        self.runs
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Run, id))
    }

    pub fn value(&self, id: ValueId) -> AppResult<&Value> {
        self.values
            .get(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Value, id))
    }

    pub fn value_mut(&mut self, id: ValueId) -> AppResult<&mut Value> {
        self.values
            .get_mut(&id)
            .ok_or_else(|| LabError::not_found(EntityKind::Value, id))
    }

    /// Routine bound to a stage.
    pub fn stage_routine(&self, stage_id: StageId) -> AppResult<&Routine> {
        let stage = self.stage(stage_id)?;
        self.routine(stage.routine_id)
    }

    /// Parameters of a routine in declared order, filtered by `scope`.
    pub fn routine_parameters(
        &self,
        routine_id: RoutineId,
        scope: ParameterScope,
    ) -> AppResult<Vec<&Parameter>> {
        let routine = self.routine(routine_id)?;
        let mut params = Vec::with_capacity(routine.parameter_ids.len());
        for id in &routine.parameter_ids {
            let param = self.parameter(*id)?;
            if scope.includes(param) {
                params.push(param);
            }
        }
        Ok(params)
    }

    /// Runs of a stage in creation order.
    pub fn stage_runs(&self, stage_id: StageId) -> Vec<&Run> {
        self.runs
            .values()
            .filter(|run| run.stage_id == stage_id)
            .collect()
    }

    /// Stages of a design in creation order.
    pub fn design_stages(&self, design_id: DesignId) -> Vec<&Stage> {
        self.stages
            .values()
            .filter(|stage| stage.design_id == design_id)
            .collect()
    }

    pub fn find_value(&self, run_id: RunId, parameter_id: ParameterId) -> Option<&Value> {
        self.value_index
            .get(&(run_id, parameter_id))
            .and_then(|id| self.values.get(id))
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Insert a value row. A row already stored for the same run and
    /// parameter is replaced.
    pub fn insert_value(&mut self, value: Value) {
        if let Some(old) = self
            .value_index
            .insert((value.run_id, value.parameter_id), value.id)
            .filter(|old| *old != value.id)
        {
            self.values.remove(&old);
        }
        self.values.insert(value.id, value);
    }

    fn run_value_ids(&self, run_id: RunId) -> Vec<ValueId> {
        self.value_index
            .range((run_id, ParameterId(0))..=(run_id, ParameterId(u64::MAX)))
            .map(|(_, id)| *id)
            .collect()
    }

    fn rebuild_value_index(&mut self) {
        self.value_index = self
            .values
            .values()
            .map(|v| ((v.run_id, v.parameter_id), v.id))
            .collect();
    }

    // -------------------------------------------------------------------------
    // Cascading deletes
    // -------------------------------------------------------------------------

    /// Remove a run and its values. Returns the number of values removed.
    pub fn remove_run(&mut self, run_id: RunId) -> AppResult<usize> {
        self.runs
            .remove(&run_id)
            .ok_or_else(|| LabError::not_found(EntityKind::Run, run_id))?;
        let ids = self.run_value_ids(run_id);
        for id in &ids {
            if let Some(value) = self.values.remove(id) {
                self.value_index.remove(&(value.run_id, value.parameter_id));
            }
        }
        Ok(ids.len())
    }

    /// Remove a stage, its runs and their values.
    pub fn remove_stage(&mut self, stage_id: StageId) -> AppResult<()> {
        self.stages
            .remove(&stage_id)
            .ok_or_else(|| LabError::not_found(EntityKind::Stage, stage_id))?;
        let run_ids: Vec<RunId> = self
            .runs
            .values()
            .filter(|r| r.stage_id == stage_id)
            .map(|r| r.id)
            .collect();
        for run_id in run_ids {
            self.remove_run(run_id)?;
        }
        Ok(())
    }

    /// Remove a design and everything it owns.
    pub fn remove_design(&mut self, design_id: DesignId) -> AppResult<()> {
        self.designs
            .remove(&design_id)
            .ok_or_else(|| LabError::not_found(EntityKind::Design, design_id))?;
        let stage_ids: Vec<StageId> = self
            .stages
            .values()
            .filter(|s| s.design_id == design_id)
            .map(|s| s.id)
            .collect();
        for stage_id in stage_ids {
            self.remove_stage(stage_id)?;
        }
        Ok(())
    }
}

/// Thread-safe handle to the tables.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(mut tables: Tables) -> Self {
        tables.rebuild_value_index();
        Self {
            inner: RwLock::new(tables),
        }
    }

    fn read_guard(&self) -> AppResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| LabError::Storage("store lock poisoned".to_string()))
    }

    fn write_guard(&self) -> AppResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| LabError::Storage("store lock poisoned".to_string()))
    }

    /// Run `f` against a consistent read view.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> AppResult<T>) -> AppResult<T> {
        let guard = self.read_guard()?;
        f(&guard)
    }

    /// Run `f` as one transaction. `f` must not mutate before it can no
    /// longer fail; there is no rollback.
    pub fn write<T>(&self, f: impl FnOnce(&mut Tables) -> AppResult<T>) -> AppResult<T> {
        let mut guard = self.write_guard()?;
        f(&mut guard)
    }

    /// Write every table to `path` as JSON.
    pub fn save_snapshot(&self, path: &Path) -> AppResult<()> {
        let json = {
            let guard = self.read_guard()?;
            serde_json::to_vec_pretty(&*guard)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "store snapshot saved");
        Ok(())
    }

    /// Load a snapshot; a missing file yields an empty store.
    pub fn load_snapshot(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no snapshot found, starting with an empty store");
            return Ok(Self::new());
        }
        let bytes = fs::read(path)?;
        let tables: Tables = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            stations = tables.stations.len(),
            designs = tables.designs.len(),
            runs = tables.runs.len(),
            "store snapshot loaded"
        );
        Ok(Self::from_tables(tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, RunStatus, TypedValue, UserId};
    use chrono::Utc;

    fn seeded() -> Tables {
        let mut t = Tables::default();
        let station = StationId(t.allocate_id());
        let routine = RoutineId(t.allocate_id());
        let param = ParameterId(t.allocate_id());
        let design = DesignId(t.allocate_id());
        let stage = StageId(t.allocate_id());
        let run = RunId(t.allocate_id());
        let value = ValueId(t.allocate_id());
        t.stations.insert(
            station,
            Station {
                id: station,
                name: "s1".into(),
                address: "127.0.0.1:8000".into(),
                api_key: None,
                location: None,
                routine_ids: vec![routine],
            },
        );
        t.routines.insert(
            routine,
            Routine {
                id: routine,
                name: "Titration".into(),
                note: None,
                parameter_ids: vec![param],
            },
        );
        t.parameters.insert(
            param,
            Parameter {
                id: param,
                name: "temp".into(),
                unit: "C".into(),
                note: None,
                data_type: DataType::Float,
                is_static: false,
                default_value: TypedValue::Float(0.0),
            },
        );
        t.designs.insert(
            design,
            Design {
                id: design,
                name: "d".into(),
                owner: UserId(1),
                station_id: station,
                created_at: Utc::now(),
                shared_users: vec![],
                shared_groups: vec![],
            },
        );
        t.stages.insert(
            stage,
            Stage {
                id: stage,
                name: "st".into(),
                owner: UserId(1),
                design_id: design,
                routine_id: routine,
                created_at: Utc::now(),
            },
        );
        t.runs.insert(
            run,
            Run {
                id: run,
                stage_id: stage,
                status: RunStatus::Pending,
            },
        );
        t.insert_value(Value {
            id: value,
            run_id: run,
            parameter_id: param,
            value: TypedValue::Float(1.0),
        });
        t
    }

    #[test]
    fn test_design_delete_cascades() {
        let mut t = seeded();
        let design = *t.designs.keys().next().unwrap();
        t.remove_design(design).unwrap();
        assert!(t.stages.is_empty());
        assert!(t.runs.is_empty());
        assert_eq!(t.value_count(), 0);
        assert_eq!(t.parameters.len(), 1);
    }

    #[test]
    fn test_value_index_follows_inserts_and_removals() {
        let mut t = seeded();
        let (run, param) = (RunId(6), ParameterId(3));
        let replacement = ValueId(t.allocate_id());
        t.insert_value(Value {
            id: replacement,
            run_id: run,
            parameter_id: param,
            value: TypedValue::Float(2.0),
        });
        assert_eq!(t.value_count(), 1);
        assert_eq!(t.find_value(run, param).unwrap().id, replacement);

        assert_eq!(t.remove_run(run).unwrap(), 1);
        assert!(t.find_value(run, param).is_none());
        assert_eq!(t.value_count(), 0);
    }

    #[test]
    fn test_missing_lookup_is_not_found() {
        let t = Tables::default();
        let err = t.run(RunId(99)).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = Store::from_tables(seeded());
        store.save_snapshot(&path).unwrap();

        let loaded = Store::load_snapshot(&path).unwrap();
        let (runs, next) = loaded
            .read(|t| Ok((t.runs.len(), t.clone().allocate_id())))
            .unwrap();
        assert_eq!(runs, 1);
        assert_eq!(next, 8);
        let value = loaded
            .read(|t| Ok(t.find_value(RunId(6), ParameterId(3)).cloned()))
            .unwrap();
        assert_eq!(value.unwrap().value, TypedValue::Float(1.0));
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load_snapshot(&dir.path().join("absent.json")).unwrap();
        assert!(store.read(|t| Ok(t.stations.is_empty())).unwrap());
    }
}
