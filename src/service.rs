//! Application facade.
//!
//! `LabService` wires the components to one store and one transport and is
//! the surface an outer layer (the CLI, a web front end) calls. Every
//! operation that acts for a user checks the [`Actor`] before touching state:
//! design owners mutate, shared users and groups read, administrators manage
//! stations and the catalog.

use std::sync::Arc;

use tracing::info;

use crate::auth::Actor;
use crate::catalog::{Catalog, RoutineImportReport};
use crate::config::Settings;
use crate::designs::Designs;
use crate::error::{AppResult, LabError};
use crate::model::{
    Design, DesignId, ParameterId, Routine, RoutineId, Run, RunId, StageId, Station, StationId,
    TypedValue, Value, ValueId,
};
use crate::reconcile::{
    validate_upload_filename, ImportSummary, ReconciliationEngine, SpreadsheetFormat, StageExport,
};
use crate::registry::{StationRegistry, StationSpec};
use crate::runs::{ParameterValuePairs, RunStore};
use crate::station::{BatchReport, StagesReport, StationClient, StationTransport};
use crate::store::{ParameterScope, Store};

#[derive(Debug, Clone)]
pub struct LabService {
    store: Arc<Store>,
    registry: StationRegistry,
    catalog: Catalog,
    runs: RunStore,
    designs: Designs,
    reconcile: ReconciliationEngine,
    client: StationClient,
}

impl LabService {
    pub fn new(store: Arc<Store>, transport: Arc<dyn StationTransport>, settings: &Settings) -> Self {
        Self {
            registry: StationRegistry::new(store.clone()),
            catalog: Catalog::new(store.clone()),
            runs: RunStore::new(store.clone()),
            designs: Designs::new(store.clone()),
            reconcile: ReconciliationEngine::new(store.clone()),
            client: StationClient::new(
                store.clone(),
                transport,
                &settings.station,
                settings.monitor.clone(),
            ),
            store,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn designs(&self) -> &Designs {
        &self.designs
    }

    pub fn client(&self) -> &StationClient {
        &self.client
    }

    fn stage_design(&self, stage_id: StageId) -> AppResult<Design> {
        self.store.read(|t| {
            let stage = t.stage(stage_id)?;
            t.design(stage.design_id).cloned()
        })
    }

    fn require_stage_owner(&self, actor: &Actor, stage_id: StageId) -> AppResult<()> {
        actor.require_owner(&self.stage_design(stage_id)?)
    }

    fn require_stage_read(&self, actor: &Actor, stage_id: StageId) -> AppResult<()> {
        actor.require_read(&self.stage_design(stage_id)?)
    }

    // =========================================================================
    // Station and catalog administration
    // =========================================================================

    pub fn add_station(&self, actor: &Actor, spec: StationSpec) -> AppResult<Station> {
        actor.require_admin()?;
        self.registry.add_station(spec)
    }

    pub fn update_station(&self, actor: &Actor, id: StationId, spec: StationSpec) -> AppResult<Station> {
        actor.require_admin()?;
        self.registry.update_station(id, spec)
    }

    pub fn delete_station(&self, actor: &Actor, id: StationId) -> AppResult<()> {
        actor.require_admin()?;
        self.registry.delete_station(id)
    }

    pub fn unregister_routine(&self, actor: &Actor, station: StationId, routine: RoutineId) -> AppResult<()> {
        actor.require_admin()?;
        self.registry.unregister_routine(station, routine)
    }

    /// Pull the station's experiment types into the catalog.
    pub async fn sync_routines(&self, actor: &Actor, station: StationId) -> AppResult<RoutineImportReport> {
        actor.require_admin()?;
        self.client.pull_routines(station).await
    }

    pub fn toggle_static(&self, actor: &Actor, parameter: ParameterId) -> AppResult<bool> {
        actor.require_admin()?;
        self.catalog.toggle_static(parameter)
    }

    pub fn set_default_value(&self, actor: &Actor, parameter: ParameterId, raw: &str) -> AppResult<TypedValue> {
        actor.require_admin()?;
        self.catalog.set_default_value(parameter, raw)
    }

    pub fn rename_routine(&self, actor: &Actor, routine: RoutineId, name: &str, note: Option<String>) -> AppResult<Routine> {
        actor.require_admin()?;
        self.catalog.rename_routine(routine, name, note)
    }

    pub fn set_routine_parameters(&self, actor: &Actor, routine: RoutineId, parameters: Vec<ParameterId>) -> AppResult<Routine> {
        actor.require_admin()?;
        self.catalog.set_routine_parameters(routine, parameters)
    }

    pub fn delete_routine(&self, actor: &Actor, routine: RoutineId) -> AppResult<()> {
        actor.require_admin()?;
        self.catalog.delete_routine(routine)
    }

    // =========================================================================
    // Stage data
    // =========================================================================

    /// Spreadsheet of a stage for anyone who can read its design.
    /// Download a stage as an `.xlsx` workbook.
    pub fn download_stage(&self, actor: &Actor, stage: StageId, dynamic_only: bool) -> AppResult<StageExport> {
        self.download_stage_as(actor, stage, dynamic_only, SpreadsheetFormat::Xlsx)
    }

    pub fn download_stage_as(
        &self,
        actor: &Actor,
        stage: StageId,
        dynamic_only: bool,
        format: SpreadsheetFormat,
    ) -> AppResult<StageExport> {
        self.require_stage_read(actor, stage)?;
        self.reconcile.export_stage_as(stage, dynamic_only, format)
    }

    /// Apply an uploaded `.xlsx` or `.csv` file to a stage.
    pub fn upload_stage(
        &self,
        actor: &Actor,
        stage: StageId,
        filename: &str,
        bytes: &[u8],
        dynamic_only: bool,
    ) -> AppResult<ImportSummary> {
        let format = validate_upload_filename(filename)?;
        self.require_stage_owner(actor, stage)?;
        self.reconcile.import_stage(stage, format, bytes, dynamic_only)
    }

    /// Create a run from manually entered values.
    pub fn add_run_from_form(
        &self,
        actor: &Actor,
        stage: StageId,
        values: &[(ParameterId, String)],
    ) -> AppResult<(Run, Vec<Value>)> {
        self.require_stage_owner(actor, stage)?;
        self.runs.add_run_with_values(stage, values)
    }

    pub fn update_value(&self, actor: &Actor, value: ValueId, raw: &str) -> AppResult<Value> {
        let stage = self.store.read(|t| {
            let run_id = t.value(value)?.run_id;
            Ok(t.run(run_id)?.stage_id)
        })?;
        self.require_stage_owner(actor, stage)?;
        self.runs.update_value(value, raw)
    }

    /// Delete a run of a stage. A run id from another stage is rejected.
    pub fn delete_run(&self, actor: &Actor, stage: StageId, run: RunId) -> AppResult<()> {
        self.require_stage_owner(actor, stage)?;
        if self.runs.run(run)?.stage_id != stage {
            return Err(LabError::validation(format!(
                "Run {run} does not belong to stage {stage}"
            )));
        }
        self.runs.delete_run(run)
    }

    pub fn stage_runs(&self, actor: &Actor, stage: StageId) -> AppResult<Vec<Run>> {
        self.require_stage_read(actor, stage)?;
        self.runs.runs_in_stage(stage)
    }

    pub fn run_values(&self, actor: &Actor, run: RunId, dynamic_only: bool) -> AppResult<ParameterValuePairs> {
        let stage = self.runs.run(run)?.stage_id;
        self.require_stage_read(actor, stage)?;
        self.runs
            .parameter_value_pairs(run, ParameterScope::from_dynamic_only(dynamic_only))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub async fn send_runs(&self, actor: &Actor, stage: StageId, runs: &[RunId]) -> AppResult<BatchReport> {
        self.require_stage_owner(actor, stage)?;
        self.client.push_batch(stage, runs).await
    }

    pub async fn send_stage(&self, actor: &Actor, stage: StageId) -> AppResult<BatchReport> {
        self.require_stage_owner(actor, stage)?;
        self.client.push_stage(stage).await
    }

    pub async fn send_stages(&self, actor: &Actor, design: DesignId, stages: &[StageId]) -> AppResult<StagesReport> {
        let owned = self.store.read(|t| t.design(design).cloned())?;
        actor.require_owner(&owned)?;
        let report = self.client.push_stages(design, stages).await?;
        info!(
            design = %design,
            user = %actor.user_id,
            stages = report.submitted.len(),
            "design stages dispatched"
        );
        Ok(report)
    }
}
