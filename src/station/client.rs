//! Station sync client.
//!
//! Every call is a single request with no retry. A failed push is reported
//! and the run stays pending until it is sent again. Batches run
//! sequentially and are not atomic: runs accepted before a failure stay sent.

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{Catalog, RoutineImportReport};
use crate::config::{MonitorConfig, StationConfig};
use crate::error::{AppResult, LabError};
use crate::error_recovery::BackoffPolicy;
use crate::model::{DesignId, RunId, RunStatus, StageId, Station, StationId};
use crate::runs::collect_pairs;
use crate::store::{ParameterScope, Store};

use super::monitor::{spawn_monitor, MonitorHandle, MonitorKind, MonitorTarget};
use super::protocol::{
    active_parameters, parse_experiment_types, ExperimentPayload, RunTableEntry, StationOverview,
    ADD_EXPERIMENT_PATH, EXPERIMENT_TYPES_PATH, OVERVIEW_PATH, RUN_TABLES_PATH, START_PATH,
    STOP_PATH,
};
use super::transport::{Credential, Method, StationRequest, StationResponse, StationTransport};

/// Basic-auth user name paired with a station's API key.
pub const API_KEY_USER: &str = "apikey";

/// Outcome of a batch push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: Vec<RunId>,
    /// Runs the station refused or could not receive, with the reason.
    pub failed: Vec<(RunId, String)>,
    /// Requested ids that do not belong to the stage.
    pub ignored: Vec<RunId>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, other: BatchReport) {
        self.sent.extend(other.sent);
        self.failed.extend(other.failed);
        self.ignored.extend(other.ignored);
    }
}

/// Outcome of pushing several stages of a design.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagesReport {
    pub submitted: Vec<StageId>,
    /// Requested stage ids outside the design.
    pub ignored: Vec<StageId>,
    pub runs: BatchReport,
}

#[derive(Clone)]
pub struct StationClient {
    store: Arc<Store>,
    transport: Arc<dyn StationTransport>,
    scheme: String,
    monitor: MonitorConfig,
}

impl std::fmt::Debug for StationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationClient")
            .field("scheme", &self.scheme)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

fn credential(station: &Station) -> Option<Credential> {
    station.api_key.as_ref().map(|key| Credential {
        username: API_KEY_USER.to_string(),
        password: key.clone(),
    })
}

impl StationClient {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn StationTransport>,
        station: &StationConfig,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            store,
            transport,
            scheme: station.scheme.clone(),
            monitor,
        }
    }

    /// `{scheme}://{address}/api/{path}`
    pub fn endpoint(&self, address: &str, path: &str) -> String {
        format!("{}://{}/api/{}", self.scheme, address, path)
    }

    fn request(&self, station: &Station, method: Method, path: &str) -> StationRequest {
        StationRequest::new(method, self.endpoint(&station.address, path))
            .with_credential(credential(station))
    }

    /// Send and require a 2xx reply.
    async fn exchange(
        &self,
        station: &Station,
        request: StationRequest,
    ) -> AppResult<StationResponse> {
        let response = self.transport.send(request).await.map_err(|e| {
            LabError::RemoteUnreachable {
                address: station.address.clone(),
                reason: e.to_string(),
            }
        })?;
        if !response.is_success() {
            return Err(LabError::RemoteStatus {
                address: station.address.clone(),
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    fn station(&self, id: StationId) -> AppResult<Station> {
        self.store.read(|t| t.station(id).cloned())
    }

    // -------------------------------------------------------------------------
    // Routine sync
    // -------------------------------------------------------------------------

    /// Fetch the station's experiment types and import the new ones.
    pub async fn pull_routines(&self, station_id: StationId) -> AppResult<RoutineImportReport> {
        let station = self.station(station_id)?;
        let request = self.request(&station, Method::Get, EXPERIMENT_TYPES_PATH);
        let response = self.exchange(&station, request).await?;

        let protocol_error = |reason: String| LabError::RemoteProtocol {
            address: station.address.clone(),
            reason,
        };
        let body: JsonValue = response
            .json()
            .map_err(|e| protocol_error(format!("malformed JSON: {e}")))?;
        let definitions = parse_experiment_types(&body).map_err(protocol_error)?;

        Catalog::new(self.store.clone()).import_routines(station_id, &definitions)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    fn payload(&self, run_id: RunId) -> AppResult<(Station, ExperimentPayload)> {
        self.store.read(|t| {
            let run = t.run(run_id)?;
            let stage = t.stage(run.stage_id)?;
            let design = t.design(stage.design_id)?;
            let station = t.station(design.station_id)?.clone();
            let routine = t.routine(stage.routine_id)?;
            let payload = ExperimentPayload {
                experiment_id: ExperimentPayload::experiment_id(
                    &design.name,
                    &stage.sanitized_name(),
                    run_id,
                ),
                experiment_type: routine.name.clone(),
                parameters: collect_pairs(t, run_id, ParameterScope::All)?,
            };
            Ok((station, payload))
        })
    }

    /// Send one run. On a 2xx reply the run is marked sent; otherwise it keeps
    /// its status.
    pub async fn push_run(&self, run_id: RunId) -> AppResult<()> {
        let (station, payload) = self.payload(run_id)?;
        let request = self
            .request(&station, Method::Post, ADD_EXPERIMENT_PATH)
            .with_form(payload.to_form());
        self.exchange(&station, request).await?;

        self.store.write(|t| {
            t.run_mut(run_id)?.status = RunStatus::Sent;
            Ok(())
        })?;
        info!(run = %run_id, experiment_id = %payload.experiment_id, "run sent to station");
        Ok(())
    }

    /// Send the listed runs of a stage one after another. Ids outside the
    /// stage are ignored; a failing run does not stop the batch.
    pub async fn push_batch(&self, stage_id: StageId, run_ids: &[RunId]) -> AppResult<BatchReport> {
        let in_stage: Vec<RunId> = self.store.read(|t| {
            t.stage(stage_id)?;
            Ok(t.stage_runs(stage_id).iter().map(|r| r.id).collect())
        })?;

        let mut report = BatchReport::default();
        for &run_id in run_ids {
            if !in_stage.contains(&run_id) {
                warn!(stage = %stage_id, run = %run_id, "ignoring run outside stage");
                report.ignored.push(run_id);
                continue;
            }
            match self.push_run(run_id).await {
                Ok(()) => report.sent.push(run_id),
                Err(e) => {
                    warn!(stage = %stage_id, run = %run_id, error = %e, "run push failed");
                    report.failed.push((run_id, e.to_string()));
                }
            }
        }
        info!(
            stage = %stage_id,
            sent = report.sent.len(),
            failed = report.failed.len(),
            ignored = report.ignored.len(),
            "batch push finished"
        );
        Ok(report)
    }

    /// Send every run of a stage.
    pub async fn push_stage(&self, stage_id: StageId) -> AppResult<BatchReport> {
        let run_ids: Vec<RunId> = self.store.read(|t| {
            t.stage(stage_id)?;
            Ok(t.stage_runs(stage_id).iter().map(|r| r.id).collect())
        })?;
        self.push_batch(stage_id, &run_ids).await
    }

    /// Send every run of the listed stages that belong to `design_id`.
    pub async fn push_stages(&self, design_id: DesignId, stage_ids: &[StageId]) -> AppResult<StagesReport> {
        let in_design: Vec<StageId> = self.store.read(|t| {
            t.design(design_id)?;
            Ok(t.design_stages(design_id).iter().map(|s| s.id).collect())
        })?;

        let mut report = StagesReport::default();
        for &stage_id in stage_ids {
            if !in_design.contains(&stage_id) {
                warn!(design = %design_id, stage = %stage_id, "ignoring stage outside design");
                report.ignored.push(stage_id);
                continue;
            }
            let batch = self.push_stage(stage_id).await?;
            report.runs.absorb(batch);
            report.submitted.push(stage_id);
        }
        info!(design = %design_id, stages = report.submitted.len(), "stages submitted");
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Monitoring
    // -------------------------------------------------------------------------

    /// Normalized overview; an unreachable or misbehaving station is offline.
    pub async fn station_overview(&self, station_id: StationId) -> AppResult<StationOverview> {
        let station = self.station(station_id)?;
        Ok(self.overview_of(&station).await)
    }

    async fn overview_of(&self, station: &Station) -> StationOverview {
        let request = self.request(station, Method::Post, OVERVIEW_PATH);
        let parsed = match self.exchange(station, request).await {
            Ok(response) => response
                .json::<StationOverview>()
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(overview) => overview.normalized(),
            Err(reason) => {
                warn!(station = %station.id, error = %reason, "station offline");
                StationOverview::offline()
            }
        }
    }

    /// Overview of every registered station, in id order.
    pub async fn overview_all(&self) -> AppResult<Vec<(Station, StationOverview)>> {
        let stations = self
            .store
            .read(|t| Ok(t.stations.values().cloned().collect::<Vec<_>>()))?;
        let mut overviews = Vec::with_capacity(stations.len());
        for station in stations {
            let overview = self.overview_of(&station).await;
            overviews.push((station, overview));
        }
        Ok(overviews)
    }

    async fn run_tables(&self, station: &Station) -> AppResult<Vec<RunTableEntry>> {
        let request = self.request(station, Method::Post, RUN_TABLES_PATH);
        let response = self.exchange(station, request).await?;
        response.json().map_err(|e| LabError::RemoteProtocol {
            address: station.address.clone(),
            reason: format!("malformed run tables: {e}"),
        })
    }

    /// Parameters of the experiment the station is running, if any.
    pub async fn active_experiment_parameters(&self, station_id: StationId) -> AppResult<Option<Map<String, JsonValue>>> {
        let station = self.station(station_id)?;
        let tables = self.run_tables(&station).await?;
        Ok(active_parameters(&tables))
    }

    /// Current value of one parameter of the running experiment.
    pub async fn active_experiment_value(
        &self,
        station_id: StationId,
        parameter_name: &str,
    ) -> AppResult<Option<JsonValue>> {
        Ok(self
            .active_experiment_parameters(station_id)
            .await?
            .and_then(|mut params| params.remove(parameter_name)))
    }

    pub async fn start_station(&self, station_id: StationId) -> AppResult<()> {
        let station = self.station(station_id)?;
        let request = self.request(&station, Method::Post, START_PATH);
        self.exchange(&station, request).await?;
        info!(station = %station_id, "station started");
        Ok(())
    }

    pub async fn stop_station(&self, station_id: StationId) -> AppResult<()> {
        let station = self.station(station_id)?;
        let request = self.request(&station, Method::Post, STOP_PATH);
        self.exchange(&station, request).await?;
        info!(station = %station_id, "station stopped");
        Ok(())
    }

    /// Start a monitoring stream with the configured interval and backoff.
    pub fn monitor(&self, station_id: StationId, kind: MonitorKind) -> AppResult<MonitorHandle> {
        let station = self.station(station_id)?;
        let interval_ms = match kind {
            MonitorKind::Updates => self.monitor.updates_interval_ms,
            MonitorKind::RunTables => self.monitor.run_tables_interval_ms,
        };
        let target = MonitorTarget {
            kind,
            url: self.endpoint(&station.address, kind.path()),
            credential: credential(&station),
            interval: Duration::from_millis(interval_ms),
            backoff: BackoffPolicy::from(&self.monitor),
        };
        Ok(spawn_monitor(self.transport.clone(), target))
    }
}
