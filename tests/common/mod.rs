#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;

use labflow::auth::Actor;
use labflow::config::Settings;
use labflow::model::{Parameter, RoutineId, StageId, StationId, UserId};
use labflow::registry::StationSpec;
use labflow::station::{Method, MockReply, MockTransport};
use labflow::store::{ParameterScope, Store};
use labflow::LabService;

pub const STATION_ADDRESS: &str = "10.1.2.3:8000";

/// A station advertising the Titration routine, one design with one stage.
pub struct Lab {
    pub service: LabService,
    pub mock: MockTransport,
    pub owner: Actor,
    pub station: StationId,
    pub routine: RoutineId,
    pub stage: StageId,
    /// `temp` (float, dynamic), `base_name` (str, static, default NaOH)
    pub params: Vec<Parameter>,
}

pub fn titration_catalog() -> serde_json::Value {
    json!({
        "Titration": {
            "parameters": {
                "temp": ["float", "C"],
                "base_name": ["string", ""]
            }
        }
    })
}

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.monitor.updates_interval_ms = 10;
    settings.monitor.run_tables_interval_ms = 10;
    settings.monitor.backoff_initial_ms = 5;
    settings.monitor.backoff_max_ms = 20;
    settings
}

pub async fn lab() -> Lab {
    lab_with(settings()).await
}

pub async fn lab_with(settings: Settings) -> Lab {
    let mock = MockTransport::new();
    let service = LabService::new(Arc::new(Store::new()), Arc::new(mock.clone()), &settings);
    let owner = Actor::admin(UserId(1));

    let station = service
        .add_station(
            &owner,
            StationSpec {
                name: "Titrator".into(),
                address: STATION_ADDRESS.into(),
                api_key: Some("s3cret".into()),
                location: Some("Lab 4".into()),
            },
        )
        .unwrap();

    mock.push(
        Method::Get,
        "get_experiment_types",
        MockReply::json(titration_catalog()),
    );
    let report = service.sync_routines(&owner, station.id).await.unwrap();
    let routine = report.created[0].0;

    let params = service
        .catalog()
        .parameters(routine, ParameterScope::All)
        .unwrap();
    service.toggle_static(&owner, params[1].id).unwrap();
    service
        .set_default_value(&owner, params[1].id, "NaOH")
        .unwrap();
    let params = service
        .catalog()
        .parameters(routine, ParameterScope::All)
        .unwrap();

    let design = service
        .designs()
        .add_design(&owner, "Buffers", station.id)
        .unwrap();
    let stage = service
        .designs()
        .add_stage(&owner, design.id, "pH\tscan", routine)
        .unwrap();

    Lab {
        service,
        mock,
        owner,
        station: station.id,
        routine,
        stage: stage.id,
        params,
    }
}

pub fn csv_text(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).unwrap()
}
