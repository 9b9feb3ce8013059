mod common;

use common::{lab, titration_catalog};
use serde_json::json;

use labflow::model::{DataType, TypedValue};
use labflow::station::{Method, MockReply};
use labflow::store::ParameterScope;
use labflow::LabError;

#[tokio::test]
async fn test_sync_imports_routine_with_ordered_parameters() {
    let lab = lab().await;
    let names = lab
        .service
        .catalog()
        .parameter_names(lab.routine, ParameterScope::All)
        .unwrap();
    assert_eq!(names, vec!["temp", "base_name"]);
    assert_eq!(lab.params[0].data_type, DataType::Float);
    assert_eq!(lab.params[0].unit, "C");
    assert_eq!(lab.params[1].data_type, DataType::Str);
    assert!(lab.params[1].is_static);
    assert_eq!(lab.params[1].default_value, TypedValue::Str("NaOH".into()));

    let request = &lab.mock.requests_to("get_experiment_types")[0];
    assert_eq!(request.method, Method::Get);
    assert!(request.credential.is_some());
}

#[tokio::test]
async fn test_resync_skips_known_and_adds_new_routines() {
    let lab = lab().await;
    let mut catalog = titration_catalog();
    catalog["Mixing"] = json!({"parameters": {"speed": ["int", "rpm"]}});
    lab.mock
        .push(Method::Get, "get_experiment_types", MockReply::json(catalog));

    let report = lab
        .service
        .sync_routines(&lab.owner, lab.station)
        .await
        .unwrap();
    assert_eq!(report.skipped, vec!["Titration".to_string()]);
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].1, "Mixing");

    // The existing routine kept its static flag and default.
    let params = lab
        .service
        .catalog()
        .parameters(lab.routine, ParameterScope::DynamicOnly)
        .unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(
        lab.service.registry().routine_names(lab.station).unwrap(),
        vec!["Titration", "Mixing"]
    );
}

#[tokio::test]
async fn test_sync_failures_are_remote_errors() {
    let lab = lab().await;
    lab.mock.push(
        Method::Get,
        "get_experiment_types",
        MockReply::status(401, "bad key"),
    );
    let err = lab
        .service
        .sync_routines(&lab.owner, lab.station)
        .await
        .unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.status_code(), 502);

    lab.mock.push(
        Method::Get,
        "get_experiment_types",
        MockReply::status(200, "<html>"),
    );
    let err = lab
        .service
        .sync_routines(&lab.owner, lab.station)
        .await
        .unwrap_err();
    assert!(matches!(err, LabError::RemoteProtocol { .. }));
}

#[tokio::test]
async fn test_sync_registers_routine_with_null_parameters() {
    let lab = lab().await;
    lab.mock.push(
        Method::Get,
        "get_experiment_types",
        MockReply::json(json!({
            "Idle": {"parameters": null},
            "Mixing": {"parameters": {"speed": ["int", "rpm"]}}
        })),
    );

    let report = lab
        .service
        .sync_routines(&lab.owner, lab.station)
        .await
        .unwrap();
    let created: Vec<&str> = report.created.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(created, vec!["Idle", "Mixing"]);

    let idle = report.created[0].0;
    assert!(lab
        .service
        .catalog()
        .parameters(idle, ParameterScope::All)
        .unwrap()
        .is_empty());
    assert_eq!(
        lab.service.registry().routine_names(lab.station).unwrap(),
        vec!["Titration", "Idle", "Mixing"]
    );
}
