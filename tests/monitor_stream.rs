mod common;

use common::{lab, lab_with, settings};
use serde_json::json;
use std::time::Duration;

use labflow::station::{Method, MockReply, MonitorEvent, MonitorKind, StopReason};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(handle: &mut labflow::station::MonitorHandle) -> MonitorEvent {
    tokio::time::timeout(WAIT, handle.next())
        .await
        .expect("monitor event timed out")
        .expect("monitor ended")
}

#[tokio::test]
async fn test_updates_stream_carries_timestamp_forward() {
    let lab = lab().await;
    lab.mock.push(
        Method::Post,
        "get_updates",
        MockReply::json(json!({"timestamp": 100, "updates": {"pump": {"flow": 1.5}}})),
    );
    lab.mock.always(
        Method::Post,
        "get_updates",
        MockReply::json(json!({"timestamp": 200, "updates": {}})),
    );

    let mut handle = lab
        .service
        .client()
        .monitor(lab.station, MonitorKind::Updates)
        .unwrap();
    let first = next_event(&mut handle).await;
    assert_eq!(
        first.to_sse().unwrap(),
        "data:{\"timestamp\":100,\"updates\":{\"pump\":{\"flow\":1.5}}}\n\n"
    );
    next_event(&mut handle).await;
    handle.shutdown().await;

    let requests = lab.mock.requests_to("get_updates");
    assert!(requests.len() >= 2);
    assert_eq!(requests[0].form_value("from_timestamp"), None);
    assert_eq!(requests[1].form_value("from_timestamp"), Some("100"));
}

#[tokio::test]
async fn test_stream_backs_off_and_recovers() {
    let lab = lab().await;
    lab.mock
        .push(Method::Post, "station_run_tables", MockReply::unreachable());
    lab.mock.push(
        Method::Post,
        "station_run_tables",
        MockReply::status(503, "busy"),
    );
    lab.mock.always(
        Method::Post,
        "station_run_tables",
        MockReply::json(json!([{"state": "Queued", "parameters": {}}])),
    );

    let mut handle = lab
        .service
        .client()
        .monitor(lab.station, MonitorKind::RunTables)
        .unwrap();
    match next_event(&mut handle).await {
        MonitorEvent::Payload(payload) => assert_eq!(payload[0]["state"], "Queued"),
        other => panic!("unexpected event: {other:?}"),
    }
    handle.shutdown().await;
    assert!(lab.mock.requests_to("station_run_tables").len() >= 3);
}

#[tokio::test]
async fn test_stream_gives_up_after_failure_ceiling() {
    let mut settings = settings();
    settings.monitor.max_consecutive_failures = Some(3);
    let lab = lab_with(settings).await;
    lab.mock
        .always(Method::Post, "get_updates", MockReply::unreachable());

    let mut handle = lab
        .service
        .client()
        .monitor(lab.station, MonitorKind::Updates)
        .unwrap();
    match next_event(&mut handle).await {
        MonitorEvent::Stopped(StopReason::TooManyFailures { failures, .. }) => {
            assert_eq!(failures, 3)
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(tokio::time::timeout(WAIT, handle.next())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stop_signal_cancels_stream() {
    let lab = lab().await;
    lab.mock.always(
        Method::Post,
        "get_updates",
        MockReply::json(json!({"timestamp": 1, "updates": {}})),
    );
    let mut handle = lab
        .service
        .client()
        .monitor(lab.station, MonitorKind::Updates)
        .unwrap();
    next_event(&mut handle).await;
    handle.stop();

    loop {
        match next_event(&mut handle).await {
            MonitorEvent::Payload(_) => continue,
            MonitorEvent::Stopped(reason) => {
                assert_eq!(reason, StopReason::Cancelled);
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_overview_normalization_and_offline() {
    let lab = lab().await;
    lab.mock.push(
        Method::Post,
        "station_overview",
        MockReply::json(json!({
            "status": "ready",
            "running_experiment_name": "",
            "total_experiments_queued": 5,
            "current_run_number": ""
        })),
    );
    let overview = lab
        .service
        .client()
        .station_overview(lab.station)
        .await
        .unwrap();
    assert_eq!(overview.status, "ready - Queue finished");
    assert_eq!(overview.current_run_number, json!(5));

    lab.mock
        .push(Method::Post, "station_overview", MockReply::unreachable());
    let all = lab.service.client().overview_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.status, "offline");
}

#[tokio::test]
async fn test_active_experiment_parameters() {
    let lab = lab().await;
    lab.mock.always(
        Method::Post,
        "station_run_tables",
        MockReply::json(json!([
            {"state": "Finished", "parameters": {"temp": 20.0}},
            {"state": "Running", "parameters": {"temp": 7.5, "base_name": "NaOH"}}
        ])),
    );
    let params = lab
        .service
        .client()
        .active_experiment_parameters(lab.station)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params["temp"], json!(7.5));
    assert_eq!(
        lab.service
            .client()
            .active_experiment_value(lab.station, "base_name")
            .await
            .unwrap(),
        Some(json!("NaOH"))
    );

    lab.mock.push(Method::Post, "start", MockReply::ok());
    lab.service.client().start_station(lab.station).await.unwrap();
    lab.mock
        .push(Method::Post, "stop", MockReply::status(409, "not running"));
    assert!(lab.service.client().stop_station(lab.station).await.is_err());
}
