//! Live station monitoring streams.
//!
//! A monitor is a background task that polls one station endpoint on a fixed
//! interval and forwards every JSON reply to its [`MonitorHandle`]. Failed
//! polls (transport errors, non-2xx replies, malformed JSON) back off
//! exponentially; a successful poll resets the backoff. The task ends when
//! the handle asks it to stop, when the handle is dropped, or when the
//! backoff policy is exhausted.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error_recovery::BackoffPolicy;

use super::protocol::{UpdatesResponse, RUN_TABLES_PATH, UPDATES_PATH};
use super::transport::{Credential, Method, StationRequest, StationTransport};

const EVENT_BUFFER: usize = 16;

/// Which endpoint a monitor polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    /// `get_updates`, carrying the last seen timestamp forward.
    Updates,
    /// `station_run_tables`.
    RunTables,
}

impl MonitorKind {
    pub fn path(self) -> &'static str {
        match self {
            MonitorKind::Updates => UPDATES_PATH,
            MonitorKind::RunTables => RUN_TABLES_PATH,
        }
    }
}

/// Everything a monitor task needs to poll.
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub kind: MonitorKind,
    pub url: String,
    pub credential: Option<Credential>,
    pub interval: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped through the handle.
    Cancelled,
    TooManyFailures { failures: u32, last_error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Payload(JsonValue),
    Stopped(StopReason),
}

impl MonitorEvent {
    /// Server-sent event framing: `data:{json}\n\n`. Stop events have no
    /// frame; the stream simply ends.
    pub fn to_sse(&self) -> Option<String> {
        match self {
            MonitorEvent::Payload(json) => Some(format!("data:{json}\n\n")),
            MonitorEvent::Stopped(_) => None,
        }
    }
}

/// Receiving end of a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    events: mpsc::Receiver<MonitorEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Next event; `None` once the task has ended and the buffer is drained.
    pub async fn next(&mut self) -> Option<MonitorEvent> {
        self.events.recv().await
    }

    /// Ask the task to stop. It emits [`StopReason::Cancelled`] and exits.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        self.stop();
        let MonitorHandle { events, task, .. } = self;
        drop(events);
        if let Err(e) = task.await {
            warn!("monitor task ended abnormally: {e}");
        }
    }
}

/// Start polling `target` on the current tokio runtime.
pub fn spawn_monitor(transport: Arc<dyn StationTransport>, target: MonitorTarget) -> MonitorHandle {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(poll_loop(transport, target, tx, stop_rx));
    MonitorHandle {
        events: rx,
        stop: stop_tx,
        task,
    }
}

enum Wake {
    Proceed,
    Cancelled,
    Closed,
}

async fn wait(
    delay: Duration,
    stop: &mut watch::Receiver<bool>,
    tx: &mpsc::Sender<MonitorEvent>,
) -> Wake {
    if *stop.borrow() {
        return Wake::Cancelled;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Wake::Proceed,
        _ = stop.changed() => Wake::Cancelled,
        _ = tx.closed() => Wake::Closed,
    }
}

async fn poll_loop(
    transport: Arc<dyn StationTransport>,
    target: MonitorTarget,
    tx: mpsc::Sender<MonitorEvent>,
    mut stop: watch::Receiver<bool>,
) {
    info!(url = %target.url, kind = ?target.kind, "monitor started");
    let mut from_timestamp: Option<String> = None;
    let mut failures: u32 = 0;

    loop {
        let mut request = StationRequest::new(Method::Post, target.url.clone())
            .with_credential(target.credential.clone());
        if let (MonitorKind::Updates, Some(ts)) = (target.kind, &from_timestamp) {
            request = request.with_form(vec![("from_timestamp".to_string(), ts.clone())]);
        }

        let outcome = tokio::select! {
            reply = transport.send(request) => Some(reply),
            _ = stop.changed() => None,
            _ = tx.closed() => {
                debug!(url = %target.url, "monitor receiver dropped");
                return;
            }
        };
        let Some(reply) = outcome else {
            let _ = tx.send(MonitorEvent::Stopped(StopReason::Cancelled)).await;
            info!(url = %target.url, "monitor cancelled");
            return;
        };

        let parsed = match reply {
            Ok(response) if response.is_success() => response
                .json::<JsonValue>()
                .map_err(|e| format!("malformed JSON: {e}")),
            Ok(response) => Err(format!("HTTP {}: {}", response.status, response.body)),
            Err(e) => Err(e.to_string()),
        };

        let delay = match parsed {
            Ok(payload) => {
                failures = 0;
                if target.kind == MonitorKind::Updates {
                    if let Ok(updates) = serde_json::from_value::<UpdatesResponse>(payload.clone()) {
                        from_timestamp = updates.next_from_timestamp();
                    }
                }
                if tx.send(MonitorEvent::Payload(payload)).await.is_err() {
                    debug!(url = %target.url, "monitor receiver dropped");
                    return;
                }
                target.interval
            }
            Err(reason) => {
                failures += 1;
                if target.backoff.is_exhausted(failures) {
                    warn!(url = %target.url, failures, error = %reason, "monitor giving up");
                    let _ = tx
                        .send(MonitorEvent::Stopped(StopReason::TooManyFailures {
                            failures,
                            last_error: reason,
                        }))
                        .await;
                    return;
                }
                let delay = target.backoff.delay_for(failures);
                warn!(
                    url = %target.url,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %reason,
                    "monitor poll failed"
                );
                delay
            }
        };

        match wait(delay, &mut stop, &tx).await {
            Wake::Proceed => {}
            Wake::Cancelled => {
                let _ = tx.send(MonitorEvent::Stopped(StopReason::Cancelled)).await;
                info!(url = %target.url, "monitor cancelled");
                return;
            }
            Wake::Closed => {
                debug!(url = %target.url, "monitor receiver dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sse_framing() {
        let event = MonitorEvent::Payload(json!({"timestamp": 3}));
        assert_eq!(event.to_sse().unwrap(), "data:{\"timestamp\":3}\n\n");
        assert!(MonitorEvent::Stopped(StopReason::Cancelled).to_sse().is_none());
    }
}
