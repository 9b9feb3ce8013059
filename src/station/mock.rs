//! Scripted station for tests and offline runs.
//!
//! Replies are matched by method and the last path segment of the URL
//! (`add_experiment`, `get_updates`, ...). Queued replies are consumed in
//! order; once a queue is empty the persistent reply for that route, if any,
//! answers. Unscripted routes answer 404.
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = MockTransport::new();
//! mock.push(Method::Post, "add_experiment", MockReply::status(500, "queue full"));
//! mock.always(Method::Post, "station_run_tables", MockReply::json(json!([])));
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::transport::{Method, StationRequest, StationResponse, StationTransport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Respond(StationResponse),
    /// Fail at the connection level.
    Unreachable(String),
}

impl MockReply {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        MockReply::Respond(StationResponse::new(status, body))
    }

    pub fn ok() -> Self {
        Self::status(200, "")
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self::status(200, body.to_string())
    }

    pub fn unreachable() -> Self {
        MockReply::Unreachable("connection refused".to_string())
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<(Method, String), VecDeque<MockReply>>,
    persistent: HashMap<(Method, String), MockReply>,
    requests: Vec<StationRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

fn route(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Queue a one-shot reply.
    pub fn push(&self, method: Method, path: &str, reply: MockReply) {
        self.with_script(|s| {
            s.queued
                .entry((method, path.to_string()))
                .or_default()
                .push_back(reply);
        });
    }

    /// Answer every otherwise unscripted call to this route.
    pub fn always(&self, method: Method, path: &str, reply: MockReply) {
        self.with_script(|s| {
            s.persistent.insert((method, path.to_string()), reply);
        });
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<StationRequest> {
        self.with_script(|s| s.requests.clone())
    }

    /// Requests received on one route.
    pub fn requests_to(&self, path: &str) -> Vec<StationRequest> {
        self.with_script(|s| {
            s.requests
                .iter()
                .filter(|r| route(&r.url) == path)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl StationTransport for MockTransport {
    async fn send(&self, request: StationRequest) -> Result<StationResponse, TransportError> {
        let key = (request.method, route(&request.url));
        let reply = self.with_script(|s| {
            s.requests.push(request);
            s.queued
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .or_else(|| s.persistent.get(&key).cloned())
        });
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Unreachable(reason)) => Err(TransportError(reason)),
            None => Ok(StationResponse::new(404, "not scripted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_then_persistent() {
        let mock = MockTransport::new();
        mock.push(Method::Post, "stop", MockReply::unreachable());
        mock.always(Method::Post, "stop", MockReply::ok());

        let req = || StationRequest::new(Method::Post, "http://10.0.0.1:80/api/stop");
        assert!(mock.send(req()).await.is_err());
        assert_eq!(mock.send(req()).await.unwrap().status, 200);
        assert_eq!(mock.send(req()).await.unwrap().status, 200);

        let unscripted = StationRequest::new(Method::Get, "http://10.0.0.1:80/api/start");
        assert_eq!(mock.send(unscripted).await.unwrap().status, 404);
        assert_eq!(mock.requests_to("stop").len(), 3);
    }
}
