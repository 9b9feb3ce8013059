//! `reqwest`-backed transport.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AppResult, LabError};

use super::transport::{Method, StationRequest, StationResponse, StationTransport, TransportError};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client. `None` leaves requests without a timeout.
    pub fn new(timeout: Option<Duration>) -> AppResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| LabError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StationTransport for ReqwestTransport {
    async fn send(&self, request: StationRequest) -> Result<StationResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }
        if let Some(credential) = &request.credential {
            builder = builder.basic_auth(&credential.username, Some(&credential.password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(StationResponse { status, body })
    }
}
