//! Station HTTP API: sync client, transports and monitoring.

pub mod client;
pub mod http;
pub mod mock;
pub mod monitor;
pub mod protocol;
pub mod transport;

pub use client::{BatchReport, StagesReport, StationClient, API_KEY_USER};
pub use http::ReqwestTransport;
pub use mock::{MockReply, MockTransport};
pub use monitor::{MonitorEvent, MonitorHandle, MonitorKind, StopReason};
pub use protocol::{ExperimentPayload, RunTableEntry, StationOverview};
pub use transport::{Credential, Method, StationRequest, StationResponse, StationTransport, TransportError};
