//! Experiment design management for remote lab stations.
//!
//! Users group experimental runs into designs and stages, bound to routines
//! that stations advertise over HTTP. The crate keeps the routine catalog in
//! sync with stations, reconciles spreadsheet uploads with the run/value
//! model, dispatches runs to stations and streams live station status.
//!
//! # Layout
//!
//! - [`store`]: in-memory tables with JSON snapshots
//! - [`registry`], [`catalog`], [`runs`], [`designs`]: the data components
//! - [`reconcile`]: spreadsheet export and import
//! - [`station`]: HTTP client, transports and monitoring streams
//! - [`service`]: actor-checked facade used by the binary

pub mod auth;
pub mod catalog;
pub mod config;
pub mod designs;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod runs;
pub mod service;
pub mod station;
pub mod store;

pub use error::{AppResult, LabError};
pub use service::LabService;
