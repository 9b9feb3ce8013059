//! Known stations and the routines each one exposes.

use std::sync::Arc;

use tracing::info;

use crate::error::{AppResult, LabError};
use crate::model::{RoutineId, Station, StationId};
use crate::store::Store;

/// Fields an administrator supplies when adding or editing a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSpec {
    pub name: String,
    pub address: String,
    pub api_key: Option<String>,
    pub location: Option<String>,
}

impl StationSpec {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(LabError::validation("Station name must not be empty"));
        }
        let address = self.address.trim();
        if address.is_empty() || address.contains("://") || address.contains('/') {
            return Err(LabError::validation(format!(
                "Station address '{}' must be host[:port] without scheme or path",
                self.address
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StationRegistry {
    store: Arc<Store>,
}

impl StationRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn add_station(&self, spec: StationSpec) -> AppResult<Station> {
        spec.validate()?;
        let station = self.store.write(|t| {
            let id = StationId(t.allocate_id());
            let station = Station {
                id,
                name: spec.name.trim().to_string(),
                address: spec.address.trim().to_string(),
                api_key: spec.api_key.filter(|k| !k.is_empty()),
                location: spec.location,
                routine_ids: Vec::new(),
            };
            t.stations.insert(id, station.clone());
            Ok(station)
        })?;
        info!(station = %station.id, address = %station.address, "station added");
        Ok(station)
    }

    pub fn update_station(&self, id: StationId, spec: StationSpec) -> AppResult<Station> {
        spec.validate()?;
        self.store.write(|t| {
            let station = t.station_mut(id)?;
            station.name = spec.name.trim().to_string();
            station.address = spec.address.trim().to_string();
            station.api_key = spec.api_key.filter(|k| !k.is_empty());
            station.location = spec.location;
            Ok(station.clone())
        })
    }

    /// Delete a station. Rejected while any design still targets it.
    pub fn delete_station(&self, id: StationId) -> AppResult<()> {
        self.store.write(|t| {
            t.station(id)?;
            if let Some(design) = t.designs.values().find(|d| d.station_id == id) {
                return Err(LabError::validation(format!(
                    "Station {id} is still used by design '{}'",
                    design.name
                )));
            }
            t.stations.remove(&id);
            Ok(())
        })?;
        info!(station = %id, "station deleted");
        Ok(())
    }

    pub fn station(&self, id: StationId) -> AppResult<Station> {
        self.store.read(|t| t.station(id).cloned())
    }

    pub fn stations(&self) -> AppResult<Vec<Station>> {
        self.store.read(|t| Ok(t.stations.values().cloned().collect()))
    }

    /// Names of the routines a station exposes, in registration order.
    pub fn routine_names(&self, id: StationId) -> AppResult<Vec<String>> {
        self.store.read(|t| {
            let station = t.station(id)?;
            station
                .routine_ids
                .iter()
                .map(|rid| t.routine(*rid).map(|r| r.name.clone()))
                .collect()
        })
    }

    /// Detach a routine from a station; the routine row itself is kept.
    pub fn unregister_routine(&self, station_id: StationId, routine_id: RoutineId) -> AppResult<()> {
        self.store.write(|t| {
            t.routine(routine_id)?;
            let station = t.station_mut(station_id)?;
            let before = station.routine_ids.len();
            station.routine_ids.retain(|r| *r != routine_id);
            if station.routine_ids.len() == before {
                return Err(LabError::validation(format!(
                    "Routine {routine_id} is not registered on station {station_id}"
                )));
            }
            Ok(())
        })
    }
}
