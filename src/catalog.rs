//! Routine and parameter catalog.
//!
//! Routines arrive from stations and are never updated in place: a second
//! import of the same name on the same station is skipped. Parameter sets
//! change only through the administration calls.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppResult, LabError};
use crate::model::{
    DataType, Parameter, ParameterId, Routine, RoutineId, StationId, TypedValue,
};
use crate::store::{ParameterScope, Store};

/// A parameter as advertised by a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDefinition {
    pub name: String,
    /// Type name as sent by the station (`float`, `int`, `str`, `bool`, ...).
    pub data_type: String,
    pub unit: String,
}

/// A routine as advertised by a station, parameters in station order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineDefinition {
    pub name: String,
    pub parameters: Vec<ParameterDefinition>,
}

/// Outcome of [`Catalog::import_routines`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutineImportReport {
    pub created: Vec<(RoutineId, String)>,
    /// Routine names already registered on the station.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    store: Arc<Store>,
}

impl Catalog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create and register every routine not yet known to the station.
    ///
    /// New parameters start dynamic with a default of `0.0` cast to their
    /// type. Unknown type names fall back to `str`.
    pub fn import_routines(
        &self,
        station_id: StationId,
        definitions: &[RoutineDefinition],
    ) -> AppResult<RoutineImportReport> {
        let report = self.store.write(|t| {
            let mut known: HashSet<String> = {
                let station = t.station(station_id)?;
                station
                    .routine_ids
                    .iter()
                    .filter_map(|id| t.routines.get(id))
                    .map(|r| r.name.clone())
                    .collect()
            };

            let mut report = RoutineImportReport::default();
            for def in definitions {
                if !known.insert(def.name.clone()) {
                    warn!(
                        station = %station_id,
                        routine = %def.name,
                        "routine already registered on station, skipping"
                    );
                    report.skipped.push(def.name.clone());
                    continue;
                }

                let mut parameter_ids = Vec::with_capacity(def.parameters.len());
                for p in &def.parameters {
                    let data_type = p.data_type.parse::<DataType>().unwrap_or_else(|_| {
                        warn!(
                            routine = %def.name,
                            parameter = %p.name,
                            data_type = %p.data_type,
                            "unknown data type, storing as str"
                        );
                        DataType::Str
                    });
                    let id = ParameterId(t.allocate_id());
                    let default_value = TypedValue::cast(data_type, "0.0")
                        .unwrap_or_else(|_| TypedValue::initial(data_type));
                    t.parameters.insert(
                        id,
                        Parameter {
                            id,
                            name: p.name.clone(),
                            unit: p.unit.clone(),
                            note: None,
                            data_type,
                            is_static: false,
                            default_value,
                        },
                    );
                    parameter_ids.push(id);
                }

                let routine_id = RoutineId(t.allocate_id());
                t.routines.insert(
                    routine_id,
                    Routine {
                        id: routine_id,
                        name: def.name.clone(),
                        note: None,
                        parameter_ids,
                    },
                );
                t.station_mut(station_id)?.routine_ids.push(routine_id);
                report.created.push((routine_id, def.name.clone()));
            }
            Ok(report)
        })?;

        info!(
            station = %station_id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            "routines imported"
        );
        Ok(report)
    }

    /// Flip the static flag. Returns the new state.
    pub fn toggle_static(&self, parameter_id: ParameterId) -> AppResult<bool> {
        self.store.write(|t| {
            let param = t.parameter_mut(parameter_id)?;
            param.is_static = !param.is_static;
            Ok(param.is_static)
        })
    }

    /// Cast `raw` with the parameter's type and store it as the default.
    pub fn set_default_value(&self, parameter_id: ParameterId, raw: &str) -> AppResult<TypedValue> {
        self.store.write(|t| {
            let param = t.parameter_mut(parameter_id)?;
            let value = TypedValue::cast(param.data_type, raw).map_err(|e| {
                LabError::validation(format!("Default for parameter {}: {e}", param.name))
            })?;
            param.default_value = value.clone();
            Ok(value)
        })
    }

    pub fn routine(&self, id: RoutineId) -> AppResult<Routine> {
        self.store.read(|t| t.routine(id).cloned())
    }

    pub fn parameter(&self, id: ParameterId) -> AppResult<Parameter> {
        self.store.read(|t| t.parameter(id).cloned())
    }

    /// Routines registered on a station, in registration order.
    pub fn station_routines(&self, station_id: StationId) -> AppResult<Vec<Routine>> {
        self.store.read(|t| {
            t.station(station_id)?
                .routine_ids
                .iter()
                .map(|id| t.routine(*id).cloned())
                .collect()
        })
    }

    /// Parameters of a routine in declared order.
    pub fn parameters(&self, routine_id: RoutineId, scope: ParameterScope) -> AppResult<Vec<Parameter>> {
        self.store.read(|t| {
            Ok(t
                .routine_parameters(routine_id, scope)?
                .into_iter()
                .cloned()
                .collect())
        })
    }

    pub fn parameter_names(&self, routine_id: RoutineId, scope: ParameterScope) -> AppResult<Vec<String>> {
        self.store.read(|t| {
            Ok(t
                .routine_parameters(routine_id, scope)?
                .into_iter()
                .map(|p| p.name.clone())
                .collect())
        })
    }

    // -------------------------------------------------------------------------
    // Administration
    // -------------------------------------------------------------------------

    pub fn rename_routine(&self, id: RoutineId, name: &str, note: Option<String>) -> AppResult<Routine> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LabError::validation("Routine name must not be empty"));
        }
        self.store.write(|t| {
            let routine = t.routine_mut(id)?;
            routine.name = name.to_string();
            routine.note = note;
            Ok(routine.clone())
        })
    }

    /// Replace a routine's ordered parameter list.
    pub fn set_routine_parameters(&self, id: RoutineId, parameter_ids: Vec<ParameterId>) -> AppResult<Routine> {
        self.store.write(|t| {
            let mut seen = HashSet::new();
            let mut names = HashSet::new();
            for pid in &parameter_ids {
                let param = t.parameter(*pid)?;
                if !seen.insert(*pid) {
                    return Err(LabError::validation(format!(
                        "Parameter {pid} listed twice"
                    )));
                }
                if !names.insert(param.name.clone()) {
                    return Err(LabError::validation(format!(
                        "Parameter name '{}' listed twice",
                        param.name
                    )));
                }
            }
            let routine = t.routine_mut(id)?;
            routine.parameter_ids = parameter_ids;
            info!(routine = %id, parameters = routine.parameter_ids.len(), "routine parameters replaced");
            Ok(routine.clone())
        })
    }

    /// Delete a routine and the parameters only it uses. Rejected while any
    /// stage is bound to it.
    pub fn delete_routine(&self, id: RoutineId) -> AppResult<()> {
        self.store.write(|t| {
            let routine = t.routine(id)?.clone();
            if let Some(stage) = t.stages.values().find(|s| s.routine_id == id) {
                return Err(LabError::validation(format!(
                    "Routine '{}' is still used by stage '{}'",
                    routine.name, stage.name
                )));
            }
            t.routines.remove(&id);
            for station in t.stations.values_mut() {
                station.routine_ids.retain(|r| *r != id);
            }
            let still_used: HashSet<ParameterId> = t
                .routines
                .values()
                .flat_map(|r| r.parameter_ids.iter().copied())
                .collect();
            for pid in routine.parameter_ids {
                if !still_used.contains(&pid) {
                    t.parameters.remove(&pid);
                }
            }
            info!(routine = %id, "routine deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StationRegistry, StationSpec};
    use tracing_test::traced_test;

    fn titration() -> RoutineDefinition {
        RoutineDefinition {
            name: "Titration".into(),
            parameters: vec![
                ParameterDefinition {
                    name: "temp".into(),
                    data_type: "float".into(),
                    unit: "C".into(),
                },
                ParameterDefinition {
                    name: "cycles".into(),
                    data_type: "int".into(),
                    unit: "".into(),
                },
                ParameterDefinition {
                    name: "base_name".into(),
                    data_type: "string".into(),
                    unit: "".into(),
                },
            ],
        }
    }

    fn setup() -> (Catalog, StationId) {
        let store = Arc::new(Store::new());
        let station = StationRegistry::new(store.clone())
            .add_station(StationSpec {
                name: "bench".into(),
                address: "127.0.0.1:9000".into(),
                api_key: None,
                location: None,
            })
            .unwrap();
        (Catalog::new(store), station.id)
    }

    #[test]
    fn test_import_creates_parameters_in_order() {
        let (catalog, station) = setup();
        let report = catalog.import_routines(station, &[titration()]).unwrap();
        assert_eq!(report.created.len(), 1);

        let routine_id = report.created[0].0;
        let names = catalog
            .parameter_names(routine_id, ParameterScope::All)
            .unwrap();
        assert_eq!(names, vec!["temp", "cycles", "base_name"]);

        let params = catalog.parameters(routine_id, ParameterScope::All).unwrap();
        assert!(params.iter().all(|p| !p.is_static));
        assert_eq!(params[0].default_value, TypedValue::Float(0.0));
        assert_eq!(params[1].default_value, TypedValue::Int(0));
        assert_eq!(params[2].default_value, TypedValue::Str("0.0".into()));
    }

    #[test]
    #[traced_test]
    fn test_duplicate_routine_is_skipped_with_warning() {
        let (catalog, station) = setup();
        catalog.import_routines(station, &[titration()]).unwrap();
        let report = catalog.import_routines(station, &[titration()]).unwrap();

        assert!(report.created.is_empty());
        assert_eq!(report.skipped, vec!["Titration".to_string()]);
        assert_eq!(catalog.station_routines(station).unwrap().len(), 1);
        assert!(logs_contain("routine already registered on station"));
    }

    #[test]
    fn test_toggle_and_default() {
        let (catalog, station) = setup();
        let report = catalog.import_routines(station, &[titration()]).unwrap();
        let params = catalog
            .parameters(report.created[0].0, ParameterScope::All)
            .unwrap();

        assert!(catalog.toggle_static(params[2].id).unwrap());
        assert!(!catalog.toggle_static(params[2].id).unwrap());

        assert_eq!(
            catalog.set_default_value(params[1].id, "3,6").unwrap(),
            TypedValue::Int(4)
        );
        assert!(catalog.set_default_value(params[0].id, "warm").is_err());
    }

    #[test]
    fn test_unknown_type_falls_back_to_str() {
        let (catalog, station) = setup();
        let def = RoutineDefinition {
            name: "Odd".into(),
            parameters: vec![ParameterDefinition {
                name: "shape".into(),
                data_type: "polygon".into(),
                unit: "".into(),
            }],
        };
        let report = catalog.import_routines(station, &[def]).unwrap();
        let params = catalog
            .parameters(report.created[0].0, ParameterScope::All)
            .unwrap();
        assert_eq!(params[0].data_type, DataType::Str);
    }

    #[test]
    fn test_set_routine_parameters_rejects_duplicates() {
        let (catalog, station) = setup();
        let report = catalog.import_routines(station, &[titration()]).unwrap();
        let routine_id = report.created[0].0;
        let params = catalog.parameters(routine_id, ParameterScope::All).unwrap();

        let reordered = catalog
            .set_routine_parameters(routine_id, vec![params[2].id, params[0].id])
            .unwrap();
        assert_eq!(reordered.parameter_ids, vec![params[2].id, params[0].id]);

        assert!(catalog
            .set_routine_parameters(routine_id, vec![params[0].id, params[0].id])
            .is_err());
    }

    #[test]
    fn test_delete_routine_removes_registration() {
        let (catalog, station) = setup();
        let report = catalog.import_routines(station, &[titration()]).unwrap();
        catalog.delete_routine(report.created[0].0).unwrap();
        assert!(catalog.station_routines(station).unwrap().is_empty());
    }
}
