//! Domain types shared by every layer of the crate.

pub mod entities;
pub mod ids;
pub mod value;

pub use entities::{
    sanitize_name, strip_control_whitespace, Design, Parameter, Routine, Run, RunStatus, Stage,
    Station, Value,
};
pub use ids::{
    DesignId, GroupId, ParameterId, RoutineId, RunId, StageId, StationId, UserId, ValueId,
};
pub use value::{normalize_decimal, DataType, TypedValue};
