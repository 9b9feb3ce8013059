//! Strongly typed row identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map($name)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

define_id!(
    /// Registered station.
    StationId
);
define_id!(
    /// Routine (experiment type) imported from a station.
    RoutineId
);
define_id!(ParameterId);
define_id!(DesignId);
define_id!(StageId);
define_id!(
    /// Experimental run within a stage.
    RunId
);
define_id!(ValueId);
define_id!(
    /// Account of the acting user; issued by the authentication layer.
    UserId
);
define_id!(GroupId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: RunId = " 17 ".parse().unwrap();
        assert_eq!(id, RunId(17));
        assert_eq!(id.to_string(), "17");
        assert!("abc".parse::<RunId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_integer() {
        let json = serde_json::to_string(&StageId(3)).unwrap();
        assert_eq!(json, "3");
    }
}
