//! Declared parameter types and typed values.
//!
//! Raw input (form fields, spreadsheet cells, admin defaults) is cast exactly
//! once, when it is written, using the parameter's [`DataType`]. Reads never
//! re-interpret stored text.
//!
//! Casting rules:
//! - surrounding whitespace is ignored;
//! - numeric types accept a decimal comma (`7,5` is `7.5`);
//! - `int` goes through a float and rounds half to even (`2.5` is `2`, `3.5` is `4`);
//! - `bool` accepts `true/false`, `yes/no`, `on/off` and numbers (non-zero is true);
//! - `float` rejects NaN and infinities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, LabError};

/// Declared data type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float,
    Int,
    Str,
    Bool,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::Int => "int",
            DataType::Str => "str",
            DataType::Bool => "bool",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Float | DataType::Int)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "double" => Ok(DataType::Float),
            "int" | "integer" => Ok(DataType::Int),
            "str" | "string" | "text" => Ok(DataType::Str),
            "bool" | "boolean" => Ok(DataType::Bool),
            other => Err(LabError::validation(format!(
                "Unsupported data type '{other}'. Must be one of: float, int, str, bool"
            ))),
        }
    }
}

/// Replace a decimal comma with a dot and trim surrounding whitespace.
pub fn normalize_decimal(raw: &str) -> String {
    raw.trim().replace(',', ".")
}

/// A value resolved against its parameter's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl TypedValue {
    /// Cast raw text into `data_type`.
    pub fn cast(data_type: DataType, raw: &str) -> AppResult<Self> {
        match data_type {
            DataType::Float => parse_float(raw).map(TypedValue::Float),
            DataType::Int => {
                let value = parse_float(raw)?.round_ties_even();
                // i64::MAX is not exactly representable; stay strictly inside.
                if value.abs() >= 9.223_372_036_854_775e18 {
                    return Err(cast_error(raw, data_type));
                }
                Ok(TypedValue::Int(value as i64))
            }
            DataType::Str => Ok(TypedValue::Str(raw.trim().to_string())),
            DataType::Bool => parse_bool(raw).map(TypedValue::Bool),
        }
    }

    /// Default value for a freshly imported parameter.
    pub fn initial(data_type: DataType) -> Self {
        match data_type {
            DataType::Float => TypedValue::Float(0.0),
            DataType::Int => TypedValue::Int(0),
            DataType::Str => TypedValue::Str("0.0".to_string()),
            DataType::Bool => TypedValue::Bool(false),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::Float(_) => DataType::Float,
            TypedValue::Int(_) => DataType::Int,
            TypedValue::Str(_) => DataType::Str,
            TypedValue::Bool(_) => DataType::Bool,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Float(v) => Some(*v),
            TypedValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            TypedValue::Int(v) => serde_json::Value::from(*v),
            TypedValue::Str(v) => serde_json::Value::String(v.clone()),
            TypedValue::Bool(v) => serde_json::Value::Bool(*v),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Float(v) => write!(f, "{v}"),
            TypedValue::Int(v) => write!(f, "{v}"),
            TypedValue::Str(v) => f.write_str(v),
            TypedValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

fn cast_error(raw: &str, data_type: DataType) -> LabError {
    LabError::validation(format!("Value '{raw}' cannot be cast to {data_type}"))
}

fn parse_float(raw: &str) -> AppResult<f64> {
    let normalized = normalize_decimal(raw);
    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(cast_error(raw, DataType::Float)),
    }
}

fn parse_bool(raw: &str) -> AppResult<bool> {
    let normalized = normalize_decimal(raw).to_ascii_lowercase();
    match normalized.as_str() {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        other => match other.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v != 0.0),
            _ => Err(cast_error(raw, DataType::Bool)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_accepts_decimal_comma() {
        assert_eq!(
            TypedValue::cast(DataType::Float, "7,5").unwrap(),
            TypedValue::Float(7.5)
        );
        assert_eq!(
            TypedValue::cast(DataType::Float, " 12.25 ").unwrap(),
            TypedValue::Float(12.25)
        );
        assert!(TypedValue::cast(DataType::Float, "NaN").is_err());
        assert!(TypedValue::cast(DataType::Float, "seven").is_err());
    }

    #[test]
    fn test_int_rounds_through_float() {
        assert_eq!(
            TypedValue::cast(DataType::Int, "3,6").unwrap(),
            TypedValue::Int(4)
        );
        assert_eq!(
            TypedValue::cast(DataType::Int, "2.5").unwrap(),
            TypedValue::Int(2)
        );
        assert_eq!(
            TypedValue::cast(DataType::Int, "-7").unwrap(),
            TypedValue::Int(-7)
        );
        assert!(TypedValue::cast(DataType::Int, "1e30").is_err());
    }

    #[test]
    fn test_str_keeps_commas() {
        assert_eq!(
            TypedValue::cast(DataType::Str, " NaOH, 1M ").unwrap(),
            TypedValue::Str("NaOH, 1M".to_string())
        );
    }

    #[test]
    fn test_bool_parsing() {
        assert_eq!(
            TypedValue::cast(DataType::Bool, "False").unwrap(),
            TypedValue::Bool(false)
        );
        assert_eq!(
            TypedValue::cast(DataType::Bool, "1,0").unwrap(),
            TypedValue::Bool(true)
        );
        assert!(TypedValue::cast(DataType::Bool, "maybe").is_err());
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!("string".parse::<DataType>().unwrap(), DataType::Str);
        assert_eq!("FLOAT".parse::<DataType>().unwrap(), DataType::Float);
        assert!("complex".parse::<DataType>().is_err());
    }

    #[test]
    fn test_display_reparses_to_same_value() {
        for (dt, raw) in [
            (DataType::Float, "0.1"),
            (DataType::Float, "7"),
            (DataType::Int, "42"),
            (DataType::Bool, "true"),
        ] {
            let value = TypedValue::cast(dt, raw).unwrap();
            assert_eq!(TypedValue::cast(dt, &value.to_string()).unwrap(), value);
        }
    }
}
