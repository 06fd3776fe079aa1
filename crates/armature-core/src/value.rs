//! Scalar values carried by parameters.

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A typed scalar stored in a parameter.
///
/// The type of a scalar parameter is fixed when its node is registered;
/// writes that would change the type are rejected rather than coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Real(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    Vec3(DVec3),
}

/// The type of a [`Value`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Real,
    Int,
    Bool,
    Str,
    Vec3,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Real(_) => ValueType::Real,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Vec3(_) => ValueType::Vec3,
        }
    }

    pub fn as_real(&self) -> Result<f64, TypeError> {
        match self {
            Value::Real(v) => Ok(*v),
            other => Err(TypeError::new(ValueType::Real, other.value_type())),
        }
    }

    pub fn as_int(&self) -> Result<i64, TypeError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(TypeError::new(ValueType::Int, other.value_type())),
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(TypeError::new(ValueType::Bool, other.value_type())),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeError> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(TypeError::new(ValueType::Str, other.value_type())),
        }
    }

    pub fn as_vec3(&self) -> Result<DVec3, TypeError> {
        match self {
            Value::Vec3(v) => Ok(*v),
            other => Err(TypeError::new(ValueType::Vec3, other.value_type())),
        }
    }

    /// Numeric view: `Real` as-is, `Int` widened to `f64`.
    ///
    /// This is what expression evaluation binds variables through.
    pub fn as_number(&self) -> Result<f64, TypeError> {
        match self {
            Value::Real(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(TypeError::new(ValueType::Real, other.value_type())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Real => "real",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
            ValueType::Vec3 => "vec3",
        };
        f.write_str(name)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<DVec3> for Value {
    fn from(v: DVec3) -> Self {
        Value::Vec3(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        assert_eq!(Value::Real(2.5).as_real(), Ok(2.5));
        assert_eq!(Value::Int(4).as_int(), Ok(4));
        assert_eq!(Value::Bool(true).as_bool(), Ok(true));
        assert_eq!(Value::from("mm").as_str(), Ok("mm"));
        assert_eq!(
            Value::Vec3(DVec3::new(1.0, 2.0, 3.0)).as_vec3(),
            Ok(DVec3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn test_type_mismatch() {
        let err = Value::Int(3).as_bool().unwrap_err();
        assert_eq!(err.expected, ValueType::Bool);
        assert_eq!(err.got, ValueType::Int);
        assert_eq!(err.to_string(), "expected bool, got int");
    }

    #[test]
    fn test_number_widening() {
        assert_eq!(Value::Int(3).as_number(), Ok(3.0));
        assert_eq!(Value::Real(1.5).as_number(), Ok(1.5));
        assert!(Value::Bool(false).as_number().is_err());
    }
}
