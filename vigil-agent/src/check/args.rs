//! Arguments of native checks
//!
//! A native command line is a JSON document
//! `{"check": "<name>", "args": {...}}`. Numeric arguments are accepted as
//! numbers or numeric strings, and an empty string means "not set".

use crate::error::CheckError;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct NativeCommand {
    pub check: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl NativeCommand {
    /// Native commands are recognized by their leading `{`.
    pub fn looks_native(command_line: &str) -> bool {
        command_line.trim_start().starts_with('{')
    }

    pub fn parse(command_line: &str) -> Result<Self, CheckError> {
        Ok(serde_json::from_str(command_line)?)
    }

    pub fn args(&self) -> NativeArgs<'_> {
        NativeArgs(&self.args)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NativeArgs<'a>(pub &'a Map<String, Value>);

impl<'a> NativeArgs<'a> {
    fn present(&self, name: &str) -> Option<&'a Value> {
        match self.0.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => Some(value),
        }
    }

    pub fn f64(&self, name: &str) -> Result<Option<f64>, CheckError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| CheckError::invalid_argument(name, "not a number")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| CheckError::invalid_argument(name, format!("'{}' is not a number", s))),
            Some(other) => Err(CheckError::invalid_argument(
                name,
                format!("expected a number, got {}", other),
            )),
        }
    }

    /// Non-negative integer argument.
    pub fn u64(&self, name: &str) -> Result<Option<u64>, CheckError> {
        match self.f64(name)? {
            None => Ok(None),
            Some(v) if v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as u64)),
            Some(v) => Err(CheckError::invalid_argument(
                name,
                format!("{} is not a non-negative integer", v),
            )),
        }
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>, CheckError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(CheckError::invalid_argument(name, format!("'{}' is not a boolean", s))),
            },
            Some(Value::Number(n)) => Ok(Some(n.as_f64().unwrap_or(0.0) != 0.0)),
            Some(other) => Err(CheckError::invalid_argument(
                name,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    pub fn string(&self, name: &str) -> Result<Option<&'a str>, CheckError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(CheckError::invalid_argument(
                name,
                format!("expected a string, got {}", other),
            )),
        }
    }
}
