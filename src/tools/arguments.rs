//! Typed access to model-supplied tool arguments.

use serde::de::DeserializeOwned;

use crate::error::ArborError;

/// Arguments of one function call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    raw: serde_json::Value,
}

impl ToolArguments {
    pub fn new(raw: serde_json::Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn into_raw(self) -> serde_json::Value {
        self.raw
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.raw.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ArborError> {
        self.raw
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ArborError::InvalidArgument(format!("missing string argument '{key}'")))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ArborError> {
        self.raw
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ArborError::InvalidArgument(format!("missing integer argument '{key}'")))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ArborError> {
        self.raw
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ArborError::InvalidArgument(format!("missing number argument '{key}'")))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ArborError> {
        self.raw
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| ArborError::InvalidArgument(format!("missing boolean argument '{key}'")))
    }

    /// Deserialize the whole argument object.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ArborError> {
        serde_json::from_value(self.raw.clone())
            .map_err(|e| ArborError::InvalidArgument(format!("invalid arguments: {e}")))
    }
}

impl From<serde_json::Value> for ToolArguments {
    fn from(raw: serde_json::Value) -> Self {
        Self::new(raw)
    }
}
