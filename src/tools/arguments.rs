//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::WardenError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    tool_name: String,
    value: Value,
}

impl ToolArguments {
    pub fn new(tool_name: impl Into<String>, value: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            value,
        }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Session the call was issued in, if the loop injected one.
    pub fn session_id(&self) -> Option<&str> {
        self.get_str_opt(crate::agent_loop::SESSION_ID_PARAM)
    }

    fn missing(&self, kind: &str, key: &str) -> WardenError {
        WardenError::invalid_arguments(&self.tool_name, format!("missing {kind} argument: {key}"))
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, WardenError> {
        self.get_str_opt(key).ok_or_else(|| self.missing("string", key))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, WardenError> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.missing("integer", key))
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, WardenError> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.missing("boolean", key))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, WardenError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            WardenError::invalid_arguments(
                &self.tool_name,
                format!("failed to deserialize arguments: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_report_tool_name() {
        let args = ToolArguments::new("bash", serde_json::json!({ "command": "ls", "timeout": 5 }));

        assert_eq!(args.get_str("command").unwrap(), "ls");
        assert_eq!(args.get_i64("timeout").unwrap(), 5);
        let err = args.get_bool("background").unwrap_err();
        assert!(err.to_string().contains("bash"));
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Params {
            path: String,
        }
        let args = ToolArguments::new("read_file", serde_json::json!({ "path": "src/lib.rs" }));
        let params: Params = args.deserialize().unwrap();
        assert_eq!(params.path, "src/lib.rs");
    }
}
