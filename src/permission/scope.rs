//! Narrowing conditions attached to a granted permission.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const PATH_KEYS: [&str; 4] = ["path", "file_path", "directory", "cwd"];
const COMMAND_KEY: &str = "command";
const SHELL_OPERATORS: [&str; 9] = [";", "&", "|", "`", "$(", "\n", "\r", ">", "<"];

/// Restrictions enforced just before a tool is invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeRestrictions {
    /// Path parameters must live under one of these prefixes.
    pub path_prefixes: Vec<String>,
    /// Upper bound on the serialized parameter payload.
    pub max_payload_bytes: Option<usize>,
    /// `command` parameters must start with one of these prefixes, followed
    /// by whitespace or nothing, and may not chain further commands.
    pub command_prefixes: Vec<String>,
}

/// Why a call falls outside its granted scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeViolation {
    #[error("path '{0}' is outside the permitted directories")]
    PathOutsideScope(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("command '{0}' is not permitted")]
    CommandNotAllowed(String),
}

impl ScopeRestrictions {
    pub fn is_empty(&self) -> bool {
        self.path_prefixes.is_empty()
            && self.max_payload_bytes.is_none()
            && self.command_prefixes.is_empty()
    }

    /// Check tool parameters against every restriction.
    pub fn check(&self, params: &Value) -> Result<(), ScopeViolation> {
        if !self.path_prefixes.is_empty() {
            for key in PATH_KEYS {
                if let Some(path) = params.get(key).and_then(Value::as_str) {
                    if !self.path_allowed(path) {
                        return Err(ScopeViolation::PathOutsideScope(path.to_string()));
                    }
                }
            }
        }

        if let Some(limit) = self.max_payload_bytes {
            let size = serde_json::to_vec(params).map(|bytes| bytes.len()).unwrap_or(0);
            if size > limit {
                return Err(ScopeViolation::PayloadTooLarge { size, limit });
            }
        }

        if !self.command_prefixes.is_empty() {
            if let Some(command) = params.get(COMMAND_KEY).and_then(Value::as_str) {
                if !self.command_allowed(command) {
                    return Err(ScopeViolation::CommandNotAllowed(command.to_string()));
                }
            }
        }
        Ok(())
    }

    /// A command must be a single invocation whose leading words match a
    /// prefix exactly.
    fn command_allowed(&self, command: &str) -> bool {
        if SHELL_OPERATORS.iter().any(|op| command.contains(op)) {
            return false;
        }
        let command = command.trim();
        self.command_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim();
            !prefix.is_empty()
                && command.strip_prefix(prefix).is_some_and(|rest| {
                    rest.is_empty() || rest.starts_with(char::is_whitespace)
                })
        })
    }

    fn path_allowed(&self, raw: &str) -> bool {
        let path = Path::new(raw);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        self.path_prefixes
            .iter()
            .any(|prefix| path.starts_with(Path::new(prefix)))
    }
}
