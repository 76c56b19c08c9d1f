use super::*;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};

use crate::config::PermissionConfig;
use crate::events::{Event, EventKind, Subscriber};
use crate::permission::{PermissionResponse, PolicyVerdict, ScopeRestrictions};
use crate::tools::{AgentTool, Tool, ToolOutput, ToolParameters, ToolSet};
use crate::types::{ProviderStreamEvent, Role};

mod support;

use support::{
    allow_all, ask_first, count, echo_tool, gated_runner, kinds, next_of, progress_tool,
    read_file_tool, sleepy_tool, text_script, tool_script, whoami_tool, Harness, Script, SESSION,
};
