//! Convenience re-exports for common use.

pub use crate::agent_loop::{ConversationLoop, TurnHandle, TurnRequest, TurnResult, TurnStatus};
pub use crate::config::WardenConfig;
pub use crate::error::{Result, WardenError};
pub use crate::events::{Event, EventHub, EventKind, Subscriber};
pub use crate::gateway::{AbortRequest, Gateway};
pub use crate::permission::{PermissionRequest, PermissionResponse, PolicyVerdict};
pub use crate::provider::{ModelProvider, ProviderRequest, ProviderStream};
pub use crate::runtime::WardenRuntime;
pub use crate::store::Stores;
pub use crate::tools::{AgentTool, Tool, ToolArguments, ToolOutput, ToolParameters, ToolSet};
pub use crate::types::{ModelMessage, ProviderStreamEvent, Role};
