//! Tool system for function calling.

pub mod arguments;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::{ToolRegistry, ToolSet};
pub use tool::{AgentTool, ProgressCallback, Tool, ToolExecutionContext};
pub use types::{ParameterBuilder, ToolOutput, ToolParameters};
pub use validation::validate_arguments;
