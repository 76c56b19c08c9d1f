//! Warden: conversation runtime core
//!
//! Drives a multi-turn conversation with a model provider, lets the model call
//! tools, and gates every call through a permission policy that may wait on a
//! live human decision pushed to a remote UI.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::prelude::*;
//!
//! # async fn example(provider: Arc<dyn ModelProvider>) -> warden::error::Result<()> {
//! let tools = ToolSet::default().with_tool(Arc::new(AgentTool::new(
//!     "echo",
//!     "echo text back",
//!     ToolParameters::object().string("text", "text to echo", true).build(),
//!     |args, _ctx| async move { Ok(ToolOutput::text(args.get_str("text")?)) },
//! )));
//! let runtime = WardenRuntime::new(
//!     WardenConfig::load()?,
//!     provider,
//!     Arc::new(tools),
//!     Stores::in_memory(),
//! )?;
//!
//! let mut events = runtime.gateway().connect("session-1");
//! let turn = runtime.start_turn(TurnRequest::new(
//!     "session-1",
//!     vec![ModelMessage::user("say hi")],
//! ))?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.to_json()?);
//!     if event.kind == EventKind::MessageCompleted {
//!         break;
//!     }
//! }
//! let result = turn.wait().await?;
//! println!("{:?}", result.final_text);
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod permission;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod store;
pub mod tools;
pub mod types;
pub mod util;
