//! Per-turn reconstruction of text and tool-use blocks from stream events.

use serde_json::{Map, Value};

use crate::types::ToolUseBlock;

#[derive(Debug, Clone)]
struct PendingToolUse {
    id: String,
    name: String,
    buffer: String,
    input: Option<Value>,
}

impl PendingToolUse {
    fn finish(&mut self) {
        if self.input.is_none() {
            self.input = Some(parse_tool_input(&self.id, &self.buffer));
        }
    }
}

/// Accumulated assistant text and tool-use blocks for one model turn.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    text: String,
    blocks: Vec<PendingToolUse>,
    turn_complete: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Open a block. A repeated id restarts that block in place.
    pub fn start_tool_use(&mut self, id: &str, name: &str) {
        let block = PendingToolUse {
            id: id.to_string(),
            name: name.to_string(),
            buffer: String::new(),
            input: None,
        };
        match self.blocks.iter_mut().find(|b| b.id == id) {
            Some(existing) => *existing = block,
            None => self.blocks.push(block),
        }
    }

    /// Append a raw argument fragment. Returns `false` for an unknown or
    /// already closed block.
    pub fn push_tool_input(&mut self, id: &str, fragment: &str) -> bool {
        match self
            .blocks
            .iter_mut()
            .find(|b| b.id == id && b.input.is_none())
        {
            Some(block) => {
                block.buffer.push_str(fragment);
                true
            }
            None => {
                tracing::warn!(tool_use_id = id, "input delta for unknown tool-use block");
                false
            }
        }
    }

    /// Close a block and parse its buffered arguments.
    pub fn finish_tool_use(&mut self, id: &str) -> Option<ToolUseBlock> {
        let block = self.blocks.iter_mut().find(|b| b.id == id)?;
        block.finish();
        Some(to_block(block))
    }

    pub fn mark_complete(&mut self) {
        self.turn_complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.turn_complete
    }

    pub fn tool_use_count(&self) -> usize {
        self.blocks.len()
    }

    /// Consume the turn: text plus every block in arrival order. Blocks the
    /// provider never closed are parsed as they stand.
    pub fn into_parts(mut self) -> (String, Vec<ToolUseBlock>) {
        for block in &mut self.blocks {
            block.finish();
        }
        let blocks = self.blocks.iter().map(to_block).collect();
        (self.text, blocks)
    }
}

fn to_block(block: &PendingToolUse) -> ToolUseBlock {
    ToolUseBlock {
        id: block.id.clone(),
        name: block.name.clone(),
        input: block
            .input
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    }
}

/// Parse a streamed argument fragment. Anything that is not a JSON object
/// becomes an empty parameter set.
fn parse_tool_input(id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(tool_use_id = id, kind = ?other, "tool input is not an object");
            Value::Object(Map::new())
        }
        Err(err) => {
            tracing::warn!(tool_use_id = id, error = %err, "unparseable tool input");
            Value::Object(Map::new())
        }
    }
}
