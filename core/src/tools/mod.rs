mod fs;
mod schema;

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use quill_protocol::ToolCall;
use quill_protocol::ToolDescriptor;
use quill_protocol::ToolResult;

use crate::error::QuillErr;
use crate::error::Result;

pub use fs::ListDirTool;
pub use fs::ReadFileTool;
pub use fs::WriteFileTool;
pub use schema::JsonSchema;

/// Static description of a tool: what the model sees.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: JsonSchema,
    pub required: Vec<String>,
}

impl ToolInfo {
    /// Wire-shaped descriptor handed to the model client.
    pub fn descriptor(&self) -> Result<ToolDescriptor> {
        Ok(ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::to_value(&self.parameters)?,
            required: self.required.clone(),
        })
    }
}

/// A named, schema-described function the model may invoke.
///
/// Handlers are individually responsible for their own authorization and
/// path normalization, and must absorb failures into
/// `ToolResult { is_error: true }` rather than raising them. `ctx`
/// cancellation should be honored within a few hundred milliseconds.
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;
    fn run(&self, ctx: CancellationToken, call: ToolCall) -> BoxFuture<'_, ToolResult>;
}

/// Flat list of registered tools; lookup is by string name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.info().name;
        if self.lookup(&name).is_some() {
            return Err(QuillErr::InvalidInput(format!(
                "duplicate tool name: {name}"
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|tool| tool.info().name == name)
            .cloned()
    }

    pub fn descriptors(&self) -> Result<Vec<ToolDescriptor>> {
        self.tools.iter().map(|tool| tool.info().descriptor()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
