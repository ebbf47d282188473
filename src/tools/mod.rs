//! Tools the model can call against a workspace.
//!
//! Every tool runs a sandboxed command rooted at the workspace path and
//! reports failures in-band: an error-flagged [`ToolResult`] instead of an
//! `Err`, so the model can see what went wrong and adapt.

mod grep;
mod list_dir;
mod read_file;

pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::workspace::Workspace;

/// Byte ceiling applied to tool output when none is configured.
pub const DEFAULT_TOOL_OUTPUT_LIMIT: usize = 16 * 1024;

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: Value,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a success result.
    pub fn success(output: Value) -> Self {
        Self {
            output,
            is_error: false,
        }
    }

    /// Create an error result the model can read.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

/// One capability bound to a workspace.
///
/// Tools are pure functions of (workspace, input): no hidden state, safe to
/// invoke concurrently within a model turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    /// Model-facing description.
    fn description(&self) -> &str;

    /// Strict JSON schema for the tool input.
    fn input_schema(&self) -> Value;

    /// Runs the tool. Execution failures come back as error-flagged results,
    /// never as panics or transport errors.
    async fn execute(&self, input: Value) -> ToolResult;
}

/// Parses tool input into a typed params struct, failing as a [`ToolResult`]
/// the model can read.
pub fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ToolResult> {
    serde_json::from_value(input).map_err(|e| ToolResult::error(format!("invalid input: {e}")))
}

/// The named tool collection handed to the model for one workspace.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in stable order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes a tool by name; an unknown name is an error-flagged result,
    /// matching the no-throw contract of the tool boundary.
    pub async fn execute(&self, name: &str, input: Value) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(input).await,
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

/// Builds the standard tool surface bound to one workspace.
pub fn get_tools(workspace: &Workspace) -> ToolSet {
    get_tools_with_limit(workspace, DEFAULT_TOOL_OUTPUT_LIMIT)
}

/// Same surface with a configured output ceiling per tool call.
pub fn get_tools_with_limit(workspace: &Workspace, output_limit: usize) -> ToolSet {
    let mut tools = ToolSet::new();
    tools.register(Arc::new(ReadFileTool::new(workspace.clone(), output_limit)));
    tools.register(Arc::new(GrepTool::new(workspace.clone(), output_limit)));
    tools.register(Arc::new(ListDirTool::new(workspace.clone(), output_limit)));
    tools
}

/// Resolves a model-supplied relative path against the workspace root,
/// rejecting absolute paths and parent-directory escapes.
pub(crate) fn resolve_in_workspace(
    workspace_path: &Path,
    input_path: &str,
) -> Result<PathBuf, ToolResult> {
    let relative = Path::new(input_path);
    if relative.is_absolute() {
        return Err(ToolResult::error(format!(
            "path must be relative to the workspace: {input_path}"
        )));
    }
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ToolResult::error(format!(
            "path escapes the workspace: {input_path}"
        )));
    }
    Ok(workspace_path.join(relative))
}

/// Clamps model-facing text to `limit` bytes on a char boundary, appending a
/// truncation marker when anything was cut.
pub(crate) fn clamp_output(text: &str, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text.to_string(), false);
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}\n[output truncated]", &text[..end]), true)
}
