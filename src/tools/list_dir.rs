//! List a directory in the worktree.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{clamp_output, parse_input, resolve_in_workspace, Tool, ToolResult};
use crate::workspace::Workspace;

pub struct ListDirTool {
    workspace: Workspace,
    output_limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default)]
    path: Option<String>,
}

impl ListDirTool {
    pub fn new(workspace: Workspace, output_limit: usize) -> Self {
        Self {
            workspace,
            output_limit,
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory in the repository checkout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the repository root (defaults to the root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let params = match parse_input::<Params>(input) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let dir = match params.path.as_deref() {
            Some(p) => match resolve_in_workspace(&self.workspace.path, p) {
                Ok(resolved) => resolved,
                Err(e) => return e,
            },
            None => self.workspace.path.clone(),
        };
        let dir_str = dir.to_string_lossy().into_owned();

        let output = match self
            .workspace
            .sandbox
            .run_command("ls", &["-la".to_string(), dir_str])
            .await
        {
            Ok(out) => out,
            Err(e) => return ToolResult::error(format!("failed to list directory: {e}")),
        };
        if !output.success() {
            return ToolResult::error(format!(
                "failed to list {}: {}",
                params.path.as_deref().unwrap_or("."),
                output.stderr.trim()
            ));
        }

        // ls -la leads with a "total N" line that is not an entry.
        let entry_count = output
            .stdout
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with("total "))
            .count();
        let (entries, truncated) = clamp_output(output.stdout.trim_end(), self.output_limit);

        ToolResult::success(json!({
            "path": params.path.as_deref().unwrap_or("."),
            "entry_count": entry_count,
            "entries": entries,
            "truncated": truncated,
        }))
    }
}
