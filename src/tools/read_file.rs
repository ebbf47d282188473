//! Read a file from the provisioned worktree.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{clamp_output, parse_input, resolve_in_workspace, Tool, ToolResult};
use crate::workspace::Workspace;

pub struct ReadFileTool {
    workspace: Workspace,
    output_limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace, output_limit: usize) -> Self {
        Self {
            workspace,
            output_limit,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the repository checkout. Supports line offset/limit for large files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the repository root"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let params = match parse_input::<Params>(input) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match resolve_in_workspace(&self.workspace.path, &params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let output = match self
            .workspace
            .sandbox
            .run_command("cat", &[path.to_string_lossy().into_owned()])
            .await
        {
            Ok(out) => out,
            Err(e) => return ToolResult::error(format!("failed to read {}: {e}", params.path)),
        };
        if !output.success() {
            return ToolResult::error(format!(
                "failed to read {}: {}",
                params.path,
                output.stderr.trim()
            ));
        }

        let lines: Vec<&str> = output.stdout.lines().collect();
        let total_lines = lines.len();

        let start = params.offset.unwrap_or(1).saturating_sub(1);
        let limit = params.limit.unwrap_or(2000);
        let end = (start + limit).min(total_lines);

        if start >= total_lines && total_lines > 0 {
            return ToolResult::error(format!(
                "start line {} is beyond file length ({total_lines})",
                start + 1
            ));
        }

        let window = lines[start.min(total_lines)..end].join("\n");
        let (content, truncated) = clamp_output(&window, self.output_limit);

        ToolResult::success(json!({
            "path": params.path,
            "content": content,
            "total_lines": total_lines,
            "lines_returned": end - start.min(total_lines),
            "start_line": start + 1,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandOutput;
    use crate::testing::FakeSandbox;
    use std::path::PathBuf;

    fn tool_with(sandbox: std::sync::Arc<FakeSandbox>, limit: usize) -> ReadFileTool {
        let workspace = Workspace {
            path: PathBuf::from("/sandbox/worktrees/main"),
            sandbox,
        };
        ReadFileTool::new(workspace, limit)
    }

    #[tokio::test]
    async fn reads_a_file_relative_to_the_workspace() {
        let sandbox = FakeSandbox::standalone("sbx-read");
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: "fn main() {}\n".to_string(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox.clone(), 16 * 1024)
            .execute(json!({"path": "src/main.rs"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.output["content"], "fn main() {}");
        assert_eq!(result.output["total_lines"], 1);

        let commands = sandbox.commands().await;
        assert_eq!(commands[0].0, "cat");
        assert_eq!(commands[0].1, vec!["/sandbox/worktrees/main/src/main.rs"]);
    }

    #[tokio::test]
    async fn windows_lines_with_offset_and_limit() {
        let sandbox = FakeSandbox::standalone("sbx-window");
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: (1..=10).map(|n| format!("line {n}\n")).collect(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox, 16 * 1024)
            .execute(json!({"path": "big.txt", "offset": 4, "limit": 2}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.output["content"], "line 4\nline 5");
        assert_eq!(result.output["start_line"], 4);
        assert_eq!(result.output["lines_returned"], 2);
        assert_eq!(result.output["total_lines"], 10);
    }

    #[tokio::test]
    async fn offset_past_end_is_an_error_result() {
        let sandbox = FakeSandbox::standalone("sbx-past");
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: "only\n".to_string(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox, 16 * 1024)
            .execute(json!({"path": "short.txt", "offset": 9}))
            .await;

        assert!(result.is_error);
        assert!(result.output["error"].as_str().unwrap().contains("beyond"));
    }

    #[tokio::test]
    async fn missing_file_surfaces_stderr_as_error_output() {
        let sandbox = FakeSandbox::standalone("sbx-missing");
        sandbox
            .push_output(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "cat: nope.txt: No such file or directory\n".to_string(),
            })
            .await;

        let result = tool_with(sandbox, 16 * 1024)
            .execute(json!({"path": "nope.txt"}))
            .await;

        assert!(result.is_error);
        assert!(result.output["error"]
            .as_str()
            .unwrap()
            .contains("No such file"));
    }

    #[tokio::test]
    async fn long_content_is_clamped_with_a_marker() {
        let sandbox = FakeSandbox::standalone("sbx-clamp");
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: "x".repeat(4096),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox, 64).execute(json!({"path": "big.bin"})).await;

        assert!(!result.is_error);
        assert_eq!(result.output["truncated"], true);
        assert!(result.output["content"]
            .as_str()
            .unwrap()
            .ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn escaping_path_never_reaches_the_sandbox() {
        let sandbox = FakeSandbox::standalone("sbx-escape");
        let result = tool_with(sandbox.clone(), 16 * 1024)
            .execute(json!({"path": "../other/worktree"}))
            .await;

        assert!(result.is_error);
        assert!(sandbox.commands().await.is_empty());
    }
}
