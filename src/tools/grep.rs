//! Search the worktree with ripgrep.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::CommandOutput;
use crate::tools::{clamp_output, parse_input, resolve_in_workspace, Tool, ToolResult};
use crate::workspace::Workspace;

pub struct GrepTool {
    workspace: Workspace,
    output_limit: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    ignore_case: Option<bool>,
}

impl GrepTool {
    pub fn new(workspace: Workspace, output_limit: usize) -> Self {
        Self {
            workspace,
            output_limit,
        }
    }

    async fn run_search(&self, params: &Params, root: &str) -> crate::Result<CommandOutput> {
        let mut args = vec![
            "--line-number".to_string(),
            "--no-heading".to_string(),
            "--color=never".to_string(),
        ];
        if params.ignore_case.unwrap_or(false) {
            args.push("--ignore-case".to_string());
        }
        args.push("-e".to_string());
        args.push(params.pattern.clone());
        args.push(root.to_string());

        let primary = self.workspace.sandbox.run_command("rg", &args).await;
        match primary {
            // 127 is "command not found" from the shell wrapper.
            Ok(out) if out.exit_code != 127 => Ok(out),
            other => {
                debug!("ripgrep unavailable, falling back to grep: {other:?}");
                let mut args = vec!["-rn".to_string()];
                if params.ignore_case.unwrap_or(false) {
                    args.push("-i".to_string());
                }
                args.push("-e".to_string());
                args.push(params.pattern.clone());
                args.push(root.to_string());
                self.workspace.sandbox.run_command("grep", &args).await
            }
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search the repository checkout for a regex pattern. Returns matching lines with file and line number."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search, relative to the repository root (defaults to the whole repository)"
                },
                "ignore_case": {
                    "type": "boolean",
                    "description": "Case-insensitive search"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let params = match parse_input::<Params>(input) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let root = match params.path.as_deref() {
            Some(p) => match resolve_in_workspace(&self.workspace.path, p) {
                Ok(resolved) => resolved,
                Err(e) => return e,
            },
            None => self.workspace.path.clone(),
        };
        let root = root.to_string_lossy().into_owned();

        let output = match self.run_search(&params, &root).await {
            Ok(out) => out,
            Err(e) => return ToolResult::error(format!("search failed: {e}")),
        };

        // Both rg and grep exit 1 for "no matches" without any error.
        match output.exit_code {
            0 | 1 => {
                let match_count = output.stdout.lines().count();
                let (matches, truncated) = clamp_output(output.stdout.trim_end(), self.output_limit);
                ToolResult::success(json!({
                    "pattern": params.pattern,
                    "match_count": match_count,
                    "matches": matches,
                    "truncated": truncated,
                }))
            }
            _ => ToolResult::error(format!(
                "search failed (exit {}): {}",
                output.exit_code,
                output.stderr.trim()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSandbox;
    use std::path::PathBuf;

    fn tool_with(sandbox: std::sync::Arc<FakeSandbox>) -> GrepTool {
        let workspace = Workspace {
            path: PathBuf::from("/sandbox/worktrees/main"),
            sandbox,
        };
        GrepTool::new(workspace, 16 * 1024)
    }

    #[tokio::test]
    async fn matches_are_counted_and_returned() {
        let sandbox = FakeSandbox::standalone("sbx-grep");
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: "src/lib.rs:3:fn run()\nsrc/main.rs:10:fn run()\n".to_string(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox.clone())
            .execute(json!({"pattern": "fn run"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.output["match_count"], 2);
        assert!(result.output["matches"]
            .as_str()
            .unwrap()
            .contains("src/main.rs:10"));

        let commands = sandbox.commands().await;
        assert_eq!(commands[0].0, "rg");
        assert!(commands[0].1.contains(&"/sandbox/worktrees/main".to_string()));
    }

    #[tokio::test]
    async fn no_matches_is_success_with_zero_count() {
        let sandbox = FakeSandbox::standalone("sbx-none");
        sandbox
            .push_output(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox)
            .execute(json!({"pattern": "no_such_symbol"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.output["match_count"], 0);
    }

    #[tokio::test]
    async fn missing_ripgrep_falls_back_to_grep() {
        let sandbox = FakeSandbox::standalone("sbx-fallback");
        sandbox
            .push_output(CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: "sh: rg: not found\n".to_string(),
            })
            .await;
        sandbox
            .push_output(CommandOutput {
                exit_code: 0,
                stdout: "README.md:1:colloquy\n".to_string(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox.clone())
            .execute(json!({"pattern": "colloquy"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.output["match_count"], 1);

        let commands = sandbox.commands().await;
        assert_eq!(commands[0].0, "rg");
        assert_eq!(commands[1].0, "grep");
    }

    #[tokio::test]
    async fn bad_pattern_surfaces_as_error_output() {
        let sandbox = FakeSandbox::standalone("sbx-bad");
        sandbox
            .push_output(CommandOutput {
                exit_code: 2,
                stdout: String::new(),
                stderr: "regex parse error\n".to_string(),
            })
            .await;

        let result = tool_with(sandbox).execute(json!({"pattern": "("})).await;

        assert!(result.is_error);
        assert!(result.output["error"]
            .as_str()
            .unwrap()
            .contains("regex parse error"));
    }

    #[tokio::test]
    async fn scoped_search_resolves_the_subpath() {
        let sandbox = FakeSandbox::standalone("sbx-scope");
        sandbox
            .push_output(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: String::new(),
            })
            .await;

        let result = tool_with(sandbox.clone())
            .execute(json!({"pattern": "x", "path": "src"}))
            .await;

        assert!(!result.is_error);
        let commands = sandbox.commands().await;
        assert!(commands[0]
            .1
            .contains(&"/sandbox/worktrees/main/src".to_string()));
    }
}
