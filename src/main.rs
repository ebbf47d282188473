//! Colloquy CLI
//!
//! Provisions a workspace for a repository and runs each shipped tool once
//! against it, using the in-process store and the local sandbox driver.

use std::sync::Arc;

use serde_json::json;

use colloquy::sandbox::LocalSandboxes;
use colloquy::store::MemoryStore;
use colloquy::tools::get_tools;
use colloquy::{AgentSettings, GitContext, Validate, WorkspaceManager};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <owner> <repo> [ref]", args[0]);
        eprintln!("\nProvisions a sandboxed worktree for the repository and runs");
        eprintln!("the read_file, grep, and list_dir tools against it.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  COLLOQUY_CONFIG=path        TOML settings file (optional)");
        eprintln!("  COLLOQUY_REMOTE_BASE=url    Clone base (default: https://github.com)");
        std::process::exit(1);
    }

    let owner = args[1].clone();
    let repo = args[2].clone();
    let ref_name = args.get(3).cloned();

    let mut settings = match std::env::var("COLLOQUY_CONFIG") {
        Ok(path) => match std::fs::read_to_string(&path) {
            Ok(text) => match AgentSettings::from_toml_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Invalid settings in {path}: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Cannot read {path}: {e}");
                std::process::exit(1);
            }
        },
        Err(_) => AgentSettings::new(),
    };
    if let Ok(base) = std::env::var("COLLOQUY_REMOTE_BASE") {
        settings = settings.with_git_remote_base(base);
    }

    let validation = settings.validate();
    for warning in &validation.warnings {
        tracing::warn!("settings: {warning}");
    }
    if !validation.is_valid() {
        eprintln!("Invalid settings:");
        for error in &validation.errors {
            eprintln!("  - {error}");
        }
        std::process::exit(1);
    }

    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(LocalSandboxes::new(None));
    let manager = WorkspaceManager::new(store, driver, settings);

    let mut git_context = GitContext::new(owner, repo);
    if let Some(ref_name) = ref_name {
        git_context = git_context.with_ref(ref_name);
    }

    tracing::info!(repo = %git_context.slug(), "provisioning workspace");

    let workspace = match manager.get_workspace(None, &git_context).await {
        Ok(workspace) => workspace,
        Err(e) => {
            eprintln!("Provisioning failed: {e}");
            std::process::exit(1);
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("Workspace ready");
    println!("{}", "=".repeat(60));
    println!();
    println!("Sandbox: {}", workspace.sandbox.sandbox_id());
    println!("Path:    {}", workspace.path.display());

    let tools = get_tools(&workspace);
    let calls = [
        ("list_dir", json!({})),
        ("read_file", json!({"path": "README.md", "limit": 20})),
        ("grep", json!({"pattern": "TODO", "path": "."})),
    ];

    for (name, input) in calls {
        println!("\n{}", "-".repeat(60));
        println!("{name} {input}");
        println!("{}", "-".repeat(60));
        let result = tools.execute(name, input).await;
        let marker = if result.is_error { "error" } else { "ok" };
        match serde_json::to_string_pretty(&result.output) {
            Ok(rendered) => println!("[{marker}] {rendered}"),
            Err(_) => println!("[{marker}] {:?}", result.output),
        }
    }

    // A second resolution reuses the registered sandbox.
    match manager.get_workspace(None, &git_context).await {
        Ok(again) => {
            println!("\n{}", "=".repeat(60));
            println!(
                "Re-resolved: sandbox {} (reused: {})",
                again.sandbox.sandbox_id(),
                again.sandbox.sandbox_id() == workspace.sandbox.sandbox_id()
            );
        }
        Err(e) => {
            eprintln!("Re-resolution failed: {e}");
            std::process::exit(1);
        }
    }
}
