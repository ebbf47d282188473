//! Error types for the colloquy agent runtime.

use thiserror::Error;

/// Top-level error type for orchestration and provisioning operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Workspace provisioning produced no usable worktree.
    #[error("failed to provision workspace for {owner}/{repo}: {reason}")]
    Provisioning {
        owner: String,
        repo: String,
        reason: String,
    },

    /// The sandbox-creation lock stayed held past the retry ceiling.
    #[error("sandbox creation for {owner}/{repo} still locked after {attempts} attempts")]
    ContentionTimeout {
        owner: String,
        repo: String,
        attempts: u32,
    },

    /// Failed to create a sandbox.
    #[error("failed to create sandbox: {0}")]
    SandboxCreation(String),

    /// A sandbox the registry pointed at could not be retrieved.
    #[error("failed to retrieve sandbox {sandbox_id}: {reason}")]
    SandboxRetrieval { sandbox_id: String, reason: String },

    /// A command run inside a sandbox could not be started at all.
    #[error("sandbox command failed to launch: {0}")]
    SandboxCommand(String),

    /// Key-value store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Model invocation failed inside a step.
    #[error("model invocation failed: {0}")]
    Model(String),

    /// Conversation store operation failed.
    #[error("conversation store error: {0}")]
    Conversation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during local sandbox operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of a persisted record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
