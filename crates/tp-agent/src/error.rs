//! Agent error types.
//!
//! Tool dispatch and handler failures never surface as Rust errors to the
//! loop: they are folded into structured `ToolPayload::Error` results the
//! model can read. The variants here cover what a caller has to handle.

use thiserror::Error;
use tp_protocol::InvalidTransition;
use tp_terraform::TerraformError;
use uuid::Uuid;

/// Top-level agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{tool} was rejected during approval and was not run")]
    ApprovalRejected { tool: String },

    #[error("{tool} is still awaiting approval and was not run")]
    ApprovalPending { tool: String },

    /// The request was interrupted; steps already started ran to completion.
    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Terraform(#[from] TerraformError),

    #[error("terraform {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A tracked task failed without a typed error to report.
    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("session file error: {0}")]
    Session(String),
}

/// Convenience alias for agent results.
pub type AgentResult<T> = Result<T, AgentError>;

/// Failures talking to a model service.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("model service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode model response: {0}")]
    Decode(String),

    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Raised by a tool handler; the registry turns it into `{error, tool}`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("project snapshot unavailable: {0}")]
    Snapshot(#[from] TerraformError),

    #[error("{0}")]
    Failed(String),
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("terraform binary not found: {0}")]
    BinaryNotFound(String),

    #[error("{provider} requires {variable} to be set")]
    MissingCredential {
        provider: &'static str,
        variable: &'static str,
    },

    #[error("invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Task tracker misuse.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}
