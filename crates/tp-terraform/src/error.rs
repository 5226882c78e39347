//! Terraform layer error types.

use thiserror::Error;

/// Errors from project scanning and output decoding.
///
/// Command failures are not errors here: they come back as a failed
/// `CommandResult` so callers can show stderr to the user.
#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("project directory not found: {0}")]
    ProjectNotFound(String),

    #[error("failed to decode command output: {0}")]
    Decode(String),
}

/// Convenience alias for Terraform layer results.
pub type TerraformResult<T> = Result<T, TerraformError>;
