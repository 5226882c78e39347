//! Terraform execution layer for TerraPilot.
//!
//! Wraps the external `terraform` binary behind a `CommandRunner` seam
//! (real process runner with timeout + graceful termination, or a recording
//! mock), exposes typed lifecycle operations on `TerraformCli`, parses plan
//! summaries, and scans `.tf` files into cached `ProjectSnapshot`s.

pub mod cache;
pub mod cli;
pub mod error;
pub mod mock;
pub mod parser;
pub mod plan;
pub mod runner;

// Re-export key types for convenience
pub use cache::{DEFAULT_TTL, SnapshotCache};
pub use cli::{
    ApplyOptions, DestroyOptions, JsonOutcome, ListOutcome, OutputValue, PlanOptions, PlanOutcome,
    TerraformCli,
};
pub use error::{TerraformError, TerraformResult};
pub use mock::{Invocation, MockRunner, StaticParser};
pub use parser::{HclScanner, ProjectParser};
pub use plan::{parse_plan_summary, resource_changes};
pub use runner::{CommandResult, CommandRunner, DEFAULT_TIMEOUT, ProcessRunner};
