//! Shared data model for the TerraPilot agent.
//!
//! Everything that crosses a crate boundary or gets persisted (conversation
//! turns, tool calls, tasks, approval requests, token usage, project
//! snapshots, session exports) lives here so the executor and agent crates
//! agree on one serialized shape.

pub mod approval;
pub mod conversation;
pub mod plan;
pub mod session;
pub mod snapshot;
pub mod task;
pub mod usage;

pub use approval::*;
pub use conversation::*;
pub use plan::*;
pub use session::*;
pub use snapshot::*;
pub use task::*;
pub use usage::*;
