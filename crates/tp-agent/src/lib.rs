//! TerraPilot agent: library crate for the Terraform chat agent.
//!
//! Re-exports all modules so the binary and external crates (e.g.
//! `tp-e2e-tests`) can reach the orchestration loop, registry, approval
//! gate, task tracker and model providers.

pub mod agent;
pub mod approval;
pub mod command;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod repl;
pub mod session;
pub mod stream;
pub mod tools;
pub mod tracker;
