//! End-to-end tests for TerraPilot live under `tests/`.
//!
//! They drive a `TerraformAgent` against wiremock model servers, a recording
//! command runner and a real `.tf` project in a temporary directory.
