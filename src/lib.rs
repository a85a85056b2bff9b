//! Workspace root: hosts the integration test suites under `tests/`.
//! The actual crates live under `crates/` and `services/`.
