//! FerroSync integration testing support
//!
//! Shared fixtures for the end-to-end tests in `tests/`: an in-memory FTP server, a
//! state store and a scheduler wired together the way the daemon wires them.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Fixtures used across the integration tests so each test only states what is
/// particular to its scenario.
pub mod test_utils;
