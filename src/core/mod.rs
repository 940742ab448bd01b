//! Core functionality for agent-verify.
//!
//! This module contains the main components:
//! - [`executor`]: Single-command execution with deadlines and live output
//! - [`runner`]: Phased validation pipeline
//! - [`git`]: Staging of hook-modified files
//! - [`retry`]: AI-assisted remediation attempts
//! - [`result`]: Result model shared by all of the above
//! - [`report`]: Human-readable rendering of results
//! - [`error`]: Error types and result handling

pub mod error;
pub mod executor;
pub mod git;
pub mod report;
pub mod result;
pub mod retry;
pub mod runner;
