//! External collaborators the pipeline checks with or hands work to.
//!
//! - [`precommit`]: hook framework discovery
//! - [`agent`]: coding-agent CLI invocation

pub mod agent;
pub mod precommit;
