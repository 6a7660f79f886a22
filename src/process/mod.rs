//! Server process plumbing: spawning, termination and readiness probing.

mod control;
mod readiness;

pub(crate) use control::{configure_command, forward_output, terminate};
pub use readiness::ReadinessProbe;
