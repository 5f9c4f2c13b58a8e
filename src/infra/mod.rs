//! Infrastructure adapters and runtime bootstrap.

pub mod artifacts;
pub mod error;
pub mod http;
pub mod memory;
pub mod process;
pub mod queue;
pub mod remote;
pub mod telemetry;
