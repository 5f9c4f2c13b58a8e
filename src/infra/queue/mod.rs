//! [`CompileQueue`](crate::application::jobs::CompileQueue) backends.

mod local;
mod postgres;

pub use local::LocalQueue;
pub use postgres::{PostgresQueue, spawn_compile_monitor};
