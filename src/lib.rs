//! texpress: queued LaTeX-to-PDF compilation behind an HTTP API.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
