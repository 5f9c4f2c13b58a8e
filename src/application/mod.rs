//! Application services: sanitizing, caching, compiling and dispatching jobs.

pub mod cache;
pub mod compile;
pub mod error;
pub mod jobs;
pub mod links;
pub mod preamble;
pub mod remote;
pub mod repos;
pub mod sanitize;
pub mod service;
pub mod sweep;
