//! CLI command implementations.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod lod;
pub mod serve;
