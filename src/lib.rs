//! Tiered memory + SQLite cache for analytics dashboards.

pub mod cache;
pub mod config;
pub mod infra;
