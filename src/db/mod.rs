//! Database module: row mapping and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: helpers that turn SQLite rows into domain entities.
//! - `repo`: SQL-only functions over the pool or an open transaction.
//!
//! Callers import from `league_watchbot::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;
