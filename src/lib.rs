pub mod cache;
pub mod compose;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod matcher;
pub mod model;
pub mod outbox;
pub mod reconcile;
pub mod scheduler;
pub mod setup;
pub mod source;
pub mod sync;
