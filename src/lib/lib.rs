//! A small JSON todo-list backend: an axum router over a single `todos`
//! table stored in SQLite or Postgres.

pub mod adapters;
pub mod config;
pub mod core;
pub mod storage;


pub use config::Config;
