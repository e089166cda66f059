//! Lavanderia backend library.
//!
//! This crate primarily ships a `lavanderia-backend` binary, but we expose a
//! library surface to enable integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod model;
pub mod scheduler;
pub mod state;
pub mod store;
