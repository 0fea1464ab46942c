//! Skyrush Backend Library
//!
//! Exposes the crash round engine, the settlement ledger contract, and
//! the API modules for use by binaries and tests.

pub mod api;
pub mod engine;
pub mod ledger;
pub mod models;

pub use api::AppState;
