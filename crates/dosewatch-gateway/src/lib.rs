//! # DoseWatch Gateway
//! JSON HTTP API in front of the dose store: record, undo, history, next due.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
