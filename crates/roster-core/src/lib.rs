//! Core types and trait definitions for the roster reconciliation engine.
//!
//! This crate has no database or runtime dependencies.
//! The storage backend and the sync engine both depend on it.

pub mod audit;
pub mod batch;
pub mod command;
pub mod demographic;
pub mod error;
pub mod field;
pub mod history;
pub mod store;

pub use error::{Error, Result};
