//! # Filing Library
//!
//! This library exposes the filing application modules for testing and
//! integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod api;
pub mod cli;
pub mod config;
pub mod notify;
pub mod runtime;

// Re-export filing_core for convenience
pub use filing_core;
