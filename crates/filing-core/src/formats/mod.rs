//! # Formats Module
//!
//! Binary record format for everything the store persists.
//!
//! This module only handles format conversion (pure transformations);
//! the storage module decides where the bytes go.

mod record;

pub use record::*;
