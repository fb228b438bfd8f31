//! Compiled Ruleset Format and Loader
//!
//! This module provides the binary format specification, the fixed wire
//! enumerations for bit-flag fields, and the zero-copy loader.

mod format;
mod loader;
pub mod wire;

pub use format::*;
pub use loader::*;
