//! Configuration file parsing and structures.
//!
//! staggd reads one or more TOML files. Files may `imports = [...]` others;
//! fields are merged first-wins and every conflict or invalid value is
//! reported together before the daemon starts.

// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::{format_diagnostics, Diagnostic, LoadError};
