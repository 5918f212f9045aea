//! Line Configuration Module
//!
//! Speed-up factor, stage timing table and transport endpoint, loaded from
//! TOML with built-in defaults.
//!
//! ## Loading Order
//!
//! 1. `ASSEMBLY_LINE_CONFIG` environment variable (path to TOML file)
//! 2. `assembly_line.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The binary applies CLI overrides on top and hands the result to the
//! [`LineController`](crate::line::LineController) explicitly; there is no
//! process-global config, so several lines can coexist in one process.

mod line_config;
pub mod defaults;

pub use line_config::*;
