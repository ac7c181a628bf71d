//! # sonance-core
//!
//! Core types, configuration, and error handling for the Sonance audio engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;
