//! threadcode common - shared configuration, errors, and logging.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - The shared error type
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DiscordConfig, ObservabilityConfig, OpencodeConfig};
pub use error::{Error, Result};

