//! Core utilities shared by the kiln crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing and the frames-per-second limiter
//! - Application configuration

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameLimiter, Timer};
