//! Core utilities for the inflight renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Configuration management

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    Backend, DemoConfig, MAX_FRAMES_IN_FLIGHT, MAX_INSTANCES, MAX_MATERIALS, MAX_OBJECTS,
    RendererConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::Timer;
