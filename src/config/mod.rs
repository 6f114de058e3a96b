//! Configuration module for the fetch resource pools
//!
//! This module provides the `FetchConfig` struct and its builder for
//! configuring pools, timeouts and periods with validation and sensible
//! defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::FetchConfigBuilder;
pub use types::{BrowserKind, FetchConfig, SessionTimeouts};
