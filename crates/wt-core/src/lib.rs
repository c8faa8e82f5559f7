//! `wt` Core Library
//!
//! Shared functionality for `wt` components:
//! - Configuration resolution and validation
//! - Wire protocol types for the daemon socket
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
