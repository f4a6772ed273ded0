//! # QUMOS - Modular Quality Management Platform
//!
//! The core runtime platform for a modular quality-management tool.
//!
//! ## Architecture
//!
//! - `core`: Service container, typed environment, database service contract
//! - `configurator`: Feature descriptor discovery, validation and app config
//! - `audit`: Mandatory audit-trail service with SQLite persistence
//! - `licensing`: Signed-license verification and per-feature gatekeeping
//! - `loader`: Composition root that wires everything together at boot
//!
//! The loader is the single composition root: it loads the typed
//! environment, registers infrastructure singletons, discovers feature
//! descriptors, computes a deterministic boot order and registers each
//! feature into the service container. Booting is refused unless the
//! audit sink can be resolved.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core infrastructure - container, environment, database contract
pub mod core;

// Feature discovery and configuration
pub mod configurator;

// Audit trail
pub mod audit;

// License verification and gatekeeping
pub mod licensing;

// Composition root
pub mod loader;

// Re-export commonly used types
pub use crate::core::{
    container::{Container, ContainerError, Lifetime},
    env::{load_config, AppEnv},
};
pub use crate::loader::{keys, Loader, LoaderError};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
