//! Core infrastructure
//!
//! The service container, the typed process environment and the minimal
//! database service contract the loader wires at boot.

pub mod container;
pub mod database;
pub mod env;

pub use container::{Container, ContainerError, Lifetime};
pub use database::{parse_database_path, DatabaseService};
pub use env::{load_config, AppEnv, EnvError};
