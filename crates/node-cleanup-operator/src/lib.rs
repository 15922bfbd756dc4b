//! Node cleanup controller - wiring of configuration, actions and watcher

#![deny(missing_docs)]

pub mod config;
pub mod registry;

pub use config::Cli;
pub use registry::build_registry;
