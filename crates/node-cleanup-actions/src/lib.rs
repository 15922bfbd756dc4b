//! Cleanup actions for the node cleanup controller
//!
//! An action is a named unit of pre-deletion work (storage decommission,
//! notifications, ...). The [`ActionRegistry`] holds every known action and
//! runs the enabled ones, in the order an operator enabled them, for each
//! Node that is about to be deleted.

#![deny(missing_docs)]

mod action;
pub mod logger;
pub mod options;
pub mod portworx;
mod registry;
pub mod selector;

pub use action::CleanupAction;
pub use logger::LoggerAction;
pub use options::{parse_duration, ActionOptions, MAX_DURATION};
pub use portworx::PortworxAction;
pub use registry::{ActionRegistry, RunReport};
pub use selector::LabelSelector;
