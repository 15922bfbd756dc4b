//! Common types for the node cleanup controller: errors, constants and utilities

#![deny(missing_docs)]

pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

use std::time::Duration;

pub use error::{ActionError, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer placed on every Node; deletion blocks until cleanup removes it
pub const FINALIZER_NAME: &str = "infra.894.io/node-cleanup";

/// Annotation that lets an operator bypass cleanup for a stuck Node
pub const SKIP_CLEANUP_ANNOTATION: &str = "infra.894.io/skip-cleanup";

/// Value of [`SKIP_CLEANUP_ANNOTATION`] that activates the bypass
pub const SKIP_CLEANUP_VALUE: &str = "true";

/// Field manager / reporting component used for patches and Events
pub const CONTROLLER_NAME: &str = "node-cleanup-controller";

/// Name of the built-in logging action
pub const LOGGER_ACTION: &str = "logger";

/// Name of the built-in Portworx decommission action
pub const PORTWORX_ACTION: &str = "portworx";

/// Delay before a failed cleanup is re-checked
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Upper bound for the cleanup retry delay when backoff is exponential
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Interval at which cached nodes are re-walked
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the cleanup work queue
pub const DEFAULT_WORK_QUEUE_SIZE: usize = 100;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;
