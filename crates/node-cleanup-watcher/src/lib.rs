//! Node deletion watcher
//!
//! Keeps the cleanup finalizer on every Node and, once a Node is marked for
//! deletion, runs the enabled cleanup actions before releasing it:
//!
//! ```text
//! Untracked ──add/update──▶ FinalizerPresent ──deletionTimestamp──▶ Queued
//!                                                                     │
//!          FinalizerRemoved ◀──success── CleaningUp ◀──worker─────────┘
//!                                             │
//!                                             └──failure──▶ retry timer ──▶ Queued
//! ```
//!
//! - [`store`] - the cluster-facing [`NodeStore`] seam and its kube implementation
//! - [`finalizer`] - pure helpers deciding Node state and building patches
//! - [`in_flight`] - per-node claim set guaranteeing one cleanup at a time
//! - [`watcher`] - the event handlers, work queue and worker loop

#![deny(missing_docs)]

pub mod finalizer;
pub mod in_flight;
pub mod store;
pub mod watcher;

pub use in_flight::InFlightSet;
pub use store::{KubeNodeStore, NodeStore};
pub use watcher::{CleanupOutcome, CleanupWatcher, SweepSummary, WatcherSettings, WorkQueue};
