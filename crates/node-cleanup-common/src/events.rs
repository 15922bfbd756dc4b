//! Kubernetes Event recording for the cleanup controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that the cleanup lifecycle of a Node is visible via
//! `kubectl describe node` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never block a cleanup.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "CleanupStarted")
    /// * `action` - What action was taken (e.g. "Cleanup")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// The cleanup finalizer was added to the Node
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    /// A deletion was requested and the Node was queued for cleanup
    pub const DELETION_DETECTED: &str = "DeletionDetected";
    /// Cleanup actions started running
    pub const CLEANUP_STARTED: &str = "CleanupStarted";
    /// All cleanup actions succeeded
    pub const CLEANUP_SUCCEEDED: &str = "CleanupSucceeded";
    /// Cleanup was bypassed through the skip annotation
    pub const CLEANUP_SKIPPED: &str = "CleanupSkipped";
    /// A cleanup action failed; a retry is scheduled
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
    /// The cleanup finalizer was removed; deletion may proceed
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
}

/// Well-known event action strings.
pub mod actions {
    /// Finalizer bookkeeping
    pub const FINALIZE: &str = "Finalize";
    /// Running cleanup actions
    pub const CLEANUP: &str = "Cleanup";
}
