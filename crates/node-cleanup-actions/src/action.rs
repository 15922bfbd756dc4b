use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use tokio_util::sync::CancellationToken;

use node_cleanup_common::ActionError;

/// A unit of cleanup work that must finish before a Node may be deleted
///
/// A failed cleanup is retried from the first enabled action, so
/// implementations must be idempotent: running again after a partial success
/// must neither fail because of earlier side effects nor corrupt state.
#[async_trait]
pub trait CleanupAction: Send + Sync {
    /// Stable, unique name used for enablement and in logs
    fn name(&self) -> &str;

    /// Whether this action applies to the given Node
    fn should_run(&self, node: &Node) -> bool;

    /// Perform the cleanup
    ///
    /// Long-running work should watch `cancel` and return
    /// [`ActionError::Cancelled`] once it fires.
    async fn cleanup(&self, node: &Node, cancel: &CancellationToken) -> Result<(), ActionError>;
}
