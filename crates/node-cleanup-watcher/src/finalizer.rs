//! Finalizer bookkeeping on Node objects
//!
//! Everything here is pure: it inspects a Node or builds the merge patch
//! that the [`NodeStore`](crate::NodeStore) sends.

use k8s_openapi::api::core::v1::Node;
use serde_json::{json, Value};

use node_cleanup_common::{FINALIZER_NAME, SKIP_CLEANUP_ANNOTATION, SKIP_CLEANUP_VALUE};

/// Whether the Node carries the cleanup finalizer
pub fn has_finalizer(node: &Node) -> bool {
    node.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER_NAME))
}

/// Whether a deletion has been requested for the Node
pub fn is_deletion_requested(node: &Node) -> bool {
    node.metadata.deletion_timestamp.is_some()
}

/// Deletion requested and still held by our finalizer
pub fn is_pending_cleanup(node: &Node) -> bool {
    is_deletion_requested(node) && has_finalizer(node)
}

/// Not being deleted and missing our finalizer
pub fn needs_finalizer(node: &Node) -> bool {
    !is_deletion_requested(node) && !has_finalizer(node)
}

/// Whether the operator asked to bypass cleanup for this Node
pub fn skip_requested(node: &Node) -> bool {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SKIP_CLEANUP_ANNOTATION))
        .is_some_and(|v| v == SKIP_CLEANUP_VALUE)
}

/// Finalizer list with ours appended; unchanged if already present
pub fn with_finalizer(node: &Node) -> Vec<String> {
    let mut finalizers = node.metadata.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == FINALIZER_NAME) {
        finalizers.push(FINALIZER_NAME.to_string());
    }
    finalizers
}

/// Finalizer list with exactly ours removed, order of the rest kept
pub fn without_finalizer(node: &Node) -> Vec<String> {
    node.metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != FINALIZER_NAME)
        .cloned()
        .collect()
}

/// JSON merge patch replacing the finalizer list
///
/// With a resourceVersion the API server rejects the patch with 409 when the
/// Node changed since it was read, so a concurrent writer's finalizer is
/// never overwritten.
pub fn finalizer_patch(finalizers: &[String], resource_version: Option<&str>) -> Value {
    match resource_version {
        Some(rv) => json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": rv,
            }
        }),
        None => json!({
            "metadata": {
                "finalizers": finalizers,
            }
        }),
    }
}
