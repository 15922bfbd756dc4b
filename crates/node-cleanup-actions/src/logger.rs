//! Action that records a deleted Node's metadata in the log
//!
//! Always applies. Useful on its own as an audit trail and as a smoke test
//! that deletions are being held: with a `delay` option the action keeps the
//! finalizer in place for that long before letting the deletion continue.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use node_cleanup_common::{ActionError, LOGGER_ACTION};

use crate::{ActionOptions, CleanupAction};

/// Logs Node metadata before deletion
#[derive(Debug, Clone)]
pub struct LoggerAction {
    delay: Duration,
}

impl LoggerAction {
    /// Build from options; `delay` defaults to zero
    pub fn new(options: &ActionOptions) -> Self {
        Self {
            delay: options.get_duration("delay", Duration::ZERO),
        }
    }

    /// Configured hold time before the action completes
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

fn rfc3339(t: Option<&Time>) -> String {
    t.map(|t| t.0.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

fn condition_map(node: &Node) -> BTreeMap<String, String> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .map(|c| (c.type_.clone(), c.status.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CleanupAction for LoggerAction {
    fn name(&self) -> &str {
        LOGGER_ACTION
    }

    fn should_run(&self, _node: &Node) -> bool {
        true
    }

    async fn cleanup(&self, node: &Node, cancel: &CancellationToken) -> Result<(), ActionError> {
        let name = node.name_any();
        let conditions = condition_map(node);

        info!(
            node = %name,
            created_at = %rfc3339(node.metadata.creation_timestamp.as_ref()),
            deletion_timestamp = %rfc3339(node.metadata.deletion_timestamp.as_ref()),
            uid = %node.uid().unwrap_or_default(),
            label_count = node.labels().len(),
            condition_count = conditions.len(),
            delay = ?self.delay,
            "Node deletion initiated"
        );

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(node = %name, "Logger delay cancelled");
                    return Err(ActionError::Cancelled);
                }
                _ = tokio::time::sleep(self.delay) => {
                    debug!(node = %name, "Logger delay completed");
                }
            }
        }

        if !node.labels().is_empty() {
            debug!(node = %name, labels = ?node.labels(), "Node labels");
        }
        if !conditions.is_empty() {
            debug!(node = %name, conditions = ?conditions, "Node conditions");
        }

        info!(node = %name, "Node metadata recorded; deletion may proceed");
        Ok(())
    }
}
