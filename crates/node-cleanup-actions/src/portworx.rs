//! Portworx storage node decommission
//!
//! Applies to Nodes selected by `labelSelector` (default `px/enabled=true`)
//! or carrying a `px/status` label, and asks the Portworx API to
//! decommission the storage node before Kubernetes drops the Node object.
//!
//! Options:
//! - `labelSelector`: which Nodes run Portworx
//! - `apiEndpoint`: base URL of the Portworx API
//! - `timeout`: per-request time budget

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use node_cleanup_common::{ActionError, Error, PORTWORX_ACTION};

use crate::{ActionOptions, CleanupAction, LabelSelector};

/// Default selector for Portworx nodes
pub const DEFAULT_LABEL_SELECTOR: &str = "px/enabled=true";
/// Default Portworx API base URL
pub const DEFAULT_API_ENDPOINT: &str = "http://portworx-api:9001";
/// Default decommission request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Label whose mere presence marks a Portworx node
pub const STATUS_LABEL: &str = "px/status";

/// Decommissions the Portworx storage node backing a Kubernetes Node
#[derive(Debug, Clone)]
pub struct PortworxAction {
    selector: LabelSelector,
    api_endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl PortworxAction {
    /// Build from options
    pub fn new(options: &ActionOptions) -> Result<Self, Error> {
        let selector: LabelSelector = options
            .get_or("labelSelector", DEFAULT_LABEL_SELECTOR)
            .parse()?;
        let api_endpoint = options
            .get_or("apiEndpoint", DEFAULT_API_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        let timeout = options.get_duration("timeout", DEFAULT_TIMEOUT);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build Portworx HTTP client: {}", e)))?;

        Ok(Self {
            selector,
            api_endpoint,
            timeout,
            client,
        })
    }

    /// URL of the decommission call for a node
    pub fn decommission_url(&self, node_name: &str) -> String {
        format!(
            "{}/v1/cluster/decommission/{}",
            self.api_endpoint, node_name
        )
    }
}

#[async_trait]
impl CleanupAction for PortworxAction {
    fn name(&self) -> &str {
        PORTWORX_ACTION
    }

    fn should_run(&self, node: &Node) -> bool {
        let labels = node.labels();
        if !self.selector.is_empty() && self.selector.matches(labels) {
            debug!(node = %node.name_any(), selector = %self.selector, "Portworx node detected");
            return true;
        }
        if let Some(status) = labels.get(STATUS_LABEL) {
            debug!(node = %node.name_any(), label = STATUS_LABEL, %status, "Portworx node detected");
            return true;
        }
        false
    }

    async fn cleanup(&self, node: &Node, cancel: &CancellationToken) -> Result<(), ActionError> {
        let name = node.name_any();
        let url = self.decommission_url(&name);
        info!(node = %name, %url, "Starting Portworx decommission");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ActionError::Cancelled),
            result = self.client.post(&url).send() => result.map_err(|e| {
                if e.is_timeout() {
                    ActionError::Timeout { after: self.timeout }
                } else {
                    ActionError::failed(format!("decommission request failed: {}", e))
                }
            })?,
        };

        match response.status() {
            status if status.is_success() => {
                info!(node = %name, %status, "Portworx decommission completed");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                // Repeated attempt after an earlier success
                warn!(node = %name, "Portworx node not found, treating as already decommissioned");
                Ok(())
            }
            status => {
                // The body can stall after the status line arrived
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ActionError::Cancelled),
                    body = response.text() => body.unwrap_or_default(),
                };
                Err(ActionError::failed(format!(
                    "portworx API returned {}: {}",
                    status,
                    body.trim()
                )))
            }
        }
    }
}
