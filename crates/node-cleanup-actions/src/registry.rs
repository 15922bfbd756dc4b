//! Registry of cleanup actions and their execution order
//!
//! Actions are registered once at startup and then enabled in the order the
//! operator listed them. Execution always walks that explicit order vector;
//! the enabled set is only a membership index and is never iterated.
//!
//! After configuration the registry is shared behind an `Arc` and only read,
//! so no locking is needed on the hot path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use node_cleanup_common::{ActionError, Error};

use crate::CleanupAction;

/// Outcome of a successful [`ActionRegistry::run_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Actions that ran, in execution order
    pub executed: Vec<String>,
    /// Enabled actions whose applicability check did not match the node
    pub skipped: Vec<String>,
}

/// Holds every known action and the operator-defined execution order
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn CleanupAction>>,
    enabled: HashSet<String>,
    order: Vec<String>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its name
    ///
    /// A second action with the same name is rejected; the first one stays.
    pub fn register(&mut self, action: Arc<dyn CleanupAction>) -> Result<(), Error> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(Error::DuplicateAction { action: name });
        }
        debug!(action = %name, "Registered cleanup action");
        self.actions.insert(name, action);
        Ok(())
    }

    /// Enable a registered action and append it to the execution order
    pub fn enable(&mut self, name: &str) -> Result<(), Error> {
        if !self.actions.contains_key(name) {
            return Err(Error::ActionNotFound {
                action: name.to_string(),
            });
        }
        if !self.enabled.insert(name.to_string()) {
            return Err(Error::ActionAlreadyEnabled {
                action: name.to_string(),
            });
        }
        self.order.push(name.to_string());
        info!(action = %name, position = self.order.len(), "Enabled cleanup action");
        Ok(())
    }

    /// Disable an action, removing it from the execution order as well
    ///
    /// Returns whether the action was enabled. Enabling it again appends it
    /// at the end of the order.
    pub fn disable(&mut self, name: &str) -> bool {
        let was_enabled = self.enabled.remove(name);
        if was_enabled {
            self.order.retain(|n| n != name);
            info!(action = %name, "Disabled cleanup action");
        }
        was_enabled
    }

    /// Names of enabled actions, in no particular order
    pub fn enabled_names(&self) -> Vec<String> {
        self.enabled.iter().cloned().collect()
    }

    /// Enabled action names in execution order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Names of all registered actions, sorted
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every enabled action that applies to `node`, in enablement order
    ///
    /// Stops at the first failure and reports which action failed. A
    /// cancellation observed before an action starts, or reported by an
    /// action, is returned as [`Error::Cancelled`] so callers can tell a
    /// shutdown apart from a failed cleanup.
    pub async fn run_all(
        &self,
        node: &Node,
        cancel: &CancellationToken,
    ) -> Result<RunReport, Error> {
        let node_name = node.name_any();
        info!(node = %node_name, order = ?self.order, "Starting cleanup actions");

        let total = self.order.len();
        let mut report = RunReport::default();

        for (i, name) in self.order.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!("cleanup of node {}", node_name)));
            }

            let Some(action) = self.actions.get(name) else {
                error!(action = %name, "Enabled action missing from registry");
                continue;
            };

            if !action.should_run(node) {
                debug!(action = %name, node = %node_name, "Action skipped - conditions not met");
                report.skipped.push(name.clone());
                continue;
            }

            info!(
                action = %name,
                position = i + 1,
                total,
                node = %node_name,
                "Running cleanup action"
            );

            match action.cleanup(node, cancel).await {
                Ok(()) => {
                    info!(action = %name, node = %node_name, "Cleanup action completed");
                    report.executed.push(name.clone());
                }
                Err(ActionError::Cancelled) => {
                    warn!(action = %name, node = %node_name, "Cleanup action cancelled");
                    return Err(Error::cancelled(format!(
                        "action {} for node {}",
                        name, node_name
                    )));
                }
                Err(source) => {
                    error!(action = %name, node = %node_name, error = %source, "Cleanup action failed");
                    return Err(Error::ActionFailed {
                        action: name.clone(),
                        node: node_name,
                        source,
                    });
                }
            }
        }

        info!(
            node = %node_name,
            executed = report.executed.len(),
            total,
            "Cleanup actions completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use kube::api::ObjectMeta;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct RecordingAction {
        name: String,
        applies: fn(&Node) -> bool,
        failures_left: AtomicU32,
        calls: CallLog,
    }

    impl RecordingAction {
        fn new(name: &str, calls: &CallLog) -> Self {
            Self {
                name: name.to_string(),
                applies: |_| true,
                failures_left: AtomicU32::new(0),
                calls: calls.clone(),
            }
        }

        fn applies_when(mut self, applies: fn(&Node) -> bool) -> Self {
            self.applies = applies;
            self
        }

        fn failing(self, times: u32) -> Self {
            self.failures_left.store(times, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl CleanupAction for RecordingAction {
        fn name(&self) -> &str {
            &self.name
        }

        fn should_run(&self, node: &Node) -> bool {
            (self.applies)(node)
        }

        async fn cleanup(&self, _node: &Node, _cancel: &CancellationToken) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(self.name.clone());
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ActionError::failed(format!("{} exploded", self.name)));
            }
            Ok(())
        }
    }

    struct CancelledAction;

    #[async_trait]
    impl CleanupAction for CancelledAction {
        fn name(&self) -> &str {
            "slow"
        }

        fn should_run(&self, _node: &Node) -> bool {
            true
        }

        async fn cleanup(&self, _node: &Node, cancel: &CancellationToken) -> Result<(), ActionError> {
            cancel.cancelled().await;
            Err(ActionError::Cancelled)
        }
    }

    fn node(name: &str, labels: &[(&str, &str)]) -> Node {
        let labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn store_enabled(node: &Node) -> bool {
        node.labels().get("store/enabled").map(String::as_str) == Some("true")
    }

    fn calls() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    // =========================================================================
    // Registration and enablement
    // =========================================================================

    #[test]
    fn duplicate_registration_is_rejected() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap();

        let err = registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAction { ref action } if action == "log"));
        assert_eq!(registry.registered_names(), vec!["log".to_string()]);
    }

    #[test]
    fn enabling_unknown_action_is_not_found() {
        let mut registry = ActionRegistry::new();
        let err = registry.enable("slack").unwrap_err();
        assert!(matches!(err, Error::ActionNotFound { ref action } if action == "slack"));
        assert!(registry.order().is_empty());
        assert!(registry.enabled_names().is_empty());
    }

    #[test]
    fn duplicate_enable_is_rejected_without_reappending() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap();
        registry.enable("log").unwrap();

        let err = registry.enable("log").unwrap_err();
        assert!(matches!(err, Error::ActionAlreadyEnabled { .. }));
        assert_eq!(registry.order(), &["log".to_string()]);
    }

    #[test]
    fn disable_strips_action_from_order() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(Arc::new(RecordingAction::new(name, &log)))
                .unwrap();
            registry.enable(name).unwrap();
        }

        assert!(registry.disable("b"));
        assert!(!registry.disable("b"));
        assert!(!registry.disable("unknown"));
        assert_eq!(registry.order(), &["a".to_string(), "c".to_string()]);

        let mut enabled = registry.enabled_names();
        enabled.sort();
        assert_eq!(enabled, vec!["a".to_string(), "c".to_string()]);

        // Re-enabling appends at the end
        registry.enable("b").unwrap();
        assert_eq!(
            registry.order(),
            &["a".to_string(), "c".to_string(), "b".to_string()]
        );
    }

    // =========================================================================
    // Execution
    // =========================================================================

    #[tokio::test]
    async fn actions_run_in_enablement_order_not_registration_order() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        for name in ["c", "a", "b"] {
            registry
                .register(Arc::new(RecordingAction::new(name, &log)))
                .unwrap();
        }
        for name in ["a", "b", "c"] {
            registry.enable(name).unwrap();
        }

        let report = registry
            .run_all(&node("n1", &[]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(report.executed, vec!["a", "b", "c"]);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn first_failure_stops_the_sequence() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("a", &log)))
            .unwrap();
        registry
            .register(Arc::new(RecordingAction::new("b", &log).failing(1)))
            .unwrap();
        registry
            .register(Arc::new(RecordingAction::new("c", &log)))
            .unwrap();
        for name in ["a", "b", "c"] {
            registry.enable(name).unwrap();
        }

        let err = registry
            .run_all(&node("n1", &[]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::ActionFailed { ref action, ref node, .. } if action == "b" && node == "n1")
        );
        assert!(err.to_string().contains("b exploded"));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn applicability_decides_per_node() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("store", &log).applies_when(store_enabled)))
            .unwrap();
        registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap();
        registry.enable("log").unwrap();
        registry.enable("store").unwrap();

        let cancel = CancellationToken::new();

        let report = registry.run_all(&node("n1", &[]), &cancel).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["log"]);
        assert_eq!(report.skipped, vec!["store"]);

        log.lock().unwrap().clear();
        let report = registry
            .run_all(&node("n2", &[("store/enabled", "true")]), &cancel)
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["log", "store"]);
        assert_eq!(report.executed, vec!["log", "store"]);
    }

    #[tokio::test]
    async fn registered_but_not_enabled_actions_never_run() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap();
        registry
            .register(Arc::new(RecordingAction::new("store", &log)))
            .unwrap();
        registry.enable("log").unwrap();

        registry
            .run_all(&node("n1", &[]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["log"]);
    }

    #[tokio::test]
    async fn empty_order_succeeds_without_work() {
        let registry = ActionRegistry::new();
        let report = registry
            .run_all(&node("n1", &[]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, RunReport::default());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_action() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(RecordingAction::new("log", &log)))
            .unwrap();
        registry.enable("log").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = registry.run_all(&node("n1", &[]), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_cancellation_is_distinct_from_failure() {
        let log = calls();
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(CancelledAction)).unwrap();
        registry
            .register(Arc::new(RecordingAction::new("after", &log)))
            .unwrap();
        registry.enable("slow").unwrap();
        registry.enable("after").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = registry.run_all(&node("n1", &[]), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(!err.is_retryable());
        assert!(log.lock().unwrap().is_empty());
    }
}
