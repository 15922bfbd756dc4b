//! Error types for the node cleanup controller
//!
//! Errors carry the node or action they concern so that a log line alone is
//! enough to tell which cleanup stalled and why.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a single cleanup action
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action ran and reported a failure
    #[error("{message}")]
    Failed {
        /// Description of what failed
        message: String,
    },

    /// The action did not finish in time
    #[error("timed out after {after:?}")]
    Timeout {
        /// Configured time budget
        after: Duration,
    },

    /// The action observed the shutdown signal and stopped early
    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    /// Create a failure with the given message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed {
            message: msg.into(),
        }
    }
}

/// Main error type for node cleanup operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Node no longer exists in the cluster
    #[error("node {node} not found")]
    NodeNotFound {
        /// Name of the missing node
        node: String,
    },

    /// Enable was called for a name that was never registered
    #[error("action {action} not found")]
    ActionNotFound {
        /// Requested action name
        action: String,
    },

    /// Two actions were registered under the same name
    #[error("action {action} is already registered")]
    DuplicateAction {
        /// Colliding action name
        action: String,
    },

    /// Enable was called twice for the same name
    #[error("action {action} is already enabled")]
    ActionAlreadyEnabled {
        /// Action name
        action: String,
    },

    /// A cleanup action failed for a node
    #[error("action {action} failed for node {node}: {source}")]
    ActionFailed {
        /// Name of the failed action
        action: String,
        /// Node being cleaned up
        node: String,
        /// Underlying cause
        #[source]
        source: ActionError,
    },

    /// The shutdown signal fired mid-operation
    #[error("cancelled during {context}")]
    Cancelled {
        /// What was running when cancellation was observed
        context: String,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "watcher", "client")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a node-not-found error
    pub fn node_not_found(node: impl Into<String>) -> Self {
        Self::NodeNotFound { node: node.into() }
    }

    /// Create a cancellation error for the given context
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Map a kube error for a single node, turning 404 into [`Error::NodeNotFound`]
    pub fn from_kube_for_node(node: &str, source: kube::Error) -> Self {
        match &source {
            kube::Error::Api(resp) if resp.code == 404 => Self::node_not_found(node),
            _ => Self::Kube { source },
        }
    }

    /// The node is gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NodeNotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(resp),
            } => resp.code == 404,
            _ => false,
        }
    }

    /// The shutdown signal interrupted the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. }
                | Self::ActionFailed {
                    source: ActionError::Cancelled,
                    ..
                }
        )
    }

    /// Whether repeating the same request may succeed
    ///
    /// Conflicts, throttling, server errors and transport failures are
    /// transient. Everything else needs a different input to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube {
                source: kube::Error::Api(resp),
            } => resp.code == 409 || resp.code == 429 || resp.code >= 500,
            Self::Kube { .. } => true,
            Self::ActionFailed { source, .. } => !matches!(source, ActionError::Cancelled),
            _ => false,
        }
    }
}
