//! Assembly of the action registry from configuration

use std::sync::Arc;

use tracing::{info, warn};

use node_cleanup_actions::{ActionRegistry, LoggerAction, PortworxAction};
use node_cleanup_common::{Error, LOGGER_ACTION, PORTWORX_ACTION};

use crate::config::Cli;

/// Register every built-in action and enable the configured ones in order
///
/// Unknown or repeated names only produce warnings. A Portworx option error
/// is fatal when the action is enabled and ignored otherwise.
pub fn build_registry(cli: &Cli) -> Result<ActionRegistry, Error> {
    let enabled = cli.enabled_action_names();
    let mut registry = ActionRegistry::new();

    registry.register(Arc::new(LoggerAction::new(
        &cli.action_options(LOGGER_ACTION),
    )))?;

    match PortworxAction::new(&cli.action_options(PORTWORX_ACTION)) {
        Ok(action) => registry.register(Arc::new(action))?,
        Err(e) if enabled.iter().any(|name| name == PORTWORX_ACTION) => return Err(e),
        Err(e) => warn!(error = %e, "Portworx action not registered"),
    }

    for name in &enabled {
        match registry.enable(name) {
            Ok(()) => {}
            Err(Error::ActionNotFound { .. }) => warn!(
                action = %name,
                available = ?registry.registered_names(),
                "Unknown cleanup action, ignoring"
            ),
            Err(e) => warn!(action = %name, error = %e, "Failed to enable cleanup action"),
        }
    }

    if registry.order().is_empty() {
        warn!("No cleanup actions enabled, deleting nodes will only have their finalizer removed");
    } else {
        info!(order = ?registry.order(), "Cleanup actions enabled");
    }
    Ok(registry)
}
