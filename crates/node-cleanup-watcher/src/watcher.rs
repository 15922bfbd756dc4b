//! The cleanup watcher: event handlers, work queue and worker
//!
//! One task consumes the Node watch stream and keeps the finalizer invariant
//! ("every live Node carries the cleanup finalizer"). Nodes that are being
//! deleted are claimed in the [`InFlightSet`] and pushed onto a bounded
//! queue. A single worker drains the queue, runs the enabled actions and
//! removes the finalizer once they all succeed.
//!
//! A node stays claimed from the moment it is queued until its attempt ends
//! for good: success, abandonment, or shutdown. A failed attempt hands the
//! claim to a retry timer which either re-queues the node or releases it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::events::EventType;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use node_cleanup_actions::ActionRegistry;
use node_cleanup_common::events::{actions, reasons, EventPublisher};
use node_cleanup_common::retry::{retry_if, RetryConfig};
use node_cleanup_common::{
    Error, DEFAULT_MAX_RETRY_DELAY, DEFAULT_RESYNC_INTERVAL, DEFAULT_RETRY_DELAY,
    DEFAULT_WORK_QUEUE_SIZE,
};

use crate::finalizer::{
    has_finalizer, is_pending_cleanup, needs_finalizer, skip_requested, with_finalizer,
    without_finalizer,
};
use crate::{InFlightSet, NodeStore};

/// Lower bound for the resync period; `tokio::time::interval` rejects zero
const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for [`CleanupWatcher`]
#[derive(Clone, Debug, PartialEq)]
pub struct WatcherSettings {
    /// Capacity of the work queue
    pub queue_capacity: usize,
    /// Delay schedule between failed cleanup attempts of one node
    pub retry: RetryConfig,
    /// How often the cached node list is re-walked
    pub resync_interval: Duration,
    /// Bounded retry of finalizer read-check-patch sequences
    pub patch_retry: RetryConfig,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_WORK_QUEUE_SIZE,
            retry: RetryConfig {
                max_attempts: 0,
                initial_delay: DEFAULT_RETRY_DELAY,
                max_delay: DEFAULT_MAX_RETRY_DELAY,
                backoff_multiplier: 1.0,
            },
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            patch_retry: RetryConfig::with_max_attempts(5),
        }
    }
}

/// Receiving half of the cleanup work queue, consumed by [`CleanupWatcher::run`]
pub struct WorkQueue {
    rx: mpsc::Receiver<String>,
}

/// How a single cleanup attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The node no longer qualified for cleanup; claim released
    Abandoned,
    /// Skip annotation present; finalizer removed without running actions
    Skipped,
    /// All actions succeeded and the finalizer was removed
    Completed,
    /// An action failed; a retry timer now owns the claim
    RetryScheduled,
    /// Shutdown interrupted the attempt; claim released
    Cancelled,
    /// Reading or patching the node failed; claim released
    StoreError,
}

/// Result of the startup sweep over existing nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Nodes examined
    pub nodes: usize,
    /// Nodes that received the finalizer
    pub finalizers_added: usize,
    /// Deleting nodes queued for cleanup
    pub enqueued: usize,
    /// Nodes whose finalizer could not be added
    pub failed: usize,
}

/// Watches Node lifecycle events and drives cleanup of deleting Nodes
pub struct CleanupWatcher {
    store: Arc<dyn NodeStore>,
    registry: Arc<ActionRegistry>,
    events: Arc<dyn EventPublisher>,
    in_flight: InFlightSet,
    attempts: DashMap<String, u32>,
    queue: mpsc::Sender<String>,
    synced: watch::Sender<bool>,
    settings: WatcherSettings,
    cancel: CancellationToken,
}

impl CleanupWatcher {
    /// Create a watcher and the queue its worker will consume
    pub fn new(
        store: Arc<dyn NodeStore>,
        registry: Arc<ActionRegistry>,
        events: Arc<dyn EventPublisher>,
        settings: WatcherSettings,
        cancel: CancellationToken,
    ) -> (Arc<Self>, WorkQueue) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (synced, _) = watch::channel(false);
        let watcher = Arc::new(Self {
            store,
            registry,
            events,
            in_flight: InFlightSet::new(),
            attempts: DashMap::new(),
            queue: tx,
            synced,
            settings,
            cancel,
        });
        (watcher, WorkQueue { rx })
    }

    /// Claims held by queued, running or retrying nodes
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Failed attempts recorded for a node since its last success
    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts.get(name).map(|a| *a).unwrap_or(0)
    }

    /// Whether the initial list of the watch stream has completed
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Run until the cancellation token fires
    ///
    /// Consumes `events` on a separate task, waits for the initial list to
    /// complete, sweeps existing nodes once, then processes the queue on the
    /// calling task. Returns an error if the watch stream ended on its own.
    pub async fn run<S>(self: Arc<Self>, events: S, queue: WorkQueue) -> Result<(), Error>
    where
        S: Stream<Item = Result<watcher::Event<Node>, watcher::Error>> + Send + 'static,
    {
        info!(actions = ?self.registry.order(), "Starting node cleanup watcher");
        let consumer = tokio::spawn(Arc::clone(&self).consume_events(events));

        let synced = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.wait_until_synced() => true,
        };

        if synced {
            match self.initialize_existing_nodes().await {
                Ok(summary) => info!(
                    nodes = summary.nodes,
                    finalizers_added = summary.finalizers_added,
                    enqueued = summary.enqueued,
                    failed = summary.failed,
                    "Startup sweep complete"
                ),
                Err(e) => warn!(error = %e, "Startup sweep failed, resync will retry"),
            }
            self.process_queue(queue).await;
        } else {
            info!("Shutdown requested before node cache synced");
        }

        let stream_ended = match consumer.await {
            Ok(ended) => ended,
            Err(e) => {
                error!(error = %e, "Node event consumer panicked");
                true
            }
        };
        info!(in_flight = self.in_flight.len(), "Node cleanup watcher stopped");

        if stream_ended {
            return Err(Error::internal("watcher", "node watch stream ended"));
        }
        Ok(())
    }

    async fn wait_until_synced(&self) {
        let mut rx = self.synced.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Returns true when the stream ended rather than being cancelled
    async fn consume_events<S>(self: Arc<Self>, events: S) -> bool
    where
        S: Stream<Item = Result<watcher::Event<Node>, watcher::Error>> + Send + 'static,
    {
        let mut events = std::pin::pin!(events);
        let period = self.settings.resync_interval.max(MIN_RESYNC_INTERVAL);
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Node event consumer stopping");
                    return false;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => warn!(error = %e, "Node watch error, will retry"),
                    None => {
                        error!("Node watch stream ended, shutting down");
                        self.cancel.cancel();
                        return true;
                    }
                },
                _ = resync.tick() => {
                    if self.is_synced() {
                        self.resync().await;
                    }
                }
            }
        }
    }

    /// Dispatch one watch event
    ///
    /// Does no I/O itself: finalizer patches run on spawned tasks and
    /// deleting nodes are handed to the queue.
    pub fn handle_event(self: &Arc<Self>, event: watcher::Event<Node>) {
        match event {
            watcher::Event::Apply(node) | watcher::Event::InitApply(node) => self.observe(&node),
            watcher::Event::Delete(node) => {
                let name = node.name_any();
                self.attempts.remove(&name);
                debug!(node = %name, "Node removed from cluster");
            }
            watcher::Event::Init => debug!("Node watch (re)listing"),
            watcher::Event::InitDone => {
                if !self.synced.send_replace(true) {
                    info!("Node cache synced");
                }
            }
        }
    }

    fn observe(self: &Arc<Self>, node: &Node) {
        self.ensure_finalizer(node);
        self.enqueue_if_deleting(node);
    }

    /// Re-walk the cached node list, re-driving anything an event missed
    async fn resync(self: &Arc<Self>) {
        match self.store.list().await {
            Ok(nodes) => {
                debug!(nodes = nodes.len(), "Resyncing nodes");
                for node in &nodes {
                    self.observe(node);
                }
            }
            Err(e) => warn!(error = %e, "Failed to list nodes for resync"),
        }
    }

    /// Add the finalizer to every existing node missing it and queue nodes
    /// that are already being deleted
    pub async fn initialize_existing_nodes(self: &Arc<Self>) -> Result<SweepSummary, Error> {
        let nodes = self.store.list().await?;
        let mut summary = SweepSummary {
            nodes: nodes.len(),
            ..Default::default()
        };

        for node in &nodes {
            if needs_finalizer(node) {
                let name = node.name_any();
                match self.add_finalizer(&name).await {
                    Ok(true) => summary.finalizers_added += 1,
                    Ok(false) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(node = %name, error = %e, "Failed to add cleanup finalizer");
                        summary.failed += 1;
                    }
                }
            } else if self.enqueue_if_deleting(node) {
                summary.enqueued += 1;
            }
        }
        Ok(summary)
    }

    /// Spawn a finalizer add if the node is live and lacks it
    pub fn ensure_finalizer(self: &Arc<Self>, node: &Node) {
        if !needs_finalizer(node) {
            return;
        }
        let watcher = Arc::clone(self);
        let name = node.name_any();
        tokio::spawn(async move {
            match watcher.add_finalizer(&name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(node = %name, "Node gone before finalizer add"),
                Err(e) => warn!(node = %name, error = %e, "Failed to add cleanup finalizer"),
            }
        });
    }

    /// Add the finalizer to a node, re-reading it on conflict
    ///
    /// Returns false when there was nothing to do: the finalizer is already
    /// present or the node is being deleted.
    pub async fn add_finalizer(&self, name: &str) -> Result<bool, Error> {
        let patched = retry_if(
            &self.settings.patch_retry,
            "add_finalizer",
            move || self.add_finalizer_once(name),
            Error::is_retryable,
        )
        .await?;

        let Some(node) = patched else {
            return Ok(false);
        };
        info!(node = %name, "Added cleanup finalizer");
        self.events
            .publish(
                &node.object_ref(&()),
                EventType::Normal,
                reasons::FINALIZER_ADDED,
                actions::FINALIZE,
                None,
            )
            .await;
        Ok(true)
    }

    async fn add_finalizer_once(&self, name: &str) -> Result<Option<Node>, Error> {
        let node = self.store.get(name).await?;
        if !needs_finalizer(&node) {
            return Ok(None);
        }
        self.store
            .patch_finalizers(
                name,
                &with_finalizer(&node),
                node.metadata.resource_version.clone(),
            )
            .await?;
        Ok(Some(node))
    }

    /// Remove exactly the cleanup finalizer, re-reading the node on conflict
    ///
    /// Returns false when the finalizer was already gone.
    pub async fn remove_finalizer(&self, name: &str) -> Result<bool, Error> {
        retry_if(
            &self.settings.patch_retry,
            "remove_finalizer",
            move || self.remove_finalizer_once(name),
            Error::is_retryable,
        )
        .await
    }

    async fn remove_finalizer_once(&self, name: &str) -> Result<bool, Error> {
        let node = self.store.get(name).await?;
        if !has_finalizer(&node) {
            return Ok(false);
        }
        self.store
            .patch_finalizers(
                name,
                &without_finalizer(&node),
                node.metadata.resource_version.clone(),
            )
            .await?;
        Ok(true)
    }

    /// Claim and queue the node if it is pending cleanup
    ///
    /// Returns whether this call queued it. A node that is already claimed
    /// is left alone, so concurrent events never produce a second cleanup.
    pub fn enqueue_if_deleting(self: &Arc<Self>, node: &Node) -> bool {
        if !is_pending_cleanup(node) {
            return false;
        }
        let name = node.name_any();
        if !self.in_flight.claim(&name) {
            debug!(node = %name, "Node already in flight");
            return false;
        }

        info!(node = %name, "Node deletion detected, queued for cleanup");
        self.publish_detached(
            node,
            EventType::Normal,
            reasons::DELETION_DETECTED,
            None,
        );
        self.push(name);
        true
    }

    /// Put a claimed node on the queue without blocking the caller
    fn push(self: &Arc<Self>, name: String) {
        match self.queue.try_send(name) {
            Ok(()) => {}
            Err(TrySendError::Full(name)) => {
                warn!(
                    node = %name,
                    capacity = self.settings.queue_capacity,
                    "Work queue full, waiting for capacity"
                );
                let watcher = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = watcher.cancel.cancelled() => {
                            watcher.in_flight.release(&name);
                        }
                        result = watcher.queue.send(name.clone()) => {
                            if result.is_err() {
                                watcher.in_flight.release(&name);
                            }
                        }
                    }
                });
            }
            Err(TrySendError::Closed(name)) => {
                warn!(node = %name, "Work queue closed, dropping node");
                self.in_flight.release(&name);
            }
        }
    }

    async fn process_queue(self: &Arc<Self>, mut queue: WorkQueue) {
        info!("Cleanup worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Cleanup worker stopping");
                    return;
                }
                next = queue.rx.recv() => match next {
                    Some(name) => {
                        let outcome = self.process_node(&name).await;
                        debug!(node = %name, ?outcome, "Cleanup attempt finished");
                    }
                    None => return,
                },
            }
        }
    }

    /// Run one cleanup attempt for a claimed node
    ///
    /// The caller must hold the node's claim. Every outcome except
    /// [`CleanupOutcome::RetryScheduled`] releases it.
    pub async fn process_node(self: &Arc<Self>, name: &str) -> CleanupOutcome {
        let node = match self.store.get(name).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                debug!(node = %name, "Node gone before cleanup");
                self.settle(name);
                return CleanupOutcome::Abandoned;
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Failed to read node, abandoning attempt");
                self.in_flight.release(name);
                return CleanupOutcome::StoreError;
            }
        };

        if !is_pending_cleanup(&node) {
            debug!(node = %name, "Node no longer pending cleanup");
            self.settle(name);
            return CleanupOutcome::Abandoned;
        }

        if skip_requested(&node) {
            info!(node = %name, "Skip annotation set, bypassing cleanup actions");
            self.publish(
                &node,
                EventType::Normal,
                reasons::CLEANUP_SKIPPED,
                Some("cleanup bypassed by annotation".to_string()),
            )
            .await;
            return self.finish(&node, CleanupOutcome::Skipped).await;
        }

        let attempt = self.attempts(name) + 1;
        info!(node = %name, attempt, "Cleanup started");
        self.publish(&node, EventType::Normal, reasons::CLEANUP_STARTED, None)
            .await;

        match self.registry.run_all(&node, &self.cancel).await {
            Ok(report) => {
                info!(
                    node = %name,
                    executed = ?report.executed,
                    skipped = ?report.skipped,
                    "Cleanup succeeded"
                );
                self.publish(&node, EventType::Normal, reasons::CLEANUP_SUCCEEDED, None)
                    .await;
                self.finish(&node, CleanupOutcome::Completed).await
            }
            Err(e) if e.is_cancelled() => {
                info!(node = %name, "Cleanup interrupted by shutdown");
                self.in_flight.release(name);
                CleanupOutcome::Cancelled
            }
            Err(e) => {
                self.publish(
                    &node,
                    EventType::Warning,
                    reasons::CLEANUP_FAILED,
                    Some(e.to_string()),
                )
                .await;
                self.schedule_retry(name, &e);
                CleanupOutcome::RetryScheduled
            }
        }
    }

    async fn finish(self: &Arc<Self>, node: &Node, outcome: CleanupOutcome) -> CleanupOutcome {
        let name = node.name_any();
        match self.remove_finalizer(&name).await {
            Ok(removed) => {
                if removed {
                    info!(node = %name, "Removed cleanup finalizer");
                    self.publish(node, EventType::Normal, reasons::FINALIZER_REMOVED, None)
                        .await;
                }
                self.settle(&name);
                outcome
            }
            Err(e) if e.is_not_found() => {
                self.settle(&name);
                outcome
            }
            Err(e) => {
                error!(node = %name, error = %e, "Failed to remove cleanup finalizer");
                self.in_flight.release(&name);
                CleanupOutcome::StoreError
            }
        }
    }

    /// Release the claim and forget the node's failure history
    fn settle(&self, name: &str) {
        self.attempts.remove(name);
        self.in_flight.release(name);
    }

    /// Hand the claim to a timer that re-checks the node after the backoff
    fn schedule_retry(self: &Arc<Self>, name: &str, cause: &Error) {
        let attempt = {
            let mut count = self.attempts.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let delay = self.settings.retry.delay_for_attempt(attempt);
        error!(
            node = %name,
            attempt,
            error = %cause,
            retry_in_ms = delay.as_millis() as u64,
            "Cleanup failed, retry scheduled"
        );

        let watcher = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { watcher.retry_after(name, delay).await });
    }

    async fn retry_after(self: Arc<Self>, name: String, delay: Duration) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(node = %name, "Retry abandoned on shutdown");
                self.in_flight.release(&name);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match self.store.get(&name).await {
            Ok(node) if is_pending_cleanup(&node) => {
                debug!(node = %name, "Re-queueing node for cleanup");
                self.push(name);
            }
            Ok(_) => {
                debug!(node = %name, "Node no longer pending cleanup, dropping retry");
                self.settle(&name);
            }
            Err(e) if e.is_not_found() => self.settle(&name),
            Err(e) => {
                warn!(node = %name, error = %e, "Failed to re-check node, releasing");
                self.in_flight.release(&name);
            }
        }
    }

    async fn publish(&self, node: &Node, type_: EventType, reason: &str, note: Option<String>) {
        self.events
            .publish(&node.object_ref(&()), type_, reason, actions::CLEANUP, note)
            .await;
    }

    fn publish_detached(
        self: &Arc<Self>,
        node: &Node,
        type_: EventType,
        reason: &'static str,
        note: Option<String>,
    ) {
        let events = Arc::clone(&self.events);
        let reference = node.object_ref(&());
        tokio::spawn(async move {
            events
                .publish(&reference, type_, reason, actions::CLEANUP, note)
                .await;
        });
    }
}
