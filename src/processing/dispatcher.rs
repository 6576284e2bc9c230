//! Dispatch pipeline: inbound message to handler to acknowledgement
//!
//! Per message:
//! 1. Resolve the subscription (unmatched topics are dropped)
//! 2. Decode the payload into the subscription's event type
//! 3. Run the handler isolated in its own task (failure, panic, timeout)
//! 4. Acknowledge according to QoS and the configured [`AckPolicy`]
//!
//! Each subscription pattern gets its own lane, a bounded queue drained by
//! one task, so messages for one subscription run in order while different
//! subscriptions run concurrently. A shared semaphore bounds how many
//! handlers run at once.

use super::ack::{AckDecision, AckPolicy, DispatchOutcome, RedeliveryTracker};
use crate::dispatch_span;
use crate::error::MessagingError;
use crate::observability::DispatchStats;
use crate::protocol::{InboundMessage, TopicPattern};
use crate::routing::handler::HandlerFuture;
use crate::routing::{HandlerError, SubscriptionRegistry};
use crate::transport::Transport;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Dispatch pipeline tuning
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Handlers allowed to run at the same time
    pub worker_pool_size: usize,
    /// Capacity of the inbound channel and of each lane
    pub queue_capacity: usize,
    /// Abort handlers running longer than this
    pub handler_timeout: Option<Duration>,
    /// How long shutdown waits for queued dispatches
    pub shutdown_grace: Duration,
    pub ack_policy: AckPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            queue_capacity: 64,
            handler_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            ack_policy: AckPolicy::default(),
        }
    }
}

/// Why a handler invocation did not succeed
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
    #[error("handler cancelled")]
    Cancelled,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one handler invocation in its own task
///
/// Panics surface as [`DispatchFailure::Panicked`]; a timed out or cancelled
/// invocation is aborted.
pub async fn run_isolated(
    invocation: HandlerFuture,
    timeout: Option<Duration>,
) -> Result<(), DispatchFailure> {
    let mut task = AbortOnDrop(tokio::spawn(invocation));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
            Ok(joined) => joined,
            Err(_) => return Err(DispatchFailure::TimedOut(limit)),
        },
        None => (&mut task.0).await,
    };

    match joined {
        Ok(result) => result.map_err(DispatchFailure::from),
        Err(e) if e.is_panic() => Err(DispatchFailure::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(DispatchFailure::Cancelled),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// State shared by the router and every lane
struct DispatchContext<T: Transport> {
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<T>,
    stats: Arc<DispatchStats>,
    workers: Semaphore,
    handler_timeout: Option<Duration>,
    ack_policy: AckPolicy,
    redeliveries: Mutex<RedeliveryTracker>,
}

impl<T: Transport> DispatchContext<T> {
    async fn acknowledge(&self, message: &InboundMessage, decision: AckDecision) {
        match decision {
            AckDecision::NotRequired => return,
            AckDecision::Withhold { failures } => {
                self.stats.ack_withheld();
                debug!(
                    topic = %message.topic,
                    failures,
                    "Withholding acknowledgement for redelivery"
                );
                return;
            }
            AckDecision::AcknowledgeAndDrop { failures } => {
                self.stats.dropped_after_redelivery();
                warn!(
                    topic = %message.topic,
                    failures,
                    "Redelivery budget exhausted, dropping message"
                );
            }
            AckDecision::Acknowledge => {}
        }

        self.redeliveries.lock().await.forget(message);
        match self.transport.acknowledge(message).await {
            Ok(()) => self.stats.acknowledged(),
            Err(e) => warn!(
                topic = %message.topic,
                error = %e,
                "Failed to acknowledge message"
            ),
        }
    }

    /// Acknowledge and drop a message no handler can process
    async fn drop_undeliverable(&self, message: &InboundMessage) {
        let decision = self
            .ack_policy
            .decide(message.qos, DispatchOutcome::Undeliverable, 0);
        self.acknowledge(message, decision).await;
    }

    /// Dispatch one message on the lane for `pattern`
    async fn dispatch(&self, pattern: &TopicPattern, message: InboundMessage) {
        // Looked up again so a replaced handler never sees later messages
        let Some(subscription) = self.registry.get(pattern).await else {
            self.stats.unmatched_topic();
            debug!(topic = %message.topic, pattern = %pattern, "Subscription removed before dispatch");
            self.drop_undeliverable(&message).await;
            return;
        };

        let invocation = match subscription.handler().bind(&message.payload) {
            Ok(invocation) => invocation,
            Err(e) => {
                self.stats.decode_failed();
                let e = MessagingError::from(e);
                warn!(
                    topic = %message.topic,
                    event = subscription.handler().event_kind(),
                    error = %e,
                    "Dropping undecodable message"
                );
                self.drop_undeliverable(&message).await;
                return;
            }
        };

        let Ok(_permit) = self.workers.acquire().await else {
            return;
        };

        let started = Instant::now();
        let result = run_isolated(invocation, self.handler_timeout).await;
        let elapsed = started.elapsed();

        let decision = match result {
            Ok(()) => {
                self.stats.handler_succeeded(elapsed);
                debug!(topic = %message.topic, elapsed_ms = elapsed.as_millis() as u64, "Handler succeeded");
                self.ack_policy
                    .decide(message.qos, DispatchOutcome::Handled, 0)
            }
            Err(failure) => {
                match &failure {
                    DispatchFailure::Panicked(_) => self.stats.handler_panicked(elapsed),
                    DispatchFailure::TimedOut(_) => self.stats.handler_timed_out(elapsed),
                    _ => self.stats.handler_failed(elapsed),
                }
                let error = MessagingError::handler_failure(failure.to_string());
                warn!(topic = %message.topic, error = %error, "Dispatch failed");

                let failures = if message.qos.requires_ack() {
                    self.redeliveries.lock().await.record_failure(&message)
                } else {
                    1
                };
                self.ack_policy
                    .decide(message.qos, DispatchOutcome::HandlerFailed, failures)
            }
        };

        self.acknowledge(&message, decision).await;
    }
}

/// Running dispatch pipeline attached to a transport
pub struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    router: Option<JoinHandle<Vec<AbortOnDrop<()>>>>,
    shutdown_grace: Duration,
}

impl Dispatcher {
    /// Attach to `transport` and start routing its inbound messages
    pub fn start<T: Transport>(
        config: DispatchConfig,
        registry: Arc<SubscriptionRegistry>,
        transport: Arc<T>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_capacity);
        transport.set_inbound_sender(inbound_tx);

        let context = Arc::new(DispatchContext {
            registry,
            transport,
            stats,
            workers: Semaphore::new(config.worker_pool_size.max(1)),
            handler_timeout: config.handler_timeout,
            ack_policy: config.ack_policy,
            redeliveries: Mutex::new(RedeliveryTracker::default()),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = tokio::spawn(route_inbound(
            context,
            inbound_rx,
            shutdown_rx,
            queue_capacity,
        ));

        info!(
            workers = config.worker_pool_size,
            queue_capacity,
            ack_policy = ?config.ack_policy,
            "Dispatch pipeline started"
        );

        Self {
            shutdown_tx,
            router: Some(router),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Stop intake, drain queued dispatches within the grace period, then abort
    ///
    /// Returns once the grace period has elapsed at the latest, even when a
    /// handler never completes.
    pub async fn shutdown(&mut self) {
        let Some(mut router) = self.router.take() else {
            return;
        };

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let _ = self.shutdown_tx.send(true);

        let lanes = match tokio::time::timeout_at(deadline, &mut router).await {
            Ok(Ok(lanes)) => lanes,
            Ok(Err(e)) => {
                error!("Dispatch router ended abnormally: {}", e);
                Vec::new()
            }
            Err(_) => {
                // lanes owned by the router are aborted as it is dropped
                router.abort();
                warn!("Dispatch router did not stop within the grace period");
                Vec::new()
            }
        };

        let mut aborted = 0usize;
        for mut lane in lanes {
            if tokio::time::timeout_at(deadline, &mut lane.0).await.is_err() {
                lane.0.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!(aborted, "Shutdown grace period elapsed, aborted remaining dispatches");
        }
        info!("Dispatch pipeline stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

/// Queue and task serving one subscription pattern
struct Lane {
    sender: mpsc::Sender<InboundMessage>,
    task: AbortOnDrop<()>,
}

/// Lanes keyed by pattern, plus lanes retired after their pattern went away
struct Lanes {
    active: HashMap<TopicPattern, Lane>,
    retired: HashMap<TopicPattern, AbortOnDrop<()>>,
    registry_revision: u64,
}

impl Lanes {
    fn new(registry_revision: u64) -> Self {
        Self {
            active: HashMap::new(),
            retired: HashMap::new(),
            registry_revision,
        }
    }

    /// Retire lanes whose pattern is no longer subscribed
    ///
    /// Dropping a lane's sender lets it drain its queue and exit. Only runs
    /// when the registry changed since the last check.
    async fn retire_unsubscribed(&mut self, registry: &SubscriptionRegistry) {
        let revision = registry.revision();
        if revision == self.registry_revision {
            return;
        }
        self.registry_revision = revision;
        self.retired.retain(|_, task| !task.0.is_finished());

        let subscribed: HashSet<TopicPattern> = registry.patterns().await.into_iter().collect();
        let stale: Vec<TopicPattern> = self
            .active
            .keys()
            .filter(|pattern| !subscribed.contains(*pattern))
            .cloned()
            .collect();

        for pattern in stale {
            if let Some(lane) = self.active.remove(&pattern) {
                debug!(pattern = %pattern, "Retiring dispatch lane");
                self.retired.insert(pattern, lane.task);
            }
        }
    }

    /// Lane for `pattern`, spawning one if needed
    ///
    /// A new lane waits for a retired lane of the same pattern to finish, so
    /// per-pattern order survives a resubscribe.
    fn lane_for<T: Transport>(
        &mut self,
        context: &Arc<DispatchContext<T>>,
        pattern: &TopicPattern,
        queue_capacity: usize,
    ) -> &mpsc::Sender<InboundMessage> {
        let retired = &mut self.retired;
        let lane = self.active.entry(pattern.clone()).or_insert_with(|| {
            let (sender, queue) = mpsc::channel(queue_capacity);
            let predecessor = retired.remove(pattern);
            let task = tokio::spawn(run_lane(
                Arc::clone(context),
                pattern.clone(),
                queue,
                predecessor,
            ));
            Lane {
                sender,
                task: AbortOnDrop(task),
            }
        });
        &lane.sender
    }

    fn len(&self) -> usize {
        self.active.len()
    }

    /// Drop every sender and hand back the tasks so they can drain
    fn into_tasks(self) -> Vec<AbortOnDrop<()>> {
        self.active
            .into_values()
            .map(|lane| lane.task)
            .chain(self.retired.into_values())
            .collect()
    }
}

/// Route inbound messages to per-subscription lanes
///
/// Returns the lane tasks so shutdown can wait for them to drain.
async fn route_inbound<T: Transport>(
    context: Arc<DispatchContext<T>>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
    queue_capacity: usize,
) -> Vec<AbortOnDrop<()>> {
    let mut lanes = Lanes::new(context.registry.revision());

    loop {
        let message = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        context.stats.message_received();
        lanes.retire_unsubscribed(&context.registry).await;

        let Some(subscription) = context.registry.resolve(&message.topic).await else {
            context.stats.unmatched_topic();
            debug!(topic = %message.topic, qos = %message.qos, "No subscription for topic");
            context.drop_undeliverable(&message).await;
            continue;
        };

        let pattern = subscription.pattern().clone();
        let lane = lanes.lane_for(&context, &pattern, queue_capacity);

        // a full lane blocks intake, which backs up the transport
        let sent = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!(pattern = %pattern, "Shutdown while lane was full, message not dispatched");
                break;
            }
            sent = lane.send(message) => sent,
        };
        if sent.is_err() {
            error!(pattern = %pattern, "Dispatch lane closed unexpectedly");
        }
    }

    debug!(lanes = lanes.len(), "Dispatch router stopping");
    lanes.into_tasks()
}

async fn run_lane<T: Transport>(
    context: Arc<DispatchContext<T>>,
    pattern: TopicPattern,
    mut queue: mpsc::Receiver<InboundMessage>,
    predecessor: Option<AbortOnDrop<()>>,
) {
    if let Some(mut previous) = predecessor {
        let _ = (&mut previous.0).await;
    }

    while let Some(message) = queue.recv().await {
        let span = dispatch_span!(
            topic = %message.topic,
            pattern = %pattern,
            qos = %message.qos,
            message_id = message.metadata.message_id
        );
        context.dispatch(&pattern, message).instrument(span).await;
    }
}
