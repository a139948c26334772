//! RPC engine - serves envelopes from the request queue and fans out
//! indications.

use crate::envelope::{Envelope, InboxItem};
use crate::error::CoreError;
use crate::inbox::TaskId;
use crate::indication::Indication;
use crate::message::{Request, Response};
use crate::pool::EnvelopePool;
use crate::router::TaskRouter;
use crate::rpc::{RpcClient, RpcConfig, RpcCounters, RpcStats};
use crate::stack::StackEvent;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use zmt_protocol::Status;

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub status: Status,
    pub response: Option<Response>,
}

impl Processed {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            response: None,
        }
    }

    pub fn response(response: Response) -> Self {
        Self {
            status: Status::SUCCESS,
            response: Some(response),
        }
    }
}

/// The collaborator that executes requests on behalf of the engine.
pub trait CommandProcessor: Send + Sync {
    fn process(&self, source: TaskId, request: &Request) -> Processed;
}

/// Engine sizing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Envelopes the request queue holds before senders see BUFFER_FULL.
    pub queue_capacity: usize,
    /// Items each task inbox holds.
    pub inbox_capacity: usize,
    /// Bytes available to in-flight envelopes.
    pub envelope_budget: usize,
    pub rpc: RpcConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            inbox_capacity: 32,
            envelope_budget: 4096,
            rpc: RpcConfig::default(),
        }
    }
}

/// Engine counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    requests: AtomicU64,
    replies_dropped: AtomicU64,
    indications_delivered: AtomicU64,
    indications_dropped: AtomicU64,
    events_lagged: AtomicU64,
    /// Summed over every client the engine registered.
    rpc: Arc<RpcCounters>,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    pub requests: u64,
    pub replies_dropped: u64,
    pub indications_delivered: u64,
    pub indications_dropped: u64,
    pub events_lagged: u64,
    pub rpc: RpcStats,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            indications_delivered: self.indications_delivered.load(Ordering::Relaxed),
            indications_dropped: self.indications_dropped.load(Ordering::Relaxed),
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
            rpc: self.rpc.snapshot(),
        }
    }
}

struct Shared {
    config: EngineConfig,
    router: TaskRouter,
    subscribers: RwLock<BTreeSet<TaskId>>,
    pool: Arc<EnvelopePool>,
    queue: mpsc::Sender<Envelope>,
    stats: EngineStats,
}

impl Shared {
    fn deliver_reply(&self, envelope: Envelope) {
        let task = envelope.source_task;
        let event_id = envelope.event_id;
        if let Err(e) = self.router.deliver(task, InboxItem::Reply(envelope)) {
            self.stats.replies_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("dropping reply {} for task {}: {}", event_id, task, e);
        }
    }

    fn deliver_indication(&self, task: TaskId, indication: Indication) -> Result<(), CoreError> {
        let event_id = indication.event_id();
        match self.router.deliver(task, InboxItem::Indication(indication)) {
            Ok(()) => {
                self.stats.indications_delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.indications_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("dropping {} for task {}: {}", event_id, task, e);
                Err(e)
            }
        }
    }

    fn fan_out(&self, indication: Indication) {
        let subscribers: Vec<TaskId> = self.subscribers.read().iter().copied().collect();
        let Some((last, rest)) = subscribers.split_last() else {
            tracing::trace!("no subscribers for {}", indication.event_id());
            return;
        };
        for task in rest {
            let _ = self.deliver_indication(*task, indication.clone());
        }
        let _ = self.deliver_indication(*last, indication);
    }
}

/// The engine task. Create with [`Engine::new`] and drive with
/// [`Engine::run`].
pub struct Engine {
    shared: Arc<Shared>,
    processor: Arc<dyn CommandProcessor>,
    queue: mpsc::Receiver<Envelope>,
    events: Option<broadcast::Receiver<StackEvent>>,
}

impl Engine {
    pub fn new(config: EngineConfig, processor: Arc<dyn CommandProcessor>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            pool: EnvelopePool::new(config.envelope_budget),
            router: TaskRouter::new(),
            subscribers: RwLock::new(BTreeSet::new()),
            queue: tx,
            stats: EngineStats::default(),
            config,
        });
        let engine = Self {
            shared: Arc::clone(&shared),
            processor,
            queue: rx,
            events: None,
        };
        (engine, EngineHandle { shared })
    }

    /// Forwards stack events to subscribed tasks as indications.
    pub fn with_events(mut self, events: broadcast::Receiver<StackEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Serves requests until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "RPC engine started (queue {}, budget {} bytes)",
            self.shared.config.queue_capacity,
            self.shared.pool.budget()
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("RPC engine shutting down");
                    break;
                }
                envelope = self.queue.recv() => match envelope {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Ok(event) => {
                        if let Some(indication) = event.to_indication() {
                            self.shared.fan_out(indication);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.shared.stats.events_lagged.fetch_add(n, Ordering::Relaxed);
                        tracing::warn!("RPC engine lagged {} stack events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.events = None;
                    }
                },
            }
        }
    }

    fn handle(&self, mut envelope: Envelope) {
        self.shared.stats.requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            "task {} -> {} ({} bytes)",
            envelope.source_task,
            envelope.event_id,
            envelope.allocated()
        );

        if let Request::DevZdoCallbacks { enable } = envelope.request {
            let mut subscribers = self.shared.subscribers.write();
            if enable {
                subscribers.insert(envelope.source_task);
            } else {
                subscribers.remove(&envelope.source_task);
            }
            envelope.status = Status::SUCCESS;
        } else {
            let processed = self.processor.process(envelope.source_task, &envelope.request);
            envelope.status = processed.status;
            envelope.response = processed.response;
        }

        self.shared.deliver_reply(envelope);
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StackEvent>>,
) -> Result<StackEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Shared access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Registers a task and returns its RPC client.
    pub fn register_task(&self, task_id: TaskId) -> Result<RpcClient, CoreError> {
        let inbox = self
            .shared
            .router
            .register(task_id, self.shared.config.inbox_capacity)?;
        Ok(RpcClient::new(
            task_id,
            inbox,
            self.shared.queue.clone(),
            Arc::clone(&self.shared.pool),
            self.shared.config.rpc.clone(),
        )
        .with_totals(Arc::clone(&self.shared.stats.rpc)))
    }

    pub fn unregister_task(&self, task_id: TaskId) -> bool {
        self.shared.subscribers.write().remove(&task_id);
        self.shared.router.unregister(task_id).is_some()
    }

    /// Subscribes a task to indications without a round trip.
    pub fn subscribe(&self, task_id: TaskId) -> Result<(), CoreError> {
        if self.shared.router.get(task_id).is_none() {
            return Err(CoreError::TaskNotFound(task_id));
        }
        self.shared.subscribers.write().insert(task_id);
        Ok(())
    }

    pub fn unsubscribe(&self, task_id: TaskId) {
        self.shared.subscribers.write().remove(&task_id);
    }

    pub fn subscribers(&self) -> Vec<TaskId> {
        self.shared.subscribers.read().iter().copied().collect()
    }

    /// Delivers an indication to one task.
    pub fn indicate(&self, task_id: TaskId, indication: Indication) -> Result<(), CoreError> {
        self.shared.deliver_indication(task_id, indication)
    }

    /// Delivers an indication to every subscriber.
    pub fn broadcast(&self, indication: Indication) {
        self.shared.fan_out(indication);
    }

    pub fn router(&self) -> &TaskRouter {
        &self.shared.router
    }

    pub fn pool(&self) -> &Arc<EnvelopePool> {
        &self.shared.pool
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("tasks", &self.shared.router.len())
            .field("subscribers", &self.shared.subscribers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventId;
    use crate::message::{TxPowerRsp, VersionInfo};
    use crate::stack::{DeviceConfig, SimulatedStack};
    use std::time::Duration;

    struct Echo;

    impl CommandProcessor for Echo {
        fn process(&self, _source: TaskId, request: &Request) -> Processed {
            match request {
                Request::SysVersion => Processed::response(Response::Version(VersionInfo {
                    major: 2,
                    ..Default::default()
                })),
                Request::SysSetTxPower { dbm } => {
                    Processed::response(Response::TxPower(TxPowerRsp { applied_dbm: *dbm }))
                }
                _ => Processed::status(Status::INVALID_PARAMETER),
            }
        }
    }

    fn start(config: EngineConfig) -> (EngineHandle, broadcast::Sender<()>) {
        let (engine, handle) = Engine::new(config, Arc::new(Echo));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(engine.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn test_request_reply_roundtrip() {
        let (handle, _shutdown) = start(EngineConfig::default());
        let client = handle.register_task(TaskId(1)).unwrap();

        let mut version = VersionInfo::default();
        let status = client.call_with_response(Request::SysVersion, &mut version).await;
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(version.major, 2);

        let status = client.call(Request::DevStart { start_delay: 0 }).await;
        assert_eq!(status, Status::INVALID_PARAMETER);
        assert_eq!(handle.stats().requests, 2);
        assert_eq!(handle.stats().rpc.calls, 2);
        assert_eq!(handle.pool().in_use(), 0);
    }

    #[tokio::test]
    async fn test_zdo_callbacks_subscribe() {
        let (handle, _shutdown) = start(EngineConfig::default());
        let client = handle.register_task(TaskId(5)).unwrap();

        let status = client.call(Request::DevZdoCallbacks { enable: true }).await;
        assert!(status.is_success());
        assert_eq!(handle.subscribers(), vec![TaskId(5)]);

        handle.broadcast(Indication::PermitJoinInd { duration: 30 });
        let item = client.try_next_item().unwrap();
        assert_eq!(item.event_id(), EventId::DEV_PERMIT_JOIN_IND);

        client.call(Request::DevZdoCallbacks { enable: false }).await;
        assert!(handle.subscribers().is_empty());
    }

    #[tokio::test]
    async fn test_stack_events_reach_subscribers() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        let (engine, handle) = Engine::new(EngineConfig::default(), stack.clone());
        let engine = engine.with_events(stack.subscribe());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(engine.run(shutdown_rx));

        let app = handle.register_task(TaskId(2)).unwrap();
        let quiet = handle.register_task(TaskId(3)).unwrap();
        handle.subscribe(TaskId(2)).unwrap();

        let status = app.call(Request::DevStart { start_delay: 0 }).await;
        assert!(status.is_success());

        let first = tokio::time::timeout(Duration::from_secs(1), app.next_item())
            .await
            .unwrap();
        assert_eq!(first.event_id(), EventId::DEV_STATE_CHANGE_IND);
        assert!(quiet.try_next_item().is_none());
    }

    #[tokio::test]
    async fn test_reply_to_missing_task_is_dropped() {
        let config = EngineConfig {
            rpc: RpcConfig {
                timeout: Some(Duration::from_millis(50)),
            },
            ..Default::default()
        };
        let (handle, _shutdown) = start(config);
        let client = handle.register_task(TaskId(1)).unwrap();
        handle.unregister_task(TaskId(1));

        let status = client.call(Request::SysVersion).await;
        assert_eq!(status, Status::ICALL_TIMEOUT);
        assert_eq!(handle.stats().replies_dropped, 1);
        assert_eq!(handle.stats().rpc.timeouts, 1);
    }

    #[tokio::test]
    async fn test_dropped_reply_does_not_block_later_calls() {
        let config = EngineConfig {
            inbox_capacity: 1,
            rpc: RpcConfig {
                timeout: Some(Duration::from_millis(50)),
            },
            ..Default::default()
        };
        let (handle, _shutdown) = start(config);
        let client = handle.register_task(TaskId(1)).unwrap();

        // A full inbox makes the engine drop the first reply
        handle
            .indicate(TaskId(1), Indication::PermitJoinInd { duration: 10 })
            .unwrap();
        assert_eq!(client.call(Request::SysVersion).await, Status::ICALL_TIMEOUT);
        assert_eq!(handle.stats().replies_dropped, 1);
        assert_eq!(client.inbox().abandoned(), 1);

        assert!(client.try_next_item().is_some());
        for _ in 0..3 {
            let mut version = VersionInfo::default();
            let status = client.call_with_response(Request::SysVersion, &mut version).await;
            assert_eq!(status, Status::SUCCESS);
            assert_eq!(version.major, 2);
        }
        assert_eq!(client.inbox().abandoned(), 0);
        assert!(client.inbox().is_empty());
        assert_eq!(handle.pool().in_use(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let (engine, handle) = Engine::new(EngineConfig::default(), Arc::new(Echo));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(engine.run(shutdown_rx));
        let client = handle.register_task(TaskId(1)).unwrap();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(client.call(Request::SysVersion).await, Status::FAILURE);
    }

    #[test]
    fn test_duplicate_task() {
        let (_engine, handle) = Engine::new(EngineConfig::default(), Arc::new(Echo));
        handle.register_task(TaskId(1)).unwrap();
        assert!(matches!(
            handle.register_task(TaskId(1)),
            Err(CoreError::TaskExists(TaskId(1)))
        ));
        assert!(matches!(
            handle.subscribe(TaskId(9)),
            Err(CoreError::TaskNotFound(TaskId(9)))
        ));
    }
}
