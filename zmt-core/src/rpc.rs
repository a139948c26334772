//! Blocking request/response calls into the engine.
//!
//! A task owns one [`RpcClient`]. Every call reserves an envelope, posts it
//! on the engine queue and parks on the task's inbox until the reply with
//! the same event id and call number comes back. Indications that arrive meanwhile stay
//! queued for [`RpcClient::next_item`].

use crate::envelope::{Envelope, InboxItem};
use crate::event::EventId;
use crate::inbox::{TaskId, TaskInbox};
use crate::message::{Request, Response};
use crate::pool::EnvelopePool;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use zmt_protocol::Status;

/// Default bound on how long a call waits for its reply.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_RPC_TIMEOUT),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RpcCounters {
    calls: AtomicU64,
    timeouts: AtomicU64,
    alloc_failures: AtomicU64,
    send_failures: AtomicU64,
}

impl RpcCounters {
    pub(crate) fn snapshot(&self) -> RpcStats {
        RpcStats {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Call counters for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcStats {
    pub calls: u64,
    pub timeouts: u64,
    pub alloc_failures: u64,
    pub send_failures: u64,
}

/// A task's connection to the engine.
pub struct RpcClient {
    task_id: TaskId,
    inbox: Arc<TaskInbox>,
    queue: mpsc::Sender<Envelope>,
    pool: Arc<EnvelopePool>,
    config: RpcConfig,
    /// Last call number handed out. Held while posting so numbers reach
    /// the engine queue in order.
    last_call: Mutex<u64>,
    counters: RpcCounters,
    /// Engine-wide totals, when registered through an engine.
    totals: Option<Arc<RpcCounters>>,
}

impl RpcClient {
    pub fn new(
        task_id: TaskId,
        inbox: Arc<TaskInbox>,
        queue: mpsc::Sender<Envelope>,
        pool: Arc<EnvelopePool>,
        config: RpcConfig,
    ) -> Self {
        Self {
            task_id,
            inbox,
            queue,
            pool,
            config,
            last_call: Mutex::new(0),
            counters: RpcCounters::default(),
            totals: None,
        }
    }

    pub(crate) fn with_totals(mut self, totals: Arc<RpcCounters>) -> Self {
        self.totals = Some(totals);
        self
    }

    fn count(&self, counter: fn(&RpcCounters) -> &AtomicU64) {
        counter(&self.counters).fetch_add(1, Ordering::Relaxed);
        if let Some(totals) = &self.totals {
            counter(totals).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn inbox(&self) -> &Arc<TaskInbox> {
        &self.inbox
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// Sends a request and returns the engine's status.
    pub async fn call(&self, request: Request) -> Status {
        match self.round_trip(request).await {
            Ok(envelope) => envelope.status,
            Err(status) => status,
        }
    }

    /// Sends a request and, on success, moves the engine's response into
    /// `out`. `out` is left untouched on failure.
    pub async fn call_with_response<T>(&self, request: Request, out: &mut T) -> Status
    where
        T: TryFrom<Response, Error = Response>,
    {
        let envelope = match self.round_trip(request).await {
            Ok(envelope) => envelope,
            Err(status) => return status,
        };
        if !envelope.status.is_success() {
            return envelope.status;
        }
        match envelope.response.map(T::try_from) {
            Some(Ok(value)) => {
                *out = value;
                envelope.status
            }
            Some(Err(other)) => {
                tracing::warn!(
                    "task {}: unexpected response to {}: {:?}",
                    self.task_id,
                    envelope.event_id,
                    other
                );
                Status::FAILURE
            }
            None => envelope.status,
        }
    }

    async fn round_trip(&self, request: Request) -> Result<Envelope, Status> {
        self.count(|c| &c.calls);
        let event_id = request.event_id();

        let lease = match self.pool.try_allocate(request.wire_size()) {
            Some(lease) => lease,
            None => {
                self.count(|c| &c.alloc_failures);
                tracing::warn!(
                    "task {}: no envelope for {} ({} of {} bytes in use)",
                    self.task_id,
                    event_id,
                    self.pool.in_use(),
                    self.pool.budget()
                );
                return Err(Status::MEM_ERROR);
            }
        };

        let call_seq = {
            let mut last_call = self.last_call.lock();
            let call_seq = *last_call + 1;
            let envelope = Envelope::new(self.task_id, request, lease).with_call_seq(call_seq);
            if let Err(e) = self.queue.try_send(envelope) {
                self.count(|c| &c.send_failures);
                return Err(match e {
                    TrySendError::Full(_) => Status::BUFFER_FULL,
                    TrySendError::Closed(_) => Status::FAILURE,
                });
            }
            *last_call = call_seq;
            call_seq
        };

        let item = match self.config.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.inbox.wait_for(event_id, call_seq)).await {
                    Ok(item) => item,
                    Err(_) => self.give_up(event_id, call_seq)?,
                }
            }
            None => self.inbox.wait_for(event_id, call_seq).await,
        };

        match item {
            InboxItem::Reply(envelope) => Ok(envelope),
            InboxItem::Indication(indication) => {
                tracing::error!(
                    "task {}: indication {} taken as reply",
                    self.task_id,
                    indication.event_id()
                );
                Err(Status::FAILURE)
            }
        }
    }

    /// Stops waiting for call `call_seq`. A reply that slipped in after the
    /// timer fired is still used.
    fn give_up(&self, event_id: EventId, call_seq: u64) -> Result<InboxItem, Status> {
        match self.inbox.abandon(event_id, call_seq) {
            Some(item) => Ok(item),
            None => {
                self.count(|c| &c.timeouts);
                tracing::warn!(
                    "task {}: {} (call {}) timed out",
                    self.task_id,
                    event_id,
                    call_seq
                );
                Err(Status::ICALL_TIMEOUT)
            }
        }
    }

    /// Waits for the next inbox item.
    pub async fn next_item(&self) -> InboxItem {
        self.inbox.recv().await
    }

    pub fn try_next_item(&self) -> Option<InboxItem> {
        self.inbox.dequeue()
    }

    /// Removes the first queued item with `event_id`.
    pub fn take_item(&self, event_id: EventId) -> Option<InboxItem> {
        self.inbox.find_dequeue(event_id)
    }

    pub fn stats(&self) -> RpcStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("task_id", &self.task_id)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indication::Indication;
    use crate::message::{NwkInfo, VersionInfo};

    struct Harness {
        client: RpcClient,
        inbox: Arc<TaskInbox>,
        queue: mpsc::Receiver<Envelope>,
        pool: Arc<EnvelopePool>,
    }

    /// A client whose engine side is driven by hand.
    fn harness(
        task: u8,
        queue_capacity: usize,
        budget: usize,
        timeout: Option<Duration>,
    ) -> Harness {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let inbox = Arc::new(TaskInbox::new(TaskId(task), 16));
        let pool = EnvelopePool::new(budget);
        let client = RpcClient::new(
            TaskId(task),
            Arc::clone(&inbox),
            tx,
            Arc::clone(&pool),
            RpcConfig { timeout },
        );
        Harness {
            client,
            inbox,
            queue: rx,
            pool,
        }
    }

    fn answer(mut envelope: Envelope, response: Response) -> InboxItem {
        envelope.response = Some(response);
        InboxItem::Reply(envelope)
    }

    #[tokio::test]
    async fn test_out_of_order_replies_are_correlated() {
        let mut h = harness(1, 8, 1024, Some(Duration::from_secs(1)));
        let client = Arc::new(h.client);

        let a = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut version = VersionInfo::default();
                let status = client.call_with_response(Request::SysVersion, &mut version).await;
                (status, version)
            })
        };
        let req_a = h.queue.recv().await.unwrap();

        let b = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut info = NwkInfo::default();
                let status = client.call_with_response(Request::SysNwkInfoRead, &mut info).await;
                (status, info)
            })
        };
        let req_b = h.queue.recv().await.unwrap();

        // B is answered first
        h.inbox
            .push(answer(
                req_b,
                Response::NwkInfo(NwkInfo {
                    pan_id: 0x1A62,
                    ..Default::default()
                }),
            ))
            .unwrap();
        let (status_b, info) = b.await.unwrap();
        assert_eq!(status_b, Status::SUCCESS);
        assert_eq!(info.pan_id, 0x1A62);
        assert!(!a.is_finished());

        h.inbox
            .push(answer(
                req_a,
                Response::Version(VersionInfo {
                    major: 2,
                    minor: 7,
                    ..Default::default()
                }),
            ))
            .unwrap();
        let (status_a, version) = a.await.unwrap();
        assert_eq!(status_a, Status::SUCCESS);
        assert_eq!((version.major, version.minor), (2, 7));
        assert_eq!(h.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_two_tasks_are_not_swapped() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = EnvelopePool::new(1024);
        let inbox_1 = Arc::new(TaskInbox::new(TaskId(1), 8));
        let inbox_2 = Arc::new(TaskInbox::new(TaskId(2), 8));
        let config = RpcConfig::default();
        let c1 = RpcClient::new(
            TaskId(1),
            Arc::clone(&inbox_1),
            tx.clone(),
            Arc::clone(&pool),
            config.clone(),
        );
        let c2 = RpcClient::new(TaskId(2), Arc::clone(&inbox_2), tx, pool, config);

        let engine = tokio::spawn(async move {
            let mut pending = Vec::new();
            while pending.len() < 2 {
                pending.push(rx.recv().await.unwrap());
            }
            // Answer in reverse arrival order, each with its own task id
            for mut env in pending.into_iter().rev() {
                env.response = Some(Response::Version(VersionInfo {
                    product: env.source_task.0,
                    ..Default::default()
                }));
                let inbox = if env.source_task == TaskId(1) {
                    &inbox_1
                } else {
                    &inbox_2
                };
                inbox.push(InboxItem::Reply(env)).unwrap();
            }
        });

        let mut v1 = VersionInfo::default();
        let mut v2 = VersionInfo::default();
        let (s1, s2) = tokio::join!(
            c1.call_with_response(Request::SysVersion, &mut v1),
            c2.call_with_response(Request::SysVersion, &mut v2)
        );
        engine.await.unwrap();

        assert!(s1.is_success() && s2.is_success());
        assert_eq!(v1.product, 1);
        assert_eq!(v2.product, 2);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_mem_error() {
        let mut h = harness(1, 8, 8, None);
        let status = h.client.call(Request::SysVersion).await;
        assert_eq!(status, Status::MEM_ERROR);
        assert!(h.queue.try_recv().is_err());
        assert_eq!(h.client.stats().alloc_failures, 1);
    }

    #[tokio::test]
    async fn test_full_queue_is_buffer_full() {
        let mut h = harness(1, 1, 1024, None);
        // Occupy the only slot
        h.client
            .queue
            .try_send(Envelope::unpooled(TaskId(9), Request::SysVersion))
            .unwrap();

        let call = h.client.call(Request::SysVersion);
        let status = tokio::time::timeout(Duration::from_millis(100), call)
            .await
            .expect("call must not block");
        assert_eq!(status, Status::BUFFER_FULL);
        assert_eq!(h.pool.in_use(), 0);
        assert_eq!(h.queue.recv().await.unwrap().source_task, TaskId(9));
    }

    #[tokio::test]
    async fn test_closed_engine_is_failure() {
        let h = harness(1, 4, 1024, None);
        drop(h.queue);
        assert_eq!(h.client.call(Request::SysVersion).await, Status::FAILURE);
    }

    #[tokio::test]
    async fn test_timeout_discards_late_reply() {
        let mut h = harness(1, 8, 1024, Some(Duration::from_millis(20)));

        let status = h.client.call(Request::SysVersion).await;
        assert_eq!(status, Status::ICALL_TIMEOUT);
        assert_eq!(h.client.stats().timeouts, 1);
        assert_eq!(h.inbox.abandoned(), 1);

        // The stale reply shows up and is thrown away
        let stale = h.queue.recv().await.unwrap();
        h.inbox.push(answer(stale, Response::Version(VersionInfo::default()))).unwrap();
        assert!(h.inbox.is_empty());

        // The next call gets its own answer
        let client = Arc::new(h.client);
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut version = VersionInfo::default();
                let status = client.call_with_response(Request::SysVersion, &mut version).await;
                (status, version.maint)
            })
        };
        let fresh = h.queue.recv().await.unwrap();
        h.inbox
            .push(answer(
                fresh,
                Response::Version(VersionInfo {
                    maint: 9,
                    ..Default::default()
                }),
            ))
            .unwrap();
        assert_eq!(call.await.unwrap(), (Status::SUCCESS, 9));
    }

    #[tokio::test]
    async fn test_indications_stay_queued_during_call() {
        let mut h = harness(3, 8, 1024, Some(Duration::from_secs(1)));
        h.inbox
            .push(InboxItem::Indication(Indication::DevStateChange { state: 9 }))
            .unwrap();

        let client = Arc::new(h.client);
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call(Request::DevStart { start_delay: 0 }).await })
        };
        let env = h.queue.recv().await.unwrap();
        h.inbox.push(InboxItem::Reply(env)).unwrap();
        assert_eq!(call.await.unwrap(), Status::SUCCESS);

        let item = client.try_next_item().unwrap();
        assert!(!item.is_reply());
        assert!(client.try_next_item().is_none());
    }

    #[tokio::test]
    async fn test_error_status_leaves_response_untouched() {
        let mut h = harness(1, 8, 1024, Some(Duration::from_secs(1)));
        let client = Arc::new(h.client);
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut version = VersionInfo {
                    major: 7,
                    ..Default::default()
                };
                let status = client.call_with_response(Request::SysVersion, &mut version).await;
                (status, version.major)
            })
        };
        let mut env = h.queue.recv().await.unwrap();
        env.status = Status::INVALID_PARAMETER;
        h.inbox.push(InboxItem::Reply(env)).unwrap();
        assert_eq!(call.await.unwrap(), (Status::INVALID_PARAMETER, 7));
    }
}
