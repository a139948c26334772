//! Per-task message queues.
//!
//! Replies and indications for a task share one inbox. The RPC wait loop
//! picks out the reply it is waiting for by event id and call number and
//! leaves everything else queued for the task's own poll loop.

use crate::envelope::InboxItem;
use crate::error::CoreError;
use crate::event::EventId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tokio::sync::Notify;

/// Identifies a task registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u8);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct InboxState {
    queue: VecDeque<InboxItem>,
    /// Calls whose reply is discarded on arrival.
    abandoned: HashSet<(EventId, u64)>,
}

/// A bounded queue plus the signal that wakes its owner.
pub struct TaskInbox {
    task_id: TaskId,
    capacity: usize,
    state: Mutex<InboxState>,
    notify: Notify,
}

impl TaskInbox {
    pub fn new(task_id: TaskId, capacity: usize) -> Self {
        Self {
            task_id,
            capacity,
            state: Mutex::new(InboxState::default()),
            notify: Notify::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues an item and wakes every waiter.
    ///
    /// A reply whose caller gave up waiting is dropped here instead.
    /// The engine answers a task's calls in the order they were sent, so a
    /// reply also retires every discard marker for an earlier call: those
    /// replies were either delivered already or dropped by the engine.
    pub fn push(&self, item: InboxItem) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock();
            if let InboxItem::Reply(env) = &item {
                let key = (env.event_id, env.call_seq);
                let late = state.abandoned.remove(&key);
                state.abandoned.retain(|&(_, seq)| seq >= key.1);
                if late {
                    tracing::debug!(
                        "task {}: dropping late reply for {} (call {})",
                        self.task_id,
                        key.0,
                        key.1
                    );
                    return Ok(());
                }
            }
            if state.queue.len() >= self.capacity {
                return Err(CoreError::InboxFull {
                    task: self.task_id,
                    capacity: self.capacity,
                });
            }
            state.queue.push_back(item);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Removes the first item with `event_id`, reply or indication.
    pub fn find_dequeue(&self, event_id: EventId) -> Option<InboxItem> {
        let mut state = self.state.lock();
        let index = state.queue.iter().position(|i| i.event_id() == event_id)?;
        state.queue.remove(index)
    }

    /// Removes the reply to call `call_seq` for `event_id`.
    pub fn take_reply(&self, event_id: EventId, call_seq: u64) -> Option<InboxItem> {
        let mut state = self.state.lock();
        let index = state.queue.iter().position(|i| i.answers(event_id, call_seq))?;
        state.queue.remove(index)
    }

    /// Removes the oldest item.
    pub fn dequeue(&self) -> Option<InboxItem> {
        self.state.lock().queue.pop_front()
    }

    /// Waits until the reply to call `call_seq` for `event_id` is queued and
    /// removes it.
    ///
    /// Wakeups for unrelated items are absorbed by re-checking.
    pub async fn wait_for(&self, event_id: EventId, call_seq: u64) -> InboxItem {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(item) = self.take_reply(event_id, call_seq) {
                return item;
            }
            notified.await;
        }
    }

    /// Waits for the next item of any kind.
    pub async fn recv(&self) -> InboxItem {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.dequeue() {
                return item;
            }
            notified.await;
        }
    }

    /// Gives up on a reply. If it already arrived it is returned; otherwise
    /// it will be discarded when it does.
    pub fn abandon(&self, event_id: EventId, call_seq: u64) -> Option<InboxItem> {
        let mut state = self.state.lock();
        if let Some(index) = state.queue.iter().position(|i| i.answers(event_id, call_seq)) {
            return state.queue.remove(index);
        }
        state.abandoned.insert((event_id, call_seq));
        None
    }

    /// Replies currently marked for discard.
    pub fn abandoned(&self) -> usize {
        self.state.lock().abandoned.len()
    }
}

impl fmt::Debug for TaskInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInbox")
            .field("task_id", &self.task_id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::indication::Indication;
    use crate::message::Request;
    use std::sync::Arc;
    use std::time::Duration;

    fn reply(request: Request) -> InboxItem {
        InboxItem::Reply(Envelope::unpooled(TaskId(1), request))
    }

    fn reply_to(request: Request, call_seq: u64) -> InboxItem {
        InboxItem::Reply(Envelope::unpooled(TaskId(1), request).with_call_seq(call_seq))
    }

    #[test]
    fn test_find_dequeue_skips_other_ids() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        inbox
            .push(InboxItem::Indication(Indication::PermitJoinInd { duration: 10 }))
            .unwrap();
        inbox.push(reply(Request::SysVersion)).unwrap();

        let item = inbox.take_reply(EventId::SYS_VERSION_REQ, 0).unwrap();
        assert_eq!(item.event_id(), EventId::SYS_VERSION_REQ);
        assert!(inbox.take_reply(EventId::SYS_VERSION_REQ, 0).is_none());

        // The indication stays for the task's poll loop
        assert_eq!(inbox.len(), 1);
        assert!(!inbox.dequeue().unwrap().is_reply());
    }

    #[test]
    fn test_capacity() {
        let inbox = TaskInbox::new(TaskId(4), 1);
        inbox.push(reply(Request::SysVersion)).unwrap();
        let err = inbox.push(reply(Request::SysNwkInfoRead)).unwrap_err();
        assert!(matches!(err, CoreError::InboxFull { capacity: 1, .. }));
    }

    #[test]
    fn test_take_reply_matches_call_number() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        inbox.push(reply_to(Request::SysVersion, 1)).unwrap();
        inbox.push(reply_to(Request::SysVersion, 2)).unwrap();

        let InboxItem::Reply(env) = inbox.take_reply(EventId::SYS_VERSION_REQ, 2).unwrap() else {
            panic!("expected a reply");
        };
        assert_eq!(env.call_seq, 2);
        assert!(inbox.take_reply(EventId::SYS_VERSION_REQ, 3).is_none());
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_abandoned_reply_is_dropped() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        assert!(inbox.abandon(EventId::SYS_VERSION_REQ, 1).is_none());
        assert_eq!(inbox.abandoned(), 1);

        inbox.push(reply_to(Request::SysVersion, 1)).unwrap();
        assert!(inbox.is_empty());
        assert_eq!(inbox.abandoned(), 0);

        // The next call's reply with the same id is kept
        inbox.push(reply_to(Request::SysVersion, 2)).unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_later_reply_retires_lost_marker() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        // Call 1 timed out and its reply never arrives
        assert!(inbox.abandon(EventId::SYS_VERSION_REQ, 1).is_none());

        // Call 2's reply is kept and the marker for call 1 goes away
        inbox.push(reply_to(Request::SysVersion, 2)).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.abandoned(), 0);
        assert!(inbox.take_reply(EventId::SYS_VERSION_REQ, 2).is_some());
    }

    #[test]
    fn test_marker_for_later_call_survives_earlier_reply() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        assert!(inbox.abandon(EventId::SYS_NWK_INFO_READ_REQ, 5).is_none());

        inbox.push(reply_to(Request::SysVersion, 4)).unwrap();
        assert_eq!(inbox.abandoned(), 1);

        inbox.push(reply_to(Request::SysNwkInfoRead, 5)).unwrap();
        assert_eq!(inbox.abandoned(), 0);
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_abandon_returns_arrived_reply() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        inbox.push(reply_to(Request::SysVersion, 3)).unwrap();
        assert!(inbox.abandon(EventId::SYS_VERSION_REQ, 3).is_some());
        assert_eq!(inbox.abandoned(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_ignores_unrelated_wakeups() {
        let inbox = Arc::new(TaskInbox::new(TaskId(1), 8));

        let waiter = {
            let inbox = Arc::clone(&inbox);
            tokio::spawn(async move { inbox.wait_for(EventId::SYS_NWK_INFO_READ_REQ, 0).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        inbox.push(reply(Request::SysVersion)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        inbox.push(reply(Request::SysNwkInfoRead)).unwrap();
        let item = waiter.await.unwrap();
        assert_eq!(item.event_id(), EventId::SYS_NWK_INFO_READ_REQ);
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_recv_returns_in_order() {
        let inbox = TaskInbox::new(TaskId(1), 8);
        inbox
            .push(InboxItem::Indication(Indication::DevStateChange { state: 9 }))
            .unwrap();
        inbox.push(reply(Request::SysVersion)).unwrap();

        assert!(!inbox.recv().await.is_reply());
        assert!(inbox.recv().await.is_reply());
    }
}
