//! Priority task queue shared by the controller and all workers.
//!
//! Enqueueing never blocks. `pop()` suspends until an entry is available.
//! Every entry counts as unfinished from `push` until the worker that
//! dequeued it calls `task_done()`; `join()` resolves once nothing is
//! unfinished, which is how `manage()` knows the last transfer reported.

use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::task::{Payload, Priority, QueueEntry, Task};

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    unfinished: usize,
}

/// Priority queue of transfer tasks and shutdown sentinels.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
    drained: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a payload at the given priority.
    pub fn push(&self, priority: Priority, payload: Payload) {
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.unfinished += 1;
            inner.heap.push(QueueEntry {
                priority,
                seq,
                payload,
            });
        }
        self.available.notify_one();
    }

    /// Enqueue a transfer at normal priority.
    pub fn submit(&self, task: Task) {
        self.push(Priority::Normal, Payload::Transfer(task));
    }

    /// Enqueue a shutdown sentinel ahead of every queued transfer.
    pub fn push_shutdown(&self) {
        self.push(Priority::High, Payload::Shutdown);
    }

    /// Dequeue the next entry without waiting.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.inner.lock().heap.pop()
    }

    /// Dequeue the next entry, waiting until one is available.
    pub async fn pop(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            self.available.notified().await;
        }
    }

    /// Mark one previously dequeued entry as fully processed.
    pub fn task_done(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            inner.unfinished = inner.unfinished.saturating_sub(1);
            inner.unfinished == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every entry pushed so far has been dequeued and marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Entries waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Entries queued or dequeued but not yet marked done.
    pub fn unfinished(&self) -> usize {
        self.inner.lock().unfinished
    }
}
