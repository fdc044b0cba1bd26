use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use tokio::sync::Notify;

use crate::models::{Task, TaskId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DispatchEntry {
    pub task_id: TaskId,
    pub priority: i32,
    pub created_at: SystemTime,
}

impl DispatchEntry {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            priority: task.priority,
            created_at: task.created_at,
        }
    }
}

// Max-heap order: higher priority first, then older, then lower id.
impl Ord for DispatchEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.task_id.0.cmp(&self.task_id.0))
    }
}

impl PartialOrd for DispatchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum PushError {
    Full(DispatchEntry),
    Closed(DispatchEntry),
}

/// Bounded priority buffer between producers (enqueue, recovery, retry
/// sleepers) and the worker pool.
pub struct DispatchBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    item_available: Notify,
    space_available: Notify,
}

struct BufferState {
    heap: BinaryHeap<DispatchEntry>,
    closed: bool,
}

impl DispatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(BufferState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            item_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_push(&self, entry: DispatchEntry) -> Result<(), PushError> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(PushError::Closed(entry));
            }
            if state.heap.len() >= self.capacity {
                return Err(PushError::Full(entry));
            }
            state.heap.push(entry);
        }
        self.item_available.notify_waiters();
        Ok(())
    }

    /// Waits for capacity. Fails only if the buffer is closed meanwhile.
    pub async fn push(&self, entry: DispatchEntry) -> Result<(), PushError> {
        let mut entry = entry;
        loop {
            let space = self.space_available.notified();
            match self.try_push(entry) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(rejected)) => entry = rejected,
                Err(closed) => return Err(closed),
            }
            space.await;
        }
    }

    /// Waits for the highest-ranked entry; `None` once the buffer is closed.
    pub async fn pop(&self) -> Option<DispatchEntry> {
        loop {
            let item = self.item_available.notified();
            {
                let mut state = self.state();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.heap.pop() {
                    drop(state);
                    self.space_available.notify_waiters();
                    return Some(entry);
                }
            }
            item.await;
        }
    }

    pub fn close(&self) {
        self.state().closed = true;
        self.item_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
