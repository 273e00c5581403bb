use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::models::Chunk;

/// Returned when a chunk is offered to a queue that has been closed.
/// The chunk is handed back so the caller can decide to discard it.
#[derive(Debug, Error)]
#[error("task queue is closed")]
pub struct QueueClosed(pub Chunk);

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<Chunk>,
    closed: bool,
}

/// FIFO of chunks shared by the planner, the workers and the coordinator.
///
/// Fresh tasks pushed by the planner wait while `capacity` tasks are
/// pending. Requeued tasks are always accepted so a worker never blocks
/// on a retry. Closing the queue discards everything still pending and
/// wakes every waiter.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    tasks_ready: Notify,
    space_ready: Notify,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            tasks_ready: Notify::new(),
            space_ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Adds a fresh task, waiting for room if the queue is full.
    pub async fn push(&self, chunk: Chunk) -> Result<(), QueueClosed> {
        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueClosed(chunk));
                }
                if state.tasks.len() < self.capacity {
                    state.tasks.push_back(chunk);
                    drop(state);
                    self.tasks_ready.notify_one();
                    return Ok(());
                }
            }
            space.await;
        }
    }

    /// Puts a failed task back at the end of the queue, ignoring capacity.
    pub async fn requeue(&self, chunk: Chunk) -> Result<(), QueueClosed> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueClosed(chunk));
        }
        state.tasks.push_back(chunk);
        drop(state);
        self.tasks_ready.notify_one();
        Ok(())
    }

    /// Takes the next task, waiting until one is available.
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Chunk> {
        loop {
            let ready = self.tasks_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if let Some(chunk) = state.tasks.pop_front() {
                    drop(state);
                    self.space_ready.notify_one();
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Closes the queue and returns how many pending tasks were discarded.
    pub async fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let pending = state.tasks.len();
            state.tasks.clear();
            pending
        };
        self.tasks_ready.notify_waiters();
        self.space_ready.notify_waiters();
        discarded
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    #[cfg(test)]
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
