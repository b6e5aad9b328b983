//! FIFO task queue shared by the reading and executing sides of a connection.
//!
//! The queue's list and running flag sit behind one mutex that is held only
//! for the list operation itself, never while a task executes. Consumers wait
//! on a [`Notify`] so an idle worker costs nothing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct QueueState<T> {
    tasks: VecDeque<T>,
    running: bool,
}

/// A multi-producer FIFO with wait-for-work and cooperative shutdown.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                running: true,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Critical sections only touch the deque, so a poisoned lock still
        // holds a consistent list.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task and wake one waiting consumer. Never blocks.
    ///
    /// Hands the task back if the queue has been shut down.
    pub fn push(&self, task: T) -> Result<(), T> {
        {
            let mut state = self.lock();
            if !state.running {
                return Err(task);
            }
            state.tasks.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next task.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push or shutdown between the
            // check and the await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.running {
                    return None;
                }
                if let Some(task) = state.tasks.pop_front() {
                    return Some(task);
                }
            }

            notified.await;
        }
    }

    /// Stop the queue: discard queued tasks and wake every waiter.
    ///
    /// Idempotent. Returns the number of tasks discarded by this call.
    pub fn shutdown(&self) -> usize {
        let discarded: Vec<T> = {
            let mut state = self.lock();
            state.running = false;
            state.tasks.drain(..).collect()
        };
        self.notify.notify_waiters();
        discarded.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.tasks.len())
            .field("running", &state.running)
            .finish()
    }
}
