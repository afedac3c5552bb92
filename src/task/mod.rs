//! Cross-thread task channel
//!
//! The channel is the only bridge between the owner thread and a worker
//! thread: a FIFO queue of posted tasks drained by the target thread's own
//! cooperative loop. Posting never blocks; a task posted after the
//! receiving side is gone is dropped silently.
//!
//! `ThreadAffinity` is the explicit thread-identity token that
//! thread-confined objects carry and check at their entry points.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Identity of the thread an object is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity(ThreadId);

impl ThreadAffinity {
    /// Capture the identity of the calling thread.
    pub fn current() -> Self {
        ThreadAffinity(thread::current().id())
    }

    /// Whether the calling thread is the one this affinity names.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.0
    }

    /// Assert that the calling thread owns this affinity.
    pub fn check(&self, operation: &str) {
        assert!(
            self.is_current(),
            "{} called off its owning thread",
            operation
        );
    }
}

struct ChannelState<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
    closed: AtomicBool,
}

/// Sending half of a task channel. Cheap to clone; every clone posts into
/// the same FIFO queue.
pub struct TaskSender<T> {
    state: Arc<ChannelState<T>>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        TaskSender {
            state: Arc::clone(&self.state),
        }
    }
}

/// Receiving half of a task channel, owned by the target thread's loop.
pub struct TaskReceiver<T> {
    state: Arc<ChannelState<T>>,
}

/// Create a connected sender/receiver pair.
pub fn task_channel<T>() -> (TaskSender<T>, TaskReceiver<T>) {
    let state = Arc::new(ChannelState {
        queue: Mutex::new(VecDeque::with_capacity(16)),
        available: Condvar::new(),
        closed: AtomicBool::new(false),
    });
    (
        TaskSender {
            state: Arc::clone(&state),
        },
        TaskReceiver { state },
    )
}

impl<T> TaskSender<T> {
    /// Post a task to the target thread. Returns false (and drops the
    /// task) if the receiving side is already gone.
    pub fn post(&self, task: T) -> bool {
        if self.state.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.state.queue.lock().push_back(task);
        self.state.available.notify_one();
        true
    }

    /// Wake the receiving loop without posting anything, so it can
    /// re-check external state such as a stop flag.
    pub fn wake(&self) {
        self.state.available.notify_all();
    }
}

impl<T> TaskReceiver<T> {
    /// Take every task currently queued, in posting order.
    pub fn drain(&self) -> Vec<T> {
        self.state.queue.lock().drain(..).collect()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.state.queue.lock().is_empty()
    }

    /// Block until a task is queued, a wake arrives, or the timeout
    /// elapses. Returns whether a task is available.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut queue = self.state.queue.lock();
        if queue.is_empty() {
            self.state.available.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }
}

impl<T> Drop for TaskReceiver<T> {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = task_channel();
        for i in 0..5 {
            tx.post(i);
        }
        assert_eq!(rx.drain(), vec![0, 1, 2, 3, 4]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_post_after_receiver_dropped() {
        let (tx, rx) = task_channel();
        drop(rx);
        assert!(!tx.post(1));
    }

    #[test]
    fn test_cross_thread_delivery() {
        let (tx, rx) = task_channel();
        let sender = thread::spawn(move || {
            for i in 0..10 {
                tx.post(i);
            }
        });
        sender.join().unwrap();
        assert!(rx.wait_timeout(Duration::from_secs(1)));
        assert_eq!(rx.drain(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_affinity() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_current());
        let other = thread::spawn(ThreadAffinity::current).join().unwrap();
        assert!(!other.is_current());
    }
}
