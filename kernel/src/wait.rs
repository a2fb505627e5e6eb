//! Queues of suspended tasks waiting for an event, such as the exit of a
//! thread.
use alloc::sync::Arc;
use core::{
    pin::Pin,
    task::{Context, Poll, Waker},
};
use crossbeam::queue::SegQueue;
use futures::Future;

/// A wait queue that holds the wakers of the tasks waiting on it.
#[derive(Default, Debug, Clone)]
pub struct Queue {
    waiting: Arc<SegQueue<Waker>>,
}

impl Queue {
    /// Creates a new empty wait queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tasks currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Wake all waiting tasks, emptying the queue.
    pub fn wake_all(&self) {
        while let Some(waker) = self.waiting.pop() {
            waker.wake();
        }
    }

    /// Suspend the current task until the queue is woken up.
    ///
    /// # Spurious wake-ups
    /// The returned future may complete even if the queue was not woken up.
    /// The caller must check the condition it waits for again, and wait
    /// again if necessary.
    #[must_use]
    pub const fn wait(&self) -> Wait<'_> {
        Wait {
            queue: self,
            queued: false,
        }
    }
}

/// Future returned by [`Queue::wait`]. It registers the waker of the task on
/// its first poll and completes on the next one.
#[derive(Debug)]
pub struct Wait<'a> {
    queue: &'a Queue,
    queued: bool,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if self.queued {
            return Poll::Ready(());
        }
        self.queue.waiting.push(context.waker().clone());
        self.get_mut().queued = true;
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn wait_until_woken() {
        let queue = Queue::new();
        let mut wait = core::pin::pin!(queue.wait());

        assert!(wait.as_mut().now_or_never().is_none());
        assert_eq!(queue.len(), 1);

        queue.wake_all();
        assert!(queue.is_empty());
        assert_eq!(wait.now_or_never(), Some(()));
    }
}
