//! Countdown latch with an optional deadline.

use crate::util::sync::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub(crate) struct CompletionLatch {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl CompletionLatch {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrements the count, waking waiters when it reaches zero.
    pub(crate) fn count_down(&self) {
        let mut remaining = lock(&self.remaining);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.zero.notify_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize {
        *lock(&self.remaining)
    }

    /// Blocks until the count reaches zero or `timeout` elapses.
    ///
    /// Returns the count left when waiting stopped; zero means complete. A
    /// timeout too large to represent as an `Instant` waits without deadline.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> usize {
        let mut remaining = lock(&self.remaining);
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        while *remaining > 0 {
            match deadline {
                None => {
                    remaining = self
                        .zero
                        .wait(remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .zero
                        .wait_timeout(remaining, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    remaining = guard;
                }
            }
        }
        *remaining
    }
}

#[cfg(test)]
mod tests {
    use super::CompletionLatch;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_when_all_counted() {
        let latch = Arc::new(CompletionLatch::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || latch.count_down())
            })
            .collect();
        assert_eq!(latch.wait(None), 0);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn wait_times_out_with_outstanding_count() {
        let latch = CompletionLatch::new(2);
        latch.count_down();
        assert_eq!(latch.wait(Some(Duration::from_millis(20))), 1);
        assert_eq!(latch.remaining(), 1);
    }

    #[test]
    fn unrepresentable_timeout_waits_for_completion() {
        let latch = Arc::new(CompletionLatch::new(2));
        let worker = {
            let latch = Arc::clone(&latch);
            std::thread::spawn(move || {
                latch.count_down();
                std::thread::sleep(Duration::from_millis(20));
                latch.count_down();
            })
        };
        assert_eq!(latch.wait(Some(Duration::MAX)), 0);
        worker.join().unwrap();
    }
}
