//! FIFO queues of dialogues.
//!
//! The engine holds two independent instances: pending (submitted, not yet
//! sent) and completed (finished, not yet retrieved). Each has its own lock
//! and condition variable; neither is ever locked while holding the other.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::dialogue::Dialogue;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Dialogue>,
    pushed: u64,
}

/// Unbounded, lock-protected FIFO of dialogues.
#[derive(Debug, Default)]
pub struct DialogueQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl DialogueQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dialogue and wakes any waiter.
    pub fn push(&self, dialogue: Dialogue) {
        let mut state = self.lock();
        state.items.push_back(dialogue);
        state.pushed += 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Removes the oldest dialogue; `None` when the queue is empty.
    pub fn pop_front(&self) -> Option<Dialogue> {
        self.lock().items.pop_front()
    }

    /// Removes the oldest dialogue, waiting up to `wait` for one to arrive.
    pub fn pop_front_timeout(&self, wait: Duration) -> Option<Dialogue> {
        self.pop_front_timeout_while(wait, || true)
    }

    /// Like [`Self::pop_front_timeout`], but takes nothing once `eligible`
    /// returns false.
    ///
    /// `eligible` is evaluated under the queue lock, both while waiting and
    /// immediately before the dialogue is removed, so a caller whose
    /// eligibility is revoked before a push never receives that push.
    pub fn pop_front_timeout_while(
        &self,
        wait: Duration,
        eligible: impl Fn() -> bool,
    ) -> Option<Dialogue> {
        let state = self.lock();
        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, wait, |state| state.items.is_empty() && eligible())
            .unwrap_or_else(PoisonError::into_inner);
        if eligible() {
            state.items.pop_front()
        } else {
            None
        }
    }

    /// Wakes every waiter so it re-evaluates its condition.
    pub fn wake_waiters(&self) {
        // Taking the lock orders the wake-up after any waiter's last check.
        drop(self.lock());
        self.changed.notify_all();
    }

    /// Copy of the oldest dialogue.
    #[must_use]
    pub fn peek_front(&self) -> Option<Dialogue> {
        self.lock().items.front().cloned()
    }

    /// Copy of the newest dialogue.
    #[must_use]
    pub fn peek_back(&self) -> Option<Dialogue> {
        self.lock().items.back().cloned()
    }

    /// Number of queued dialogues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Total number of dialogues ever pushed.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.lock().pushed
    }

    /// Takes every queued dialogue in order, atomically.
    pub fn drain(&self) -> Vec<Dialogue> {
        self.lock().items.drain(..).collect()
    }

    /// Waits until at least `target` dialogues have ever been pushed.
    ///
    /// Re-checks at least every `poll` and gives up once `keep_waiting`
    /// returns false or `deadline` passes. Returns whether the target was
    /// reached.
    pub fn wait_for_pushed(
        &self,
        target: u64,
        poll: Duration,
        deadline: Option<Instant>,
        mut keep_waiting: impl FnMut() -> bool,
    ) -> bool {
        loop {
            let state = self.lock();
            let (state, _) = self
                .changed
                .wait_timeout_while(state, poll, |state| state.pushed < target)
                .unwrap_or_else(PoisonError::into_inner);
            if state.pushed >= target {
                return true;
            }
            drop(state);

            // The callback may take other locks; never call it with ours held.
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) || !keep_waiting() {
                return false;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn dialogue(order: &str) -> Dialogue {
        Dialogue::new("tcp://localhost:5555", order)
    }

    #[test]
    fn preserves_fifo_order() {
        let queue = DialogueQueue::new();
        for order in ["a", "b", "c"] {
            queue.push(dialogue(order));
        }

        assert_eq!(queue.peek_front().map(|d| d.order().to_owned()), Some("a".into()));
        assert_eq!(queue.peek_back().map(|d| d.order().to_owned()), Some("c".into()));
        assert_eq!(queue.len(), 3);
        let orders = queue
            .drain()
            .iter()
            .map(|d| d.order().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(orders, ["a", "b", "c"]);
        assert!(queue.is_empty());
        assert_eq!(queue.pushed(), 3);
    }

    #[test]
    fn pop_front_reports_empty_without_blocking() {
        let queue = DialogueQueue::new();
        assert!(queue.pop_front().is_none());
        assert!(queue.peek_front().is_none());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn pop_front_timeout_wakes_on_push() {
        let queue = Arc::new(DialogueQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push(dialogue("late"));
            })
        };

        let popped = queue.pop_front_timeout(Duration::from_secs(5));
        producer.join().expect("join producer");
        assert_eq!(popped.map(|d| d.order().to_owned()), Some("late".into()));
    }

    #[test]
    fn pop_front_timeout_gives_up_when_idle() {
        let queue = DialogueQueue::new();
        let started = Instant::now();
        assert!(queue.pop_front_timeout(Duration::from_millis(10)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn ineligible_waiter_leaves_the_push_queued() {
        let queue = Arc::new(DialogueQueue::new());
        let eligible = Arc::new(AtomicBool::new(true));
        let waiter = {
            let queue = Arc::clone(&queue);
            let eligible = Arc::clone(&eligible);
            thread::spawn(move || {
                queue.pop_front_timeout_while(Duration::from_secs(5), || {
                    eligible.load(Ordering::SeqCst)
                })
            })
        };
        thread::sleep(Duration::from_millis(20));

        eligible.store(false, Ordering::SeqCst);
        queue.push(dialogue("kept"));

        assert!(waiter.join().expect("join waiter").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wake_waiters_releases_a_revoked_waiter_early() {
        let queue = Arc::new(DialogueQueue::new());
        let eligible = Arc::new(AtomicBool::new(true));
        let started = Instant::now();
        let waiter = {
            let queue = Arc::clone(&queue);
            let eligible = Arc::clone(&eligible);
            thread::spawn(move || {
                queue.pop_front_timeout_while(Duration::from_secs(5), || {
                    eligible.load(Ordering::SeqCst)
                })
            })
        };
        thread::sleep(Duration::from_millis(20));

        eligible.store(false, Ordering::SeqCst);
        queue.wake_waiters();

        assert!(waiter.join().expect("join waiter").is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wait_for_pushed_stops_when_told_to() {
        let queue = DialogueQueue::new();
        let reached = queue.wait_for_pushed(1, Duration::from_millis(1), None, || false);
        assert!(!reached);

        queue.push(dialogue("a"));
        assert!(queue.wait_for_pushed(1, Duration::from_millis(1), None, || true));
    }
}
