//! Per-task one-shot countdowns.
//!
//! Each pending timer owns a sleeper task on the tokio runtime. The sleeper
//! does nothing but post a wake-up tagged with the timer's generation; the
//! state transition and the overdue event happen in [`TimerCoordinator::next_expiry`]
//! on the owner's task. A wake-up whose generation no longer matches the
//! slot (cleared, re-armed) is dropped, so a cancelled timer can never
//! report overdue.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::task::TaskId;

/// Stand-in deadline for durations that overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Produced when a pending timer runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overdue {
    pub id: TaskId,
    /// Task text captured when the timer was set.
    pub text: String,
}

#[derive(Debug)]
struct Pending {
    generation: u64,
    text: String,
    deadline: Instant,
    sleeper: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
struct Wake {
    id: TaskId,
    generation: u64,
}

#[derive(Debug)]
pub struct TimerCoordinator {
    slots: HashMap<TaskId, Pending>,
    next_generation: u64,
    wake_tx: mpsc::UnboundedSender<Wake>,
    wake_rx: mpsc::UnboundedReceiver<Wake>,
}

impl Default for TimerCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerCoordinator {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            slots: HashMap::new(),
            next_generation: 0,
            wake_tx,
            wake_rx,
        }
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    pub fn deadline(&self, id: TaskId) -> Option<Instant> {
        self.slots.get(&id).map(|pending| pending.deadline)
    }

    /// Schedules a countdown for `id`.
    ///
    /// Callers must check the slot is free first; a timer that is still
    /// pending is replaced.
    #[tracing::instrument(skip(self, text, duration), fields(ms = duration.as_millis() as u64))]
    pub fn start_timer(
        &mut self,
        id: TaskId,
        text: impl Into<String>,
        duration: Duration,
    ) -> Instant {
        if self.clear_timer(id) {
            warn!("replaced a pending timer");
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let wake_tx = self.wake_tx.clone();

        let sleeper = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = wake_tx.send(Wake { id, generation });
        });

        self.slots.insert(
            id,
            Pending {
                generation,
                text: text.into(),
                deadline,
                sleeper,
            },
        );
        info!(generation, "timer started");
        deadline
    }

    /// Cancels the timer for `id`. Returns whether one was pending.
    #[tracing::instrument(skip(self))]
    pub fn clear_timer(&mut self, id: TaskId) -> bool {
        let Some(pending) = self.slots.remove(&id) else {
            return false;
        };
        pending.sleeper.abort();
        debug!(generation = pending.generation, "timer cleared");
        true
    }

    /// Clears then starts again with a new duration.
    pub fn re_arm(&mut self, id: TaskId, text: impl Into<String>, duration: Duration) -> Instant {
        self.clear_timer(id);
        self.start_timer(id, text, duration)
    }

    pub fn clear_all(&mut self) {
        let count = self.slots.len();
        for (_, pending) in self.slots.drain() {
            pending.sleeper.abort();
        }
        if count > 0 {
            debug!(count, "cleared all timers");
        }
    }

    /// Waits for the next live timer to run out and retires it.
    ///
    /// Cancel safe; pends forever while nothing is scheduled.
    pub async fn next_expiry(&mut self) -> Overdue {
        loop {
            let Some(wake) = self.wake_rx.recv().await else {
                return std::future::pending().await;
            };
            if let Some(overdue) = self.retire(wake) {
                return overdue;
            }
        }
    }

    fn retire(&mut self, wake: Wake) -> Option<Overdue> {
        match self.slots.get(&wake.id) {
            Some(pending) if pending.generation == wake.generation => {}
            _ => {
                trace!(id = %wake.id, generation = wake.generation, "dropping stale wake-up");
                return None;
            }
        }
        let pending = self.slots.remove(&wake.id)?;
        info!(id = %wake.id, generation = wake.generation, "timer expired");
        Some(Overdue {
            id: wake.id,
            text: pending.text,
        })
    }
}

impl Drop for TimerCoordinator {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const QUIET: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn fires_once_with_captured_text() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        let started = Instant::now();
        timers.start_timer(id, "x", Duration::from_millis(50));

        let overdue = timers.next_expiry().await;
        assert_eq!(overdue, Overdue { id, text: "x".to_string() });
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!timers.is_pending(id));

        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        timers.start_timer(id, "x", Duration::from_millis(50));
        sleep(Duration::from_millis(10)).await;

        assert!(timers.clear_timer(id));
        assert!(!timers.clear_timer(id));
        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_wake_up_is_dropped_after_clear() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        timers.start_timer(id, "x", Duration::from_millis(10));

        // Let the sleeper post its wake-up before anyone consumes it.
        sleep(Duration::from_millis(20)).await;
        timers.clear_timer(id);

        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn re_arm_replaces_the_old_schedule() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        timers.start_timer(id, "old", Duration::from_millis(10));
        sleep(Duration::from_millis(20)).await;

        let rearmed_at = Instant::now();
        timers.re_arm(id, "new", Duration::from_millis(100));
        let overdue = timers.next_expiry().await;

        assert_eq!(overdue.text, "new");
        assert!(rearmed_at.elapsed() >= Duration::from_millis(100));
        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_timers_fire_in_deadline_order() {
        let mut timers = TimerCoordinator::new();
        let slow = TaskId::new();
        let fast = TaskId::new();
        timers.start_timer(slow, "slow", Duration::from_millis(300));
        timers.start_timer(fast, "fast", Duration::from_millis(100));
        assert_eq!(timers.pending_count(), 2);

        assert_eq!(timers.next_expiry().await.id, fast);
        assert!(timers.is_pending(slow));
        assert_eq!(timers.next_expiry().await.id, slow);
        assert_eq!(timers.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_fires_immediately() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        let deadline = timers.start_timer(id, "now", Duration::ZERO);
        assert_eq!(timers.deadline(id), Some(deadline));

        let overdue = timeout(Duration::from_millis(10), timers.next_expiry())
            .await
            .expect("fires without delay");
        assert_eq!(overdue.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadline_stays_pending() {
        let mut timers = TimerCoordinator::new();
        let id = TaskId::new();
        let started = Instant::now();
        let deadline = timers.start_timer(id, "someday", Duration::MAX);

        assert_eq!(deadline, started + FAR_FUTURE);
        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
        assert!(timers.is_pending(id));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_cancels_everything() {
        let mut timers = TimerCoordinator::new();
        timers.start_timer(TaskId::new(), "a", Duration::from_millis(10));
        timers.start_timer(TaskId::new(), "b", Duration::from_millis(20));
        timers.clear_all();

        assert_eq!(timers.pending_count(), 0);
        assert!(timeout(QUIET, timers.next_expiry()).await.is_err());
    }
}
