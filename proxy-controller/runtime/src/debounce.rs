use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{self, Duration, Instant},
};

/// A single resettable timer shared by the control loop and the event
/// listeners.
///
/// Resetting always replaces the deadline, so a burst of resets fires once,
/// after the last one.
#[derive(Debug)]
pub(crate) struct Debounce {
    deadline: Mutex<Instant>,
    reset: Notify,
}

// === impl Debounce ===

impl Debounce {
    /// A timer that fires immediately.
    pub(crate) fn new() -> Self {
        Self {
            deadline: Mutex::new(Instant::now()),
            reset: Notify::new(),
        }
    }

    pub(crate) fn reset(&self, after: Duration) {
        *self.deadline.lock() = Instant::now() + after;
        self.reset.notify_one();
    }

    /// Completes when the current deadline passes.
    pub(crate) async fn fired(&self) {
        loop {
            let deadline = *self.deadline.lock();
            tokio::select! {
                _ = time::sleep_until(deadline) => {
                    if *self.deadline.lock() <= Instant::now() {
                        return;
                    }
                }
                _ = self.reset.notified() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_at_first() {
        let debounce = Debounce::new();
        let mut fired = task::spawn(debounce.fired());
        assert_ready!(fired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_last_reset() {
        let debounce = Debounce::new();
        debounce.reset(Duration::from_millis(100));

        let mut fired = task::spawn(debounce.fired());
        assert_pending!(fired.poll());

        time::advance(Duration::from_millis(60)).await;
        assert_pending!(fired.poll());
        debounce.reset(Duration::from_millis(100));
        assert!(fired.is_woken());

        time::advance(Duration::from_millis(60)).await;
        assert_pending!(fired.poll());

        time::advance(Duration::from_millis(50)).await;
        assert_ready!(fired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn shortens_a_long_deadline() {
        let debounce = Debounce::new();
        debounce.reset(Duration::from_secs(30));

        let mut fired = task::spawn(debounce.fired());
        assert_pending!(fired.poll());

        debounce.reset(Duration::from_millis(100));
        time::advance(Duration::from_millis(100)).await;
        assert_ready!(fired.poll());
    }
}
