use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Time source for the heartbeat timer, so tests can drive ticks by hand
/// instead of sleeping through real intervals.
#[async_trait::async_trait]
pub(crate) trait TickClock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&self, deadline: Instant);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub(crate) struct SystemTickClock;

#[async_trait::async_trait]
impl TickClock for SystemTickClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn manual_clock() -> (ManualClock, ManualClockHandle) {
    let start = Instant::now();
    let (tx, rx) = watch::channel(start);

    (ManualClock { time: rx }, ManualClockHandle { time: tx })
}

/// Clock that only moves when the test's `ManualClockHandle` advances it.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ManualClock {
    time: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl TickClock for ManualClock {
    fn now(&self) -> Instant {
        *self.time.borrow()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut time = self.time.clone();
        while *time.borrow() < deadline {
            time.changed().await.expect("ManualClockHandle dropped mid-test");
        }
    }
}

#[cfg(test)]
pub(crate) struct ManualClockHandle {
    time: watch::Sender<Instant>,
}

#[cfg(test)]
impl ManualClockHandle {
    /// Move time forward. Sleepers whose deadline is now in the past wake up.
    /// Advance in steps no coarser than what the test needs to observe.
    pub(crate) fn advance(&self, duration: Duration) {
        let next = *self.time.borrow() + duration;
        self.time.send(next).expect("no ManualClock left alive");
    }
}
