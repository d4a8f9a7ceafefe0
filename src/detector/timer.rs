use crate::actor::WeakActorClient;
use crate::detector::time::{SystemTickClock, TickClock};
use rand::Rng;
use tokio::time::Duration;

/// Spawn the periodic heartbeat timer. The first tick fires after
/// `startup_grace` plus a little jitter (so simultaneously booted servers
/// don't all run their cold-start election in the same instant), then every
/// `interval`. The task exits on its own once the server actor is gone.
pub(crate) fn spawn_heartbeat_timer(
    logger: slog::Logger,
    actor: WeakActorClient,
    startup_grace: Duration,
    interval: Duration,
) {
    let jitter = rand::thread_rng().gen_range(Duration::from_millis(0)..=interval / 4);
    let task = HeartbeatTimerTask {
        logger,
        actor,
        startup_grace: startup_grace + jitter,
        interval,
        clock: SystemTickClock,
    };
    tokio::task::spawn(task.run());
}

struct HeartbeatTimerTask<C: TickClock> {
    logger: slog::Logger,
    actor: WeakActorClient,
    startup_grace: Duration,
    interval: Duration,
    clock: C,
}

impl<C: TickClock> HeartbeatTimerTask<C> {
    async fn run(self) {
        self.clock.sleep(self.startup_grace).await;

        loop {
            if !self.actor.heartbeat_tick().await {
                slog::debug!(self.logger, "Server actor is gone; heartbeat timer exiting");
                return;
            }
            self.clock.sleep(self.interval).await;
        }
    }
}
