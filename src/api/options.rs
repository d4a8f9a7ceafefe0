use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for servers and clients. Every field has a production
/// default; set only what you need. Validation happens at wiring time.
#[derive(Clone, Default)]
pub struct ChatOptions {
    /// How often a server shouts its presence broadcast. Default 5s.
    pub broadcast_interval: Option<Duration>,
    /// How often the failure detector checks for a live leader. Default 5s.
    pub heartbeat_interval: Option<Duration>,
    /// Delay before the first heartbeat tick, so discovery can populate
    /// membership before the cold-start election. Default 10s.
    pub startup_grace: Option<Duration>,
    /// How long to wait for a `HEARTBEAT_ACK` or `LEADER` reply from one
    /// server before moving on. Default 1s.
    pub probe_timeout: Option<Duration>,
    /// How long a client waits for a `SERVER_ACK` before treating the leader
    /// as unreachable. Default 5s.
    pub ack_timeout: Option<Duration>,
    /// How long a client waits for a registration reply. Default 5s.
    pub register_timeout: Option<Duration>,
    /// Total delivery attempts per message, each against a freshly
    /// discovered leader after the first timeout. Default 3.
    pub send_attempts: Option<u32>,
    /// How many processed message ids the leader remembers for dedup.
    /// Default 10 000.
    pub processed_history_limit: Option<usize>,
}

pub(crate) struct ChatOptionsValidated {
    pub broadcast_interval: Duration,
    pub heartbeat_interval: Duration,
    pub startup_grace: Duration,
    pub probe_timeout: Duration,
    pub ack_timeout: Duration,
    pub register_timeout: Duration,
    pub send_attempts: u32,
    pub processed_history_limit: usize,
}

impl ChatOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.probe_timeout >= self.heartbeat_interval {
            return Err("Leader probe timeout must be less than the heartbeat interval");
        }
        if self.broadcast_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err("Broadcast and heartbeat intervals must be non-zero");
        }
        if self.ack_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err("Ack and probe timeouts must be non-zero");
        }
        if self.send_attempts == 0 {
            return Err("At least one delivery attempt is required");
        }
        if self.processed_history_limit == 0 {
            return Err("Processed-message history must hold at least one entry");
        }

        Ok(())
    }
}

impl TryFrom<ChatOptions> for ChatOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ChatOptions) -> Result<Self, Self::Error> {
        let values = ChatOptionsValidated {
            broadcast_interval: options.broadcast_interval.unwrap_or(Duration::from_secs(5)),
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_secs(5)),
            startup_grace: options.startup_grace.unwrap_or(Duration::from_secs(10)),
            probe_timeout: options.probe_timeout.unwrap_or(Duration::from_secs(1)),
            ack_timeout: options.ack_timeout.unwrap_or(Duration::from_secs(5)),
            register_timeout: options.register_timeout.unwrap_or(Duration::from_secs(5)),
            send_attempts: options.send_attempts.unwrap_or(3),
            processed_history_limit: options.processed_history_limit.unwrap_or(10_000),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ChatOptionsValidated::try_from(ChatOptions::default()).is_ok());
    }

    #[test]
    fn probe_timeout_must_undercut_the_heartbeat_interval() {
        let options = ChatOptions {
            heartbeat_interval: Some(Duration::from_millis(100)),
            probe_timeout: Some(Duration::from_millis(100)),
            ..ChatOptions::default()
        };
        assert!(ChatOptionsValidated::try_from(options).is_err());

        let options = ChatOptions {
            heartbeat_interval: Some(Duration::from_millis(100)),
            probe_timeout: Some(Duration::from_millis(50)),
            ..ChatOptions::default()
        };
        assert!(ChatOptionsValidated::try_from(options).is_ok());
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let options = ChatOptions {
            send_attempts: Some(0),
            ..ChatOptions::default()
        };
        assert!(ChatOptionsValidated::try_from(options).is_err());
    }
}
