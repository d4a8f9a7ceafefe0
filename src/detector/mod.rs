mod time;
mod timer;

pub(crate) use timer::spawn_heartbeat_timer;

use std::net::SocketAddr;

/// Leader failure detector. Two states: `Monitoring` (default, indefinite)
/// and `Electing` (transient, while no membership record carries the leader
/// flag). The actor drives it from heartbeat ticks; this type only tracks the
/// state and the one outstanding leader probe, it performs no I/O itself.
pub(crate) struct FailureDetector {
    logger: slog::Logger,
    state: DetectorState,
    outstanding_probe: Option<SocketAddr>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum DetectorState {
    Monitoring,
    Electing,
}

impl FailureDetector {
    pub(crate) fn new(logger: slog::Logger) -> Self {
        FailureDetector {
            logger,
            state: DetectorState::Monitoring,
            outstanding_probe: None,
        }
    }

    pub(crate) fn state(&self) -> DetectorState {
        self.state
    }

    pub(crate) fn enter_electing(&mut self) {
        if self.state != DetectorState::Electing {
            slog::info!(self.logger, "Failure detector: MONITORING -> ELECTING");
            self.state = DetectorState::Electing;
        }
        self.outstanding_probe = None;
    }

    pub(crate) fn enter_monitoring(&mut self) {
        if self.state != DetectorState::Monitoring {
            slog::info!(self.logger, "Failure detector: ELECTING -> MONITORING");
            self.state = DetectorState::Monitoring;
        }
    }

    /// A `HEARTBEAT` has been sent to the current leader; remember who we are
    /// waiting on. A new probe supersedes any unanswered previous one.
    pub(crate) fn note_probe_sent(&mut self, leader: SocketAddr) {
        self.outstanding_probe = Some(leader);
    }

    /// A `HEARTBEAT_ACK` arrived. Returns true when it settles the
    /// outstanding probe (i.e. the leader is alive).
    pub(crate) fn note_probe_ack(&mut self, from: SocketAddr) -> bool {
        if self.outstanding_probe == Some(from) {
            self.outstanding_probe = None;
            return true;
        }

        false
    }

    /// The probe deadline for `leader` has passed. Returns true when the
    /// probe is still unanswered, i.e. the leader must be treated as failed.
    pub(crate) fn probe_expired(&mut self, leader: SocketAddr) -> bool {
        if self.outstanding_probe == Some(leader) {
            self.outstanding_probe = None;
            return true;
        }

        false
    }
}
