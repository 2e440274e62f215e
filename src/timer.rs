use std::time::{Duration, Instant};

/// Doubling retransmit interval.
///
/// The responder's HelloRequest has no retry cap of its own. It is bounded
/// by the connection's handshake timeout.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    rto: Duration,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration) -> Self {
        Self { rto: start_rto }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Deadline of the next attempt, doubling the interval for the one after.
    pub fn attempt(&mut self, now: Instant) -> Instant {
        let next = now + self.rto;
        self.rto = self.rto.saturating_mul(2);
        next
    }
}
