//! One-shot timer / retransmission driver.
//!
//! A per-frame deadline is tracked and compared against the timeout on
//! every poll — an explicit check rather than a signal handler. This
//! module specializes that idea to the single in-flight frame this
//! protocol allows (no window, so one deadline and one attempt counter
//! instead of a per-frame FIFO scan).

use std::time::{Duration, Instant};

/// Outcome of polling the timer once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Deadline hasn't passed yet; keep waiting.
    NotExpired,
    /// Deadline passed and a retry is still budgeted; the timer has
    /// been rearmed and the attempt counter incremented.
    Retry,
    /// Deadline passed and `max_retransmissions` is exhausted.
    Exhausted,
}

pub struct RetryTimer {
    timeout: Duration,
    max_retransmissions: u32,
    deadline: Option<Instant>,
    attempts: u32,
}

impl RetryTimer {
    pub fn new(timeout: Duration, max_retransmissions: u32) -> Self {
        RetryTimer {
            timeout,
            max_retransmissions,
            deadline: None,
            attempts: 0,
        }
    }

    /// Arms the timer for one fresh operation (resets the attempt
    /// counter too — call this once per `send_payload`/handshake
    /// attempt, not per retransmission within it).
    pub fn start(&mut self) {
        self.attempts = 0;
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Rearms the timer without touching the attempt counter — used
    /// when a negative acknowledgement (REJ) triggers an immediate
    /// retransmit rather than a timeout.
    pub fn rearm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Polls the deadline. Must be called from the same loop that
    /// polls the receiver state machine; never performs I/O itself.
    pub fn poll(&mut self) -> TimerEvent {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if self.attempts < self.max_retransmissions {
                    self.attempts += 1;
                    self.deadline = Some(Instant::now() + self.timeout);
                    TimerEvent::Retry
                } else {
                    self.deadline = None;
                    TimerEvent::Exhausted
                }
            }
            _ => TimerEvent::NotExpired,
        }
    }

    /// Consumes one retry from the budget outside of a timeout (the
    /// REJ path) — fails the same way an exhausted timeout would.
    pub fn consume_retry(&mut self) -> TimerEvent {
        if self.attempts < self.max_retransmissions {
            self.attempts += 1;
            self.rearm();
            TimerEvent::Retry
        } else {
            self.disarm();
            TimerEvent::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn stays_not_expired_before_the_deadline() {
        let mut t = RetryTimer::new(Duration::from_millis(50), 3);
        t.start();
        assert_eq!(t.poll(), TimerEvent::NotExpired);
    }

    #[test]
    fn retries_then_exhausts_after_max_retransmissions() {
        let mut t = RetryTimer::new(Duration::from_millis(5), 2);
        t.start();
        sleep(Duration::from_millis(10));
        assert_eq!(t.poll(), TimerEvent::Retry);
        sleep(Duration::from_millis(10));
        assert_eq!(t.poll(), TimerEvent::Retry);
        sleep(Duration::from_millis(10));
        assert_eq!(t.poll(), TimerEvent::Exhausted);
    }

    #[test]
    fn consume_retry_exhausts_independently_of_wall_clock() {
        let mut t = RetryTimer::new(Duration::from_secs(10), 1);
        t.start();
        assert_eq!(t.consume_retry(), TimerEvent::Retry);
        assert_eq!(t.consume_retry(), TimerEvent::Exhausted);
    }
}
