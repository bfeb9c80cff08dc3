//! The three timers of a connection.
//!
//! A timer is only a deadline. It is driven by the worker calling `Endpoint::poll` with its clock,
//! or by an external scheduler that holds on to the [`TimerToken`] it got when arming and hands it
//! back through `Endpoint::fire`. Every arming and every cancellation bumps the generation of the
//! timer, so that a token from an earlier arming does nothing.
//!
//! [`TimerToken`]: struct.TimerToken.html
use crate::time::{Duration, Expiration, Instant};

/// Identifies one of the timers of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Sends a delayed acknowledgment.
    Ack,
    /// Retransmits the oldest unacknowledged segment.
    Retry,
    /// Ends `FIN_WAIT_2` and `TIME_WAIT`.
    Fin,
}

/// Identifies one arming of a timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken {
    /// The timer that was armed.
    pub kind: TimerKind,
    /// The generation of the timer when it was armed.
    pub generation: u32,
}

/// A single timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timer {
    kind: TimerKind,
    generation: u32,
    deadline: Expiration,
}

/// The timers of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timers {
    /// The delayed acknowledgment.
    pub ack: Timer,
    /// The retransmission timer.
    pub retry: Timer,
    /// The `FIN_WAIT_2` and `TIME_WAIT` timer.
    pub fin: Timer,
}

impl Timer {
    /// A disarmed timer.
    pub const fn new(kind: TimerKind) -> Self {
        Timer { kind, generation: 0, deadline: Expiration::Never }
    }

    /// Arm the timer to expire at `at`, replacing any previous deadline.
    pub fn arm(&mut self, at: Instant) -> TimerToken {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Expiration::When(at);
        self.token()
    }

    /// Arm the timer to expire after `delay`.
    pub fn arm_after(&mut self, now: Instant, delay: Duration) -> TimerToken {
        self.arm(now + delay)
    }

    /// Disarm the timer.
    ///
    /// Outstanding tokens are invalidated even if the timer was not armed.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Expiration::Never;
    }

    /// Consume the expiry identified by `token`.
    ///
    /// Returns `false` if the token belongs to an earlier arming or the timer is disarmed. In
    /// that case nothing changes.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        if token != self.token() || !self.is_armed() {
            return false;
        }
        self.deadline = Expiration::Never;
        true
    }

    /// The token of the current arming.
    pub fn token(&self) -> TimerToken {
        TimerToken { kind: self.kind, generation: self.generation }
    }

    /// Whether the timer has a deadline.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_armed()
    }

    /// The current deadline.
    pub fn deadline(&self) -> Expiration {
        self.deadline
    }

    fn due(&self, now: Instant) -> Option<TimerToken> {
        if self.deadline.is_due(now) {
            Some(self.token())
        } else {
            None
        }
    }
}

impl Timers {
    /// All three timers disarmed.
    pub const fn new() -> Self {
        Timers {
            ack: Timer::new(TimerKind::Ack),
            retry: Timer::new(TimerKind::Retry),
            fin: Timer::new(TimerKind::Fin),
        }
    }

    /// Get a timer by its kind.
    pub fn get_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::Ack => &mut self.ack,
            TimerKind::Retry => &mut self.retry,
            TimerKind::Fin => &mut self.fin,
        }
    }

    /// The tokens of all timers whose deadline has passed.
    pub fn due(&self, now: Instant) -> [Option<TimerToken>; 3] {
        [self.ack.due(now), self.retry.due(now), self.fin.due(now)]
    }

    /// The earliest deadline of the three.
    pub fn next_expiration(&self) -> Expiration {
        self.ack.deadline
            .min(self.retry.deadline)
            .min(self.fin.deadline)
    }

    /// Disarm all timers.
    pub fn cancel_all(&mut self) {
        self.ack.cancel();
        self.retry.cancel();
        self.fin.cancel();
    }
}

impl Default for Timers {
    fn default() -> Self {
        Timers::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stale_token_is_noop() {
        let mut timer = Timer::new(TimerKind::Retry);
        let first = timer.arm(Instant::from_millis(100));
        let second = timer.arm(Instant::from_millis(200));
        assert_ne!(first, second);

        assert!(!timer.fire(first));
        assert!(timer.is_armed());
        assert!(timer.fire(second));
        assert!(!timer.is_armed());
        // An expiry is consumed only once.
        assert!(!timer.fire(second));
    }

    #[test]
    fn cancel_invalidates() {
        let mut timer = Timer::new(TimerKind::Ack);
        let token = timer.arm(Instant::from_millis(5));
        timer.cancel();
        assert!(!timer.fire(token));
        assert_eq!(timer.deadline(), Expiration::Never);
    }

    #[test]
    fn due_and_next() {
        let mut timers = Timers::new();
        assert_eq!(timers.next_expiration(), Expiration::Never);
        timers.fin.arm(Instant::from_millis(300));
        let retry = timers.retry.arm(Instant::from_millis(200));
        assert_eq!(timers.next_expiration(), Expiration::When(Instant::from_millis(200)));

        let due = timers.due(Instant::from_millis(250));
        assert_eq!(due, [None, Some(retry), None]);

        timers.cancel_all();
        assert_eq!(timers.due(Instant::from_millis(1000)), [None; 3]);
    }
}
