//! # Link Supervision Module
//!
//! Connectivity state machines for the two independently-supervised links
//! (local network, remote broker). Each link owns a [`LinkMonitor`] that
//! tracks {Disconnected, Connecting, Connected}, a retry counter, and the
//! last attempt time, and derives the next permissible attempt from an
//! exponential backoff with a per-link base and cap.
//!
//! When the retry counter passes the configured ceiling the monitor reports
//! [`RetryExhausted`] exactly once per crossing. The node treats that as
//! fatal and exits so the service manager can restart the whole process:
//! retry exhaustion means the running process is in a state it cannot
//! repair (stuck TLS session, dead interface), and a restart is cheaper
//! and safer than in-process recovery.

pub mod probe;

use std::time::{Duration, Instant};

use thiserror::Error;

/// Fatal condition: a link stayed down past its retry ceiling.
#[derive(Debug, Error)]
#[error("{link} link exceeded {max_retries} reconnect attempts; restart required")]
pub struct RetryExhausted {
    pub link: &'static str,
    pub max_retries: u32,
}

/// Connection state of a supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Wait before attempt number `retries + 1`: `min(base << retries, cap)`.
pub fn backoff_delay(base: Duration, cap: Duration, retries: u32) -> Duration {
    let factor = 1u32.checked_shl(retries.min(20)).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}

/// Per-link reconnection state machine. Time is passed in explicitly so
/// the backoff schedule is unit-testable.
pub struct LinkMonitor {
    name: &'static str,
    state: LinkState,
    retries: u32,
    last_attempt: Option<Instant>,
    base: Duration,
    cap: Duration,
    max_retries: u32,
    exhaustion_reported: bool,
}

impl LinkMonitor {
    pub fn new(name: &'static str, base: Duration, cap: Duration, max_retries: u32) -> Self {
        LinkMonitor {
            name,
            state: LinkState::Disconnected,
            retries: 0,
            last_attempt: None,
            base,
            cap,
            max_retries,
            exhaustion_reported: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether a connection attempt is permitted at `now`: the link is
    /// down and the backoff interval since the last attempt has elapsed.
    pub fn attempt_due(&self, now: Instant) -> bool {
        if self.state == LinkState::Connected {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(at) => now.duration_since(at) >= backoff_delay(self.base, self.cap, self.retries),
        }
    }

    /// Record the start of an attempt (Disconnected -> Connecting).
    pub fn begin_attempt(&mut self, now: Instant) {
        self.state = LinkState::Connecting;
        self.last_attempt = Some(now);
    }

    /// Attempt succeeded: Connecting -> Connected, retry counter cleared.
    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
        self.retries = 0;
        self.exhaustion_reported = false;
    }

    /// Attempt failed: Connecting -> Disconnected, retry counter bumped.
    /// Returns the fatal condition exactly once when the counter crosses
    /// the ceiling.
    pub fn attempt_failed(&mut self) -> Option<RetryExhausted> {
        self.state = LinkState::Disconnected;
        self.retries = self.retries.saturating_add(1);
        if self.retries > self.max_retries && !self.exhaustion_reported {
            self.exhaustion_reported = true;
            return Some(RetryExhausted {
                link: self.name,
                max_retries: self.max_retries,
            });
        }
        None
    }

    /// An established link dropped: Connected -> Disconnected with the
    /// retry counter reset, so a fresh outage gets the full schedule.
    pub fn dropped(&mut self) {
        self.state = LinkState::Disconnected;
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(2);
    const CAP: Duration = Duration::from_secs(30);

    fn monitor(max_retries: u32) -> LinkMonitor {
        LinkMonitor::new("test", BASE, CAP, max_retries)
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let mut prev = Duration::ZERO;
        for retries in 0..40 {
            let d = backoff_delay(BASE, CAP, retries);
            assert!(d >= prev, "delay shrank at retry {}", retries);
            assert!(d <= CAP, "delay exceeded cap at retry {}", retries);
            prev = d;
        }
        assert_eq!(backoff_delay(BASE, CAP, 0), BASE);
        assert_eq!(backoff_delay(BASE, CAP, 1), BASE * 2);
        assert_eq!(backoff_delay(BASE, CAP, 10), CAP);
    }

    #[test]
    fn first_attempt_is_immediately_due() {
        let m = monitor(3);
        assert!(m.attempt_due(Instant::now()));
    }

    #[test]
    fn backoff_gates_next_attempt() {
        let mut m = monitor(5);
        let t0 = Instant::now();
        m.begin_attempt(t0);
        assert!(m.attempt_failed().is_none());
        // retries == 1 -> wait is base * 2
        assert!(!m.attempt_due(t0 + BASE * 2 - Duration::from_millis(1)));
        assert!(m.attempt_due(t0 + BASE * 2));
    }

    #[test]
    fn success_resets_retry_counter() {
        let mut m = monitor(5);
        let t0 = Instant::now();
        for _ in 0..3 {
            m.begin_attempt(t0);
            let _ = m.attempt_failed();
        }
        assert_eq!(m.retries(), 3);
        m.begin_attempt(t0);
        m.connected();
        assert_eq!(m.state(), LinkState::Connected);
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn drop_resets_retry_counter() {
        let mut m = monitor(5);
        let t0 = Instant::now();
        m.begin_attempt(t0);
        let _ = m.attempt_failed();
        m.begin_attempt(t0);
        m.connected();
        m.dropped();
        assert_eq!(m.state(), LinkState::Disconnected);
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn ceiling_reported_exactly_once_per_crossing() {
        let mut m = monitor(2);
        let t0 = Instant::now();
        let mut fatals = 0;
        for _ in 0..6 {
            m.begin_attempt(t0);
            if m.attempt_failed().is_some() {
                fatals += 1;
            }
        }
        assert_eq!(fatals, 1, "ceiling must fire once while the link stays down");

        // Recovering and failing again re-arms the ceiling.
        m.begin_attempt(t0);
        m.connected();
        let mut fatals_after_recovery = 0;
        for _ in 0..6 {
            m.begin_attempt(t0);
            if m.attempt_failed().is_some() {
                fatals_after_recovery += 1;
            }
        }
        assert_eq!(fatals_after_recovery, 1);
    }

    #[test]
    fn connected_link_has_no_attempts_due() {
        let mut m = monitor(3);
        m.begin_attempt(Instant::now());
        m.connected();
        assert!(!m.attempt_due(Instant::now() + Duration::from_secs(600)));
    }
}
