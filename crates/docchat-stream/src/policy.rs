use std::time::Duration;

/// How the delay between reconnect attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Every attempt waits `initial_delay`.
    Fixed,
    /// Each attempt waits `factor` times longer than the previous one.
    Exponential { factor: f64 },
}

/// Automatic reconnect policy for the streaming connection.
///
/// The default is [`ReconnectPolicy::none`]: a dropped or refused connection
/// stays `Closed` until the caller invokes `connect` again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts allowed between two successful opens.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl ReconnectPolicy {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            backoff: Backoff::Fixed,
        }
    }

    /// Waits `delay` before each of up to `max_attempts` attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay = non_zero_or(delay, Self::DEFAULT_INITIAL_DELAY);
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Doubles the delay from `initial_delay` on every attempt, capped at
    /// `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        let initial_delay = non_zero_or(initial_delay, Self::DEFAULT_INITIAL_DELAY);
        Self {
            max_attempts,
            initial_delay,
            max_delay: non_zero_or(max_delay, Self::DEFAULT_MAX_DELAY).max(initial_delay),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before the attempt numbered `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential { factor } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                self.initial_delay.mul_f64(factor.max(1.0).powi(exponent).min(1e9))
            }
        };
        delay.min(self.max_delay)
    }

    /// Starts tracking attempts for one connection driver.
    pub fn schedule(&self) -> ReconnectSchedule {
        ReconnectSchedule {
            policy: self.clone(),
            attempts: 0,
        }
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}

/// Attempt counter of one connection driver. Every successful open starts
/// the budget over.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectSchedule {
    /// Consumes one attempt and returns how long to wait before it, or
    /// `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    pub fn connected(&mut self) {
        self.attempts = 0;
    }

    /// Attempts consumed since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn default_policy_never_schedules_an_attempt() {
        let mut schedule = ReconnectPolicy::default().schedule();
        assert!(!ReconnectPolicy::default().is_enabled());
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn exponential_delays_double_up_to_the_cap() {
        let mut schedule = ReconnectPolicy::exponential(4, ms(100), ms(250)).schedule();
        let delays: Vec<_> = std::iter::from_fn(|| schedule.next_delay()).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(250), ms(250)]);
    }

    #[test]
    fn successful_open_restores_the_budget() {
        let mut schedule = ReconnectPolicy::fixed(2, ms(400)).schedule();
        assert_eq!(schedule.next_delay(), Some(ms(400)));
        assert_eq!(schedule.next_delay(), Some(ms(400)));
        assert_eq!(schedule.next_delay(), None);

        schedule.connected();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay(), Some(ms(400)));
    }

    #[test]
    fn zero_delays_fall_back_to_defaults() {
        let policy = ReconnectPolicy::exponential(1, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.initial_delay, ReconnectPolicy::DEFAULT_INITIAL_DELAY);
        assert_eq!(policy.max_delay, ReconnectPolicy::DEFAULT_MAX_DELAY);
    }
}
