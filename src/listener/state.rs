use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ListenerConfig;

/// The three states of the change listener.
///
/// STOPPED → RUNNING on start; RUNNING → RECONNECTING on a subscription
/// failure; RECONNECTING → RUNNING when the reconnect timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerState {
    Stopped,
    Running,
    Reconnecting,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Stopped => write!(f, "STOPPED"),
            ListenerState::Running => write!(f, "RUNNING"),
            ListenerState::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    StartRequested,
    StopRequested,
    SubscriptionFailed,
    ReconnectDue,
    EventReceived,
}

/// What the supervisor has to do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Open a new subscription.
    Open,
    /// Close the subscription and drop any scheduled reconnect.
    Close,
    /// Schedule reconnect number `attempt` after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Retries are exhausted; the listener is stopped.
    GiveUp,
    /// Nothing to do.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ListenerConfig::default())
    }
}

impl From<&ListenerConfig> for BackoffPolicy {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_retries: config.max_retries,
        }
    }
}

impl BackoffPolicy {
    /// `min(max_delay, base_delay * 2^retry)`
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Pure transition function of the listener. The supervisor owns one and
/// performs the side effects each [`Transition`] asks for.
#[derive(Debug, Clone)]
pub struct ListenerMachine {
    state: ListenerState,
    retry_count: u32,
    policy: BackoffPolicy,
}

impl ListenerMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ListenerState::Stopped,
            retry_count: 0,
            policy,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn next(&mut self, event: ListenerEvent) -> Transition {
        use ListenerEvent::*;
        use ListenerState::*;

        match (self.state, event) {
            (Running, StartRequested) => Transition::Unchanged,
            // A manual start wins over a scheduled reconnect.
            (Stopped | Reconnecting, StartRequested) => {
                self.retry_count = 0;
                self.state = Running;
                Transition::Open
            }
            (Stopped, StopRequested) => Transition::Unchanged,
            (Running | Reconnecting, StopRequested) => {
                self.state = Stopped;
                Transition::Close
            }
            (Running, SubscriptionFailed) => {
                if self.retry_count >= self.policy.max_retries {
                    self.state = Stopped;
                    return Transition::GiveUp;
                }
                let delay = self.policy.delay_for_attempt(self.retry_count);
                self.retry_count += 1;
                self.state = Reconnecting;
                Transition::Reconnect {
                    attempt: self.retry_count,
                    delay,
                }
            }
            (Reconnecting, ReconnectDue) => {
                self.state = Running;
                Transition::Open
            }
            (Running, EventReceived) => {
                self.retry_count = 0;
                Transition::Unchanged
            }
            _ => Transition::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(10);
        let delays: Vec<u64> = (0..8)
            .map(|retry| policy.delay_for_attempt(retry).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn backoff_never_overflows() {
        let policy = policy(10);
        assert_eq!(policy.delay_for_attempt(63), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(30_000));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut machine = ListenerMachine::new(policy(3));
        assert_eq!(machine.next(ListenerEvent::StopRequested), Transition::Unchanged);
        assert_eq!(machine.next(ListenerEvent::StartRequested), Transition::Open);
        assert_eq!(machine.next(ListenerEvent::StartRequested), Transition::Unchanged);
        assert_eq!(machine.state(), ListenerState::Running);
        assert_eq!(machine.next(ListenerEvent::StopRequested), Transition::Close);
        assert_eq!(machine.next(ListenerEvent::StopRequested), Transition::Unchanged);
        assert_eq!(machine.state(), ListenerState::Stopped);
    }

    #[test]
    fn failures_back_off_then_give_up() {
        let mut machine = ListenerMachine::new(policy(2));
        machine.next(ListenerEvent::StartRequested);

        let t = machine.next(ListenerEvent::SubscriptionFailed);
        assert_eq!(
            t,
            Transition::Reconnect {
                attempt: 1,
                delay: Duration::from_millis(1_000)
            }
        );
        assert_eq!(machine.state(), ListenerState::Reconnecting);
        assert_eq!(machine.next(ListenerEvent::ReconnectDue), Transition::Open);

        let t = machine.next(ListenerEvent::SubscriptionFailed);
        assert_eq!(
            t,
            Transition::Reconnect {
                attempt: 2,
                delay: Duration::from_millis(2_000)
            }
        );
        machine.next(ListenerEvent::ReconnectDue);

        assert_eq!(machine.next(ListenerEvent::SubscriptionFailed), Transition::GiveUp);
        assert_eq!(machine.state(), ListenerState::Stopped);
        assert_eq!(machine.next(ListenerEvent::ReconnectDue), Transition::Unchanged);
    }

    #[test]
    fn events_reset_the_retry_count() {
        let mut machine = ListenerMachine::new(policy(5));
        machine.next(ListenerEvent::StartRequested);
        machine.next(ListenerEvent::SubscriptionFailed);
        machine.next(ListenerEvent::ReconnectDue);
        machine.next(ListenerEvent::SubscriptionFailed);
        machine.next(ListenerEvent::ReconnectDue);
        assert_eq!(machine.retry_count(), 2);

        machine.next(ListenerEvent::EventReceived);
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(
            machine.next(ListenerEvent::SubscriptionFailed),
            Transition::Reconnect {
                attempt: 1,
                delay: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn start_while_reconnecting_opens_immediately() {
        let mut machine = ListenerMachine::new(policy(5));
        machine.next(ListenerEvent::StartRequested);
        machine.next(ListenerEvent::SubscriptionFailed);
        assert_eq!(machine.state(), ListenerState::Reconnecting);

        assert_eq!(machine.next(ListenerEvent::StartRequested), Transition::Open);
        assert_eq!(machine.state(), ListenerState::Running);
        assert_eq!(machine.retry_count(), 0);
        // The stale timer must not open a second subscription.
        assert_eq!(machine.next(ListenerEvent::ReconnectDue), Transition::Unchanged);
    }

    #[test]
    fn failure_while_stopped_is_ignored() {
        let mut machine = ListenerMachine::new(policy(5));
        assert_eq!(machine.next(ListenerEvent::SubscriptionFailed), Transition::Unchanged);
        assert_eq!(machine.state(), ListenerState::Stopped);
    }

    #[test]
    fn state_display() {
        assert_eq!(ListenerState::Stopped.to_string(), "STOPPED");
        assert_eq!(ListenerState::Running.to_string(), "RUNNING");
        assert_eq!(ListenerState::Reconnecting.to_string(), "RECONNECTING");
    }
}
