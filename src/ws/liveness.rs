use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::LivenessSettings;
use crate::models::PingMessage;

/// Outcome of one liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Still alive, send a keep-alive probe.
    Ping(PingMessage),
    /// Silent for at least the timeout, or already gone from the registry.
    Expired { idle: Option<Duration> },
}

/// Per-session keep-alive schedule.
///
/// Ticks every ping interval. A session whose last activity is at least `timeout` old on a
/// tick is expired. Any inbound frame counts as activity, not only `pong`.
pub struct LivenessMonitor {
    ticker: Interval,
    timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(settings: &LivenessSettings) -> Self {
        let mut ticker = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            timeout: settings.timeout,
        }
    }

    /// Wait for the next check. Cancel safe.
    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }

    /// Judge a session given how long it has been idle.
    pub fn probe(&self, idle: Option<Duration>) -> Probe {
        match idle {
            Some(idle) if idle < self.timeout => Probe::Ping(PingMessage {
                time: Utc::now().timestamp_millis(),
            }),
            idle => Probe::Expired { idle },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LivenessSettings {
        LivenessSettings {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            outbox_capacity: 8,
        }
    }

    #[tokio::test]
    async fn test_probe_verdicts() {
        let monitor = LivenessMonitor::new(&settings());

        assert!(matches!(monitor.probe(Some(Duration::from_secs(59))), Probe::Ping(_)));
        assert_eq!(
            monitor.probe(Some(Duration::from_secs(60))),
            Probe::Expired { idle: Some(Duration::from_secs(60)) }
        );
        assert_eq!(monitor.probe(None), Probe::Expired { idle: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(&settings());
        monitor.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        monitor.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }
}
