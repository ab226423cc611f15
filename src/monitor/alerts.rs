// Alert assembly and dispatch. An alert is created at most once per
// evaluation crossing the threshold; the in-memory record and the broadcast
// are the source of truth, external delivery is fire-and-forget with bounded
// retries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::MonitorError;
use crate::lookup::AlertSink;
use crate::models::{Alert, Event, ProfileSnapshot, Severity};

const BROADCAST_CAPACITY: usize = 256;

pub struct AlertDispatcher {
    threshold: f64,
    sink: Arc<dyn AlertSink>,
    sink_max_attempts: u32,
    sink_timeout: Duration,
    queue: RwLock<VecDeque<Alert>>,
    sender: broadcast::Sender<Alert>,
    sent: AtomicU64,
    delivery_failures: Arc<AtomicU64>,
}

impl AlertDispatcher {
    pub fn new(
        threshold: f64,
        sink: Arc<dyn AlertSink>,
        sink_max_attempts: u32,
        sink_timeout_ms: u64,
    ) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        AlertDispatcher {
            threshold,
            sink,
            sink_max_attempts,
            sink_timeout: Duration::from_millis(sink_timeout_ms),
            queue: RwLock::new(VecDeque::new()),
            sender,
            sent: AtomicU64::new(0),
            delivery_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Threshold test and dispatch. Returns the alert when one fired.
    /// Sub-threshold scores never alert; there is no debouncing beyond the
    /// instantaneous comparison.
    pub fn maybe_fire(
        &self,
        user_id: &str,
        score: f64,
        triggering_event: &Event,
        snapshot: ProfileSnapshot,
    ) -> Option<Alert> {
        if score < self.threshold {
            return None;
        }

        let severity = Severity::from_score(score);
        let alert = Alert {
            alert_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            risk_score: score,
            severity,
            triggering_event: triggering_event.clone(),
            profile_snapshot: snapshot,
            recommendations: recommendations_for(severity),
        };

        info!(
            "fraud alert for user {}: score {:.3}, severity {:?}",
            user_id, score, severity
        );

        self.queue.write().push_back(alert.clone());
        self.sent.fetch_add(1, Ordering::Relaxed);

        // Subscribers may come and go; a lagging or absent receiver is not an
        // error
        let _ = self.sender.send(alert.clone());

        self.spawn_delivery(alert.clone());
        Some(alert)
    }

    // External delivery never blocks the pipeline and never rolls back the
    // in-memory record.
    fn spawn_delivery(&self, alert: Alert) {
        let sink = Arc::clone(&self.sink);
        let max_attempts = self.sink_max_attempts.max(1);
        let timeout = self.sink_timeout;
        let failures = Arc::clone(&self.delivery_failures);

        tokio::spawn(async move {
            let mut last_reason = String::new();
            for attempt in 1..=max_attempts {
                let result = tokio::time::timeout(timeout, sink.deliver(&alert)).await;
                match result {
                    Ok(Ok(())) => return,
                    Ok(Err(reason)) => {
                        warn!(
                            "alert {} delivery attempt {}/{} failed: {}",
                            alert.alert_id, attempt, max_attempts, reason
                        );
                        last_reason = reason;
                    }
                    Err(_) => {
                        last_reason = "timed out".to_string();
                        warn!(
                            "alert {} delivery attempt {}/{} timed out",
                            alert.alert_id, attempt, max_attempts
                        );
                    }
                }
            }
            warn!(
                "alert {}: {}",
                alert.alert_id,
                MonitorError::SinkDelivery { attempts: max_attempts, reason: last_reason }
            );
            failures.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    pub fn alerts_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let queue = self.queue.read();
        queue.iter().rev().take(limit).cloned().collect()
    }

    /// Drop alerts older than the cutoff. Sweeper only.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut queue = self.queue.write();
        let before = queue.len();
        queue.retain(|alert| alert.timestamp >= cutoff);
        before - queue.len()
    }
}

/// Deterministic recommendation table keyed by severity.
pub fn recommendations_for(severity: Severity) -> Vec<String> {
    let entries: &[&str] = match severity {
        Severity::Critical => &["suspend_account_immediately", "manual_review"],
        Severity::High => &["enhanced_monitoring", "manual_review"],
        Severity::Medium => &["additional_verification"],
        Severity::Low => &["standard_monitoring"],
    };
    entries.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingSink {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn deliver(&self, _alert: &Alert) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("sink down".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn snapshot() -> ProfileSnapshot {
        ProfileSnapshot {
            first_seen: Utc::now(),
            last_activity: Utc::now(),
            event_count: 1,
            betting_velocity: 0,
            location_changes: 0,
            device_switches: 0,
            suspicious_action_count: 0,
        }
    }

    fn bet_event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            user_id: "u-1".to_string(),
            timestamp: Utc::now(),
            kind: EventKind::BetPlaced { amount: 10.0, market: None },
        }
    }

    #[tokio::test]
    async fn fires_if_and_only_if_score_reaches_threshold() {
        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0), fail: false });
        let dispatcher = AlertDispatcher::new(0.7, sink, 1, 100);

        assert!(dispatcher.maybe_fire("u-1", 0.69, &bet_event(), snapshot()).is_none());
        let alert = dispatcher.maybe_fire("u-1", 0.7, &bet_event(), snapshot());
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().severity, Severity::High);
        assert_eq!(dispatcher.alerts_sent(), 1);
    }

    #[tokio::test]
    async fn crossing_again_after_dropping_below_alerts_again() {
        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0), fail: false });
        let dispatcher = AlertDispatcher::new(0.7, sink, 1, 100);

        assert!(dispatcher.maybe_fire("u-1", 0.8, &bet_event(), snapshot()).is_some());
        assert!(dispatcher.maybe_fire("u-1", 0.3, &bet_event(), snapshot()).is_none());
        assert!(dispatcher.maybe_fire("u-1", 0.8, &bet_event(), snapshot()).is_some());
        assert_eq!(dispatcher.alerts_sent(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_in_memory_record() {
        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0), fail: true });
        let dispatcher = AlertDispatcher::new(0.7, Arc::clone(&sink) as Arc<dyn AlertSink>, 2, 100);

        dispatcher.maybe_fire("u-1", 0.95, &bet_event(), snapshot());
        // Let the spawned delivery task run its bounded retries
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.delivery_failures(), 1);
        assert_eq!(dispatcher.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_fired_alerts() {
        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0), fail: false });
        let dispatcher = AlertDispatcher::new(0.7, sink, 1, 100);
        let mut receiver = dispatcher.subscribe();

        dispatcher.maybe_fire("u-1", 0.92, &bet_event(), snapshot());
        let alert = receiver.recv().await.unwrap();
        assert_eq!(alert.user_id, "u-1");
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn purge_drops_aged_alerts() {
        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0), fail: false });
        let dispatcher = AlertDispatcher::new(0.7, sink, 1, 100);

        dispatcher.maybe_fire("u-1", 0.8, &bet_event(), snapshot());
        let removed = dispatcher.purge_older_than(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(dispatcher.recent(10).is_empty());
    }
}
