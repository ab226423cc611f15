// Per-user behavioral state. Profiles are created lazily on first sight and
// mutated only through the registry's update entrypoints; deletion belongs to
// the retention sweeper alone.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::models::{Event, EventKind, GeoLocation, ProfileSnapshot};
use crate::monitor::event_store::EventStore;

///////////////////////////////////////////////////////////////////////////////
// Profile Types
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuspiciousAction {
    pub action: SuspiciousActionKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousActionKind {
    HighValueBet,
    RapidLocationChange,
    DeviceSwitch,
    MultipleLoginAttempts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub risk: f64,
    pub event_count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BehaviorMetrics {
    // Count of bet_placed events in the trailing velocity window, re-derived
    // from the event store on every bet so out-of-order arrival stays correct
    pub betting_velocity: u32,
    pub location_changes: u32,
    pub device_switches: u32,
    pub pattern_deviations: u32,
    pub suspicious_actions: Vec<SuspiciousAction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub event_count: u64,
    pub metrics: BehaviorMetrics,
    pub risk_history: VecDeque<RiskHistoryEntry>,
    // Bounded FIFO network observation histories
    pub ip_history: VecDeque<String>,
    pub device_history: VecDeque<String>,
    pub location_history: VecDeque<(DateTime<Utc>, GeoLocation)>,
    // Timestamp of the previous location_change, for the rapid-change check
    last_location_change: Option<DateTime<Utc>>,
}

impl UserProfile {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        UserProfile {
            user_id: user_id.to_string(),
            first_seen: now,
            last_activity: now,
            event_count: 0,
            metrics: BehaviorMetrics::default(),
            risk_history: VecDeque::new(),
            ip_history: VecDeque::new(),
            device_history: VecDeque::new(),
            location_history: VecDeque::new(),
            last_location_change: None,
        }
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            first_seen: self.first_seen,
            last_activity: self.last_activity,
            event_count: self.event_count,
            betting_velocity: self.metrics.betting_velocity,
            location_changes: self.metrics.location_changes,
            device_switches: self.metrics.device_switches,
            suspicious_action_count: self.metrics.suspicious_actions.len(),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Registry
///////////////////////////////////////////////////////////////////////////////

pub struct UserProfileRegistry {
    profiles: RwLock<HashMap<String, UserProfile>>,
    event_store: Arc<EventStore>,
    config: MonitorConfig,
}

impl UserProfileRegistry {
    pub fn new(event_store: Arc<EventStore>, config: MonitorConfig) -> Self {
        UserProfileRegistry {
            profiles: RwLock::new(HashMap::new()),
            event_store,
            config,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.read().get(user_id).cloned()
    }

    pub fn get_or_create(&self, user_id: &str) -> UserProfile {
        let mut profiles = self.profiles.write();
        profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id, Utc::now()))
            .clone()
    }

    pub fn active_count(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    /// Update the profile for an ingested event: activity bookkeeping plus the
    /// type-specific metric updater, then strict 24h suspicious-action
    /// eviction.
    pub fn record_event(&self, event: &Event) {
        let now = Utc::now();
        let velocity_window = Duration::seconds(self.config.velocity_window_secs as i64);

        // Betting velocity is re-derived from the store, not incremented
        let betting_velocity = match event.kind {
            EventKind::BetPlaced { .. } => {
                let since = now - velocity_window;
                Some(
                    self.event_store
                        .window(&event.user_id, since)
                        .iter()
                        .filter(|e| matches!(e.kind, EventKind::BetPlaced { .. }))
                        .count() as u32,
                )
            }
            _ => None,
        };

        let mut profiles = self.profiles.write();
        let profile = profiles
            .entry(event.user_id.clone())
            .or_insert_with(|| UserProfile::new(&event.user_id, now));

        profile.last_activity = now;
        profile.event_count += 1;
        let actions_before = profile.metrics.suspicious_actions.len();

        match &event.kind {
            EventKind::BetPlaced { amount, .. } => {
                if let Some(velocity) = betting_velocity {
                    profile.metrics.betting_velocity = velocity;
                }
                if *amount >= self.config.high_value_bet_threshold {
                    profile.metrics.suspicious_actions.push(SuspiciousAction {
                        action: SuspiciousActionKind::HighValueBet,
                        timestamp: event.timestamp,
                        detail: format!("bet amount {:.2}", amount),
                    });
                }
            }
            EventKind::LocationChange { latitude, longitude, .. } => {
                profile.metrics.location_changes += 1;
                if let Some(previous) = profile.last_location_change {
                    let gap = event.timestamp - previous;
                    if gap < Duration::seconds(self.config.rapid_location_secs as i64) {
                        profile.metrics.suspicious_actions.push(SuspiciousAction {
                            action: SuspiciousActionKind::RapidLocationChange,
                            timestamp: event.timestamp,
                            detail: format!(
                                "moved to ({:.4}, {:.4}) after {}s",
                                latitude,
                                longitude,
                                gap.num_seconds()
                            ),
                        });
                    }
                }
                profile.last_location_change = Some(event.timestamp);
            }
            EventKind::DeviceSwitch { device_id } => {
                profile.metrics.device_switches += 1;
                // Any switch is noteworthy
                profile.metrics.suspicious_actions.push(SuspiciousAction {
                    action: SuspiciousActionKind::DeviceSwitch,
                    timestamp: event.timestamp,
                    detail: format!("switched to device {}", device_id),
                });
            }
            EventKind::Login { login_attempts, .. } => {
                if *login_attempts > self.config.max_login_attempts {
                    profile.metrics.suspicious_actions.push(SuspiciousAction {
                        action: SuspiciousActionKind::MultipleLoginAttempts,
                        timestamp: event.timestamp,
                        detail: format!("{} login attempts", login_attempts),
                    });
                }
            }
            // Interaction telemetry feeds the biometric profiler, not the
            // behavioral metrics
            EventKind::MouseMove { .. }
            | EventKind::Keystroke { .. }
            | EventKind::Touch { .. }
            | EventKind::Scroll { .. } => {}
        }

        // Lifetime deviation counter survives the 24h eviction below
        let appended = profile.metrics.suspicious_actions.len() - actions_before;
        profile.metrics.pattern_deviations += appended as u32;

        // Strict eviction, not advisory
        let cutoff = now - Duration::hours(self.config.suspicious_action_hours);
        profile.metrics.suspicious_actions.retain(|a| a.timestamp >= cutoff);
    }

    /// Append to the bounded network histories for a user (oldest evicted
    /// first).
    pub fn record_network(
        &self,
        user_id: &str,
        ip_address: &str,
        fingerprint: &str,
        location: Option<&GeoLocation>,
    ) {
        let now = Utc::now();
        let cap = self.config.history_cap;
        let mut profiles = self.profiles.write();
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id, now));

        push_capped(&mut profile.ip_history, ip_address.to_string(), cap);
        push_capped(&mut profile.device_history, fingerprint.to_string(), cap);
        if let Some(location) = location {
            push_capped(&mut profile.location_history, (now, location.clone()), cap);
        }
    }

    /// Append an aggregate risk reading, trimming entries beyond the history
    /// horizon.
    pub fn append_risk_history(&self, user_id: &str, risk: f64) {
        let now = Utc::now();
        let horizon = Duration::hours(self.config.risk_history_hours);
        let mut profiles = self.profiles.write();
        if let Some(profile) = profiles.get_mut(user_id) {
            let event_count = profile.event_count;
            profile.risk_history.push_back(RiskHistoryEntry {
                timestamp: now,
                risk,
                event_count,
            });
            while let Some(front) = profile.risk_history.front() {
                if now - front.timestamp > horizon {
                    profile.risk_history.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Delete profiles inactive since the cutoff. Sweeper only.
    pub fn remove_inactive(&self, cutoff: DateTime<Utc>) -> usize {
        let mut profiles = self.profiles.write();
        let before = profiles.len();
        profiles.retain(|_, profile| profile.last_activity >= cutoff);
        let removed = before - profiles.len();
        if removed > 0 {
            debug!("evicted {} inactive user profiles", removed);
        }
        removed
    }
}

fn push_capped<T>(queue: &mut VecDeque<T>, value: T, cap: usize) {
    queue.push_back(value);
    while queue.len() > cap {
        queue.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry() -> UserProfileRegistry {
        let store = Arc::new(EventStore::new(1000));
        UserProfileRegistry::new(store, MonitorConfig::default())
    }

    fn registry_with_store() -> (UserProfileRegistry, Arc<EventStore>) {
        let store = Arc::new(EventStore::new(1000));
        (
            UserProfileRegistry::new(Arc::clone(&store), MonitorConfig::default()),
            store,
        )
    }

    fn event(user: &str, at: DateTime<Utc>, kind: EventKind) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            user_id: user.to_string(),
            timestamp: at,
            kind,
        }
    }

    #[test]
    fn betting_velocity_is_rederived_from_the_window() {
        let (registry, store) = registry_with_store();
        let now = Utc::now();

        // Out-of-order arrival: oldest bet appended last
        for offset in [5i64, 20, 50, 10] {
            let e = event(
                "u-1",
                now - Duration::seconds(offset),
                EventKind::BetPlaced { amount: 50.0, market: None },
            );
            store.append(e.clone());
            registry.record_event(&e);
        }

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.betting_velocity, 4);
    }

    #[test]
    fn stale_bets_do_not_count_toward_velocity() {
        let (registry, store) = registry_with_store();
        let now = Utc::now();

        let old = event(
            "u-1",
            now - Duration::seconds(120),
            EventKind::BetPlaced { amount: 50.0, market: None },
        );
        store.append(old.clone());
        registry.record_event(&old);

        let fresh = event(
            "u-1",
            now,
            EventKind::BetPlaced { amount: 50.0, market: None },
        );
        store.append(fresh.clone());
        registry.record_event(&fresh);

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.betting_velocity, 1);
    }

    #[test]
    fn high_value_bets_append_a_suspicious_action() {
        let (registry, store) = registry_with_store();
        let now = Utc::now();

        let e = event(
            "u-1",
            now,
            EventKind::BetPlaced { amount: 2000.0, market: None },
        );
        store.append(e.clone());
        registry.record_event(&e);

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.suspicious_actions.len(), 1);
        assert_eq!(
            profile.metrics.suspicious_actions[0].action,
            SuspiciousActionKind::HighValueBet
        );
        assert_eq!(profile.metrics.pattern_deviations, 1);
    }

    #[test]
    fn first_location_change_is_not_rapid() {
        let registry = registry();
        let now = Utc::now();

        let e = event(
            "u-1",
            now,
            EventKind::LocationChange { latitude: 51.5, longitude: -0.1, country: None },
        );
        registry.record_event(&e);

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.location_changes, 1);
        assert!(profile.metrics.suspicious_actions.is_empty());
    }

    #[test]
    fn rapid_location_change_is_flagged_on_the_second_event() {
        let registry = registry();
        let now = Utc::now();

        let first = event(
            "u-1",
            now - Duration::seconds(60),
            EventKind::LocationChange { latitude: 51.5, longitude: -0.1, country: None },
        );
        let second = event(
            "u-1",
            now,
            EventKind::LocationChange { latitude: 48.8, longitude: 2.3, country: None },
        );
        registry.record_event(&first);
        registry.record_event(&second);

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.location_changes, 2);
        assert_eq!(
            profile.metrics.suspicious_actions[0].action,
            SuspiciousActionKind::RapidLocationChange
        );
    }

    #[test]
    fn every_device_switch_is_logged() {
        let registry = registry();
        let now = Utc::now();

        for i in 0..3 {
            registry.record_event(&event(
                "u-1",
                now,
                EventKind::DeviceSwitch { device_id: format!("dev-{}", i) },
            ));
        }

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.device_switches, 3);
        assert_eq!(profile.metrics.suspicious_actions.len(), 3);
    }

    #[test]
    fn excessive_login_attempts_are_flagged() {
        let registry = registry();
        let now = Utc::now();

        registry.record_event(&event(
            "u-1",
            now,
            EventKind::Login { login_attempts: 2, ip_address: None },
        ));
        registry.record_event(&event(
            "u-1",
            now,
            EventKind::Login { login_attempts: 5, ip_address: None },
        ));

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.suspicious_actions.len(), 1);
        assert_eq!(
            profile.metrics.suspicious_actions[0].action,
            SuspiciousActionKind::MultipleLoginAttempts
        );
    }

    #[test]
    fn suspicious_actions_older_than_24h_are_evicted() {
        let registry = registry();
        let now = Utc::now();

        let stale = event(
            "u-1",
            now - Duration::hours(25),
            EventKind::DeviceSwitch { device_id: "dev-old".to_string() },
        );
        registry.record_event(&stale);
        let profile = registry.get("u-1").unwrap();
        assert!(profile.metrics.suspicious_actions.is_empty());

        let fresh = event(
            "u-1",
            now,
            EventKind::DeviceSwitch { device_id: "dev-new".to_string() },
        );
        registry.record_event(&fresh);
        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.metrics.suspicious_actions.len(), 1);
        // The lifetime counter keeps both, eviction only trims the log
        assert_eq!(profile.metrics.pattern_deviations, 2);
    }

    #[test]
    fn network_histories_are_fifo_capped() {
        let registry = registry();
        for i in 0..30 {
            registry.record_network("u-1", &format!("10.0.0.{}", i), "fp", None);
        }

        let profile = registry.get("u-1").unwrap();
        assert_eq!(profile.ip_history.len(), 20);
        assert_eq!(profile.ip_history.front().map(String::as_str), Some("10.0.0.10"));
    }

    #[test]
    fn inactive_profiles_are_removed_by_cutoff() {
        let registry = registry();
        registry.get_or_create("u-1");
        assert_eq!(registry.active_count(), 1);

        let removed = registry.remove_inactive(Utc::now() + Duration::seconds(1));
        assert_eq!(removed, 1);
        assert_eq!(registry.active_count(), 0);
    }
}
