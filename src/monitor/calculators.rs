// Independent risk calculators. Each one is a pure function of the event,
// the user profile, and the trailing event window, producing a risk in [0,1]
// paired with its configured weight. A failing calculator is excluded from
// the composite denominator instead of contributing zero risk, so an outage
// cannot silently suppress the score.

use std::collections::HashMap;

use log::warn;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::models::{Event, EventKind};
use crate::monitor::profiles::UserProfile;

pub trait RiskCalculator: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> f64;
    fn score(&self, event: &Event, profile: &UserProfile, window: &[Event]) -> Result<f64, String>;
}

///////////////////////////////////////////////////////////////////////////////
// Calculators
///////////////////////////////////////////////////////////////////////////////

/// Event velocity: all event types for the user in the trailing velocity
/// window, normalized against the configured maximum normal rate. The
/// current event's timestamp anchors the window so scoring stays
/// deterministic under replay.
pub struct VelocityCalculator {
    pub max_normal_velocity: u32,
    pub velocity_window_secs: u64,
    pub weight: f64,
}

impl RiskCalculator for VelocityCalculator {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, event: &Event, _profile: &UserProfile, window: &[Event]) -> Result<f64, String> {
        if self.max_normal_velocity == 0 {
            return Err("max_normal_velocity is zero".to_string());
        }
        let cutoff = event.timestamp - chrono::Duration::seconds(self.velocity_window_secs as i64);
        let count = window.iter().filter(|e| e.timestamp >= cutoff).count() as f64;
        Ok((count / self.max_normal_velocity as f64).min(1.0))
    }
}

/// Pattern risk from the accumulated suspicious-action log.
pub struct PatternCalculator {
    pub weight: f64,
}

impl RiskCalculator for PatternCalculator {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, _event: &Event, profile: &UserProfile, _window: &[Event]) -> Result<f64, String> {
        let count = profile.metrics.suspicious_actions.len() as f64;
        Ok((count / 5.0).min(1.0))
    }
}

/// Location risk, applicable to location_change events only.
pub struct LocationCalculator {
    pub weight: f64,
}

impl RiskCalculator for LocationCalculator {
    fn name(&self) -> &'static str {
        "location"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, event: &Event, profile: &UserProfile, _window: &[Event]) -> Result<f64, String> {
        match event.kind {
            EventKind::LocationChange { .. } => {
                Ok((profile.metrics.location_changes as f64 / 3.0).min(1.0))
            }
            _ => Ok(0.0),
        }
    }
}

/// Device risk from the accumulated switch count.
pub struct DeviceCalculator {
    pub weight: f64,
}

impl RiskCalculator for DeviceCalculator {
    fn name(&self) -> &'static str {
        "device"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, _event: &Event, profile: &UserProfile, _window: &[Event]) -> Result<f64, String> {
        Ok((profile.metrics.device_switches as f64 / 2.0).min(1.0))
    }
}

/// Behavior risk from the betting velocity metric.
pub struct BehaviorCalculator {
    pub weight: f64,
}

impl RiskCalculator for BehaviorCalculator {
    fn name(&self) -> &'static str {
        "behavior"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, _event: &Event, profile: &UserProfile, _window: &[Event]) -> Result<f64, String> {
        Ok((profile.metrics.betting_velocity as f64 / 100.0).min(1.0))
    }
}

pub fn default_calculators(config: &MonitorConfig) -> Vec<Box<dyn RiskCalculator>> {
    let weights = config.calculator_weights;
    vec![
        Box::new(VelocityCalculator {
            max_normal_velocity: config.max_normal_velocity,
            velocity_window_secs: config.velocity_window_secs,
            weight: weights.velocity,
        }),
        Box::new(PatternCalculator { weight: weights.pattern }),
        Box::new(LocationCalculator { weight: weights.location }),
        Box::new(DeviceCalculator { weight: weights.device }),
        Box::new(BehaviorCalculator { weight: weights.behavior }),
    ]
}

///////////////////////////////////////////////////////////////////////////////
// Composite Scoring
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct CompositeScore {
    pub score: f64,
    pub factors: HashMap<String, f64>,
    // True when every contributing signal failed; a zero score then means
    // "no evidence", not "safe"
    pub insufficient_data: bool,
}

/// Weight-normalized average over the signals that succeeded.
pub fn combine(factors: &[(String, f64, f64)]) -> CompositeScore {
    let total_weight: f64 = factors.iter().map(|(_, _, w)| w).sum();
    if factors.is_empty() || total_weight <= 0.0 {
        return CompositeScore {
            score: 0.0,
            factors: HashMap::new(),
            insufficient_data: true,
        };
    }

    let weighted_sum: f64 = factors.iter().map(|(_, risk, w)| risk * w).sum();
    let score = (weighted_sum / total_weight).clamp(0.0, 1.0);
    CompositeScore {
        score,
        factors: factors
            .iter()
            .map(|(name, risk, _)| (name.clone(), *risk))
            .collect(),
        insufficient_data: false,
    }
}

/// Run every calculator against the event, skipping failures.
pub fn evaluate(
    calculators: &[Box<dyn RiskCalculator>],
    event: &Event,
    profile: &UserProfile,
    window: &[Event],
) -> CompositeScore {
    let mut factors = Vec::with_capacity(calculators.len());
    for calculator in calculators {
        match calculator.score(event, profile, window) {
            Ok(risk) => factors.push((
                calculator.name().to_string(),
                risk.clamp(0.0, 1.0),
                calculator.weight(),
            )),
            Err(reason) => {
                warn!("{}", MonitorError::Calculator { calculator: calculator.name(), reason });
            }
        }
    }
    combine(&factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::event_store::EventStore;
    use crate::monitor::profiles::UserProfileRegistry;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    struct FailingCalculator;

    impl RiskCalculator for FailingCalculator {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn weight(&self) -> f64 {
            0.5
        }
        fn score(&self, _: &Event, _: &UserProfile, _: &[Event]) -> Result<f64, String> {
            Err("boom".to_string())
        }
    }

    struct FixedCalculator(f64, f64);

    impl RiskCalculator for FixedCalculator {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn weight(&self) -> f64 {
            self.1
        }
        fn score(&self, _: &Event, _: &UserProfile, _: &[Event]) -> Result<f64, String> {
            Ok(self.0)
        }
    }

    fn bet_event(user: &str, amount: f64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            user_id: user.to_string(),
            timestamp: Utc::now(),
            kind: EventKind::BetPlaced { amount, market: None },
        }
    }

    fn empty_profile() -> UserProfile {
        let store = Arc::new(EventStore::new(16));
        let registry = UserProfileRegistry::new(store, MonitorConfig::default());
        registry.get_or_create("u-1")
    }

    #[test]
    fn failed_calculator_is_excluded_from_the_denominator() {
        let calculators: Vec<Box<dyn RiskCalculator>> =
            vec![Box::new(FixedCalculator(0.8, 0.25)), Box::new(FailingCalculator)];
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);

        let composite = evaluate(&calculators, &event, &profile, &[]);
        // The failing weight must not dilute the surviving signal
        assert!((composite.score - 0.8).abs() < 1e-9);
        assert!(!composite.insufficient_data);
    }

    #[test]
    fn all_calculators_failing_flags_insufficient_data() {
        let calculators: Vec<Box<dyn RiskCalculator>> = vec![Box::new(FailingCalculator)];
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);

        let composite = evaluate(&calculators, &event, &profile, &[]);
        assert_eq!(composite.score, 0.0);
        assert!(composite.insufficient_data);
    }

    #[test]
    fn composite_is_idempotent_on_static_state() {
        let config = MonitorConfig::default();
        let calculators = default_calculators(&config);
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);
        let window = vec![event.clone()];

        let first = evaluate(&calculators, &event, &profile, &window);
        let second = evaluate(&calculators, &event, &profile, &window);
        assert_eq!(first.score, second.score);
    }

    #[test]
    fn composite_stays_within_unit_interval() {
        let calculators: Vec<Box<dyn RiskCalculator>> =
            vec![Box::new(FixedCalculator(1.0, 0.9)), Box::new(FixedCalculator(1.0, 0.1))];
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);

        let composite = evaluate(&calculators, &event, &profile, &[]);
        assert!(composite.score <= 1.0 && composite.score >= 0.0);
        assert_eq!(composite.score, 1.0);
    }

    #[test]
    fn velocity_risk_matches_window_count() {
        let calculator =
            VelocityCalculator { max_normal_velocity: 10, velocity_window_secs: 60, weight: 0.25 };
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);
        let window: Vec<Event> = (0..6).map(|_| bet_event("u-1", 10.0)).collect();

        let risk = calculator.score(&event, &profile, &window).unwrap();
        assert!((risk - 0.6).abs() < 1e-9);
    }

    #[test]
    fn velocity_ignores_events_outside_the_trailing_window() {
        let calculator =
            VelocityCalculator { max_normal_velocity: 10, velocity_window_secs: 60, weight: 0.25 };
        let profile = empty_profile();
        let event = bet_event("u-1", 10.0);

        let mut window: Vec<Event> = (0..4).map(|_| bet_event("u-1", 10.0)).collect();
        let mut stale = bet_event("u-1", 10.0);
        stale.timestamp = event.timestamp - chrono::Duration::seconds(120);
        window.push(stale);

        let risk = calculator.score(&event, &profile, &window).unwrap();
        assert!((risk - 0.4).abs() < 1e-9);
    }

    #[test]
    fn location_risk_is_zero_for_other_event_types() {
        let calculator = LocationCalculator { weight: 0.20 };
        let mut profile = empty_profile();
        profile.metrics.location_changes = 2;
        let event = bet_event("u-1", 10.0);

        assert_eq!(calculator.score(&event, &profile, &[]).unwrap(), 0.0);

        let location_event = Event {
            event_id: Uuid::new_v4(),
            user_id: "u-1".to_string(),
            timestamp: Utc::now(),
            kind: EventKind::LocationChange { latitude: 0.0, longitude: 0.0, country: None },
        };
        let risk = calculator.score(&location_event, &profile, &[]).unwrap();
        assert!((risk - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_location_change_scores_one_third() {
        let calculator = LocationCalculator { weight: 0.20 };
        let mut profile = empty_profile();
        profile.metrics.location_changes = 1;
        let event = Event {
            event_id: Uuid::new_v4(),
            user_id: "u-1".to_string(),
            timestamp: Utc::now(),
            kind: EventKind::LocationChange { latitude: 51.5, longitude: -0.1, country: None },
        };

        let risk = calculator.score(&event, &profile, &[]).unwrap();
        assert!((risk - 1.0 / 3.0).abs() < 1e-9);
    }
}
