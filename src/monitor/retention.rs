// Background retention: a fast sweep that re-aggregates per-user risk from
// current profile state, and a slow sweep that evicts everything past its
// horizon. Both run as cancellable interval tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::biometrics::BiometricProfiler;
use crate::config::MonitorConfig;
use crate::monitor::alerts::AlertDispatcher;
use crate::monitor::calculators::combine;
use crate::monitor::event_store::EventStore;
use crate::monitor::profiles::UserProfileRegistry;
use crate::monitor::ScoreBoard;
use crate::network::NetworkCorrelationAnalyzer;

pub struct RetentionSweeper {
    store: Arc<EventStore>,
    registry: Arc<UserProfileRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    network: Arc<NetworkCorrelationAnalyzer>,
    biometrics: Arc<BiometricProfiler>,
    scoreboard: Arc<ScoreBoard>,
    config: MonitorConfig,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<EventStore>,
        registry: Arc<UserProfileRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        network: Arc<NetworkCorrelationAnalyzer>,
        biometrics: Arc<BiometricProfiler>,
        scoreboard: Arc<ScoreBoard>,
        config: MonitorConfig,
    ) -> Self {
        RetentionSweeper {
            store,
            registry,
            dispatcher,
            network,
            biometrics,
            scoreboard,
            config,
        }
    }

    /// Re-aggregate risk for every active user from profile state and the
    /// trailing event window, append it to the risk history, and optionally
    /// alert on the aggregate.
    pub fn fast_sweep(&self) {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(self.config.monitoring_window_secs as i64);
        let weights = self.config.calculator_weights;

        for user_id in self.registry.user_ids() {
            let profile = match self.registry.get(&user_id) {
                Some(profile) => profile,
                None => continue,
            };
            let window = self.store.window(&user_id, since);

            // Same formulas the per-event calculators use, without the
            // event-type gating: the aggregate view always counts location
            // history
            let mut factors = Vec::with_capacity(5);
            if self.config.max_normal_velocity > 0 {
                factors.push((
                    "velocity".to_string(),
                    (window.len() as f64 / self.config.max_normal_velocity as f64).min(1.0),
                    weights.velocity,
                ));
            }
            factors.push((
                "pattern".to_string(),
                (profile.metrics.suspicious_actions.len() as f64 / 5.0).min(1.0),
                weights.pattern,
            ));
            factors.push((
                "location".to_string(),
                (profile.metrics.location_changes as f64 / 3.0).min(1.0),
                weights.location,
            ));
            factors.push((
                "device".to_string(),
                (profile.metrics.device_switches as f64 / 2.0).min(1.0),
                weights.device,
            ));
            factors.push((
                "behavior".to_string(),
                (profile.metrics.betting_velocity as f64 / 100.0).min(1.0),
                weights.behavior,
            ));

            let composite = combine(&factors);
            self.registry.append_risk_history(&user_id, composite.score);

            if self.config.alert_on_aggregate {
                // Aggregate alerts need a concrete triggering event; skip
                // users whose window already drained
                if let Some(latest) = window.last() {
                    self.dispatcher.maybe_fire(
                        &user_id,
                        composite.score,
                        latest,
                        profile.snapshot(),
                    );
                }
            }
        }
    }

    /// Evict state past its retention horizon across every store. Everything
    /// tied to live monitoring ages out with the monitoring window; only
    /// biometric baselines persist longer, since they are learned templates
    /// rather than recent-activity state.
    pub fn slow_sweep(&self) {
        let now = Utc::now();
        let window_cutoff = now - chrono::Duration::seconds(self.config.monitoring_window_secs as i64);
        let baseline_cutoff = now - chrono::Duration::hours(self.config.suspicious_action_hours);

        let purged_events = self.store.purge_older_than(window_cutoff);
        let removed_profiles = self.registry.remove_inactive(window_cutoff);
        let purged_alerts = self.dispatcher.purge_older_than(window_cutoff);
        let pruned_clusters = self.network.prune(window_cutoff);
        let pruned_baselines = self.biometrics.prune(baseline_cutoff);

        let known: Vec<String> = self.registry.user_ids();
        let dropped_scores = self.scoreboard.retain_known(&known);

        if purged_events + removed_profiles + purged_alerts + pruned_clusters + pruned_baselines
            + dropped_scores
            > 0
        {
            info!(
                "retention sweep: {} events, {} profiles, {} alerts, {} clusters, {} baselines, {} scores evicted",
                purged_events,
                removed_profiles,
                purged_alerts,
                pruned_clusters,
                pruned_baselines,
                dropped_scores
            );
        } else {
            debug!("retention sweep: nothing to evict");
        }
    }

    /// Spawn both interval tasks; they stop when the shutdown flag flips.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let fast_period = Duration::from_secs(self.config.fast_sweep_secs);
        let slow_period = Duration::from_secs(self.config.slow_sweep_secs);

        let fast = {
            let sweeper = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(fast_period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => sweeper.fast_sweep(),
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let slow = {
            let sweeper = Arc::clone(&self);
            let mut shutdown = shutdown;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(slow_period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => sweeper.slow_sweep(),
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        vec![fast, slow]
    }
}
