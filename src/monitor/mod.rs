// Real-time fraud monitoring pipeline: event intake, per-user profiling,
// weighted risk scoring, alerting, and background retention.

pub mod alerts;
pub mod calculators;
pub mod event_store;
pub mod profiles;
pub mod retention;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::biometrics::{BiometricAssessment, BiometricProfiler, InteractionSession};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::lookup::{AlertSink, GeoLookup, IpClassifier};
use crate::models::{
    Alert, Event, EventKind, HealthStatus, MonitoringStats, NetworkInfo, RiskScoreEntry,
};
use crate::network::{FraudRing, NetworkAnalysis, NetworkCorrelationAnalyzer};

use alerts::AlertDispatcher;
use calculators::{combine, default_calculators, evaluate, CompositeScore, RiskCalculator};
use event_store::EventStore;
use profiles::UserProfileRegistry;
use retention::RetentionSweeper;

/// Latest known risk per scoring category for one user. Categories the
/// system has not observed yet stay `None` and are excluded from the
/// composite denominator, same as a failed calculator.
#[derive(Clone, Copy, Debug, Default)]
struct CategoryRisks {
    behavioral: Option<f64>,
    network: Option<f64>,
    biometric: Option<f64>,
}

///////////////////////////////////////////////////////////////////////////////
// Score Board
///////////////////////////////////////////////////////////////////////////////

/// Latest composite score per user. Overwritten on every evaluation; history
/// lives in the profile's risk log, not here.
pub struct ScoreBoard {
    entries: RwLock<HashMap<String, RiskScoreEntry>>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        ScoreBoard {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn update(&self, user_id: &str, entry: RiskScoreEntry) {
        self.entries.write().insert(user_id.to_string(), entry);
    }

    pub fn get(&self, user_id: &str) -> Option<RiskScoreEntry> {
        self.entries.read().get(user_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, RiskScoreEntry> {
        self.entries.read().clone()
    }

    /// Mean over current entries, skipping insufficient-data rows.
    pub fn average_risk(&self) -> f64 {
        let entries = self.entries.read();
        let scored: Vec<f64> = entries
            .values()
            .filter(|e| !e.insufficient_data)
            .map(|e| e.score)
            .collect();
        if scored.is_empty() {
            return 0.0;
        }
        scored.iter().sum::<f64>() / scored.len() as f64
    }

    pub fn high_risk_users(&self, threshold: f64) -> Vec<String> {
        let entries = self.entries.read();
        let mut users: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.score >= threshold)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Drop rows for users no longer tracked. Sweeper only.
    pub fn retain_known(&self, known: &[String]) -> usize {
        let known: std::collections::HashSet<&str> = known.iter().map(String::as_str).collect();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|user, _| known.contains(user.as_str()));
        before - entries.len()
    }
}

impl Default for ScoreBoard {
    fn default() -> Self {
        Self::new()
    }
}

///////////////////////////////////////////////////////////////////////////////
// Monitor
///////////////////////////////////////////////////////////////////////////////

pub struct FraudMonitor {
    config: MonitorConfig,
    store: Arc<EventStore>,
    registry: Arc<UserProfileRegistry>,
    calculators: Vec<Box<dyn RiskCalculator>>,
    dispatcher: Arc<AlertDispatcher>,
    network: Arc<NetworkCorrelationAnalyzer>,
    biometrics: Arc<BiometricProfiler>,
    scoreboard: Arc<ScoreBoard>,
    category_risks: RwLock<HashMap<String, CategoryRisks>>,
    // Serializes the evaluate-and-score section per user while letting
    // distinct users proceed in parallel
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events_processed: AtomicU64,
    events_rejected: AtomicU64,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FraudMonitor {
    pub fn new(
        config: MonitorConfig,
        geo_lookup: Arc<dyn GeoLookup>,
        classifier: Arc<dyn IpClassifier>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let store = Arc::new(EventStore::new(config.max_event_buffer));
        let registry = Arc::new(UserProfileRegistry::new(Arc::clone(&store), config.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(
            config.alert_threshold,
            sink,
            config.sink_max_attempts,
            config.sink_timeout_ms,
        ));
        let network = Arc::new(NetworkCorrelationAnalyzer::new(
            Arc::clone(&registry),
            geo_lookup,
            classifier,
            config.clone(),
        ));
        let biometrics = Arc::new(BiometricProfiler::new(config.clone()));
        let (shutdown, _) = watch::channel(false);

        FraudMonitor {
            calculators: default_calculators(&config),
            store,
            registry,
            dispatcher,
            network,
            biometrics,
            scoreboard: Arc::new(ScoreBoard::new()),
            category_risks: RwLock::new(HashMap::new()),
            user_locks: Mutex::new(HashMap::new()),
            events_processed: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            running: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Monitor wired to the no-op collaborators; alerts are logged only.
    pub fn with_defaults(config: MonitorConfig) -> Self {
        let (geo, classifier, sink) = crate::lookup::neutral_collaborators();
        Self::new(config, geo, classifier, sink)
    }

    /// Start the background sweeper tasks and begin accepting events.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(false);

        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.network),
            Arc::clone(&self.biometrics),
            Arc::clone(&self.scoreboard),
            self.config.clone(),
        ));
        let handles = sweeper.spawn(self.shutdown.subscribe());
        self.tasks.lock().extend(handles);

        info!(
            "fraud monitor started: window {}s, alert threshold {:.2}",
            self.config.monitoring_window_secs, self.config.alert_threshold
        );
    }

    /// Stop accepting events and wind down the sweeper tasks.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("fraud monitor stopped");
    }

    /// Score one event end to end. Returns the alert when the composite
    /// crossed the threshold.
    pub async fn ingest(&self, event: Event) -> Result<Option<Alert>, MonitorError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }
        if let Err(reason) = validate(&event) {
            self.events_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(MonitorError::InvalidEvent(reason));
        }

        let user_lock = self.lock_for(&event.user_id);
        let _guard = user_lock.lock().await;

        self.store.append(event.clone());
        self.registry.record_event(&event);

        let since =
            Utc::now() - chrono::Duration::seconds(self.config.monitoring_window_secs as i64);
        let window = self.store.window(&event.user_id, since);
        let profile = self.registry.get_or_create(&event.user_id);

        let behavioral = evaluate(&self.calculators, &event, &profile, &window);
        let risks = {
            let mut categories = self.category_risks.write();
            let entry = categories.entry(event.user_id.clone()).or_default();
            if !behavioral.insufficient_data {
                entry.behavioral = Some(behavioral.score);
            }
            *entry
        };

        // Per-calculator factors stay visible next to the category scores
        let overall = self.combine_categories(risks);
        let mut factors = behavioral.factors;
        factors.extend(overall.factors.clone());

        self.scoreboard.update(
            &event.user_id,
            RiskScoreEntry {
                score: overall.score,
                timestamp: Utc::now(),
                factors,
                insufficient_data: overall.insufficient_data,
            },
        );
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "scored {} event for {}: {:.3}",
            event.kind.name(),
            event.user_id,
            overall.score
        );

        Ok(self
            .dispatcher
            .maybe_fire(&event.user_id, overall.score, &event, profile.snapshot()))
    }

    // Weight-normalized average over the categories with a known score; the
    // same exclusion rule the calculators use, one level up.
    fn combine_categories(&self, risks: CategoryRisks) -> CompositeScore {
        let weights = self.config.category_weights;
        let mut factors = Vec::with_capacity(3);
        if let Some(score) = risks.behavioral {
            factors.push(("behavioral".to_string(), score, weights.behavioral));
        }
        if let Some(score) = risks.network {
            factors.push(("network".to_string(), score, weights.network));
        }
        if let Some(score) = risks.biometric {
            factors.push(("biometric".to_string(), score, weights.biometric));
        }
        combine(&factors)
    }

    // Re-derive the composite after a category update outside the event
    // path. Alerting needs a concrete triggering event, so the most recent
    // window event stands in; a user with no live events is scored but
    // cannot alert until one arrives.
    fn rescore(&self, user_id: &str) -> Option<Alert> {
        let risks = self
            .category_risks
            .read()
            .get(user_id)
            .copied()
            .unwrap_or_default();
        let overall = self.combine_categories(risks);

        self.scoreboard.update(
            user_id,
            RiskScoreEntry {
                score: overall.score,
                timestamp: Utc::now(),
                factors: overall.factors,
                insufficient_data: overall.insufficient_data,
            },
        );

        let since =
            Utc::now() - chrono::Duration::seconds(self.config.monitoring_window_secs as i64);
        let window = self.store.window(user_id, since);
        let latest = window.last()?;
        let snapshot = self.registry.get_or_create(user_id).snapshot();
        self.dispatcher
            .maybe_fire(user_id, overall.score, latest, snapshot)
    }

    /// Correlate one network observation for the user. The resulting network
    /// risk feeds the user's composite score and can alert on its own.
    pub async fn observe_network(
        &self,
        user_id: &str,
        info: &NetworkInfo,
    ) -> Result<NetworkAnalysis, MonitorError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }
        let analysis = self.network.analyze(user_id, info).await;

        let user_lock = self.lock_for(user_id);
        let _guard = user_lock.lock().await;
        self.category_risks
            .write()
            .entry(user_id.to_string())
            .or_default()
            .network = Some(analysis.risk_score);
        self.rescore(user_id);

        Ok(analysis)
    }

    /// Assess one interaction session against the user's biometric baseline.
    /// Once the baseline has matured, the inverse-similarity risk feeds the
    /// user's composite score.
    pub async fn observe_session(
        &self,
        user_id: &str,
        session: &InteractionSession,
    ) -> Result<BiometricAssessment, MonitorError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }
        let assessment = self.biometrics.analyze_session(user_id, session);

        if let Some(risk) = self.biometrics.risk_for(&assessment) {
            let user_lock = self.lock_for(user_id);
            let _guard = user_lock.lock().await;
            self.category_risks
                .write()
                .entry(user_id.to_string())
                .or_default()
                .biometric = Some(risk);
            self.rescore(user_id);
        }

        Ok(assessment)
    }

    pub fn detect_fraud_rings(&self) -> Vec<FraudRing> {
        self.network.detect_fraud_rings()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.dispatcher.subscribe()
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.dispatcher.recent(limit)
    }

    pub fn risk_snapshot(&self) -> HashMap<String, RiskScoreEntry> {
        self.scoreboard.snapshot()
    }

    pub fn risk_for_user(&self, user_id: &str) -> Option<RiskScoreEntry> {
        self.scoreboard.get(user_id)
    }

    pub fn stats(&self) -> MonitoringStats {
        MonitoringStats {
            active_user_count: self.registry.active_count(),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_dropped: self.store.dropped(),
            alerts_sent: self.dispatcher.alerts_sent(),
            average_risk: self.scoreboard.average_risk(),
            high_risk_users: self.scoreboard.high_risk_users(self.config.alert_threshold),
            health: if self.running.load(Ordering::SeqCst) {
                HealthStatus::Running
            } else {
                HealthStatus::Stopped
            },
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock();
        Arc::clone(
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

fn validate(event: &Event) -> Result<(), String> {
    if event.user_id.trim().is_empty() {
        return Err("missing user_id".to_string());
    }
    match &event.kind {
        EventKind::BetPlaced { amount, .. } => {
            if !amount.is_finite() || *amount < 0.0 {
                return Err(format!("invalid bet amount {}", amount));
            }
        }
        EventKind::LocationChange { latitude, longitude, .. } => {
            if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                return Err(format!("coordinates out of range: {}, {}", latitude, longitude));
            }
        }
        EventKind::DeviceSwitch { device_id } => {
            if device_id.trim().is_empty() {
                return Err("missing device_id".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}
