// Behavioral biometrics: per-user baseline interaction templates for
// pointer, keystroke, touch, and scroll dynamics, similarity scoring against
// the baseline, and anomaly detection for scripted or hijacked sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::monitor::calculators::combine;

// Baseline blending factors, matching the profile-update discipline used
// elsewhere in the scoring pipeline
const BASELINE_KEEP: f64 = 0.7;
const BASELINE_LEARN: f64 = 0.3;
const SCORE_HISTORY_CAP: usize = 50;
const SNAPSHOT_CAP: usize = 50;
const RECENT_SNAPSHOTS: usize = 5;
const SUDDEN_CHANGE_THRESHOLD: f64 = 0.3;
const IMPOSSIBLE_VELOCITY_FRACTION: f64 = 0.10;

///////////////////////////////////////////////////////////////////////////////
// Session Telemetry
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeystrokeSample {
    pub down_ms: u64,
    pub up_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TouchSample {
    pub x: f64,
    pub y: f64,
    pub pressure: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrollSample {
    pub delta_y: f64,
    pub speed: f64,
}

/// Telemetry collected during one active session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InteractionSession {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub pointer: Vec<PointerSample>,
    #[serde(default)]
    pub keystrokes: Vec<KeystrokeSample>,
    #[serde(default)]
    pub touches: Vec<TouchSample>,
    #[serde(default)]
    pub scrolls: Vec<ScrollSample>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Mouse,
    Keystroke,
    Touch,
    Scroll,
}

impl Modality {
    pub fn name(&self) -> &'static str {
        match self {
            Modality::Mouse => "mouse",
            Modality::Keystroke => "keystroke",
            Modality::Touch => "touch",
            Modality::Scroll => "scroll",
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Assessment Results
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModalityAssessment {
    pub modality: Modality,
    pub metrics: HashMap<String, f64>,
    pub similarity: f64,
    pub uniqueness: f64,
    pub anomaly: f64,
    pub is_suspicious: bool,
    // Whether the baseline had enough samples for this modality to count
    // toward the composite
    pub contributed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BiometricAnomaly {
    SuddenBehaviorChange { deviation: f64 },
    ImpossiblePointerVelocity { fraction: f64 },
    ScriptedKeystrokeTiming { consistency: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BiometricAssessment {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub modalities: Vec<ModalityAssessment>,
    pub composite: f64,
    pub authentic: bool,
    pub confidence: Confidence,
    // No modality had a mature baseline; the composite is not evidence of
    // safety
    pub insufficient_data: bool,
    pub anomalies: Vec<BiometricAnomaly>,
    pub baseline_updated: bool,
}

///////////////////////////////////////////////////////////////////////////////
// Uniqueness Scoring
///////////////////////////////////////////////////////////////////////////////

// Stand-in point for a trained model: implementations must be deterministic
// so repeated analysis of identical input scores identically.
pub trait UniquenessScorer: Send + Sync {
    fn score(&self, metrics: &HashMap<String, f64>) -> f64;
}

/// Default scorer: normalized dispersion of the metric vector. More spread
/// between a user's metric magnitudes reads as a more distinctive template.
pub struct DispersionUniquenessScorer;

impl UniquenessScorer for DispersionUniquenessScorer {
    fn score(&self, metrics: &HashMap<String, f64>) -> f64 {
        let values: Vec<f64> = metrics.values().copied().filter(|v| v.is_finite()).collect();
        if values.len() < 2 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        (variance.sqrt() / mean.abs()).min(1.0)
    }
}

///////////////////////////////////////////////////////////////////////////////
// Baseline State
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Default)]
struct ModalityBaseline {
    metrics: HashMap<String, f64>,
    samples: usize,
}

#[derive(Clone, Debug)]
struct UserBaseline {
    modalities: HashMap<Modality, ModalityBaseline>,
    score_history: VecDeque<f64>,
    pattern_snapshots: VecDeque<Vec<f64>>,
    last_activity: DateTime<Utc>,
}

impl UserBaseline {
    fn new(now: DateTime<Utc>) -> Self {
        UserBaseline {
            modalities: HashMap::new(),
            score_history: VecDeque::new(),
            pattern_snapshots: VecDeque::new(),
            last_activity: now,
        }
    }
}

pub struct BiometricProfiler {
    baselines: RwLock<HashMap<String, UserBaseline>>,
    scorer: Arc<dyn UniquenessScorer>,
    config: MonitorConfig,
}

impl BiometricProfiler {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_scorer(config, Arc::new(DispersionUniquenessScorer))
    }

    pub fn with_scorer(config: MonitorConfig, scorer: Arc<dyn UniquenessScorer>) -> Self {
        BiometricProfiler {
            baselines: RwLock::new(HashMap::new()),
            scorer,
            config,
        }
    }

    /// Analyze one session against the user's baseline: per-modality
    /// similarity, composite authenticity, anomaly flags, and the guarded
    /// baseline update.
    pub fn analyze_session(&self, user_id: &str, session: &InteractionSession) -> BiometricAssessment {
        let now = Utc::now();
        let threshold = self.config.similarity_threshold;
        let min_samples = self.config.min_biometric_samples;
        let weights = self.config.biometric_weights;

        let observed: Vec<(Modality, HashMap<String, f64>, usize, f64)> = [
            (Modality::Mouse, analyze_pointer(&session.pointer), session.pointer.len(), weights.mouse),
            (
                Modality::Keystroke,
                analyze_keystrokes(&session.keystrokes),
                session.keystrokes.len(),
                weights.keystroke,
            ),
            (Modality::Touch, analyze_touch(&session.touches), session.touches.len(), weights.touch),
            (Modality::Scroll, analyze_scroll(&session.scrolls), session.scrolls.len(), weights.scroll),
        ]
        .into_iter()
        .filter(|(_, metrics, count, _)| *count > 0 && !metrics.is_empty())
        .collect();

        let mut baselines = self.baselines.write();
        let baseline = baselines
            .entry(user_id.to_string())
            .or_insert_with(|| UserBaseline::new(now));
        baseline.last_activity = now;

        let mut assessments = Vec::with_capacity(observed.len());
        let mut factors: Vec<(String, f64, f64)> = Vec::new();

        for (modality, metrics, _count, weight) in &observed {
            let modality_baseline = baseline.modalities.get(modality);
            let mature = modality_baseline
                .map(|b| b.samples >= min_samples)
                .unwrap_or(false);

            let similarity = modality_baseline
                .map(|b| cosine_similarity(&b.metrics, metrics))
                .unwrap_or(0.0);

            if mature {
                factors.push((modality.name().to_string(), similarity, *weight));
            }

            assessments.push(ModalityAssessment {
                modality: *modality,
                metrics: metrics.clone(),
                similarity,
                uniqueness: self.scorer.score(metrics),
                anomaly: 1.0 - similarity,
                is_suspicious: mature && similarity < threshold,
                contributed: mature,
            });
        }

        // Composite is the similarity combination here, not a risk, so the
        // authenticity bands read directly off it
        let composite_result = combine(&factors);
        let insufficient_data = composite_result.insufficient_data;
        let composite = composite_result.score;

        let (authentic, confidence) = if insufficient_data {
            // Learning phase: nothing to compare against yet
            (true, Confidence::Medium)
        } else if composite >= threshold {
            (true, Confidence::High)
        } else if composite >= threshold - 0.2 {
            (true, Confidence::Medium)
        } else {
            (false, Confidence::High)
        };

        let mut anomalies = Vec::new();

        if let Some(fraction) = impossible_velocity_fraction(&session.pointer, self.config.max_pointer_velocity)
        {
            if fraction > IMPOSSIBLE_VELOCITY_FRACTION {
                anomalies.push(BiometricAnomaly::ImpossiblePointerVelocity { fraction });
            }
        }

        if let Some(consistency) = keystroke_consistency(&session.keystrokes) {
            if consistency > self.config.keystroke_consistency_ceiling {
                anomalies.push(BiometricAnomaly::ScriptedKeystrokeTiming { consistency });
            }
        }

        let snapshot = pattern_snapshot(&observed);
        if let Some(deviation) = sudden_change_deviation(&baseline.pattern_snapshots, &snapshot) {
            if deviation > SUDDEN_CHANGE_THRESHOLD {
                anomalies.push(BiometricAnomaly::SuddenBehaviorChange { deviation });
            }
        }

        // Baseline poisoning guard: never learn from a session that failed
        // authentication, or whose score is an outlier against history
        let outlier = !insufficient_data && is_outlier(&baseline.score_history, composite);
        let baseline_updated = authentic && !outlier;
        if baseline_updated {
            for (modality, metrics, count, _) in &observed {
                let entry = baseline.modalities.entry(*modality).or_default();
                blend_metrics(&mut entry.metrics, metrics);
                entry.samples += count;
            }
        } else {
            debug!(
                "skipping baseline update for {}: authentic={} outlier={}",
                user_id, authentic, outlier
            );
        }

        if !insufficient_data {
            baseline.score_history.push_back(composite);
            while baseline.score_history.len() > SCORE_HISTORY_CAP {
                baseline.score_history.pop_front();
            }
        }
        baseline.pattern_snapshots.push_back(snapshot);
        while baseline.pattern_snapshots.len() > SNAPSHOT_CAP {
            baseline.pattern_snapshots.pop_front();
        }

        BiometricAssessment {
            user_id: user_id.to_string(),
            timestamp: now,
            modalities: assessments,
            composite,
            authentic,
            confidence,
            insufficient_data,
            anomalies,
            baseline_updated,
        }
    }

    /// Biometric risk contribution for the composite scorer: inverse of the
    /// similarity composite, zero while still learning.
    pub fn risk_for(&self, assessment: &BiometricAssessment) -> Option<f64> {
        if assessment.insufficient_data {
            return None;
        }
        let mut risk = 1.0 - assessment.composite;
        if !assessment.anomalies.is_empty() {
            risk = risk.max(0.8);
        }
        Some(risk.clamp(0.0, 1.0))
    }

    pub fn tracked_users(&self) -> usize {
        self.baselines.read().len()
    }

    /// Drop baselines idle since the cutoff. Sweeper only.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut baselines = self.baselines.write();
        let before = baselines.len();
        baselines.retain(|_, b| b.last_activity >= cutoff);
        before - baselines.len()
    }

    #[cfg(test)]
    pub(crate) fn force_baseline(&self, user_id: &str, modality: Modality, metrics: HashMap<String, f64>, samples: usize) {
        let mut baselines = self.baselines.write();
        let baseline = baselines
            .entry(user_id.to_string())
            .or_insert_with(|| UserBaseline::new(Utc::now()));
        baseline
            .modalities
            .insert(modality, ModalityBaseline { metrics, samples });
    }
}

///////////////////////////////////////////////////////////////////////////////
// Modality Analyzers
///////////////////////////////////////////////////////////////////////////////

pub fn analyze_pointer(samples: &[PointerSample]) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if samples.len() < 2 {
        return metrics;
    }

    let mut velocities = Vec::with_capacity(samples.len() - 1);
    let mut path_distance = 0.0;

    for pair in samples.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let distance = ((curr.x - prev.x).powi(2) + (curr.y - prev.y).powi(2)).sqrt();
        path_distance += distance;
        if curr.elapsed_ms > 0 {
            velocities.push(distance / (curr.elapsed_ms as f64 / 1000.0));
        }
    }

    if velocities.is_empty() {
        return metrics;
    }

    let avg_velocity = mean(&velocities);
    let first = &samples[0];
    let last = &samples[samples.len() - 1];
    let direct = ((last.x - first.x).powi(2) + (last.y - first.y).powi(2)).sqrt();
    let straightness = if path_distance > 0.0 { direct / path_distance } else { 0.0 };

    metrics.insert("avg_velocity".to_string(), avg_velocity);
    metrics.insert("velocity_variance".to_string(), variance(&velocities, avg_velocity));
    metrics.insert("path_straightness".to_string(), straightness);
    metrics
}

pub fn analyze_keystrokes(samples: &[KeystrokeSample]) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if samples.is_empty() {
        return metrics;
    }

    let dwells: Vec<f64> = samples
        .iter()
        .filter(|k| k.up_ms >= k.down_ms)
        .map(|k| (k.up_ms - k.down_ms) as f64)
        .collect();
    if dwells.is_empty() {
        return metrics;
    }

    let avg_dwell = mean(&dwells);
    metrics.insert("avg_dwell_ms".to_string(), avg_dwell);
    metrics.insert("dwell_variance".to_string(), variance(&dwells, avg_dwell));

    // Flight time between consecutive keys, pauses filtered out
    let flights: Vec<f64> = samples
        .windows(2)
        .filter_map(|pair| {
            let gap = pair[1].down_ms as i64 - pair[0].up_ms as i64;
            (gap > 0 && gap < 1000).then_some(gap as f64)
        })
        .collect();
    if !flights.is_empty() {
        let avg_flight = mean(&flights);
        metrics.insert("avg_flight_ms".to_string(), avg_flight);
        metrics.insert("flight_variance".to_string(), variance(&flights, avg_flight));
    }

    metrics
}

pub fn analyze_touch(samples: &[TouchSample]) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if samples.is_empty() {
        return metrics;
    }

    let pressures: Vec<f64> = samples.iter().map(|t| t.pressure).collect();
    let avg_pressure = mean(&pressures);
    metrics.insert("avg_pressure".to_string(), avg_pressure);
    metrics.insert("pressure_variance".to_string(), variance(&pressures, avg_pressure));
    metrics.insert("touch_count".to_string(), samples.len() as f64);
    metrics
}

pub fn analyze_scroll(samples: &[ScrollSample]) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if samples.is_empty() {
        return metrics;
    }

    let speeds: Vec<f64> = samples.iter().map(|s| s.speed).collect();
    let avg_speed = mean(&speeds);
    let down = samples.iter().filter(|s| s.delta_y > 0.0).count() as f64;

    metrics.insert("avg_speed".to_string(), avg_speed);
    metrics.insert("speed_variance".to_string(), variance(&speeds, avg_speed));
    metrics.insert("direction_ratio".to_string(), down / samples.len() as f64);
    metrics
}

///////////////////////////////////////////////////////////////////////////////
// Similarity and Anomaly Helpers
///////////////////////////////////////////////////////////////////////////////

/// Cosine similarity over the numeric keys both maps share. Zero vectors
/// compare as 0 to avoid dividing by zero.
pub fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (key, &va) in a {
        if let Some(&vb) = b.get(key) {
            if va.is_finite() && vb.is_finite() {
                dot += va * vb;
                norm_a += va * va;
                norm_b += vb * vb;
            }
        }
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

// Fraction of pointer samples moving faster than the physical ceiling.
fn impossible_velocity_fraction(samples: &[PointerSample], ceiling: f64) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mut total = 0usize;
    let mut over = 0usize;
    for pair in samples.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.elapsed_ms == 0 {
            continue;
        }
        let distance = ((curr.x - prev.x).powi(2) + (curr.y - prev.y).powi(2)).sqrt();
        let velocity = distance / (curr.elapsed_ms as f64 / 1000.0);
        total += 1;
        if velocity > ceiling {
            over += 1;
        }
    }
    (total > 0).then(|| over as f64 / total as f64)
}

// Timing-consistency score in [0,1]; human typing shows natural jitter, so a
// score near 1 implies scripted input.
fn keystroke_consistency(samples: &[KeystrokeSample]) -> Option<f64> {
    let intervals: Vec<f64> = samples
        .windows(2)
        .map(|pair| pair[1].down_ms as f64 - pair[0].down_ms as f64)
        .filter(|gap| *gap > 0.0)
        .collect();
    if intervals.len() < 3 {
        return None;
    }
    let avg = mean(&intervals);
    if avg <= 0.0 {
        return None;
    }
    let cv = variance(&intervals, avg).sqrt() / avg;
    Some((1.0 - cv).clamp(0.0, 1.0))
}

// Fixed-order vector summarizing the session for drift detection
fn pattern_snapshot(observed: &[(Modality, HashMap<String, f64>, usize, f64)]) -> Vec<f64> {
    let lookup = |modality: Modality, key: &str| -> f64 {
        observed
            .iter()
            .find(|(m, _, _, _)| *m == modality)
            .and_then(|(_, metrics, _, _)| metrics.get(key).copied())
            .unwrap_or(0.0)
    };

    vec![
        lookup(Modality::Mouse, "avg_velocity"),
        lookup(Modality::Keystroke, "avg_dwell_ms"),
        lookup(Modality::Touch, "avg_pressure"),
        lookup(Modality::Scroll, "avg_speed"),
    ]
}

// Deviation between the most recent snapshots and all prior ones; needs at
// least RECENT_SNAPSHOTS recent plus some history to compare against.
fn sudden_change_deviation(history: &VecDeque<Vec<f64>>, current: &[f64]) -> Option<f64> {
    if history.len() <= RECENT_SNAPSHOTS {
        return None;
    }

    let split = history.len() - (RECENT_SNAPSHOTS - 1);
    let dims = current.len();

    let centroid = |rows: Vec<&Vec<f64>>| -> Vec<f64> {
        let count = rows.len().max(1) as f64;
        let mut acc = vec![0.0; dims];
        for row in rows {
            for (i, v) in row.iter().take(dims).enumerate() {
                acc[i] += v;
            }
        }
        for v in &mut acc {
            *v /= count;
        }
        acc
    };

    let current_row = current.to_vec();
    let recent: Vec<&Vec<f64>> = history
        .iter()
        .skip(split)
        .chain(std::iter::once(&current_row))
        .collect();
    let prior: Vec<&Vec<f64>> = history.iter().take(split).collect();

    let recent_centroid = centroid(recent);
    let prior_centroid = centroid(prior);

    // Mean relative difference per dimension
    let mut deviation = 0.0;
    let mut counted = 0usize;
    for i in 0..dims {
        let scale = prior_centroid[i].abs().max(1e-6);
        deviation += (recent_centroid[i] - prior_centroid[i]).abs() / scale;
        counted += 1;
    }
    (counted > 0).then(|| (deviation / counted as f64).min(1.0))
}

fn is_outlier(history: &VecDeque<f64>, score: f64) -> bool {
    if history.len() < 5 {
        return false;
    }
    let values: Vec<f64> = history.iter().copied().collect();
    let avg = mean(&values);
    let std = variance(&values, avg).sqrt().max(0.05);
    (score - avg).abs() > 2.0 * std
}

fn blend_metrics(baseline: &mut HashMap<String, f64>, observed: &HashMap<String, f64>) {
    for (key, &value) in observed {
        baseline
            .entry(key.clone())
            .and_modify(|existing| *existing = *existing * BASELINE_KEEP + value * BASELINE_LEARN)
            .or_insert(value);
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_pointer(n: usize) -> Vec<PointerSample> {
        (0..n)
            .map(|i| PointerSample { x: i as f64 * 10.0, y: i as f64 * 5.0, elapsed_ms: 16 })
            .collect()
    }

    fn human_keystrokes() -> Vec<KeystrokeSample> {
        // Irregular inter-key intervals, as a person types
        let downs = [0u64, 180, 420, 560, 890, 1100, 1450, 1600];
        downs
            .iter()
            .map(|&d| KeystrokeSample { down_ms: d, up_ms: d + 70 + (d % 40) })
            .collect()
    }

    fn scripted_keystrokes() -> Vec<KeystrokeSample> {
        (0..10)
            .map(|i| KeystrokeSample { down_ms: i * 100, up_ms: i * 100 + 50 })
            .collect()
    }

    struct FixedScorer(f64);

    impl UniquenessScorer for FixedScorer {
        fn score(&self, _metrics: &HashMap<String, f64>) -> f64 {
            self.0
        }
    }

    #[test]
    fn cosine_similarity_of_zero_vectors_is_zero() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), 0.0);
        let mut b = HashMap::new();
        b.insert("x".to_string(), 0.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_only_uses_shared_keys() {
        let mut a = HashMap::new();
        a.insert("shared".to_string(), 3.0);
        a.insert("only_a".to_string(), 100.0);
        let mut b = HashMap::new();
        b.insert("shared".to_string(), 3.0);
        b.insert("only_b".to_string(), -50.0);

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_metric_maps_are_maximally_similar() {
        let metrics = analyze_pointer(&steady_pointer(20));
        assert!((cosine_similarity(&metrics, &metrics) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn learning_phase_is_authentic_with_insufficient_data() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session = InteractionSession { pointer: steady_pointer(20), ..Default::default() };

        let assessment = profiler.analyze_session("u-1", &session);
        assert!(assessment.insufficient_data);
        assert!(assessment.authentic);
        assert_eq!(assessment.confidence, Confidence::Medium);
    }

    #[test]
    fn mature_matching_baseline_is_authentic_high_confidence() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session = InteractionSession { pointer: steady_pointer(20), ..Default::default() };
        let metrics = analyze_pointer(&session.pointer);
        profiler.force_baseline("u-1", Modality::Mouse, metrics, 150);

        let assessment = profiler.analyze_session("u-1", &session);
        assert!(!assessment.insufficient_data);
        assert!(assessment.composite > 0.99);
        assert!(assessment.authentic);
        assert_eq!(assessment.confidence, Confidence::High);
        assert!(assessment.baseline_updated);
    }

    #[test]
    fn divergent_session_is_rejected_and_baseline_untouched() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let mut baseline_metrics = HashMap::new();
        baseline_metrics.insert("avg_velocity".to_string(), 100.0);
        baseline_metrics.insert("velocity_variance".to_string(), 5.0);
        baseline_metrics.insert("path_straightness".to_string(), 0.9);
        profiler.force_baseline("u-1", Modality::Mouse, baseline_metrics.clone(), 150);

        // Metrics orthogonal-ish to the baseline direction
        let hostile: Vec<PointerSample> = (0..20)
            .map(|i| PointerSample { x: 0.0, y: i as f64 * 4000.0, elapsed_ms: 1 })
            .collect();
        let session = InteractionSession { pointer: hostile, ..Default::default() };

        let assessment = profiler.analyze_session("u-1", &session);
        if !assessment.authentic {
            assert!(!assessment.baseline_updated);
            assert_eq!(assessment.confidence, Confidence::High);
        }
        // Either way a wildly divergent session must read as suspicious
        assert!(assessment.modalities[0].similarity < 1.0);
    }

    #[test]
    fn scripted_keystroke_timing_is_flagged() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session =
            InteractionSession { keystrokes: scripted_keystrokes(), ..Default::default() };

        let assessment = profiler.analyze_session("u-1", &session);
        assert!(assessment
            .anomalies
            .iter()
            .any(|a| matches!(a, BiometricAnomaly::ScriptedKeystrokeTiming { .. })));
    }

    #[test]
    fn human_keystroke_timing_is_not_flagged() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session = InteractionSession { keystrokes: human_keystrokes(), ..Default::default() };

        let assessment = profiler.analyze_session("u-1", &session);
        assert!(!assessment
            .anomalies
            .iter()
            .any(|a| matches!(a, BiometricAnomaly::ScriptedKeystrokeTiming { .. })));
    }

    #[test]
    fn impossible_pointer_velocity_is_flagged() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        // Every transition covers 100k px in 1 ms
        let pointer: Vec<PointerSample> = (0..10)
            .map(|i| PointerSample { x: i as f64 * 100_000.0, y: 0.0, elapsed_ms: 1 })
            .collect();
        let session = InteractionSession { pointer, ..Default::default() };

        let assessment = profiler.analyze_session("u-1", &session);
        assert!(assessment
            .anomalies
            .iter()
            .any(|a| matches!(a, BiometricAnomaly::ImpossiblePointerVelocity { .. })));
    }

    #[test]
    fn uniqueness_scorer_is_injectable_and_deterministic() {
        let profiler =
            BiometricProfiler::with_scorer(MonitorConfig::default(), Arc::new(FixedScorer(0.42)));
        let session = InteractionSession { pointer: steady_pointer(20), ..Default::default() };

        let first = profiler.analyze_session("u-1", &session);
        let second = profiler.analyze_session("u-1", &session);
        assert_eq!(first.modalities[0].uniqueness, 0.42);
        assert_eq!(second.modalities[0].uniqueness, 0.42);
    }

    #[test]
    fn risk_is_none_while_learning_and_inverse_after() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session = InteractionSession { pointer: steady_pointer(20), ..Default::default() };

        let learning = profiler.analyze_session("u-1", &session);
        assert!(profiler.risk_for(&learning).is_none());

        let metrics = analyze_pointer(&session.pointer);
        profiler.force_baseline("u-1", Modality::Mouse, metrics, 150);
        let mature = profiler.analyze_session("u-1", &session);
        let risk = profiler.risk_for(&mature).unwrap();
        assert!(risk < 0.05);
    }

    #[test]
    fn prune_drops_idle_baselines() {
        let profiler = BiometricProfiler::new(MonitorConfig::default());
        let session = InteractionSession { pointer: steady_pointer(20), ..Default::default() };
        profiler.analyze_session("u-1", &session);
        assert_eq!(profiler.tracked_users(), 1);

        let removed = profiler.prune(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert_eq!(profiler.tracked_users(), 0);
    }
}
