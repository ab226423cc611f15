use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// Weights applied to the per-event risk calculators before normalization
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CalculatorWeights {
    pub velocity: f64,
    pub pattern: f64,
    pub location: f64,
    pub device: f64,
    pub behavior: f64,
}

impl Default for CalculatorWeights {
    fn default() -> Self {
        CalculatorWeights {
            velocity: 0.25,
            pattern: 0.30,
            location: 0.20,
            device: 0.15,
            behavior: 0.10,
        }
    }
}

// Weights for the network-analysis categories
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub ip: f64,
    pub device: f64,
    pub proxy: f64,
    pub geo: f64,
    pub coordination: f64,
}

impl Default for NetworkWeights {
    fn default() -> Self {
        NetworkWeights {
            ip: 0.25,
            device: 0.20,
            proxy: 0.20,
            geo: 0.15,
            coordination: 0.20,
        }
    }
}

// Top-level category weights for the per-user composite. A category with
// weight zero is inactive: it contributes nothing and is excluded from the
// normalization denominator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub behavioral: f64,
    pub network: f64,
    pub biometric: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        CategoryWeights {
            behavioral: 0.5,
            network: 0.3,
            biometric: 0.2,
        }
    }
}

// Weights for the biometric modalities
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BiometricWeights {
    pub mouse: f64,
    pub keystroke: f64,
    pub touch: f64,
    pub scroll: f64,
}

impl Default for BiometricWeights {
    fn default() -> Self {
        BiometricWeights {
            mouse: 0.30,
            keystroke: 0.35,
            touch: 0.25,
            scroll: 0.10,
        }
    }
}

/// Monitor configuration. Defaults match the production tuning; every value
/// can be overridden from a `KEY=value` config file or environment variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    // Windowing
    pub monitoring_window_secs: u64,
    pub velocity_window_secs: u64,
    pub max_event_buffer: usize,

    // Per-event calculator tuning
    pub max_normal_velocity: u32,
    pub high_value_bet_threshold: f64,
    pub rapid_location_secs: u64,
    pub max_login_attempts: u32,
    pub calculator_weights: CalculatorWeights,
    pub category_weights: CategoryWeights,

    // Alerting
    pub alert_threshold: f64,
    pub alert_on_aggregate: bool,
    pub sink_max_attempts: u32,
    pub sink_timeout_ms: u64,

    // Network correlation
    pub suspicious_network_threshold: usize,
    pub min_cluster_size: usize,
    pub coordination_threshold: f64,
    pub coordination_window_secs: u64,
    pub max_geo_distance_km: f64,
    pub impossible_travel_kmh: f64,
    pub lookup_timeout_ms: u64,
    pub network_weights: NetworkWeights,

    // Behavioral biometrics
    pub similarity_threshold: f64,
    pub min_biometric_samples: usize,
    pub max_pointer_velocity: f64,
    pub keystroke_consistency_ceiling: f64,
    pub biometric_weights: BiometricWeights,

    // Retention
    pub fast_sweep_secs: u64,
    pub slow_sweep_secs: u64,
    pub suspicious_action_hours: i64,
    pub risk_history_hours: i64,
    pub history_cap: usize,

    // Anything else picked up from the environment
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            monitoring_window_secs: 300,
            velocity_window_secs: 60,
            max_event_buffer: 10_000,
            max_normal_velocity: 10,
            high_value_bet_threshold: 1_000.0,
            rapid_location_secs: 300,
            max_login_attempts: 3,
            calculator_weights: CalculatorWeights::default(),
            category_weights: CategoryWeights::default(),
            alert_threshold: 0.7,
            alert_on_aggregate: false,
            sink_max_attempts: 3,
            sink_timeout_ms: 2_000,
            suspicious_network_threshold: 5,
            min_cluster_size: 3,
            coordination_threshold: 0.7,
            coordination_window_secs: 300,
            max_geo_distance_km: 1_000.0,
            impossible_travel_kmh: 1_000.0,
            lookup_timeout_ms: 500,
            network_weights: NetworkWeights::default(),
            similarity_threshold: 0.85,
            min_biometric_samples: 100,
            max_pointer_velocity: 25_000.0,
            keystroke_consistency_ceiling: 0.9,
            biometric_weights: BiometricWeights::default(),
            fast_sweep_secs: 30,
            slow_sweep_secs: 300,
            suspicious_action_hours: 24,
            risk_history_hours: 24,
            history_cap: 20,
            extra: HashMap::new(),
        }
    }
}

/// Load configuration: defaults, then optional config file, then environment.
pub fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::default();

    if let Some(path) = path {
        load_from_file(&mut config, path)?;
    }

    load_from_env(&mut config);

    Ok(config)
}

fn load_from_env(config: &mut MonitorConfig) {
    if let Ok(secs) = env::var("MONITORING_WINDOW_SECS") {
        if let Ok(secs) = secs.parse() {
            config.monitoring_window_secs = secs;
        }
    }

    if let Ok(threshold) = env::var("ALERT_THRESHOLD") {
        if let Ok(threshold) = threshold.parse() {
            config.alert_threshold = threshold;
        }
    }

    if let Ok(flag) = env::var("ALERT_ON_AGGREGATE") {
        config.alert_on_aggregate = flag == "1" || flag.eq_ignore_ascii_case("true");
    }

    if let Ok(value) = env::var("HIGH_VALUE_BET_THRESHOLD") {
        if let Ok(value) = value.parse() {
            config.high_value_bet_threshold = value;
        }
    }

    if let Ok(value) = env::var("MAX_EVENT_BUFFER") {
        if let Ok(value) = value.parse() {
            config.max_event_buffer = value;
        }
    }

    if let Ok(value) = env::var("MIN_CLUSTER_SIZE") {
        if let Ok(value) = value.parse() {
            config.min_cluster_size = value;
        }
    }

    if let Ok(value) = env::var("SUSPICIOUS_NETWORK_THRESHOLD") {
        if let Ok(value) = value.parse() {
            config.suspicious_network_threshold = value;
        }
    }

    if let Ok(value) = env::var("SIMILARITY_THRESHOLD") {
        if let Ok(value) = value.parse() {
            config.similarity_threshold = value;
        }
    }

    for (key, value) in env::vars() {
        if let Some(config_key) = key.strip_prefix("MONITOR_") {
            config.extra.insert(config_key.to_string(), value);
        }
    }
}

/// Parse a `KEY=value` configuration file, skipping comments and blanks.
fn load_from_file(config: &mut MonitorConfig, path: &Path) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open configuration file {}", path.display()))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.context("Failed to read line from configuration file")?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(index) = line.find('=') else { continue };
        let key = line[..index].trim();
        let value = line[index + 1..].trim();

        match key {
            "MONITORING_WINDOW_SECS" => set_parsed(value, &mut config.monitoring_window_secs),
            "VELOCITY_WINDOW_SECS" => set_parsed(value, &mut config.velocity_window_secs),
            "MAX_EVENT_BUFFER" => set_parsed(value, &mut config.max_event_buffer),
            "MAX_NORMAL_VELOCITY" => set_parsed(value, &mut config.max_normal_velocity),
            "HIGH_VALUE_BET_THRESHOLD" => set_parsed(value, &mut config.high_value_bet_threshold),
            "RAPID_LOCATION_SECS" => set_parsed(value, &mut config.rapid_location_secs),
            "MAX_LOGIN_ATTEMPTS" => set_parsed(value, &mut config.max_login_attempts),
            "ALERT_THRESHOLD" => set_parsed(value, &mut config.alert_threshold),
            "ALERT_ON_AGGREGATE" => {
                config.alert_on_aggregate = value == "1" || value.eq_ignore_ascii_case("true");
            }
            "SINK_MAX_ATTEMPTS" => set_parsed(value, &mut config.sink_max_attempts),
            "SINK_TIMEOUT_MS" => set_parsed(value, &mut config.sink_timeout_ms),
            "SUSPICIOUS_NETWORK_THRESHOLD" => {
                set_parsed(value, &mut config.suspicious_network_threshold)
            }
            "MIN_CLUSTER_SIZE" => set_parsed(value, &mut config.min_cluster_size),
            "COORDINATION_THRESHOLD" => set_parsed(value, &mut config.coordination_threshold),
            "COORDINATION_WINDOW_SECS" => set_parsed(value, &mut config.coordination_window_secs),
            "MAX_GEO_DISTANCE_KM" => set_parsed(value, &mut config.max_geo_distance_km),
            "IMPOSSIBLE_TRAVEL_KMH" => set_parsed(value, &mut config.impossible_travel_kmh),
            "LOOKUP_TIMEOUT_MS" => set_parsed(value, &mut config.lookup_timeout_ms),
            "CATEGORY_WEIGHT_BEHAVIORAL" => {
                set_parsed(value, &mut config.category_weights.behavioral)
            }
            "CATEGORY_WEIGHT_NETWORK" => set_parsed(value, &mut config.category_weights.network),
            "CATEGORY_WEIGHT_BIOMETRIC" => set_parsed(value, &mut config.category_weights.biometric),
            "SIMILARITY_THRESHOLD" => set_parsed(value, &mut config.similarity_threshold),
            "MIN_BIOMETRIC_SAMPLES" => set_parsed(value, &mut config.min_biometric_samples),
            "FAST_SWEEP_SECS" => set_parsed(value, &mut config.fast_sweep_secs),
            "SLOW_SWEEP_SECS" => set_parsed(value, &mut config.slow_sweep_secs),
            "HISTORY_CAP" => set_parsed(value, &mut config.history_cap),
            _ => {
                config.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(())
}

fn set_parsed<T: std::str::FromStr>(value: &str, target: &mut T) {
    if let Ok(parsed) = value.parse() {
        *target = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_production_tuning() {
        let config = MonitorConfig::default();
        assert_eq!(config.monitoring_window_secs, 300);
        assert_eq!(config.alert_threshold, 0.7);
        assert_eq!(config.suspicious_network_threshold, 5);
        assert_eq!(config.min_cluster_size, 3);
        assert_eq!(config.similarity_threshold, 0.85);
        assert!(!config.alert_on_aggregate);
    }

    #[test]
    fn file_overrides_defaults_and_keeps_unknown_keys() {
        let dir = std::env::temp_dir();
        let path = dir.join("fraud_monitor_config_test.conf");
        {
            let mut file = File::create(&path).unwrap();
            writeln!(file, "# tuning").unwrap();
            writeln!(file, "ALERT_THRESHOLD=0.6").unwrap();
            writeln!(file, "MIN_CLUSTER_SIZE=5").unwrap();
            writeln!(file, "REGION=eu-west").unwrap();
        }

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.alert_threshold, 0.6);
        assert_eq!(config.min_cluster_size, 5);
        assert_eq!(config.extra.get("REGION").map(String::as_str), Some("eu-west"));

        let _ = std::fs::remove_file(&path);
    }
}
