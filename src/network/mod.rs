// Network and device correlation across users. Clusters observations by IP
// address and device fingerprint, checks geolocation consistency against
// physical travel limits, and scores coordinated activity between users
// sharing infrastructure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MonitorConfig;
use crate::lookup::{with_timeout, GeoLookup, IpClassifier};
use crate::models::{GeoLocation, IpClassification, NetworkInfo};
use crate::monitor::calculators::combine;
use crate::monitor::profiles::UserProfileRegistry;

const EARTH_RADIUS_KM: f64 = 6371.0;

///////////////////////////////////////////////////////////////////////////////
// Cluster State
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct Cluster {
    pub members: HashSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub location: Option<GeoLocation>,
    pub risk_score: f64,
}

impl Cluster {
    fn new(now: DateTime<Utc>) -> Self {
        Cluster {
            members: HashSet::new(),
            first_seen: now,
            last_seen: now,
            location: None,
            risk_score: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    Ip,
    DeviceFingerprint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FraudRing {
    pub kind: ClusterKind,
    pub cluster_key: String,
    pub members: Vec<String>,
    pub risk_score: f64,
    pub indicators: Vec<String>,
}

///////////////////////////////////////////////////////////////////////////////
// Analysis Result
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkAnalysis {
    pub fingerprint: String,
    pub is_shared_ip: bool,
    pub shared_ip_users: usize,
    pub shared_device_users: usize,
    pub classification: IpClassification,
    pub location: Option<GeoLocation>,
    pub impossible_travel: bool,
    pub rapid_movement: bool,
    pub coordination_score: f64,
    pub coordinated_users: Vec<String>,
    pub risk_score: f64,
    pub factors: HashMap<String, f64>,
}

pub struct NetworkCorrelationAnalyzer {
    ip_clusters: RwLock<HashMap<String, Cluster>>,
    device_clusters: RwLock<HashMap<String, Cluster>>,
    registry: Arc<UserProfileRegistry>,
    geo_lookup: Arc<dyn GeoLookup>,
    classifier: Arc<dyn IpClassifier>,
    config: MonitorConfig,
}

impl NetworkCorrelationAnalyzer {
    pub fn new(
        registry: Arc<UserProfileRegistry>,
        geo_lookup: Arc<dyn GeoLookup>,
        classifier: Arc<dyn IpClassifier>,
        config: MonitorConfig,
    ) -> Self {
        NetworkCorrelationAnalyzer {
            ip_clusters: RwLock::new(HashMap::new()),
            device_clusters: RwLock::new(HashMap::new()),
            registry,
            geo_lookup,
            classifier,
            config,
        }
    }

    /// Stable device fingerprint: SHA-256 over the canonicalized field tuple.
    /// Field order is fixed and plugin lists are sorted, so identical
    /// observations always hash identically.
    pub fn fingerprint(info: &NetworkInfo) -> String {
        let mut plugins = info.plugins.clone();
        plugins.sort();

        let canonical = format!(
            "ua={}|res={}|tz={}|lang={}|platform={}|plugins={}|cookies={}|dnt={}",
            info.user_agent,
            info.screen_resolution,
            info.timezone,
            info.language,
            info.platform,
            plugins.join(","),
            info.cookies_enabled,
            info.do_not_track,
        );

        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }

    /// Full network analysis for one observation: cluster upkeep, shared-IP
    /// detection, proxy classification, geolocation consistency, and
    /// cross-user coordination scoring.
    pub async fn analyze(&self, user_id: &str, info: &NetworkInfo) -> NetworkAnalysis {
        let now = Utc::now();
        let fingerprint = Self::fingerprint(info);
        let timeout_ms = self.config.lookup_timeout_ms;

        // External collaborators: neutral fallbacks, never block the pipeline
        let location =
            with_timeout(timeout_ms, None, self.geo_lookup.lookup(&info.ip_address)).await;
        let classification = with_timeout(
            timeout_ms,
            IpClassification::default(),
            self.classifier.classify(&info.ip_address),
        )
        .await;

        if classification.any() {
            debug!("proxy indicators for {} via {}: {:?}", user_id, info.ip_address, classification);
        }

        let (impossible_travel, rapid_movement) = self.check_geo_consistency(user_id, &location);

        self.registry
            .record_network(user_id, &info.ip_address, &fingerprint, location.as_ref());

        let shared_ip_users =
            self.upsert_cluster(&self.ip_clusters, &info.ip_address, user_id, &location, now);
        let shared_device_users =
            self.upsert_cluster(&self.device_clusters, &fingerprint, user_id, &location, now);

        let threshold = self.config.suspicious_network_threshold;
        let is_shared_ip = shared_ip_users > threshold;

        let (coordination_score, coordinated_users) =
            self.score_coordination(user_id, &info.ip_address, &fingerprint);

        let ip_risk = cluster_risk(shared_ip_users, threshold);
        let device_risk = cluster_risk(shared_device_users, threshold);
        let proxy_risk = proxy_risk(&classification);
        let geo_risk = if impossible_travel {
            1.0
        } else if rapid_movement {
            0.7
        } else {
            0.0
        };

        let weights = self.config.network_weights;
        let composite = combine(&[
            ("ip".to_string(), ip_risk, weights.ip),
            ("device".to_string(), device_risk, weights.device),
            ("proxy".to_string(), proxy_risk, weights.proxy),
            ("geo".to_string(), geo_risk, weights.geo),
            ("coordination".to_string(), coordination_score, weights.coordination),
        ]);

        // Fold the composite back into the cluster risk accumulators
        self.accumulate_cluster_risk(&self.ip_clusters, &info.ip_address, composite.score);
        self.accumulate_cluster_risk(&self.device_clusters, &fingerprint, composite.score);

        NetworkAnalysis {
            fingerprint,
            is_shared_ip,
            shared_ip_users,
            shared_device_users,
            classification,
            location,
            impossible_travel,
            rapid_movement,
            coordination_score,
            coordinated_users,
            risk_score: composite.score,
            factors: composite.factors,
        }
    }

    fn upsert_cluster(
        &self,
        clusters: &RwLock<HashMap<String, Cluster>>,
        key: &str,
        user_id: &str,
        location: &Option<GeoLocation>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut clusters = clusters.write();
        let cluster = clusters
            .entry(key.to_string())
            .or_insert_with(|| Cluster::new(now));
        cluster.members.insert(user_id.to_string());
        cluster.last_seen = now;
        if cluster.location.is_none() {
            cluster.location = location.clone();
        }
        cluster.members.len()
    }

    fn accumulate_cluster_risk(
        &self,
        clusters: &RwLock<HashMap<String, Cluster>>,
        key: &str,
        score: f64,
    ) {
        let mut clusters = clusters.write();
        if let Some(cluster) = clusters.get_mut(key) {
            // Exponential blend keeps the accumulator in [0,1]
            cluster.risk_score = cluster.risk_score * 0.7 + score * 0.3;
        }
    }

    // Physical-travel checks against the user's recorded location history.
    fn check_geo_consistency(
        &self,
        user_id: &str,
        location: &Option<GeoLocation>,
    ) -> (bool, bool) {
        let Some(current) = location else { return (false, false) };
        let Some(profile) = self.registry.get(user_id) else { return (false, false) };
        let Some((prev_at, prev)) = profile.location_history.back() else {
            return (false, false);
        };

        let distance_km = haversine_km(prev.latitude, prev.longitude, current.latitude, current.longitude);
        let elapsed = Utc::now() - *prev_at;
        let hours = (elapsed.num_milliseconds() as f64 / 3_600_000.0).max(1e-6);
        let speed_kmh = distance_km / hours;

        let impossible = speed_kmh > self.config.impossible_travel_kmh;
        let rapid = distance_km > self.config.max_geo_distance_km
            && elapsed <= Duration::seconds(self.config.coordination_window_secs as i64);

        if impossible {
            debug!(
                "impossible travel for {}: {:.0} km in {:.2} h ({:.0} km/h)",
                user_id, distance_km, hours, speed_kmh
            );
        }

        (impossible, rapid)
    }

    // Coordination across users sharing this IP or fingerprint: cluster
    // co-membership, timing correlation, and behavioral similarity must
    // jointly exceed the configured threshold.
    fn score_coordination(
        &self,
        user_id: &str,
        ip_address: &str,
        fingerprint: &str,
    ) -> (f64, Vec<String>) {
        let mut peers: HashSet<String> = HashSet::new();
        let mut shared_clusters: HashMap<String, usize> = HashMap::new();

        for (clusters, key) in [
            (&self.ip_clusters, ip_address),
            (&self.device_clusters, fingerprint),
        ] {
            let clusters = clusters.read();
            if let Some(cluster) = clusters.get(key) {
                for member in &cluster.members {
                    if member != user_id {
                        peers.insert(member.clone());
                        *shared_clusters.entry(member.clone()).or_insert(0) += 1;
                    }
                }
            }
        }

        if peers.is_empty() {
            return (0.0, Vec::new());
        }

        let Some(profile) = self.registry.get(user_id) else {
            return (0.0, Vec::new());
        };
        let window = Duration::seconds(self.config.coordination_window_secs as i64);

        let mut best = 0.0f64;
        let mut coordinated = Vec::new();

        for peer in peers {
            let Some(peer_profile) = self.registry.get(&peer) else { continue };

            let co_membership = *shared_clusters.get(&peer).unwrap_or(&0) as f64 / 2.0;

            let gap = (profile.last_activity - peer_profile.last_activity)
                .num_seconds()
                .unsigned_abs() as f64;
            let timing = (1.0 - gap / window.num_seconds().max(1) as f64).max(0.0);

            let similarity = behavior_similarity(&profile_vector(&profile), &profile_vector(&peer_profile));

            let joint = 0.4 * co_membership + 0.3 * timing + 0.3 * similarity;
            if joint > self.config.coordination_threshold {
                coordinated.push(peer);
            }
            best = best.max(joint);
        }

        coordinated.sort();
        (best.min(1.0), coordinated)
    }

    /// Periodic batch scan for candidate fraud rings: any cluster with at
    /// least `min_cluster_size` members.
    pub fn detect_fraud_rings(&self) -> Vec<FraudRing> {
        let mut rings = Vec::new();
        let min = self.config.min_cluster_size;

        for (kind, clusters) in [
            (ClusterKind::Ip, &self.ip_clusters),
            (ClusterKind::DeviceFingerprint, &self.device_clusters),
        ] {
            let clusters = clusters.read();
            for (key, cluster) in clusters.iter() {
                if cluster.members.len() < min {
                    continue;
                }

                let mut indicators = vec![format!("shared_members:{}", cluster.members.len())];
                if cluster.risk_score >= 0.5 {
                    indicators.push(format!("elevated_cluster_risk:{:.2}", cluster.risk_score));
                }
                if let Some(location) = &cluster.location {
                    indicators.push(format!("cluster_location:{}", location.country));
                }

                let mut members: Vec<String> = cluster.members.iter().cloned().collect();
                members.sort();

                rings.push(FraudRing {
                    kind,
                    cluster_key: key.clone(),
                    members,
                    risk_score: cluster.risk_score,
                    indicators,
                });
            }
        }

        rings
    }

    pub fn cluster_counts(&self) -> (usize, usize) {
        (self.ip_clusters.read().len(), self.device_clusters.read().len())
    }

    /// Remove clusters idle since the cutoff. Sweeper only.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for clusters in [&self.ip_clusters, &self.device_clusters] {
            let mut clusters = clusters.write();
            let before = clusters.len();
            clusters.retain(|_, cluster| cluster.last_seen >= cutoff);
            removed += before - clusters.len();
        }
        removed
    }
}

///////////////////////////////////////////////////////////////////////////////
// Scoring Helpers
///////////////////////////////////////////////////////////////////////////////

fn cluster_risk(members: usize, threshold: usize) -> f64 {
    if threshold == 0 {
        return 1.0;
    }
    if members > threshold {
        let excess = (members - threshold) as f64 / threshold as f64;
        (0.7 + 0.3 * excess.min(1.0)).min(1.0)
    } else {
        0.5 * members as f64 / threshold as f64
    }
}

fn proxy_risk(classification: &IpClassification) -> f64 {
    let mut risk = 0.0f64;
    if classification.is_tor {
        risk = risk.max(1.0);
    }
    if classification.is_proxy {
        risk = risk.max(0.8);
    }
    if classification.is_vpn {
        risk = risk.max(0.6);
    }
    if classification.is_datacenter {
        risk = risk.max(0.4);
    }
    risk
}

fn profile_vector(profile: &crate::monitor::profiles::UserProfile) -> Vec<f64> {
    vec![
        profile.metrics.betting_velocity as f64,
        profile.metrics.location_changes as f64,
        profile.metrics.device_switches as f64,
        profile.metrics.suspicious_actions.len() as f64,
    ]
}

// Cosine similarity over equal-length metric vectors; zero vectors compare
// as dissimilar.
fn behavior_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
