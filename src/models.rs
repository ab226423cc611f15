// Betting Fraud Monitor: Core Data Model
// Shared types for the event pipeline, risk scoring, and alerting

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

///////////////////////////////////////////////////////////////////////////////
// Activity Events
///////////////////////////////////////////////////////////////////////////////

// A single user-activity event ingested by the monitor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub user_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

// Event payloads vary by type; one variant per event type, decoded once at
// the ingest boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    BetPlaced {
        amount: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        market: Option<String>,
    },
    Login {
        #[serde(default)]
        login_attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_address: Option<String>,
    },
    LocationChange {
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
    },
    DeviceSwitch {
        device_id: String,
    },
    MouseMove {
        x: f64,
        y: f64,
        // Milliseconds since the previous pointer sample in the session
        elapsed_ms: u64,
    },
    Keystroke {
        key_down_ms: u64,
        key_up_ms: u64,
    },
    Touch {
        x: f64,
        y: f64,
        pressure: f64,
    },
    Scroll {
        delta_y: f64,
        speed: f64,
    },
}

impl EventKind {
    // Stable name used for metrics and factor labels
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::BetPlaced { .. } => "bet_placed",
            EventKind::Login { .. } => "login",
            EventKind::LocationChange { .. } => "location_change",
            EventKind::DeviceSwitch { .. } => "device_switch",
            EventKind::MouseMove { .. } => "mouse_move",
            EventKind::Keystroke { .. } => "keystroke",
            EventKind::Touch { .. } => "touch",
            EventKind::Scroll { .. } => "scroll",
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Risk Scores and Alerts
///////////////////////////////////////////////////////////////////////////////

// Live per-user risk entry, overwritten on every evaluation. Historical
// scores live in UserProfile::risk_history instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskScoreEntry {
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub factors: HashMap<String, f64>,
    pub insufficient_data: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    // Band boundaries are inclusive on the lower bound
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Severity::Critical
        } else if score >= 0.7 {
            Severity::High
        } else if score >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub risk_score: f64,
    pub severity: Severity,
    pub triggering_event: Event,
    pub profile_snapshot: ProfileSnapshot,
    pub recommendations: Vec<String>,
}

// Frozen view of the user profile attached to an alert
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub event_count: u64,
    pub betting_velocity: u32,
    pub location_changes: u32,
    pub device_switches: u32,
    pub suspicious_action_count: usize,
}

///////////////////////////////////////////////////////////////////////////////
// Network Observations
///////////////////////////////////////////////////////////////////////////////

// Raw network/device observation supplied alongside the event feed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: String,
    pub user_agent: String,
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
    pub platform: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub cookies_enabled: bool,
    #[serde(default)]
    pub do_not_track: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
}

// Result of the proxy/VPN/Tor/datacenter lookup; all-false when the lookup
// times out or is unavailable ("unknown" contributes zero risk).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct IpClassification {
    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_tor: bool,
    pub is_datacenter: bool,
}

impl IpClassification {
    pub fn any(&self) -> bool {
        self.is_proxy || self.is_vpn || self.is_tor || self.is_datacenter
    }
}

///////////////////////////////////////////////////////////////////////////////
// Monitoring Statistics
///////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub active_user_count: usize,
    pub events_processed: u64,
    pub events_rejected: u64,
    pub events_dropped: u64,
    pub alerts_sent: u64,
    pub average_risk: f64,
    pub high_risk_users: Vec<String>,
    pub health: HealthStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Running,
    Stopped,
}
