// External collaborator capabilities. The monitor never talks to the outside
// world directly: geolocation, proxy classification, and alert delivery are
// injected behind these traits so tests can supply isolated fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use parking_lot::RwLock;

use crate::error::MonitorError;
use crate::models::{Alert, GeoLocation, IpClassification};

///////////////////////////////////////////////////////////////////////////////
// Lookup Capabilities
///////////////////////////////////////////////////////////////////////////////

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip_address: &str) -> Option<GeoLocation>;
}

#[async_trait]
pub trait IpClassifier: Send + Sync {
    async fn classify(&self, ip_address: &str) -> IpClassification;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<(), String>;
}

/// Wrap a lookup call with a timeout; on expiry the neutral fallback is used
/// so a slow collaborator can never stall the ingestion pipeline.
pub async fn with_timeout<T, F>(timeout_ms: u64, fallback: T, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(value) => value,
        Err(_) => {
            warn!("{}, using fallback", MonitorError::LookupTimeout(timeout_ms));
            fallback
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Default Implementations
///////////////////////////////////////////////////////////////////////////////

/// Geolocation source backed by a static table. Useful as a neutral default
/// (empty table resolves nothing) and for seeding known addresses in tests
/// or replay runs.
#[derive(Default)]
pub struct StaticGeoLookup {
    table: RwLock<HashMap<String, GeoLocation>>,
}

impl StaticGeoLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip_address: impl Into<String>, location: GeoLocation) {
        self.table.write().insert(ip_address.into(), location);
    }
}

#[async_trait]
impl GeoLookup for StaticGeoLookup {
    async fn lookup(&self, ip_address: &str) -> Option<GeoLocation> {
        self.table.read().get(ip_address).cloned()
    }
}

/// Classifier that treats every address as unknown. Unknown contributes zero
/// proxy risk.
pub struct NullIpClassifier;

#[async_trait]
impl IpClassifier for NullIpClassifier {
    async fn classify(&self, _ip_address: &str) -> IpClassification {
        IpClassification::default()
    }
}

/// Sink that writes alerts to the application log. The default for CLI runs
/// where no webhook is configured.
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), String> {
        log::info!(
            "ALERT {} user={} score={:.3} severity={:?}",
            alert.alert_id,
            alert.user_id,
            alert.risk_score,
            alert.severity
        );
        Ok(())
    }
}

/// Convenience bundle for wiring the monitor with neutral collaborators.
pub fn neutral_collaborators() -> (Arc<dyn GeoLookup>, Arc<dyn IpClassifier>, Arc<dyn AlertSink>) {
    (
        Arc::new(StaticGeoLookup::new()),
        Arc::new(NullIpClassifier),
        Arc::new(LoggingAlertSink),
    )
}
