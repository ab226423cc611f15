// Re-export modules
pub mod biometrics;
pub mod config;
pub mod error;
pub mod lookup;
pub mod models;
pub mod monitor;
pub mod network;
pub mod utils;

pub use config::{load_config, MonitorConfig};
pub use error::MonitorError;
pub use monitor::FraudMonitor;
