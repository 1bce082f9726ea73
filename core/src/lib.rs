pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod rca;
pub mod store;
pub mod telemetry;
pub mod trace;

pub use analyzer::{Anomaly, AnomalyAnalyzer, Severity};
pub use config::Config;
pub use engine::AiopsEngine;
pub use error::ServiceError;
pub use rca::{Incident, IncidentStatus, RcaEngine, RootCause};
pub use store::{create_store, EndpointStats, TelemetryStore};
pub use telemetry::TelemetryRecord;
