//! Locates UI elements in a live accessibility tree fast enough to stand in
//! for pixel-based recognition.
//!
//! The entry point is [`DetectionEngine`]: give it a [`TreeProvider`] and a
//! [`DetectionConfig`] and ask it for a role/label pair.

pub mod background;
pub mod cache;
pub mod config;
pub mod detection;
pub mod error;
pub mod fuzzy;
pub mod monitor;
pub mod provider;
pub mod recovery;
pub mod reporting;
pub mod roles;
pub mod utils;

pub use config::{ConfigStore, ConfigWarning, DetectionConfig};
pub use detection::{DetectionEngine, FindRequest, MatchResult, RaceOutcome, SearchStage};
pub use error::{DetectionError, FailureKind, ProviderError};
pub use provider::{
    AppIdentity, BoundingBox, MemoryTreeProvider, NodeSpec, TreeProvider, TreeSnapshot,
};
pub use reporting::{DiagnosticReport, HealthStatus, ReportingSystem};

/// Initialises `env_logger` (reads `RUST_LOG`, defaults to Info). Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
