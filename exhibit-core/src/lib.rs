//! exhibit-core: shared model for the exhibit control hub
//!
//! Provides:
//! - Command, backlog and profile types exchanged between hub components
//! - The robot wire grammar translator
//! - The telemetry cache written by the bus and read by the broadcaster
//! - The client event protocol pushed to interactive clients
//! - Layered hub configuration

pub mod config;
pub mod error;
pub mod events;
pub mod telemetry;
pub mod translator;
pub mod types;

pub use config::{
    BacklogConfig, BroadcastConfig, BusConfig, DrainConfig, HubConfig, LoggingConfig,
    NetworkConfig, RobotsConfig, VoiceConfig,
};
pub use error::{Error, Result, TranslationError};
pub use events::ClientEvent;
pub use telemetry::{Position, TelemetryCache, TelemetrySnapshot, TelemetryUpdate};
pub use translator::{render, translate, RobotPayload, STATION_ACTION};
pub use types::{
    BacklogEntry, BacklogId, BacklogStatus, CommandEnvelope, CommandKind, CommandOrigin,
    Language, MoveDirection, RobotProfile, StationEvent,
};
