//! exhibit-bus: MQTT link between the hub and the robots
//!
//! Provides:
//! - A broker gateway with reconnect, re-subscription and link epochs
//! - The `CommandPublisher` seam used by every command producer
//! - Inbound telemetry and station status dispatch

pub mod error;
pub mod gateway;
pub mod inbound;
pub mod publisher;
pub mod topics;

pub use error::BusError;
pub use gateway::{BusGateway, LinkState};
pub use inbound::{Dispatched, InboundDispatcher, InboundMessage};
pub use publisher::{CommandPublisher, PublishedMessage, RecordingPublisher};
