//! exhibit-server: client-facing side of the exhibit hub
//!
//! Provides:
//! - Connection registry and non-blocking fan-out broadcaster
//! - WebSocket endpoint and client command dispatch
//! - Backlog stores and the backlog drain worker
//! - Hub wiring used by the `exhibit-hub` binary

pub mod backlog;
pub mod broadcaster;
pub mod commands;
pub mod drain;
pub mod error;
pub mod hub;
pub mod registry;
pub mod websocket;

pub use backlog::{BacklogStore, MemoryBacklog, ProfileSource, RestBacklog, StaticProfile};
pub use broadcaster::{BroadcastReport, Broadcaster};
pub use commands::{ClientMessage, CommandDispatcher, Handled};
pub use drain::{plan_shedding, CycleReport, DrainSettings, DrainWorker, ShedPlan};
pub use error::{BacklogError, HubError};
pub use hub::{start, HubHandle};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundFrame};
pub use websocket::{create_router, HubState};
