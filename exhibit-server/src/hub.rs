//! Hub wiring
//!
//! Builds every component from a `HubConfig`, spawns the long-running loops
//! and serves the client endpoint. All loops observe one watch channel.

use crate::backlog::{BacklogStore, MemoryBacklog, ProfileSource, RestBacklog, StaticProfile};
use crate::broadcaster::Broadcaster;
use crate::commands::CommandDispatcher;
use crate::drain::{DrainSettings, DrainWorker};
use crate::registry::ConnectionRegistry;
use crate::websocket::{create_router, HubState};
use exhibit_bus::{BusGateway, CommandPublisher, InboundDispatcher};
use exhibit_core::{HubConfig, Result, RobotProfile, TelemetryCache};
use exhibit_voice::{GeminiProvider, VoiceRouter, VoiceSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running hub
pub struct HubHandle {
    local_addr: SocketAddr,
    state: Arc<HubState>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl HubHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<HubState> {
        self.state.clone()
    }

    /// Signal every loop and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, task) in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} task ended abnormally: {}", name, e),
                Err(_) => warn!("{} task did not stop in time", name),
            }
        }
        info!("Hub stopped");
    }
}

/// Backlog store and profile source chosen from configuration
fn backlog_sources(config: &HubConfig) -> (Arc<dyn BacklogStore>, Arc<dyn ProfileSource>) {
    match RestBacklog::from_config(&config.backlog) {
        Some(rest) => {
            info!("Using REST backlog at {:?}", config.backlog.supabase_url);
            let rest = Arc::new(rest);
            (rest.clone(), rest)
        }
        None => {
            info!("No REST backlog configured, using in-memory backlog");
            let profile = config
                .backlog
                .static_profile
                .clone()
                .unwrap_or_else(RobotProfile::default);
            (
                Arc::new(MemoryBacklog::new()),
                Arc::new(StaticProfile::new(Some(profile))),
            )
        }
    }
}

/// Start every hub component and begin accepting clients
pub async fn start(config: HubConfig) -> Result<HubHandle> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let telemetry = Arc::new(TelemetryCache::new());
    let registry = Arc::new(ConnectionRegistry::new(config.network.max_connections));
    let (events_tx, events_rx) = mpsc::channel(config.broadcast.event_capacity);

    // Bus
    let (inbound_tx, inbound_rx) = mpsc::channel(config.bus.inbound_capacity);
    let (gateway, bus_task) = BusGateway::start(&config.bus, inbound_tx, shutdown_rx.clone());
    tasks.push(("bus", bus_task));
    let publisher: Arc<dyn CommandPublisher> = Arc::new(gateway);

    let dispatcher = InboundDispatcher::new(telemetry.clone(), events_tx.clone());
    tasks.push((
        "inbound",
        tokio::spawn(dispatcher.run(inbound_rx, shutdown_rx.clone())),
    ));

    // Fan-out
    let broadcaster = Broadcaster::new(registry.clone(), telemetry.clone());
    tasks.push((
        "telemetry",
        tokio::spawn(
            broadcaster
                .clone()
                .run_telemetry_loop(config.broadcast.telemetry_interval(), shutdown_rx.clone()),
        ),
    ));
    tasks.push((
        "events",
        tokio::spawn(broadcaster.run_event_pump(events_rx, shutdown_rx.clone())),
    ));

    // Backlog drain
    if config.drain.enabled {
        let (store, profiles) = backlog_sources(&config);
        let worker = DrainWorker::new(
            store,
            profiles,
            publisher.clone(),
            DrainSettings::from_config(&config.drain, &config.robots.default_target),
        );
        tasks.push(("drain", tokio::spawn(worker.run(shutdown_rx.clone()))));
    } else {
        info!("Backlog drain disabled");
    }

    // Voice
    let provider = GeminiProvider::new(&config.voice);
    if provider.key_count() == 0 {
        warn!("No Gemini API key configured, voice requests will get the fallback reply");
    }
    let voice = Arc::new(VoiceRouter::new(
        Arc::new(provider),
        publisher.clone(),
        events_tx.clone(),
        VoiceSettings::from_config(&config.voice, &config.robots),
    ));

    let state = Arc::new(HubState {
        registry,
        dispatcher: Arc::new(CommandDispatcher::new(
            publisher.clone(),
            voice,
            events_tx,
            config.robots.clone(),
        )),
        telemetry,
        publisher,
        outbound_capacity: config.network.outbound_capacity,
    });

    // Client endpoint
    let addr = format!("{}:{}", config.network.bind_address, config.network.ws_port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    let app = create_router(state.clone());
    let mut server_shutdown = shutdown_rx;
    tasks.push((
        "server",
        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await;
            if let Err(e) = served {
                warn!("Client endpoint stopped with error: {}", e);
            }
        }),
    ));
    info!("Client endpoint listening on {}", local_addr);

    Ok(HubHandle {
        local_addr,
        state,
        shutdown: shutdown_tx,
        tasks,
    })
}
