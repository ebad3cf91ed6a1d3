//! Backlog drain worker
//!
//! Each cycle:
//! 1. republish the robot profile when the resync interval elapsed or the
//!    broker link was re-established
//! 2. fetch pending entries for the robot, oldest first
//! 3. above the high-water mark, skip all but the newest `retain` entries
//! 4. translate and publish the rest in order, marking each completed
//!
//! A publish failure ends the cycle and leaves the remaining entries pending.
//! An entry that was published but could not be marked completed is never
//! published again; later cycles only retry the mark. Other store failures
//! end the cycle and the worker backs off.

use crate::backlog::{BacklogStore, ProfileSource};
use crate::error::BacklogError;
use exhibit_bus::CommandPublisher;
use exhibit_core::{
    render, BacklogEntry, BacklogId, BacklogStatus, CommandEnvelope, DrainConfig, RobotPayload,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Split of one fetch into entries to skip and entries to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct ShedPlan {
    pub skip: Vec<BacklogEntry>,
    pub keep: Vec<BacklogEntry>,
}

/// Keep the newest `retain` entries once more than `high_water` are pending
///
/// `pending` must be in creation order; both halves keep that order.
pub fn plan_shedding(mut pending: Vec<BacklogEntry>, high_water: usize, retain: usize) -> ShedPlan {
    if pending.len() <= high_water {
        return ShedPlan {
            skip: Vec::new(),
            keep: pending,
        };
    }
    let keep = pending.split_off(pending.len() - retain.min(pending.len()));
    ShedPlan { skip: pending, keep }
}

#[derive(Debug, Clone)]
pub struct DrainSettings {
    pub target: String,
    pub poll_interval: Duration,
    pub resync_interval: Duration,
    pub high_water: usize,
    pub retain: usize,
    pub error_backoff: Duration,
}

impl DrainSettings {
    pub fn from_config(config: &DrainConfig, target: &str) -> Self {
        Self {
            target: target.to_string(),
            poll_interval: config.poll_interval(),
            resync_interval: config.resync_interval(),
            high_water: config.high_water,
            retain: config.retain,
            error_backoff: config.error_backoff(),
        }
    }
}

/// What a single cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub config_published: bool,
    pub skipped: usize,
    pub completed: usize,
    /// Entries left pending because they could not be translated
    pub untranslatable: usize,
    /// Entries delivered to the robot whose completion could not be recorded
    pub unconfirmed: usize,
    /// The cycle stopped early on a publish failure
    pub publish_failed: bool,
}

pub struct DrainWorker {
    store: Arc<dyn BacklogStore>,
    profiles: Arc<dyn ProfileSource>,
    publisher: Arc<dyn CommandPublisher>,
    settings: DrainSettings,
    /// Time and link epoch of the last profile publish
    last_sync: Option<(Instant, u64)>,
    /// Untranslatable entries already reported
    reported: HashSet<BacklogId>,
    /// Published entries still waiting for their completion mark
    delivered: HashSet<BacklogId>,
}

impl DrainWorker {
    pub fn new(
        store: Arc<dyn BacklogStore>,
        profiles: Arc<dyn ProfileSource>,
        publisher: Arc<dyn CommandPublisher>,
        settings: DrainSettings,
    ) -> Self {
        Self {
            store,
            profiles,
            publisher,
            settings,
            last_sync: None,
            reported: HashSet::new(),
            delivered: HashSet::new(),
        }
    }

    fn sync_due(&self, epoch: u64) -> bool {
        match self.last_sync {
            None => true,
            Some((at, synced_epoch)) => {
                synced_epoch != epoch || at.elapsed() >= self.settings.resync_interval
            }
        }
    }

    /// Publish the active profile if due; failures are retried next cycle
    async fn sync_config(&mut self) -> bool {
        let epoch = self.publisher.epoch();
        if !self.sync_due(epoch) || !self.publisher.is_connected() {
            return false;
        }

        let profile = match self.profiles.active_profile().await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Failed to load robot profile: {}", e);
                return false;
            }
        };

        let Some(profile) = profile else {
            debug!("No active robot profile");
            self.last_sync = Some((Instant::now(), epoch));
            return false;
        };

        match self.publisher.publish_config(&profile.config_payload()).await {
            Ok(()) => {
                info!("Synced robot profile '{}'", profile.name);
                self.last_sync = Some((Instant::now(), epoch));
                true
            }
            Err(e) => {
                warn!("Failed to publish robot profile: {}", e);
                false
            }
        }
    }

    /// Run one drain cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport, BacklogError> {
        let mut report = CycleReport {
            config_published: self.sync_config().await,
            ..CycleReport::default()
        };

        let pending = self.store.fetch_pending(&self.settings.target).await?;
        self.forget_settled(&pending);
        if pending.is_empty() {
            return Ok(report);
        }

        let plan = plan_shedding(pending, self.settings.high_water, self.settings.retain);
        if !plan.skip.is_empty() {
            info!(
                "Backlog over {} entries, skipping {} stale commands",
                self.settings.high_water,
                plan.skip.len()
            );
        }
        for entry in &plan.skip {
            // Already on the robot; record it as such rather than skipped.
            let status = if self.delivered.contains(&entry.id) {
                BacklogStatus::Completed
            } else {
                BacklogStatus::Skipped
            };
            self.store.mark(&entry.id, status).await?;
            self.reported.remove(&entry.id);
            self.delivered.remove(&entry.id);
            report.skipped += 1;
        }

        for entry in &plan.keep {
            if !self.delivered.contains(&entry.id) {
                let envelope = CommandEnvelope::from_backlog(entry);
                let payload = match render(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        if self.reported.insert(entry.id.clone()) {
                            warn!("Backlog entry {} cannot be translated: {}", entry.id, e);
                        }
                        report.untranslatable += 1;
                        continue;
                    }
                };

                let published = match &payload {
                    RobotPayload::Wire(wire) => {
                        self.publisher.publish_command(&envelope.target, wire).await
                    }
                    RobotPayload::Action(action) => {
                        self.publisher.publish_action(&envelope.target, action).await
                    }
                };
                if let Err(e) = published {
                    warn!("Publish of backlog entry {} failed, retrying later: {}", entry.id, e);
                    report.publish_failed = true;
                    break;
                }
                self.delivered.insert(entry.id.clone());
            }

            match self.store.mark(&entry.id, BacklogStatus::Completed).await {
                Ok(()) => {
                    self.delivered.remove(&entry.id);
                    report.completed += 1;
                }
                Err(e) => {
                    warn!(
                        "Backlog entry {} was delivered but not marked completed: {}",
                        entry.id, e
                    );
                    report.unconfirmed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Drop bookkeeping for entries that are no longer pending
    fn forget_settled(&mut self, pending: &[BacklogEntry]) {
        let live: HashSet<&BacklogId> = pending.iter().map(|e| &e.id).collect();
        self.reported.retain(|id| live.contains(id));
        self.delivered.retain(|id| live.contains(id));
    }

    /// Poll until shutdown; an in-flight cycle always finishes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Backlog drain active for {}", self.settings.target);
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.run_cycle().await {
                Ok(_) => self.settings.poll_interval,
                Err(e) => {
                    warn!("Backlog store error: {}", e);
                    self.settings.error_backoff
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Backlog drain stopped");
    }
}
