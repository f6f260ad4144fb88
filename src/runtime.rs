//! # Runtime
//!
//! Drives a shared [`World`] from a single tick task.
//!
//! - [`Runtime::tick_loop`] applies one tick per clock interval.
//! - [`Runtime::sync_loop`] applies proposals received from a sequencer,
//!   filling gaps in the height sequence with empty ticks.
//!
//! [`Runtime::run`] picks between them from
//! [`WorldConfig::rollup_enabled`](crate::config::WorldConfig::rollup_enabled).
//!
//! Both loops return cleanly once the shutdown channel flips to `true` or its
//! sender is dropped. A tick in flight always finishes first, so shutdown
//! never leaves a partially applied tick behind.
//!
//! Committed ticks are published to tick subscribers and, when telemetry is
//! attached, recorded by the [`Collector`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::telemetry::collector::{Collector, Subscribers};
use crate::world::error::{WorldError, WorldResult};
use crate::world::tick::{Proposal, Tick};
use crate::world::World;

/// Single-writer tick driver.
pub struct Runtime {
    world: Arc<World>,
    collector: Option<Collector>,
    tick_subscribers: Vec<mpsc::Sender<Arc<Tick>>>,
}

impl Runtime {
    /// Creates a runtime without telemetry.
    pub fn new(world: Arc<World>) -> Self {
        Self { world, collector: None, tick_subscribers: Vec::new() }
    }

    /// Attaches a collector batching one second of ticks.
    pub fn with_telemetry(mut self) -> Self {
        self.collector = Some(Collector::new(self.world.config().telemetry_batch_size()));
        self
    }

    /// The driven world.
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// The attached collector.
    pub fn collector(&self) -> Option<&Collector> {
        self.collector.as_ref()
    }

    /// Subscription handle of the attached collector.
    pub fn telemetry(&self) -> Option<Subscribers> {
        self.collector.as_ref().map(Collector::subscribers)
    }

    /// Receives every committed tick. A subscriber that falls `capacity` ticks
    /// behind misses ticks instead of stalling the loop.
    pub fn subscribe_ticks(&mut self, capacity: usize) -> mpsc::Receiver<Arc<Tick>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.tick_subscribers.push(tx);
        rx
    }

    fn publish(&mut self, tick: &Arc<Tick>) {
        self.tick_subscribers.retain(|tx| match tx.try_send(Arc::clone(tick)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(tick = tick.height(), "tick subscriber full, tick dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Applies and commits `proposal`, then records and publishes it.
    pub fn run_tick(&mut self, proposal: Proposal) -> WorldResult<Arc<Tick>> {
        let started = Instant::now();
        let tick = Arc::new(self.world.apply_and_commit(proposal, self.collector.as_mut())?);

        if let Some(collector) = self.collector.as_mut() {
            collector.record_tick(tick.height(), started);
        }
        self.publish(&tick);
        Ok(tick)
    }

    /// Runs the next tick from the transaction pool.
    pub fn tick_once(&mut self) -> WorldResult<Arc<Tick>> {
        let proposal = self.world.prepare_tick()?;
        self.run_tick(proposal)
    }

    /// Applies a proposal received from the sequencer.
    ///
    /// Missing heights between the last finalized tick and `proposal` are
    /// filled with empty ticks stamped with the proposal's timestamp. A
    /// proposal at or below the last finalized height is rejected.
    // TODO: take per-height timestamps for filled gaps from the sequencer
    // once proposals carry them.
    pub fn sync_proposal(&mut self, proposal: Proposal) -> WorldResult<Arc<Tick>> {
        let last_finalized = self.world.last_finalized_tick();
        if proposal.tick <= last_finalized {
            return Err(WorldError::TickOutOfOrder { last_finalized, actual: proposal.tick });
        }

        while self.world.last_finalized_tick() < proposal.tick - 1 {
            let gap = self.world.last_finalized_tick() + 1;
            info!(tick = gap, target = proposal.tick, "fast-forwarding empty tick");
            let empty = self.world.prepare_sync_tick(gap, proposal.timestamp, Default::default());
            self.run_tick(empty)?;
        }
        self.run_tick(proposal)
    }

    /// Runs the loop the world is configured for: [`Runtime::sync_loop`] over
    /// `proposals` in rollup mode, [`Runtime::tick_loop`] otherwise.
    ///
    /// Rollup mode without a proposal channel is a configuration error.
    pub async fn run(
        &mut self,
        proposals: Option<mpsc::Receiver<Proposal>>,
        shutdown: watch::Receiver<bool>,
    ) -> WorldResult<()> {
        if !self.world.config().rollup_enabled {
            return self.tick_loop(shutdown).await;
        }
        match proposals {
            Some(proposals) => self.sync_loop(proposals, shutdown).await,
            None => Err(ConfigError::Invalid("rollup mode requires a proposal channel").into()),
        }
    }

    /// Ticks on the world's clock until `shutdown` fires.
    pub async fn tick_loop(&mut self, mut shutdown: watch::Receiver<bool>) -> WorldResult<()> {
        let mut clock = interval(self.world.config().tick_interval());
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.world.config().tick_interval().as_millis() as u64, "tick loop started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = clock.tick() => {
                    self.tick_once()?;
                }
            }
        }

        info!(last_finalized = self.world.last_finalized_tick(), "tick loop stopped");
        Ok(())
    }

    /// Applies proposals from `proposals` until `shutdown` fires or the
    /// sender side closes.
    pub async fn sync_loop(
        &mut self,
        mut proposals: mpsc::Receiver<Proposal>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorldResult<()> {
        info!(last_finalized = self.world.last_finalized_tick(), "sync loop started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = proposals.recv() => match received {
                    Some(proposal) => {
                        self.sync_proposal(proposal)?;
                    }
                    None => break,
                },
            }
        }

        info!(last_finalized = self.world.last_finalized_tick(), "sync loop stopped");
        Ok(())
    }
}
