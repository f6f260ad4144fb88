//! # Tick telemetry collector
//!
//! The [`Collector`] is written by the tick task only: [`start_tick`],
//! [`record_span`] per system run, [`record_tick`] after commit. Every
//! `batch_size` ticks the buffered timelines are packed into a [`Batch`] and
//! offered to each subscriber.
//!
//! ## Delivery
//! Sends never block the writer. A subscriber whose channel is full misses the
//! batch; the miss is counted and reported in the next batch that gets through
//! as `dropped_batches`. Subscribers are managed through a cloneable
//! [`Subscribers`] handle, so other tasks can subscribe and unsubscribe while
//! the tick task writes.
//!
//! ## Bounds
//! A tick keeps at most [`MAX_SPANS_PER_TICK`] spans; extra spans are counted
//! in `dropped_spans`. Both counters are deltas since the previous batch.
//!
//! [`start_tick`]: Collector::start_tick
//! [`record_span`]: Collector::record_span
//! [`record_tick`]: Collector::record_tick

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::engine::types::TickHeight;
use crate::telemetry::ring::{SpanRing, TickRing, TickSample};

/// Spans kept per tick before further spans are dropped.
pub const MAX_SPANS_PER_TICK: usize = 256;

/// Batches buffered per subscriber.
pub const SUBSCRIBER_BUFFER: usize = 4;

/// Entries kept in the tick and timeline rings.
pub const RING_CAPACITY: usize = 512;

/// One system run within one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSpan {
    /// System name.
    pub system_name: String,
    /// Tick the system ran in.
    pub tick_height: TickHeight,
    /// Offset of the system start from the tick start.
    pub start: Duration,
    /// Offset of the system end from the tick start.
    pub end: Duration,
}

/// Spans of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickTimeline {
    /// Tick height.
    pub tick_height: TickHeight,
    /// Wall time from tick start to commit.
    pub duration: Duration,
    /// System spans in run order.
    pub spans: Vec<TickSpan>,
}

/// Timelines of `batch_size` consecutive ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Timelines, oldest first.
    pub ticks: Vec<TickTimeline>,
    /// Spans dropped since the previous batch.
    pub dropped_spans: u64,
    /// Batches subscribers missed since the previous batch.
    pub dropped_batches: u64,
}

/// Identifier of a subscription.
pub type SubscriptionId = u64;

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Pass to [`Subscribers::unsubscribe`] to cancel.
    pub id: SubscriptionId,
    /// Delivered batches.
    pub receiver: mpsc::Receiver<Arc<Batch>>,
}

#[derive(Debug, Default)]
struct SubscriberSet {
    next_id: SubscriptionId,
    senders: Vec<(SubscriptionId, mpsc::Sender<Arc<Batch>>)>,
}

/// Shared handle on a collector's subscriber list.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<SubscriberSet>>,
}

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, SubscriberSet> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a subscription buffering up to [`SUBSCRIBER_BUFFER`] batches.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut set = self.lock();
        let id = set.next_id;
        set.next_id += 1;
        set.senders.push((id, tx));
        Subscription { id, receiver }
    }

    /// Closes subscription `id`. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().senders.retain(|(sub, _)| *sub != id);
    }

    /// Number of open subscriptions.
    pub fn len(&self) -> usize {
        self.lock().senders.len()
    }

    /// Returns `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers `batch` to every subscriber; returns how many were full.
    fn broadcast(&self, batch: &Arc<Batch>) -> u64 {
        let mut full = 0;
        self.lock().senders.retain(|(id, tx)| match tx.try_send(Arc::clone(batch)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscription = id, "telemetry subscriber full, batch dropped");
                full += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        full
    }
}

/// Single-writer tick telemetry collector.
#[derive(Debug)]
pub struct Collector {
    batch_size: usize,
    current: Option<Vec<TickSpan>>,
    pending: Vec<TickTimeline>,
    dropped_spans: u64,
    dropped_batches: u64,
    ticks: TickRing,
    timelines: SpanRing,
    subscribers: Subscribers,
}

impl Collector {
    /// Creates a collector flushing every `batch_size` ticks (minimum 1).
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            current: None,
            pending: Vec::with_capacity(batch_size),
            dropped_spans: 0,
            dropped_batches: 0,
            ticks: TickRing::new(RING_CAPACITY),
            timelines: SpanRing::new(RING_CAPACITY),
            subscribers: Subscribers::default(),
        }
    }

    /// Ticks per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Handle for managing subscriptions from other tasks.
    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    /// Opens a subscription.
    pub fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    /// Closes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    /// Spans dropped since the last batch.
    pub fn dropped_spans(&self) -> u64 {
        self.dropped_spans
    }

    /// Recent tick durations.
    pub fn tick_ring(&self) -> &TickRing {
        &self.ticks
    }

    /// Recent tick timelines.
    pub fn span_ring(&self) -> &SpanRing {
        &self.timelines
    }

    /// Opens a new tick. Spans of an unfinished previous tick are discarded.
    pub fn start_tick(&mut self) {
        match &mut self.current {
            Some(spans) => spans.clear(),
            None => self.current = Some(Vec::new()),
        }
    }

    /// Records one system run of the open tick. Ignored without an open tick.
    pub fn record_span(&mut self, span: TickSpan) {
        let Some(spans) = &mut self.current else {
            return;
        };
        if spans.len() >= MAX_SPANS_PER_TICK {
            self.dropped_spans += 1;
            return;
        }
        spans.push(span);
    }

    /// Closes tick `tick` that began at `started`, flushing a batch when due.
    pub fn record_tick(&mut self, tick: TickHeight, started: Instant) {
        let duration = started.elapsed();
        let spans = self.current.take().unwrap_or_default();
        let timeline = TickTimeline { tick_height: tick, duration, spans };

        self.ticks.push(TickSample { tick, duration });
        self.timelines.push(timeline.clone());
        self.pending.push(timeline);

        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let batch = Arc::new(Batch {
            ticks: std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size)),
            dropped_spans: std::mem::take(&mut self.dropped_spans),
            dropped_batches: std::mem::take(&mut self.dropped_batches),
        });
        self.dropped_batches += self.subscribers.broadcast(&batch);
    }

    /// Drops buffered timelines, the open tick and both counters.
    ///
    /// Subscriptions stay open; the next batch holds only ticks recorded after
    /// the reset.
    pub fn reset(&mut self) {
        self.current = None;
        self.pending.clear();
        self.dropped_spans = 0;
        self.dropped_batches = 0;
        self.ticks.clear();
        self.timelines.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn span(name: &str, tick: TickHeight) -> TickSpan {
        TickSpan { system_name: name.to_string(), tick_height: tick, ..TickSpan::default() }
    }

    fn run_tick(c: &mut Collector, tick: TickHeight) {
        c.start_tick();
        c.record_tick(tick, Instant::now());
    }

    #[test]
    fn batch_flushes_after_n_ticks() {
        let mut c = Collector::new(3);
        let mut sub = c.subscribe();

        for i in 0..3 {
            c.start_tick();
            c.record_span(span("sys", i));
            c.record_tick(i, Instant::now());
        }

        let batch = sub.receiver.try_recv().expect("batch after 3 ticks");
        assert_eq!(batch.ticks.len(), 3);
        assert_eq!(batch.ticks[0].tick_height, 0);
        assert_eq!(batch.ticks[2].tick_height, 2);
        assert_eq!(batch.ticks[0].spans.len(), 1);
        assert_eq!(c.tick_ring().len(), 3);
        assert_eq!(c.span_ring().latest().map(|t| t.tick_height), Some(2));
    }

    #[test]
    fn no_batch_before_threshold() {
        let mut c = Collector::new(5);
        let mut sub = c.subscribe();
        for i in 0..4 {
            run_tick(&mut c, i);
        }
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_gets_the_batch() {
        let mut c = Collector::new(1);
        let mut first = c.subscribe();
        let mut second = c.subscribe();

        run_tick(&mut c, 0);

        assert_eq!(first.receiver.try_recv().unwrap().ticks.len(), 1);
        assert_eq!(second.receiver.try_recv().unwrap().ticks.len(), 1);
    }

    #[test]
    fn unsubscribed_receiver_gets_nothing() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();
        c.unsubscribe(sub.id);

        run_tick(&mut c, 0);
        assert!(sub.receiver.try_recv().is_err());
        assert!(c.subscribers().is_empty());
    }

    #[test]
    fn full_subscriber_does_not_block_writer() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();

        for i in 0..(SUBSCRIBER_BUFFER as i64 + 2) {
            run_tick(&mut c, i);
        }

        let mut received = 0;
        while sub.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[test]
    fn excess_spans_are_counted_and_reset_after_flush() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();

        c.start_tick();
        for _ in 0..MAX_SPANS_PER_TICK + 5 {
            c.record_span(span("sys", 0));
        }
        c.record_tick(0, Instant::now());

        let batch = sub.receiver.try_recv().unwrap();
        assert_eq!(batch.dropped_spans, 5);
        assert_eq!(batch.ticks[0].spans.len(), MAX_SPANS_PER_TICK);
        assert_eq!(c.dropped_spans(), 0);
    }

    #[test]
    fn missed_batches_are_reported_later() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();

        for i in 0..(SUBSCRIBER_BUFFER as i64 + 2) {
            run_tick(&mut c, i);
        }
        sub.receiver.try_recv().unwrap();
        run_tick(&mut c, SUBSCRIBER_BUFFER as i64 + 2);

        let mut reported = 0;
        while let Ok(batch) = sub.receiver.try_recv() {
            reported += batch.dropped_batches;
        }
        assert_eq!(reported, 2);
    }

    #[test]
    fn reset_clears_pending_state() {
        let mut c = Collector::new(10);
        let mut sub = c.subscribe();

        c.start_tick();
        c.record_span(span("sys", 0));
        c.record_tick(0, Instant::now());

        c.start_tick();
        for _ in 0..=MAX_SPANS_PER_TICK {
            c.record_span(span("sys", 1));
        }
        c.record_tick(1, Instant::now());
        assert!(c.dropped_spans() > 0);

        c.reset();
        assert_eq!(c.dropped_spans(), 0);
        assert!(c.tick_ring().is_empty());
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn span_without_open_tick_is_ignored() {
        let mut c = Collector::new(1);
        let _sub = c.subscribe();
        c.record_span(span("orphan", 0));
        assert_eq!(c.dropped_spans(), 0);
    }

    #[test]
    fn delivered_batches_are_not_affected_by_later_ticks() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();

        c.start_tick();
        c.record_span(span("a", 0));
        c.record_tick(0, Instant::now());
        let batch = sub.receiver.try_recv().unwrap();

        c.start_tick();
        c.record_span(span("b", 1));
        c.record_tick(1, Instant::now());

        assert_eq!(batch.ticks[0].spans[0].system_name, "a");
    }

    #[test]
    fn concurrent_subscribe_and_unsubscribe() {
        let mut c = Collector::new(1);
        let subscribers = c.subscribers();

        let writer = thread::spawn(move || {
            for i in 0..200 {
                c.start_tick();
                c.record_span(span("sys", i));
                c.record_tick(i, Instant::now());
            }
        });

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let subscribers = subscribers.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut sub = subscribers.subscribe();
                        let _ = sub.receiver.try_recv();
                        let _ = sub.receiver.try_recv();
                        subscribers.unsubscribe(sub.id);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(subscribers.is_empty());
    }

    #[test]
    fn double_unsubscribe_is_a_no_op() {
        let mut c = Collector::new(1);
        let mut sub = c.subscribe();
        c.unsubscribe(sub.id);
        c.unsubscribe(sub.id);

        run_tick(&mut c, 0);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn reset_keeps_subscribers() {
        let mut c = Collector::new(5);
        let mut sub = c.subscribe();

        for i in 0..3 {
            c.start_tick();
            c.record_span(span("sys", i));
            c.record_tick(i, Instant::now());
        }
        c.reset();
        for i in 0..5 {
            c.start_tick();
            c.record_span(span("post-reset", 100 + i));
            c.record_tick(100 + i, Instant::now());
        }

        let batch = sub.receiver.try_recv().unwrap();
        assert_eq!(batch.ticks.len(), 5);
        assert_eq!(batch.ticks[0].tick_height, 100);
    }
}
