//! Single-subscriber result dispatch.
//!
//! The publisher holds at most one subscription. Each subscription owns a
//! dispatcher thread fed by its own queue, so the producer only ever enqueues
//! and never runs listener code itself:
//!
//! ```text
//! producer ──publish()──▶ [queue] ──▶ dispatcher thread ──▶ StrokeListener
//! ```
//!
//! Backpressure: acceleration readings and autocorrelation tables are dropped
//! once the queue holds `dispatch_queue_capacity` items; rates, strokes and
//! distance updates are always enqueued. Ordering is the queue order, which
//! is production order.
//!
//! Replacement: the old subscription is deactivated and its in-flight
//! callback (if any) is waited for before `subscribe` returns, so the old
//! listener sees nothing afterwards and the new one sees nothing from before.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::EngineResult;
use crate::types::{AutocorrelationTable, DistanceUpdate, EngineOutput, StrokeEvent};

/// Receiver of engine outputs.
///
/// Every method has an empty default body; implement only what you need.
/// Methods run on the subscription's dispatcher thread, one at a time and in
/// production order.
pub trait StrokeListener: Send + 'static {
    /// Smoothed acceleration magnitude of a freshly ingested reading.
    fn on_new_acceleration_reading(&mut self, _magnitude: f64) {}

    /// Full autocorrelation table of a successful analysis tick.
    fn on_new_autocorrelation_table(&mut self, _table: &AutocorrelationTable) {}

    /// Periodicity-based stroke rate, strokes per minute.
    fn on_stroke_rate_update(&mut self, _stroke_rate: f64) {}

    /// A detected stroke.
    fn on_stroke_taken(&mut self, _event: StrokeEvent) {}

    /// Cumulative distance and speed after an accepted GPS fix.
    fn on_distance_update(&mut self, _update: DistanceUpdate) {}
}

/// Identifier of a subscription, unique per publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Dispatch counters, cumulative over the publisher's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Outputs handed to a listener.
    pub delivered: u64,
    /// Lossy outputs dropped under backpressure, plus outputs still queued
    /// for a subscription when it was replaced or removed.
    pub dropped: u64,
    /// Listener callbacks that panicked.
    pub listener_panics: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    listener_panics: AtomicU64,
}

/// State shared between a subscription and its dispatcher thread.
#[derive(Debug)]
struct SubscriptionShared {
    active: AtomicBool,
    /// Held for the duration of every callback.
    callback_gate: Mutex<()>,
}

struct Subscription {
    id: SubscriptionId,
    sender: Sender<EngineOutput>,
    shared: Arc<SubscriptionShared>,
    backlogged: bool,
    thread_id: ThreadId,
    handle: JoinHandle<()>,
}

/// Fan-out point between the pipeline and the single subscriber.
pub struct ResultPublisher {
    current: Mutex<Option<Subscription>>,
    dispatch_capacity: usize,
    counters: Arc<DispatchCounters>,
    next_id: AtomicU64,
}

impl ResultPublisher {
    pub fn new(dispatch_capacity: usize) -> Self {
        Self {
            current: Mutex::new(None),
            dispatch_capacity: dispatch_capacity.max(1),
            counters: Arc::new(DispatchCounters::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Install `listener`, replacing any previous subscription.
    ///
    /// When this returns, the previous listener will receive no further
    /// callbacks. Called from inside the previous listener's own callback,
    /// the wait for that callback is skipped.
    pub fn subscribe(&self, listener: impl StrokeListener) -> EngineResult<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = spawn_dispatcher(id, Box::new(listener), Arc::clone(&self.counters))?;

        let previous = lock(&self.current).replace(subscription);
        if let Some(previous) = previous {
            retire(previous);
        }

        tracing::debug!(subscription = id.0, "Subscriber installed");
        Ok(id)
    }

    /// Remove the current subscription, if any. Same guarantees as replacement.
    pub fn unsubscribe(&self) {
        let previous = lock(&self.current).take();
        if let Some(previous) = previous {
            tracing::debug!(subscription = previous.id.0, "Subscriber removed");
            retire(previous);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.current).is_some()
    }

    pub fn current_subscription(&self) -> Option<SubscriptionId> {
        lock(&self.current).as_ref().map(|s| s.id)
    }

    /// Enqueue one output for the current subscriber. Never blocks on the
    /// listener.
    pub fn publish(&self, output: EngineOutput) {
        let mut current = lock(&self.current);
        let Some(subscription) = current.as_mut() else {
            return;
        };

        if output.is_lossy() && subscription.sender.len() >= self.dispatch_capacity {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            if !subscription.backlogged {
                subscription.backlogged = true;
                tracing::warn!(
                    subscription = subscription.id.0,
                    queued = subscription.sender.len(),
                    "Subscriber falling behind; dropping readings and tables"
                );
            }
            return;
        }
        subscription.backlogged = false;

        // Fails only if the dispatcher thread is gone, which cannot happen
        // while the subscription is installed
        let _ = subscription.sender.send(output);
    }

    /// Publish a batch in order.
    pub fn publish_all(&self, outputs: impl IntoIterator<Item = EngineOutput>) {
        for output in outputs {
            self.publish(output);
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            listener_panics: self.counters.listener_panics.load(Ordering::Relaxed),
        }
    }

    /// Deliver everything already queued, then stop the dispatcher.
    pub fn shutdown(&self) {
        let previous = lock(&self.current).take();
        if let Some(subscription) = previous {
            let Subscription {
                sender,
                thread_id,
                handle,
                ..
            } = subscription;
            // Closing the queue lets the dispatcher drain and exit
            drop(sender);
            if thread_id != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ResultPublisher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

fn spawn_dispatcher(
    id: SubscriptionId,
    listener: Box<dyn StrokeListener>,
    counters: Arc<DispatchCounters>,
) -> EngineResult<Subscription> {
    let (sender, receiver) = unbounded();
    let shared = Arc::new(SubscriptionShared {
        active: AtomicBool::new(true),
        callback_gate: Mutex::new(()),
    });

    let thread_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
        .name(format!("stroke-dispatch-{}", id.0))
        .spawn(move || dispatch_loop(id, receiver, listener, thread_shared, counters))?;

    Ok(Subscription {
        id,
        sender,
        shared,
        backlogged: false,
        thread_id: handle.thread().id(),
        handle,
    })
}

fn dispatch_loop(
    id: SubscriptionId,
    receiver: Receiver<EngineOutput>,
    mut listener: Box<dyn StrokeListener>,
    shared: Arc<SubscriptionShared>,
    counters: Arc<DispatchCounters>,
) {
    for output in receiver.iter() {
        let _gate = lock(&shared.callback_gate);
        if !shared.active.load(Ordering::Acquire) {
            discard_pending(id, output, &receiver, &counters);
            break;
        }

        let result = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_mut(), &output)));
        match result {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.listener_panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    subscription = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "Listener panicked; output discarded"
                );
            }
        }
    }
}

fn deliver(listener: &mut dyn StrokeListener, output: &EngineOutput) {
    match output {
        EngineOutput::AccelerationReading(sample) => {
            listener.on_new_acceleration_reading(sample.magnitude)
        }
        EngineOutput::AutocorrelationTable(table) => listener.on_new_autocorrelation_table(table),
        EngineOutput::StrokeRate(rate) => listener.on_stroke_rate_update(*rate),
        EngineOutput::Stroke(event) => listener.on_stroke_taken(*event),
        EngineOutput::Distance(update) => listener.on_distance_update(*update),
    }
}

/// Count and report what a retired subscription never delivered.
fn discard_pending(
    id: SubscriptionId,
    first: EngineOutput,
    receiver: &Receiver<EngineOutput>,
    counters: &DispatchCounters,
) {
    let (mut discarded, mut reliable) = (0u64, 0u64);
    for output in std::iter::once(first).chain(receiver.try_iter()) {
        discarded += 1;
        if !output.is_lossy() {
            reliable += 1;
        }
    }
    counters.dropped.fetch_add(discarded, Ordering::Relaxed);

    if reliable > 0 {
        tracing::warn!(
            subscription = id.0,
            discarded,
            reliable,
            "Subscription retired with undelivered outputs"
        );
    } else {
        tracing::debug!(subscription = id.0, discarded, "Subscription retired with queued readings");
    }
}

/// Deactivate a subscription and wait out its in-flight callback.
fn retire(subscription: Subscription) {
    subscription.shared.active.store(false, Ordering::Release);

    let Subscription {
        sender,
        shared,
        thread_id,
        handle,
        ..
    } = subscription;
    drop(sender);

    if thread_id == thread::current().id() {
        // Called from the listener itself; the loop exits after this callback
        return;
    }

    // Once the gate is free the dispatcher can only observe `active == false`
    drop(lock(&shared.callback_gate));
    let _ = handle.join();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Lock ignoring poisoning; the guarded data stays consistent across a
/// panicking holder.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

/// Listener forwarding every callback into a channel.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Callback as observed by [`ChannelListener`].
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Received {
        Reading(f64),
        Table(usize),
        Rate(f64),
        Stroke(StrokeEvent),
        Distance(DistanceUpdate),
    }

    pub(crate) struct ChannelListener {
        pub(crate) tx: Sender<Received>,
    }

    impl ChannelListener {
        pub(crate) fn pair() -> (Self, Receiver<Received>) {
            let (tx, rx) = unbounded();
            (Self { tx }, rx)
        }
    }

    impl StrokeListener for ChannelListener {
        fn on_new_acceleration_reading(&mut self, magnitude: f64) {
            let _ = self.tx.send(Received::Reading(magnitude));
        }

        fn on_new_autocorrelation_table(&mut self, table: &AutocorrelationTable) {
            let _ = self.tx.send(Received::Table(table.len()));
        }

        fn on_stroke_rate_update(&mut self, stroke_rate: f64) {
            let _ = self.tx.send(Received::Rate(stroke_rate));
        }

        fn on_stroke_taken(&mut self, event: StrokeEvent) {
            let _ = self.tx.send(Received::Stroke(event));
        }

        fn on_distance_update(&mut self, update: DistanceUpdate) {
            let _ = self.tx.send(Received::Distance(update));
        }
    }
}
