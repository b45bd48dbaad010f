use super::queue::EventQueue;
use crate::builder::{BuildError, EventBuilder};
use crate::domain::Event;
use crate::logging::DIAGNOSTICS_TARGET;
use crate::sender::{CompressionError, Delivery, EventSink, TransportError, compress_and_encode};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

// Upper bound on a single wait for an in-flight flush to settle.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to build event: {0}")]
    Build(#[from] BuildError),
    #[error("Failed to compress event: {0}")]
    Compression(#[from] CompressionError),
    #[error("Delivery failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Send task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// What a single [`Dispatcher::process_batch`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing was queued.
    Idle,
    /// Another batch was already in flight.
    Busy,
    Dispatched { delivered: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches: u64,
    pub delivered: u64,
    pub failed: u64,
    pub enqueued: u64,
}

/// Event buffer plus the single-flight batch engine that drains it.
pub struct Dispatcher {
    queue: EventQueue,
    builder: EventBuilder,
    sink: Arc<dyn EventSink>,
    max_batch: usize,
    runtime: Option<Handle>,
    flushing: AtomicBool,
    settled: Notify,
    batches: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    warned_no_runtime: AtomicBool,
}

impl Dispatcher {
    /// Captures the current Tokio runtime, if any, for size-triggered flushes.
    pub fn new(builder: EventBuilder, sink: Arc<dyn EventSink>, max_batch: usize) -> Self {
        Self {
            queue: EventQueue::new(),
            builder,
            sink,
            max_batch: max_batch.max(1),
            runtime: Handle::try_current().ok(),
            flushing: AtomicBool::new(false),
            settled: Notify::new(),
            batches: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            warned_no_runtime: AtomicBool::new(false),
        }
    }

    pub fn builder(&self) -> &EventBuilder {
        &self.builder
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            batches: self.batches.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            enqueued: self.queue.pushed(),
        }
    }

    /// Appends an event; reaching the batch size kicks off a background flush.
    ///
    /// No new flush is spawned while one is in flight; the running one keeps
    /// going as long as full batches remain.
    pub fn enqueue(self: &Arc<Self>, event: Event) {
        let len = self.queue.push(event);
        if len < self.max_batch || self.is_flushing() {
            return;
        }

        match &self.runtime {
            Some(runtime) => {
                let dispatcher = Arc::clone(self);
                runtime.spawn(async move {
                    while let BatchOutcome::Dispatched { .. } = dispatcher.process_batch().await {
                        if dispatcher.pending() < dispatcher.max_batch {
                            break;
                        }
                    }
                });
            }
            None => {
                if !self.warned_no_runtime.swap(true, Ordering::Relaxed) {
                    warn!(
                        target: DIAGNOSTICS_TARGET,
                        "Queue reached {} events but no Tokio runtime is available; waiting for an explicit flush",
                        len
                    );
                }
            }
        }
    }

    /// Drains up to one batch and delivers its events concurrently.
    ///
    /// A no-op while another batch is in flight. Failed events are logged
    /// and dropped; nothing is put back on the queue.
    pub async fn process_batch(&self) -> BatchOutcome {
        if self.queue.is_empty() {
            return BatchOutcome::Idle;
        }

        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return BatchOutcome::Busy;
        }
        let _guard = FlushGuard { dispatcher: self };

        let batch = self.queue.drain_up_to(self.max_batch);
        if batch.is_empty() {
            return BatchOutcome::Idle;
        }

        debug!("Dispatching batch of {} event(s)", batch.len());
        let results = join_all(batch.into_iter().map(|event| self.dispatch_one(event))).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let failed = results.len() - delivered;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);

        BatchOutcome::Dispatched { delivered, failed }
    }

    /// Dispatches batches until the queue is empty and no flush is in flight.
    pub async fn force_flush(&self) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            match self.process_batch().await {
                BatchOutcome::Dispatched { .. } => {}
                BatchOutcome::Idle if !self.is_flushing() => {
                    if self.queue.is_empty() {
                        return;
                    }
                }
                BatchOutcome::Idle | BatchOutcome::Busy => {
                    let _ = tokio::time::timeout(FLUSH_POLL_INTERVAL, settled).await;
                }
            }
        }
    }

    pub fn close(&self) {
        self.sink.close();
    }

    async fn dispatch_one(&self, event: Event) -> bool {
        let event_id = event.event_id.clone();

        match self.deliver(event).await {
            Ok(delivery) => {
                debug!(
                    event_id = %event_id,
                    attempts = delivery.attempts,
                    "Event delivered"
                );
                true
            }
            Err(err) => {
                error!(
                    target: DIAGNOSTICS_TARGET,
                    event_id = %event_id,
                    "Dropping event: {}",
                    err
                );
                false
            }
        }
    }

    async fn deliver(&self, event: Event) -> Result<Delivery, DispatchError> {
        let json = self.builder.stringify(&event)?;
        drop(event);
        let compressed = compress_and_encode(&json)?;

        // Spawned so a panicking sink only loses its own event.
        let delivery = tokio::spawn(self.sink.send(compressed)).await??;
        Ok(delivery)
    }
}

// Clears the single-flight flag even if the flushing future is dropped.
struct FlushGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.flushing.store(false, Ordering::Release);
        self.dispatcher.settled.notify_waiters();
    }
}
