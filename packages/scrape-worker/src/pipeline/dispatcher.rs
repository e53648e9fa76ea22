//! Intake dispatcher - turns broker deliveries into settled tasks.
//!
//! Per delivery: `Received -> Dispatched -> {Acked, Redelivered, Discarded}`.
//!
//! A concurrency slot is acquired *before* the next delivery is pulled, so an
//! unacknowledged delivery is never held in a local queue waiting for work to
//! free up. The broker keeps everything we are not ready for.
//!
//! A url already being processed by this worker is never started a second
//! time; the duplicate goes back to the broker for later redelivery.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::TaskProcessor;
use super::state::WorkerState;
use crate::common::{decode_payload, Disposition, Outcome, Task};
use crate::kernel::{Delivery, NatsPublisher};

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The shutdown token fired. In-flight tasks may still be running.
    Shutdown,
    /// The delivery stream ended on its own (broker connection lost).
    SourceClosed,
}

/// Dead-letter message published for discarded deliveries.
#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    subject: &'a str,
    payload: String,
    reason: &'a str,
    failed_at: DateTime<Utc>,
}

struct DeadLetterRoute {
    publisher: Arc<dyn NatsPublisher>,
    subject: String,
}

/// Terminal-state counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    acked: AtomicU64,
    redelivered: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub acked: u64,
    pub redelivered: u64,
    pub discarded: u64,
}

impl DispatchStats {
    fn record(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Ack => &self.acked,
            Disposition::Redeliver => &self.redelivered,
            Disposition::Discard => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            acked: self.acked.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    processor: TaskProcessor,
    slots: Arc<Semaphore>,
    state: Arc<WorkerState>,
    dead_letter: Option<Arc<DeadLetterRoute>>,
    progress_interval: Option<Duration>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// `concurrency` is the number of tasks allowed in flight at once.
    pub fn new(processor: TaskProcessor, concurrency: usize, state: Arc<WorkerState>) -> Self {
        Self {
            processor,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            state,
            dead_letter: None,
            progress_interval: None,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Publish discarded deliveries to `subject` before terminating them.
    pub fn with_dead_letter(
        mut self,
        publisher: Arc<dyn NatsPublisher>,
        subject: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(Arc::new(DeadLetterRoute {
            publisher,
            subject: subject.into(),
        }));
        self
    }

    /// Tell the broker a task is still running every `interval`, so a slow
    /// task is not redelivered while it is being worked on.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Counters that outlive the dispatcher.
    pub fn stats_handle(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    /// Pull deliveries and hand each one to a task until `shutdown` fires,
    /// the worker state is marked as shutting down, or the stream ends.
    ///
    /// Returns without waiting for spawned tasks; draining them is the
    /// lifecycle's job. The stream is borrowed so the caller can release
    /// whatever it still buffers.
    pub async fn run<S, D>(&self, deliveries: &mut S, shutdown: CancellationToken) -> DispatchExit
    where
        S: Stream<Item = D> + Unpin,
        D: Delivery,
    {
        loop {
            if self.state.is_shutting_down() {
                return DispatchExit::Shutdown;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return DispatchExit::Shutdown,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return DispatchExit::Shutdown,
                },
            };

            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return DispatchExit::Shutdown,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => return DispatchExit::SourceClosed,
                },
            };

            self.dispatch(delivery, permit).await;
        }
    }

    /// Hand back every delivery the stream has already buffered, without
    /// waiting for new ones. Returns how many were released.
    pub async fn release_unstarted<S, D>(&self, deliveries: &mut S) -> usize
    where
        S: Stream<Item = D> + Unpin,
        D: Delivery,
    {
        let mut released = 0;
        while let Some(Some(delivery)) = deliveries.next().now_or_never() {
            self.settle(&delivery, Disposition::Redeliver, None).await;
            released += 1;
        }
        if released > 0 {
            info!(released, "released unstarted deliveries for redelivery");
        }
        released
    }

    async fn dispatch<D: Delivery>(&self, delivery: D, permit: OwnedSemaphorePermit) {
        let url = match decode_payload(delivery.payload()) {
            Ok(url) => url,
            Err(e) => {
                let reason = e.to_string();
                warn!(subject = %delivery.subject(), error = %reason, "discarding malformed delivery");
                self.settle(&delivery, Disposition::Discard, Some(reason.as_str()))
                    .await;
                return;
            }
        };

        let task = Task {
            url,
            delivery,
            received_at: Utc::now(),
        };

        // Counted before the spawn so a drain can never observe zero while
        // this task is about to start
        let Some(guard) = self.state.begin_task(&task.url) else {
            warn!(url = %task.url, "url already in flight on this worker, redelivering");
            self.settle(&task.delivery, Disposition::Redeliver, None)
                .await;
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            this.execute(task).await;
            // Handles go first, then the in-flight mark, then the slot, so
            // the next pull never sees this url as still running
            drop(this);
            drop(guard);
            drop(permit);
        });
    }

    async fn execute<D: Delivery>(&self, task: Task<D>) {
        debug!(url = %task.url, "task dispatched");
        let outcome = self.process_with_progress(&task).await;
        let elapsed_ms = (Utc::now() - task.received_at).num_milliseconds();

        match &outcome {
            Outcome::Persisted { id } => {
                info!(url = %task.url, id = %id, elapsed_ms, "article stored")
            }
            Outcome::TransientFailure { reason } => {
                warn!(url = %task.url, reason = %reason, elapsed_ms, "task failed, redelivering")
            }
            Outcome::PermanentFailure { reason } => {
                warn!(url = %task.url, reason = %reason, elapsed_ms, "task failed, discarding")
            }
        }

        self.settle(&task.delivery, outcome.disposition(), outcome.reason())
            .await;
    }

    async fn process_with_progress<D: Delivery>(&self, task: &Task<D>) -> Outcome {
        let work = self.processor.process(&task.url);
        tokio::pin!(work);

        let Some(interval) = self.progress_interval else {
            return work.await;
        };

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                _ = ticker.tick() => {
                    if let Err(e) = task.delivery.in_progress().await {
                        warn!(url = %task.url, error = %e, "failed to extend delivery deadline");
                    }
                }
            }
        }
    }

    async fn settle<D: Delivery>(
        &self,
        delivery: &D,
        disposition: Disposition,
        reason: Option<&str>,
    ) {
        if disposition == Disposition::Discard {
            self.publish_dead_letter(delivery, reason.unwrap_or("discarded"))
                .await;
        }

        let result = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Redeliver => delivery.nack().await,
            Disposition::Discard => delivery.term().await,
        };
        self.stats.record(disposition);

        // The broker will redeliver after ack_wait; nothing else to do here
        if let Err(e) = result {
            error!(subject = %delivery.subject(), error = %e, "failed to settle delivery");
        }
    }

    async fn publish_dead_letter<D: Delivery>(&self, delivery: &D, reason: &str) {
        let Some(route) = &self.dead_letter else {
            return;
        };

        let letter = DeadLetter {
            subject: delivery.subject(),
            payload: String::from_utf8_lossy(delivery.payload()).into_owned(),
            reason,
            failed_at: Utc::now(),
        };
        let body = match serde_json::to_vec(&letter) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                error!(error = %e, "failed to encode dead letter");
                return;
            }
        };

        if let Err(e) = route.publisher.publish(route.subject.clone(), body).await {
            error!(subject = %route.subject, error = %e, "failed to publish dead letter");
        }
    }
}
