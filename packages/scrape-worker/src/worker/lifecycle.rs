//! Worker lifecycle: `Starting -> Running -> Draining -> Stopped`.
//!
//! ```text
//! Worker::start
//!     ├─► connect Postgres (+ migrations)
//!     ├─► build HTTP transport
//!     ├─► connect NATS, bind the durable work-queue consumer
//!     └─► wire TaskProcessor + Dispatcher
//! Worker::run
//!     ├─► Dispatcher::run until shutdown
//!     ├─► stop_intake: nack buffered deliveries, drop the dispatcher
//!     └─► drain_and_close
//!             ├─► wait for in-flight tasks (bounded by grace)
//!             ├─► close store ║ close transport
//!             └─► close broker
//! ```

use anyhow::{bail, Result};
use async_nats::jetstream::consumer;
use futures::{Stream, StreamExt};
use sqlx::postgres::PgPoolOptions;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StartupError;
use crate::kernel::nats::subscribe_work_queue;
use crate::kernel::{
    BaseResources, Delivery, HtmlExtractor, HttpFetchClient, JetStreamDelivery,
    NatsClientPublisher, PostgresArticleStore, WorkerResources,
};
use crate::pipeline::{DispatchExit, DispatchStats, Dispatcher, TaskProcessor, WorkerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Draining => "draining",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

fn enter(phase: LifecyclePhase) {
    info!(phase = %phase, "worker lifecycle");
}

/// A started worker: connections are open and the consumer is bound.
pub struct Worker {
    dispatcher: Dispatcher,
    messages: consumer::pull::Stream,
    resources: WorkerResources,
    redelivery_delay: Duration,
    shutdown_grace: Duration,
}

impl Worker {
    /// Connect everything the worker needs. Any failure here is fatal.
    pub async fn start(config: &Config) -> Result<Self, StartupError> {
        enter(LifecyclePhase::Starting);

        info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .map_err(StartupError::Database)?;
        info!("Database connected");

        if config.run_migrations {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Migrations complete");
        }

        let fetcher =
            Arc::new(HttpFetchClient::new(&config.fetch).map_err(StartupError::Transport)?);

        info!(url = %config.broker.url, "Connecting to NATS...");
        let nats = async_nats::connect(config.broker.url.as_str())
            .await
            .map_err(|e| StartupError::broker("connecting", e))?;
        info!("NATS connected");

        // Pull no further ahead than there are slots to run the work
        let messages = subscribe_work_queue(&nats, &config.broker, config.concurrency).await?;

        let processor = TaskProcessor::new(
            fetcher.clone(),
            Arc::new(HtmlExtractor::new(config.extraction.clone())),
            Arc::new(PostgresArticleStore::new(pool.clone())),
        );
        // Extend the ack deadline well before it lapses on long tasks
        let mut dispatcher = Dispatcher::new(processor, config.concurrency, WorkerState::new())
            .with_progress_interval(config.broker.ack_wait / 2);
        if let Some(subject) = &config.broker.dead_letter_subject {
            info!(subject = %subject, "dead-letter routing enabled");
            dispatcher = dispatcher
                .with_dead_letter(Arc::new(NatsClientPublisher::new(nats.clone())), subject.clone());
        }

        Ok(Self {
            dispatcher,
            messages,
            resources: WorkerResources::new(pool, nats, fetcher),
            redelivery_delay: config.broker.redelivery_delay,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Process deliveries until `shutdown` fires, then drain and close.
    ///
    /// Errors if the subscription ended without a shutdown request, so a
    /// supervisor restarts the process.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Worker {
            dispatcher,
            messages,
            resources,
            redelivery_delay,
            shutdown_grace,
        } = self;

        let mut deliveries = Box::pin(messages.filter_map(move |message| async move {
            match message {
                Ok(message) => Some(JetStreamDelivery::new(message, redelivery_delay)),
                Err(e) => {
                    warn!(error = %e, "failed to pull message");
                    None
                }
            }
        }));

        enter(LifecyclePhase::Running);
        let exit = dispatcher.run(&mut deliveries, shutdown).await;

        let (state, stats) = stop_intake(dispatcher, &mut deliveries).await;
        // Dropping the pull subscription stops the broker pushing more work
        drop(deliveries);
        drain_and_close(&state, shutdown_grace, &resources).await;

        let stats = stats.snapshot();
        info!(
            acked = stats.acked,
            redelivered = stats.redelivered,
            discarded = stats.discarded,
            "worker stopped"
        );

        match exit {
            DispatchExit::Shutdown => Ok(()),
            DispatchExit::SourceClosed => bail!("work queue subscription closed unexpectedly"),
        }
    }
}

/// Hand back deliveries the subscription buffered but never started, then
/// drop the dispatcher so running tasks hold the last handles to the fetcher,
/// store and broker.
///
/// Returns what the drain and the final report still need.
pub async fn stop_intake<S, D>(
    dispatcher: Dispatcher,
    deliveries: &mut S,
) -> (Arc<WorkerState>, Arc<DispatchStats>)
where
    S: Stream<Item = D> + Unpin,
    D: Delivery,
{
    dispatcher.state().begin_shutdown();
    dispatcher.release_unstarted(deliveries).await;
    (Arc::clone(dispatcher.state()), dispatcher.stats_handle())
}

/// Stop accepting work, wait up to `grace` for in-flight tasks, then close
/// resources: store and transport together, broker last.
///
/// Returns false if tasks were still running when the grace period ran out.
/// Their deliveries stay unacknowledged and the broker redelivers them.
pub async fn drain_and_close(
    state: &WorkerState,
    grace: Duration,
    resources: &dyn BaseResources,
) -> bool {
    enter(LifecyclePhase::Draining);
    state.begin_shutdown();
    info!(active = state.active_tasks(), grace_secs = grace.as_secs_f64(), "draining in-flight tasks");

    let drained = state.wait_idle(grace).await;
    if !drained {
        warn!(
            remaining = state.active_tasks(),
            "grace period elapsed, leaving remaining tasks for redelivery"
        );
    }

    tokio::join!(resources.close_store(), resources.close_transport());
    resources.close_broker().await;

    enter(LifecyclePhase::Stopped);
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{
        InMemoryArticleStore, MockExtractor, MockFetchClient, RecordingResources, Settlement,
        TestDelivery, TestJournal,
    };
    use tokio_stream::wrappers::UnboundedReceiverStream;

    const PAGE: &str = "<html><head><title>T</title></head><body><p>Body</p></body></html>";

    fn dispatcher(fetch_delay: Duration, concurrency: usize) -> Dispatcher {
        let processor = TaskProcessor::new(
            Arc::new(MockFetchClient::new(PAGE).with_delay(fetch_delay)),
            Arc::new(MockExtractor::article("T", "B")),
            Arc::new(InMemoryArticleStore::new()),
        );
        Dispatcher::new(processor, concurrency, WorkerState::new())
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(LifecyclePhase::Starting.to_string(), "starting");
        assert_eq!(LifecyclePhase::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn test_drain_settles_in_flight_before_closing() {
        let journal = TestJournal::new();
        let dispatcher = dispatcher(Duration::from_millis(100), 4);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let deliveries: Vec<_> = (0..3)
            .map(|i| {
                TestDelivery::for_url(&format!("https://example.com/{}", i))
                    .with_journal(journal.clone())
            })
            .collect();
        for delivery in &deliveries {
            tx.send(delivery.clone()).unwrap();
        }

        let runner = dispatcher.clone();
        let token = shutdown.clone();
        let run = tokio::spawn(async move {
            let mut source = UnboundedReceiverStream::new(rx);
            runner.run(&mut source, token).await
        });

        // All three tasks are mid-fetch when the signal arrives
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.state().active_tasks(), 3);
        shutdown.cancel();
        assert_eq!(run.await.unwrap(), DispatchExit::Shutdown);

        let resources = RecordingResources::new(journal.clone());
        let drained =
            drain_and_close(dispatcher.state(), Duration::from_secs(5), &resources).await;

        assert!(drained);
        assert!(dispatcher.state().is_shutting_down());
        assert!(deliveries
            .iter()
            .all(|d| d.settlement() == Some(Settlement::Acked)));

        let close_store = journal.position("close store").unwrap();
        let close_transport = journal.position("close transport").unwrap();
        let close_broker = journal.position("close broker").unwrap();
        for entry in journal.entries().iter().filter(|e| e.starts_with("ack ")) {
            assert!(journal.position(entry).unwrap() < close_store);
        }
        assert!(close_store < close_broker);
        assert!(close_transport < close_broker);
    }

    #[tokio::test]
    async fn test_grace_timeout_leaves_task_unsettled() {
        let journal = TestJournal::new();
        let dispatcher = dispatcher(Duration::from_secs(10), 1);
        let delivery = TestDelivery::for_url("https://example.com/slow");
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(delivery.clone()).unwrap();
        let shutdown = CancellationToken::new();

        let runner = dispatcher.clone();
        let token = shutdown.clone();
        let run = tokio::spawn(async move {
            let mut source = UnboundedReceiverStream::new(rx);
            runner.run(&mut source, token).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        run.await.unwrap();

        let resources = RecordingResources::new(journal.clone());
        let drained =
            drain_and_close(dispatcher.state(), Duration::from_millis(50), &resources).await;

        assert!(!drained);
        assert_eq!(dispatcher.state().active_tasks(), 1);
        assert!(delivery.settlements().is_empty());
        assert_eq!(
            journal.entries().last().map(String::as_str),
            Some("close broker")
        );
    }

    #[tokio::test]
    async fn test_stop_intake_releases_buffered_and_drops_handles() {
        let journal = TestJournal::new();
        let fetcher = Arc::new(MockFetchClient::new(PAGE).with_delay(Duration::from_millis(100)));
        let processor = TaskProcessor::new(
            fetcher.clone(),
            Arc::new(MockExtractor::article("T", "B")),
            Arc::new(InMemoryArticleStore::new()),
        );
        let dispatcher = Dispatcher::new(processor, 1, WorkerState::new());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let deliveries: Vec<_> = (0..3)
            .map(|i| {
                TestDelivery::for_url(&format!("https://example.com/{}", i))
                    .with_journal(journal.clone())
            })
            .collect();
        for delivery in &deliveries {
            tx.send(delivery.clone()).unwrap();
        }

        let token = shutdown.clone();
        let run = tokio::spawn(async move {
            let mut source = UnboundedReceiverStream::new(rx);
            let exit = dispatcher.run(&mut source, token).await;
            (exit, dispatcher, source)
        });

        // The only slot is busy with the first url, the rest wait in the source
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let (exit, dispatcher, mut source) = run.await.unwrap();
        assert_eq!(exit, DispatchExit::Shutdown);

        let (state, stats) = stop_intake(dispatcher, &mut source).await;
        drop(source);
        assert!(state.is_shutting_down());
        assert_eq!(deliveries[1].settlements(), vec![Settlement::Nacked]);
        assert_eq!(deliveries[2].settlements(), vec![Settlement::Nacked]);

        let resources = RecordingResources::new(journal.clone());
        assert!(drain_and_close(&state, Duration::from_secs(5), &resources).await);

        assert_eq!(deliveries[0].settlement(), Some(Settlement::Acked));
        assert_eq!(stats.snapshot().acked, 1);
        assert_eq!(stats.snapshot().redelivered, 2);
        // Every task handle is gone by the time the transport closes
        assert_eq!(Arc::strong_count(&fetcher), 1);
        assert!(!fetcher.was_fetched("https://example.com/1"));
        drop(tx);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight_closes_immediately() {
        let journal = TestJournal::new();
        let state = WorkerState::new();
        let resources = RecordingResources::new(journal.clone());

        assert!(drain_and_close(&state, Duration::from_secs(1), &resources).await);
        assert_eq!(journal.entries().len(), 3);
        assert_eq!(journal.entries()[2], "close broker");
    }
}
