//! Connections owned by a running worker.
//!
//! Each handle is taken out on close. The HTTP transport and the NATS
//! connection only shut down once every clone is gone, so the lifecycle drops
//! the dispatcher (and with it the processor's handles) before closing.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use super::{BaseResources, HttpFetchClient};

const BROKER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// The store pool, the broker client and the HTTP transport.
pub struct WorkerResources {
    pool: PgPool,
    nats: Mutex<Option<async_nats::Client>>,
    http: Mutex<Option<Arc<HttpFetchClient>>>,
}

impl WorkerResources {
    pub fn new(pool: PgPool, nats: async_nats::Client, http: Arc<HttpFetchClient>) -> Self {
        Self {
            pool,
            nats: Mutex::new(Some(nats)),
            http: Mutex::new(Some(http)),
        }
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

/// Drop our handle in `slot`.
///
/// `Ok(true)` if it was the last one, `Err(n)` with the number of handles
/// still held elsewhere, `Ok(false)` if the slot was already empty.
fn release_last<T>(slot: &Mutex<Option<Arc<T>>>) -> Result<bool, usize> {
    let Some(handle) = take(slot) else {
        return Ok(false);
    };
    match Arc::try_unwrap(handle) {
        Ok(last) => {
            drop(last);
            Ok(true)
        }
        Err(shared) => Err(Arc::strong_count(&shared) - 1),
    }
}

#[async_trait]
impl BaseResources for WorkerResources {
    async fn close_store(&self) {
        self.pool.close().await;
        info!("database pool closed");
    }

    async fn close_transport(&self) {
        match release_last(&self.http) {
            Ok(true) => info!("http transport closed"),
            Ok(false) => {}
            Err(remaining) => warn!(
                remaining,
                "http transport still held by unfinished tasks, it closes when they finish"
            ),
        }
    }

    async fn close_broker(&self) {
        let Some(client) = take(&self.nats) else {
            return;
        };

        // Push out any pending acks before the connection goes away
        match tokio::time::timeout(BROKER_FLUSH_TIMEOUT, client.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to flush NATS connection"),
            Err(_) => warn!("timed out flushing NATS connection"),
        }
        drop(client);
        info!("NATS connection flushed and worker handle released");
    }
}
