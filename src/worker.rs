//! The worker pool.
//!
//! LDAP work runs on a fixed set of workers, each a strictly serial
//! executor owning its own connection cache. A submission is pinned to one
//! worker for its whole duration, which is what lets the cache go without
//! locks. Between jobs a worker watches its cache's earliest idle deadline
//! and evicts expired connections.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::ldap::cache::ConnectionCache;

/// Queued jobs per worker before submitters start waiting.
const WORKER_QUEUE_DEPTH: usize = 32;

type Job = Box<
    dyn for<'a> FnOnce(&'a mut ConnectionCache) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
        + Send,
>;

/// Fixed-size pool of serial executors.
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `cfg.pool_size` workers.
    pub fn new(cfg: &Config) -> Self {
        let mut senders = Vec::with_capacity(cfg.pool_size);
        let mut handles = Vec::with_capacity(cfg.pool_size);
        for _ in 0..cfg.pool_size {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(rx, ConnectionCache::new(cfg.idle()))));
        }
        Self {
            senders,
            handles,
            next: AtomicUsize::new(0),
        }
    }

    /// Runs `f` on one worker and returns its result. The job holds its
    /// worker for the whole call; submissions are spread round-robin.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut ConnectionCache) -> Pin<Box<dyn Future<Output = T> + Send + 'a>>
            + Send
            + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |cache| {
            Box::pin(async move {
                let _ = tx.send(f(cache).await);
            })
        });

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index]
            .send(job)
            .await
            .map_err(|_| Error::Internal("worker pool is not running".into()))?;
        rx.await
            .map_err(|_| Error::Internal("worker dropped the request".into()))
    }

    /// Stops accepting work and waits for every worker to drain and close
    /// its cached connections.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!("worker pool shut down");
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Job>, mut cache: ConnectionCache) {
    loop {
        let deadline = cache.next_expiry();
        tokio::select! {
            maybe_job = rx.recv() => match maybe_job {
                Some(job) => job(&mut cache).await,
                None => break,
            },
            _ = idle_sleep(deadline) => cache.evict_expired().await,
        }
    }
    cache.close_all().await;
}

async fn idle_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
