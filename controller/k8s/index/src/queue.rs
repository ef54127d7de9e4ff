//! A keyed work queue for reconciliation passes.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Semaphore},
    task::{self, JoinSet},
    time,
};

/// Enqueues keys for reconciliation.
#[derive(Clone, Debug)]
pub struct Queue(mpsc::UnboundedSender<String>);

/// Processes enqueued keys.
///
/// A key runs at most once at a time; a key enqueued while in flight runs once
/// more after the current pass finishes. Failed passes are retried with
/// exponential backoff, reset when the key succeeds. A pass that panics counts
/// as a failure.
#[derive(Debug)]
pub struct Worker {
    rx: mpsc::UnboundedReceiver<String>,
    retry_tx: mpsc::UnboundedSender<String>,
    retry_rx: mpsc::UnboundedReceiver<String>,
    concurrency: usize,
    backoff: Backoff,

    queued: HashSet<String>,
    ready: VecDeque<String>,
    in_flight: HashSet<String>,
    dirty: HashSet<String>,
    failures: HashMap<String, u32>,
}

#[derive(Copy, Clone, Debug)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

pub fn channel(concurrency: usize) -> (Queue, Worker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (retry_tx, retry_rx) = mpsc::unbounded_channel();
    let worker = Worker {
        rx,
        retry_tx,
        retry_rx,
        concurrency: concurrency.max(1),
        backoff: Backoff::default(),
        queued: HashSet::new(),
        ready: VecDeque::new(),
        in_flight: HashSet::new(),
        dirty: HashSet::new(),
        failures: HashMap::new(),
    };
    (Queue(tx), worker)
}

// === impl Queue ===

impl Queue {
    /// A queue whose keys are read directly, without a worker.
    #[cfg(test)]
    pub(crate) fn unbounded() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn enqueue(&self, key: impl Into<String>) {
        // The worker only stops at shutdown.
        let _ = self.0.send(key.into());
    }
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// The delay before the retry following `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.min.saturating_mul(factor).min(self.max)
    }
}

// === impl Worker ===

impl Worker {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs until shutdown is signaled, abandoning pending work.
    pub async fn run<F, Fut, E>(mut self, reconcile: F, shutdown: drain::Watch)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut passes = HashMap::<task::Id, String>::new();
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        loop {
            while limit.available_permits() > 0 {
                let Some(key) = self.next_ready() else {
                    break;
                };
                let Ok(permit) = limit.clone().try_acquire_owned() else {
                    self.push(key);
                    break;
                };
                self.in_flight.insert(key.clone());
                let pass = reconcile(key.clone());
                let handle = tasks.spawn(async move {
                    let res = pass.await.map_err(|e| e.to_string());
                    drop(permit);
                    res
                });
                passes.insert(handle.id(), key);
            }

            tokio::select! {
                biased;
                release = &mut shutdown => {
                    tracing::debug!(pending = self.ready.len(), "Abandoning queued work");
                    tasks.abort_all();
                    drop(release);
                    return;
                }
                Some(done) = tasks.join_next_with_id() => {
                    let (id, res) = match done {
                        Ok((id, res)) => (id, res),
                        Err(error) => (error.id(), Err(error.to_string())),
                    };
                    if let Some(key) = passes.remove(&id) {
                        self.complete(key, res);
                    }
                }
                Some(key) = self.rx.recv() => {
                    self.push(key);
                    while let Ok(key) = self.rx.try_recv() {
                        self.push(key);
                    }
                }
                Some(key) = self.retry_rx.recv() => self.push(key),
            }
        }
    }

    fn push(&mut self, key: String) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    fn next_ready(&mut self) -> Option<String> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        Some(key)
    }

    fn complete(&mut self, key: String, res: Result<(), String>) {
        self.in_flight.remove(&key);
        match res {
            Ok(()) => {
                self.failures.remove(&key);
            }
            Err(error) => {
                let failures = self.failures.entry(key.clone()).or_default();
                *failures += 1;
                let delay = self.backoff.delay(*failures);
                tracing::warn!(%key, %error, ?delay, "Reconciliation failed");
                let tx = self.retry_tx.clone();
                let retry = key.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = tx.send(retry);
                });
            }
        }
        if self.dirty.remove(&key) {
            self.push(key);
        }
    }
}
