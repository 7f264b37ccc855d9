use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::metrics::MetricsSink;
use crate::query::{CypherQuery, QueryBatch};
use crate::runner::CypherRunner;

/// Serializes concurrent submissions onto a single long-lived worker,
/// opportunistically merging pending submissions into larger downstream
/// calls while preserving per-caller result identity.
///
/// Grounded on `neoutils/batch_cypher_runner.go`'s `BatchCypherRunner`:
/// one buffered channel, one worker goroutine, a drain loop bounded by
/// `count`.
pub struct BatchCoalescer {
    tx: mpsc::Sender<QueryBatch>,
}

struct PendingWork {
    queries: Vec<CypherQuery>,
    acks: Vec<oneshot::Sender<Option<Error>>>,
}

impl PendingWork {
    fn new() -> Self {
        PendingWork {
            queries: Vec::new(),
            acks: Vec::new(),
        }
    }

    fn absorb(&mut self, batch: QueryBatch) {
        self.queries.extend(batch.queries);
        self.acks.push(batch.done);
    }
}

impl BatchCoalescer {
    /// `capacity` is the preferred upper bound on batched queries, and
    /// also the bound on the serialization channel itself, so a full
    /// channel blocks submitters — the intentional backpressure
    /// mechanism.
    pub fn new(
        runner: Arc<dyn CypherRunner>,
        capacity: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(worker_loop(rx, runner, capacity, metrics));
        BatchCoalescer { tx }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<QueryBatch>,
    runner: Arc<dyn CypherRunner>,
    capacity: usize,
    metrics: Arc<dyn MetricsSink>,
) {
    loop {
        let Some(first) = rx.recv().await else {
            return; // all senders dropped, coalescer is shutting down
        };
        let mut pending = PendingWork::new();
        pending.absorb(first);
        metrics.set_pending_depth(pending.queries.len() as u64);

        // Drain phase: best-effort coalesce, not a hard cap. A single
        // submission larger than `capacity` is dispatched whole; only the
        // drain loop itself stops growing the batch once it would reach
        // `capacity`. `try_recv` is a single non-blocking read — no timer,
        // no polling.
        while pending.queries.len() < capacity {
            match rx.try_recv() {
                Ok(batch) => {
                    pending.absorb(batch);
                    metrics.set_pending_depth(pending.queries.len() as u64);
                }
                Err(_) => break,
            }
        }

        let dispatch_size = pending.queries.len() as u64;
        let started = Instant::now();
        let result = runner.cypher_batch(pending.queries).await;
        metrics.record_dispatch_latency(started.elapsed());
        metrics.record_dispatch_size(dispatch_size);
        metrics.set_pending_depth(0);

        // Fan-out: the same error (or success) to every submitter in this
        // dispatch group, in order.
        let outcome = result.err();
        for ack in pending.acks {
            let _ = ack.send(outcome.clone());
        }
    }
}

#[async_trait]
impl CypherRunner for BatchCoalescer {
    async fn cypher_batch(&self, queries: Vec<CypherQuery>) -> Result<(), Error> {
        let (done, wait) = oneshot::channel();
        let batch = QueryBatch { queries, done };
        // Blocks the caller when the channel is full — the bounded-queue
        // backpressure mechanism.
        if self.tx.send(batch).await.is_err() {
            return Err(Error::NotConnected);
        }
        match wait.await {
            Ok(Some(err)) => Err(err),
            Ok(None) => Ok(()),
            Err(_) => Err(Error::NotConnected), // worker dropped without replying
        }
    }
}
