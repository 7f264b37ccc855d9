use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::backoff::retry_forever;
use crate::database::{ensure_constraints, ensure_indexes, Database};
use crate::error::Error;
use crate::metrics::MetricsSink;
use crate::query::CypherQuery;
use crate::runner::CypherRunner;

/// What a successful (re)connection produces: the batching/runner stack
/// callers submit queries through, plus the direct `Database` handle
/// schema replay runs against — schema declarations go straight to
/// `Database`, bypassing the coalescer.
pub struct Connection {
    pub runner: Arc<dyn CypherRunner>,
    pub database: Arc<Database>,
}

/// Produces a fresh [`Connection`], or fails. Invoked repeatedly with
/// backoff by the supervisor's main loop until it succeeds. Grounded on
/// `neoutils/auto_connect.go`'s `connect func() (NeoConnection, error)`
/// parameter.
#[async_trait]
pub trait ConnectFactory: Send + Sync {
    async fn connect(&self) -> Result<Connection, Error>;
}

struct FnFactory<F>(F);

#[async_trait]
impl<F, Fut> ConnectFactory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Connection, Error>> + Send,
{
    async fn connect(&self) -> Result<Connection, Error> {
        (self.0)().await
    }
}

/// Wraps a plain async closure as a [`ConnectFactory`].
pub fn factory_fn<F, Fut>(f: F) -> Arc<dyn ConnectFactory>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Connection, Error>> + Send + 'static,
{
    Arc::new(FnFactory(f))
}

/// Observable lifecycle state. The authoritative state is really "is a
/// connection currently published"; this enum exists for logging and
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    connection: Option<Connection>,
    state: ConnectionState,
    indexes: Vec<(String, String)>,
    constraints: Vec<(String, String)>,
}

/// Keeps a logical connection usable across transient outages: accepts
/// work before the backend is reachable, reconnects with backoff, and
/// replays buffered schema requirements after every (re)connection.
/// Grounded on `neoutils/auto_connect.go`'s `AutoConnectTransactional`.
pub struct AutoConnectSupervisor {
    shared: Arc<RwLock<Shared>>,
    reconnect_tx: mpsc::Sender<()>,
    metrics: Arc<dyn MetricsSink>,
}

impl AutoConnectSupervisor {
    /// Validates `url` synchronously — an empty host is rejected before
    /// the main loop ever starts — then starts the main loop and returns
    /// immediately, usable even before the first connection succeeds.
    pub fn connect(
        url: &str,
        factory: Arc<dyn ConnectFactory>,
        base_delay: Duration,
        max_delay: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, Error> {
        let parsed = url::Url::parse(url).map_err(|e| Error::Configuration(e.to_string()))?;
        if parsed.host_str().unwrap_or("").is_empty() {
            return Err(Error::Configuration(format!("inappropriate url: {url}")));
        }

        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        // Pre-armed: the supervisor starts disconnected, so the main loop
        // must attempt a connection immediately.
        reconnect_tx
            .try_send(())
            .expect("freshly created channel has capacity");

        let shared = Arc::new(RwLock::new(Shared {
            connection: None,
            state: ConnectionState::Disconnected,
            indexes: Vec::new(),
            constraints: Vec::new(),
        }));

        tokio::spawn(main_loop(
            shared.clone(),
            factory,
            base_delay,
            max_delay,
            reconnect_tx.clone(),
            reconnect_rx,
        ));

        Ok(AutoConnectSupervisor {
            shared,
            reconnect_tx,
            metrics,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.read().await.state
    }

    fn arm_reconnect(&self) {
        // Coalesced: capacity-1 channel, non-blocking send. Many
        // concurrent failures cause at most one extra reconnect cycle.
        let _ = self.reconnect_tx.try_send(());
    }

    pub async fn ensure_indexes(&self, indexes: HashMap<String, String>) -> Result<(), Error> {
        let mut shared = self.shared.write().await;
        shared.indexes.extend(indexes);
        self.arm_reconnect();
        Ok(())
    }

    pub async fn ensure_constraints(&self, constraints: HashMap<String, String>) -> Result<(), Error> {
        let mut shared = self.shared.write().await;
        shared.constraints.extend(constraints);
        self.arm_reconnect();
        Ok(())
    }
}

#[async_trait]
impl CypherRunner for AutoConnectSupervisor {
    async fn cypher_batch(&self, queries: Vec<CypherQuery>) -> Result<(), Error> {
        let runner = {
            let shared = self.shared.read().await;
            match &shared.connection {
                Some(conn) => conn.runner.clone(),
                // I5: fail fast, never silently queued.
                None => return Err(Error::NotConnected),
            }
        };

        match runner.cypher_batch(queries).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.should_reconnect() {
                    tracing::warn!(error = %err, "reconnect-worthy error from neo4j, arming reconnect");
                    self.arm_reconnect();
                }
                self.metrics.record_dispatch_size(0);
                Err(err)
            }
        }
    }
}

async fn main_loop(
    shared: Arc<RwLock<Shared>>,
    factory: Arc<dyn ConnectFactory>,
    base_delay: Duration,
    max_delay: Duration,
    reconnect_tx: mpsc::Sender<()>,
    mut reconnect_rx: mpsc::Receiver<()>,
) {
    while reconnect_rx.recv().await.is_some() {
        {
            let mut guard = shared.write().await;
            guard.state = ConnectionState::Connecting;
        }

        let factory_for_attempt = factory.clone();
        let connection = retry_forever(
            base_delay,
            max_delay,
            |err: &Error, delay| {
                tracing::warn!(error = %err, ?delay, "connection to neo4j failed, retrying after backoff");
            },
            move || {
                let factory = factory_for_attempt.clone();
                async move { factory.connect().await }
            },
        )
        .await;

        // Publish the new connection and replay buffered schema
        // requirements atomically under the write lock, so a requirement
        // appended mid-replay is guaranteed visible to the *next* replay
        // rather than racing this one.
        let mut guard = shared.write().await;
        guard.connection = Some(connection);

        let database = guard.connection.as_ref().unwrap().database.clone();
        let replay_result = replay_schema(&database, &guard.indexes, &guard.constraints).await;

        match replay_result {
            Ok(()) => {
                guard.indexes.clear();
                guard.constraints.clear();
                guard.state = ConnectionState::Connected;
                tracing::info!("connected to neo4j and applied all buffered schema requirements");
            }
            Err(err) => {
                tracing::warn!(error = %err, "schema replay failed, dropping connection and retrying");
                guard.connection = None;
                guard.state = ConnectionState::Disconnected;
                // Re-arm so the loop runs again after a fresh factory attempt.
                let _ = reconnect_tx.try_send(());
            }
        }
    }
}

/// Applies every buffered requirement in insertion order, stopping at the
/// first failure, reusing `Database`'s own ensure-semantics for replay.
async fn replay_schema(
    database: &Arc<Database>,
    indexes: &[(String, String)],
    constraints: &[(String, String)],
) -> Result<(), Error> {
    ensure_indexes(database, indexes).await?;
    ensure_constraints(database, constraints).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::metrics::NoopMetrics;

    fn cfg_delays() -> (Duration, Duration) {
        (Duration::from_millis(5), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn bad_url_is_rejected_synchronously() {
        let factory = factory_fn(|| async { unreachable!("factory should never be called") });
        let (base, max) = cfg_delays();
        let err = AutoConnectSupervisor::connect("foo", factory, base, max, Arc::new(NoopMetrics))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn queries_fail_fast_before_first_connection() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate2 = gate.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let factory = factory_fn(move || {
            let gate = gate2.clone();
            let attempts = attempts2.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Err(Error::Configuration("never connects in this test".into()))
            }
        });
        let (base, max) = cfg_delays();
        let supervisor =
            AutoConnectSupervisor::connect("bolt://localhost:1", factory, base, max, Arc::new(NoopMetrics))
                .unwrap();

        let err = supervisor
            .cypher_batch(vec![CypherQuery::new("RETURN 1")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        gate.notify_one();
    }

    struct FixedErrorRunner(Error);

    #[async_trait]
    impl CypherRunner for FixedErrorRunner {
        async fn cypher_batch(&self, _queries: Vec<CypherQuery>) -> Result<(), Error> {
            Err(self.0.clone())
        }
    }

    fn dummy_database() -> Arc<Database> {
        let session = crate::session::Session::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            "test-agent".into(),
        );
        Arc::new(Database::new(session))
    }

    /// A real `reqwest::Error` (from an actual failed connection attempt),
    /// relabeled with a test-chosen `temporary` value — constructing one
    /// from scratch isn't possible outside `reqwest` itself.
    async fn transport_error_with_temporary(temporary: bool) -> Error {
        let source = reqwest::Client::new()
            .get("http://127.0.0.1:1")
            .send()
            .await
            .unwrap_err();
        Error::Transport {
            source: Arc::new(source),
            temporary: Some(temporary),
        }
    }

    #[tokio::test]
    async fn temporary_transport_error_does_not_reconnect() {
        let err = transport_error_with_temporary(true).await;
        assert!(!err.should_reconnect());
    }

    #[tokio::test]
    async fn cypher_runner_arms_reconnect_on_non_temporary_transport_error() {
        let err = transport_error_with_temporary(false).await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate2 = gate.clone();
        let err2 = err.clone();
        let factory = factory_fn(move || {
            let attempts = attempts2.clone();
            let gate = gate2.clone();
            let err = err2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    // First connection: publish a runner that fails every
                    // call with the non-temporary transport error.
                    Ok(Connection {
                        runner: Arc::new(FixedErrorRunner(err)),
                        database: dummy_database(),
                    })
                } else {
                    gate.notify_one();
                    Ok(Connection {
                        runner: Arc::new(FixedErrorRunner(Error::NotConnected)),
                        database: dummy_database(),
                    })
                }
            }
        });
        let (base, max) = cfg_delays();
        let supervisor =
            AutoConnectSupervisor::connect("bolt://localhost:1", factory, base, max, Arc::new(NoopMetrics))
                .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = supervisor
            .cypher_batch(vec![CypherQuery::new("RETURN 1")])
            .await;
        assert!(result.is_err());

        tokio::time::timeout(Duration::from_millis(500), gate.notified())
            .await
            .expect("a non-temporary transport error must trigger a second factory call");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn schema_declarations_return_synchronously_while_disconnected() {
        let factory = factory_fn(|| async {
            // Never actually resolves within the test's lifetime; the
            // point here is only that `ensure_indexes` itself doesn't wait
            // on it.
            std::future::pending::<Result<Connection, Error>>().await
        });
        let (base, max) = cfg_delays();
        let supervisor =
            AutoConnectSupervisor::connect("bolt://localhost:1", factory, base, max, Arc::new(NoopMetrics))
                .unwrap();

        let mut reqs = HashMap::new();
        reqs.insert("Thing".to_string(), "uuid".to_string());
        supervisor.ensure_indexes(reqs.clone()).await.unwrap();
        supervisor.ensure_constraints(reqs).await.unwrap();

        assert_eq!(supervisor.state().await, ConnectionState::Connecting);
    }
}
