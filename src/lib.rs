//! A resilient, batched HTTP client for Neo4j's transactional endpoint.
//!
//! Five components, wired together by [`connect`]: [`Session`] encodes and
//! decodes the wire protocol, [`Database`] layers schema operations on top
//! of it, [`BatchCoalescer`] merges concurrent submissions onto one
//! downstream call, and [`AutoConnectSupervisor`] keeps all of that usable
//! across reconnects.

pub mod backoff;
pub mod coalescer;
pub mod database;
pub mod error;
pub mod metrics;
pub mod query;
pub mod runner;
pub mod session;
pub mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use coalescer::BatchCoalescer;
pub use database::{Database, Index, UniqueConstraint};
pub use error::{Error, ErrorKind, ServerError};
pub use metrics::{MetricsSink, NoopMetrics};
pub use query::{CypherQuery, ResultSink};
pub use runner::{CypherRunner, TransactionalRunner};
pub use supervisor::{AutoConnectSupervisor, Connection, ConnectFactory, ConnectionState};

/// Tuning knobs for [`connect`]. Grounded on
/// `neoutils/connection.go`'s `ConnectionConfig`/`DefaultConnectionConfig`.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Upper bound on queries merged into one downstream dispatch. `0`
    /// disables the coalescer entirely: callers talk straight to the
    /// runner.
    pub batch_size: usize,
    /// Whether to route through [`TransactionalRunner`] (the only runner
    /// this crate ships). Present for parity with the original
    /// configuration surface; always `true` in practice.
    pub transactional: bool,
    /// Caller-supplied HTTP client. Use this to share connection pooling,
    /// set timeouts, or install TLS config.
    pub http_client: reqwest::Client,
    /// Wraps the runner in an [`AutoConnectSupervisor`] so callers can
    /// submit work and declare schema requirements before the first
    /// connection succeeds, and survive later outages.
    pub background_connect: bool,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub user_agent: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            batch_size: 50,
            transactional: true,
            http_client: reqwest::Client::new(),
            background_connect: true,
            reconnect_base_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(30),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Everything a connected caller needs: a [`CypherRunner`] to submit
/// queries through, and (when `background_connect` is off) a schema
/// surface. When `background_connect` is on, schema management goes
/// through the returned [`AutoConnectSupervisor`] instead, which buffers
/// and replays requirements across reconnects.
pub enum Neo4jClient {
    /// A single, already-established connection. Failures are terminal:
    /// nothing reconnects automatically.
    Direct {
        runner: Arc<dyn CypherRunner>,
        database: Arc<Database>,
    },
    /// A supervised connection that reconnects with backoff and replays
    /// buffered schema requirements after every (re)connection.
    Supervised(Arc<AutoConnectSupervisor>),
}

impl Neo4jClient {
    pub fn runner(&self) -> Arc<dyn CypherRunner> {
        match self {
            Neo4jClient::Direct { runner, .. } => runner.clone(),
            Neo4jClient::Supervised(supervisor) => supervisor.clone(),
        }
    }

    /// Ensures each `(label, property)` pair has a matching index,
    /// creating it if absent. Under `background_connect`, this just
    /// buffers the requirement if not yet connected; otherwise it runs
    /// immediately.
    pub async fn ensure_indexes(&self, requirements: HashMap<String, String>) -> Result<(), Error> {
        match self {
            Neo4jClient::Direct { database, .. } => {
                let pairs: Vec<(String, String)> = requirements.into_iter().collect();
                database::ensure_indexes(database, &pairs).await
            }
            Neo4jClient::Supervised(supervisor) => supervisor.ensure_indexes(requirements).await,
        }
    }

    pub async fn ensure_constraints(&self, requirements: HashMap<String, String>) -> Result<(), Error> {
        match self {
            Neo4jClient::Direct { database, .. } => {
                let pairs: Vec<(String, String)> = requirements.into_iter().collect();
                database::ensure_constraints(database, &pairs).await
            }
            Neo4jClient::Supervised(supervisor) => supervisor.ensure_constraints(requirements).await,
        }
    }
}

/// Builds the Session → Database → (Transactional) → (Coalescer?) →
/// (Supervisor?) stack, wired according to
/// `config`. `base_url` is the Neo4j HTTP endpoint root, e.g.
/// `http://localhost:7474`.
///
/// When `config.background_connect` is set, this returns immediately: the
/// supervisor validates `base_url` synchronously but connects in the
/// background, so the very first call may race a not-yet-established
/// connection (callers get [`Error::NotConnected`] until then). Otherwise, this call performs the first connection inline and
/// fails the whole call if it doesn't succeed.
pub async fn connect(base_url: &str, config: ConnectionConfig) -> Result<Neo4jClient, Error> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetrics);
    let base_url = base_url.to_string();
    let user_agent = config.user_agent.clone();
    let http_client = config.http_client.clone();
    let batch_size = config.batch_size;
    let metrics_for_factory = metrics.clone();

    if config.background_connect {
        let factory_url = base_url.clone();
        let factory = supervisor::factory_fn(move || {
            let url = factory_url.clone();
            let client = http_client.clone();
            let user_agent = user_agent.clone();
            let metrics = metrics_for_factory.clone();
            async move { build_connection(&url, client, user_agent, batch_size, metrics).await }
        });

        let supervisor = AutoConnectSupervisor::connect(
            &base_url,
            factory,
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            metrics,
        )?;
        Ok(Neo4jClient::Supervised(Arc::new(supervisor)))
    } else {
        let parsed = url::Url::parse(&base_url).map_err(|e| Error::Configuration(e.to_string()))?;
        if parsed.host_str().unwrap_or("").is_empty() {
            return Err(Error::Configuration(format!("inappropriate url: {base_url}")));
        }
        let supervisor::Connection { runner, database } =
            build_connection(&base_url, http_client, user_agent, batch_size, metrics).await?;
        Ok(Neo4jClient::Direct { runner, database })
    }
}

async fn build_connection(
    base_url: &str,
    http_client: reqwest::Client,
    user_agent: String,
    batch_size: usize,
    metrics: Arc<dyn MetricsSink>,
) -> Result<supervisor::Connection, Error> {
    let session = session::Session::new(http_client, base_url, user_agent);
    let database = Arc::new(Database::new(session));
    let transactional: Arc<dyn CypherRunner> = Arc::new(TransactionalRunner::new(database.clone()));

    let runner: Arc<dyn CypherRunner> = if batch_size == 0 {
        transactional
    } else {
        Arc::new(BatchCoalescer::new(transactional, batch_size, metrics))
    };

    Ok(supervisor::Connection { runner, database })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_connect_rejects_bad_url_synchronously() {
        let err = connect(
            "not a url",
            ConnectionConfig {
                background_connect: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn foreground_connect_rejects_bad_url_synchronously() {
        let err = connect(
            "not a url",
            ConnectionConfig {
                background_connect: false,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn background_connect_returns_before_the_backend_is_reachable() {
        let client = connect(
            "http://127.0.0.1:1",
            ConnectionConfig {
                background_connect: true,
                reconnect_base_delay: Duration::from_millis(5),
                reconnect_max_delay: Duration::from_millis(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = client
            .runner()
            .cypher_batch(vec![CypherQuery::new("RETURN 1")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
