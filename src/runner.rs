use std::sync::Arc;

use async_trait::async_trait;

use crate::database::Database;
use crate::error::Error;
use crate::query::CypherQuery;

/// The capability the batching layer actually depends on: submit a list
/// of statements, get back one terminal error (or success). Grounded on
/// `neoutils/interfaces.go`'s `CypherRunner`.
#[async_trait]
pub trait CypherRunner: Send + Sync {
    async fn cypher_batch(&self, queries: Vec<CypherQuery>) -> Result<(), Error>;
}

/// Degenerate adapter presenting a [`Database`] as a [`CypherRunner`].
/// Kept as its own type, not inlined, so the batching layer can be
/// composed with any `CypherRunner` (test doubles, alternative
/// transports) — mirrors `neoutils/transactional_cypher_runner.go`.
#[derive(Clone)]
pub struct TransactionalRunner {
    database: Arc<Database>,
}

impl TransactionalRunner {
    pub fn new(database: Arc<Database>) -> Self {
        TransactionalRunner { database }
    }
}

#[async_trait]
impl CypherRunner for TransactionalRunner {
    async fn cypher_batch(&self, queries: Vec<CypherQuery>) -> Result<(), Error> {
        self.database.cypher_batch(queries).await
    }
}
