use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ServerError};
use crate::query::{combine_columns_and_rows, CypherQuery};

/// Encodes a batch of Cypher statements as a single committed transaction
/// via one POST to `{base_url}/tx/commit`, and projects the heterogeneous
/// response back into caller-supplied sinks.
///
/// Mirrors `pageserver/client/src/mgmt_api.rs`'s `Client`: a thin wrapper
/// around a caller-supplied `reqwest::Client` plus one endpoint URL.
pub struct Session {
    client: reqwest::Client,
    commit_url: String,
    user_agent: String,
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a serde_json::Map<String, Value>,
}

#[derive(Serialize)]
struct Payload<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Deserialize)]
struct NeoResult {
    columns: Vec<String>,
    data: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    row: Vec<Value>,
}

#[derive(Deserialize, Default)]
struct NeoResponse {
    #[serde(default)]
    results: Vec<NeoResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

impl Session {
    pub fn new(client: reqwest::Client, base_url: &str, user_agent: String) -> Self {
        Session {
            client,
            commit_url: format!("{}/tx/commit", base_url.trim_end_matches('/')),
            user_agent,
        }
    }

    /// Submits `queries` as one committed transaction. On success, drives
    /// each query's sink (if any) with its projected rows, in order.
    pub async fn send(&self, queries: &mut [CypherQuery]) -> Result<(), Error> {
        let payload = Payload {
            statements: queries
                .iter()
                .map(|q| Statement {
                    statement: &q.statement,
                    parameters: &q.parameters,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.commit_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(Error::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Transport {
                temporary: Some(status.is_server_error()),
                source: Arc::new(
                    response
                        .error_for_status()
                        .expect_err("checked status is an error"),
                ),
            });
        }

        let body: NeoResponse = response.json().await.map_err(Error::transport)?;

        // The commit endpoint returns 200/201 regardless of in-transaction
        // failure; a non-empty `errors` array means the server rolled the
        // transaction back. No results are projected in that case.
        if !body.errors.is_empty() {
            return Err(Error::LogicalErrors(body.errors));
        }

        if body.results.len() != queries.len() {
            return Err(Error::Decoding(format!(
                "expected {} result(s), got {}",
                queries.len(),
                body.results.len()
            )));
        }

        for (query, result) in queries.iter_mut().zip(body.results.into_iter()) {
            let Some(sink) = query.sink.as_mut() else {
                continue;
            };
            let rows: Vec<Vec<Value>> = result.data.into_iter().map(|r| r.row).collect();
            let projected = combine_columns_and_rows(&result.columns, &rows)?;
            sink(Value::Array(projected))?;
        }

        Ok(())
    }
}
