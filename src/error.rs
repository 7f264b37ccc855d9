use std::fmt;
use std::sync::Arc;

/// One `{code, message}` entry reported by the Neo4j transactional endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

const CONSTRAINT_VIOLATION_PREFIX: &str = "Neo.ClientError.Schema.ConstraintViolation";

impl ServerError {
    pub fn is_constraint_violation(&self) -> bool {
        self.code.starts_with(CONSTRAINT_VIOLATION_PREFIX)
    }
}

/// All failure modes the core can return.
///
/// `Clone`, so the coalescer's fan-out (every submitter in a dispatch
/// group gets the *same* error) can hand an equal value to every caller
/// instead of plumbing `Arc<Error>` through the public `CypherRunner`
/// surface. The one field that isn't `Clone` on its own (`reqwest::Error`)
/// is wrapped in an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid configuration: bad URL, missing label/property for DDL, unsafe identifier.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No live connection is currently published by the supervisor.
    #[error("not connected to neo4j")]
    NotConnected,

    /// Transport-level failure: non-2xx, I/O error, malformed JSON envelope.
    #[error("transport error: {source}")]
    Transport {
        source: Arc<reqwest::Error>,
        /// `Some(true)` if retrying the same request is likely to succeed.
        temporary: Option<bool>,
    },

    /// One or more statements failed server-side; the transaction was rolled back.
    #[error("{} neo4j statement error(s)", .0.len())]
    LogicalErrors(Vec<ServerError>),

    /// Response shape did not match expectations (arity mismatch, sink unmarshal failure).
    #[error("decoding error: {0}")]
    Decoding(String),
}

impl Error {
    pub fn transport(source: reqwest::Error) -> Self {
        let temporary = Some(source.is_connect() || source.is_timeout() || source.is_body());
        Error::Transport {
            source: Arc::new(source),
            temporary,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::LogicalErrors(errs) if errs.iter().any(ServerError::is_constraint_violation) => {
                ErrorKind::ConstraintViolation
            }
            Error::LogicalErrors(_) => ErrorKind::Logical,
            Error::Decoding(_) => ErrorKind::Decoding,
        }
    }

    /// Whether the supervisor should arm a reconnect after seeing this error
    /// from a downstream dispatch. Logical/constraint errors never
    /// reconnect; a transport error reconnects unless declared temporary;
    /// everything else reconnects by conservative default.
    pub fn should_reconnect(&self) -> bool {
        match self {
            Error::LogicalErrors(_) => false,
            Error::Transport { temporary, .. } => !temporary.unwrap_or(false),
            Error::NotConnected | Error::Configuration(_) | Error::Decoding(_) => true,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    NotConnected,
    Transport,
    Logical,
    ConstraintViolation,
    Decoding,
}

impl ErrorKind {
    pub fn to_metric_label(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Transport => "transport",
            ErrorKind::Logical => "logical",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Decoding => "decoding",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_metric_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_is_detected_by_code_prefix() {
        let err = ServerError {
            code: "Neo.ClientError.Schema.ConstraintViolation.UniqueProperty".into(),
            message: "already exists".into(),
        };
        assert!(err.is_constraint_violation());
        assert_eq!(
            Error::LogicalErrors(vec![err]).kind(),
            ErrorKind::ConstraintViolation
        );
    }

    #[test]
    fn plain_logical_error_does_not_reconnect() {
        let err = Error::LogicalErrors(vec![ServerError {
            code: "Neo.ClientError.Statement.SyntaxError".into(),
            message: "bad cypher".into(),
        }]);
        assert!(!err.should_reconnect());
    }

    #[test]
    fn decoding_and_not_connected_reconnect_by_conservative_default() {
        assert!(Error::Decoding("bad shape".into()).should_reconnect());
        assert!(Error::NotConnected.should_reconnect());
    }

    #[tokio::test]
    async fn should_reconnect_honors_the_temporary_flag() {
        let source = Arc::new(
            reqwest::Client::new()
                .get("http://127.0.0.1:1")
                .send()
                .await
                .unwrap_err(),
        );
        assert!(!Error::Transport {
            source: source.clone(),
            temporary: Some(true),
        }
        .should_reconnect());
        assert!(Error::Transport {
            source,
            temporary: Some(false),
        }
        .should_reconnect());
    }

    #[tokio::test]
    async fn transport_classifies_connect_failures_as_temporary() {
        let source = reqwest::Client::new()
            .get("http://127.0.0.1:1")
            .send()
            .await
            .unwrap_err();
        assert!(source.is_connect());
        let err = Error::transport(source);
        assert!(matches!(err, Error::Transport { temporary: Some(true), .. }));
        assert!(!err.should_reconnect());
    }
}
