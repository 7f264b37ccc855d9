use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;

/// A caller-provided decode target. Receives the canonical JSON list of
/// rows for its statement and is responsible for unmarshaling it into
/// whatever shape the caller actually wants — a struct, a `Vec<T>`, or a
/// single scalar. The core never interprets the shape.
pub type ResultSink = Box<dyn FnMut(Value) -> Result<(), Error> + Send>;

/// One opaque Cypher statement, its parameters, and an optional sink.
///
/// A value object: the core reads it but never mutates the fields a
/// caller set, beyond driving `sink` with the decoded rows.
pub struct CypherQuery {
    pub statement: String,
    pub parameters: serde_json::Map<String, Value>,
    pub sink: Option<ResultSink>,
}

impl CypherQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        CypherQuery {
            statement: statement.into(),
            parameters: serde_json::Map::new(),
            sink: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_sink(mut self, sink: ResultSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Convenience for the common case: decode rows into a `T: DeserializeOwned`.
    pub fn decode_into<T>(statement: impl Into<String>, slot: std::sync::Arc<std::sync::Mutex<T>>) -> Self
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        CypherQuery::new(statement).with_sink(Box::new(move |rows| {
            let decoded: T = serde_json::from_value(rows)
                .map_err(|e| Error::Decoding(format!("couldn't unmarshal into sink: {e}")))?;
            *slot.lock().expect("sink mutex poisoned") = decoded;
            Ok(())
        }))
    }
}

/// One caller submission: an ordered list of statements and exactly one
/// channel through which the submission's single terminal result is
/// delivered.
pub struct QueryBatch {
    pub queries: Vec<CypherQuery>,
    pub done: oneshot::Sender<Option<Error>>,
}

/// Zips `columns`/`row` pairs into ordered JSON objects, one per record.
/// Mirrors `neoutils/session.go`'s `combineColumnsAndRows`.
pub fn combine_columns_and_rows(columns: &[String], rows: &[Vec<Value>]) -> Result<Vec<Value>, Error> {
    rows.iter()
        .map(|row| {
            if row.len() != columns.len() {
                return Err(Error::Decoding(
                    "len(columns) is not equal to len(row)".into(),
                ));
            }
            let mut obj = serde_json::Map::with_capacity(columns.len());
            for (col, val) in columns.iter().zip(row.iter()) {
                obj.insert(col.clone(), val.clone());
            }
            Ok(Value::Object(obj))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn combine_zips_columns_with_rows() {
        let columns = vec!["n".to_string(), "age".to_string()];
        let rows = vec![
            vec![Value::String("ada".into()), Value::from(30)],
            vec![Value::String("grace".into()), Value::from(40)],
        ];
        let combined = combine_columns_and_rows(&columns, &rows).unwrap();
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0]["n"], Value::String("ada".into()));
        assert_eq!(combined[1]["age"], Value::from(40));
    }

    #[test]
    fn arity_mismatch_is_a_decoding_error() {
        let columns = vec!["n".to_string()];
        let rows = vec![vec![Value::from(1), Value::from(2)]];
        let err = combine_columns_and_rows(&columns, &rows).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decoding);
    }

    #[derive(Debug, Default, PartialEq, serde::Deserialize)]
    struct Row {
        name: String,
    }

    #[test]
    fn decode_into_round_trips_a_known_list_of_rows() {
        let slot = Arc::new(Mutex::new(Vec::<Row>::new()));
        let mut query = CypherQuery::decode_into::<Vec<Row>>("MATCH (n) RETURN n.name as name", slot.clone());
        let rows = serde_json::json!([{"name": "ada"}, {"name": "grace"}]);
        (query.sink.as_mut().unwrap())(rows).unwrap();
        let decoded = slot.lock().unwrap();
        assert_eq!(
            *decoded,
            vec![
                Row { name: "ada".into() },
                Row { name: "grace".into() },
            ]
        );
    }
}
