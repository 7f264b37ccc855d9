use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::Error;
use crate::query::CypherQuery;
use crate::session::Session;

/// A schema index as reported by `SHOW INDEXES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub label: String,
    pub properties: Vec<String>,
}

/// A unique constraint as reported by `SHOW UNIQUE CONSTRAINTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub label: String,
    pub properties: Vec<String>,
}

/// Schema operations and pass-through query dispatch, all expressed as
/// Cypher sent through a [`Session`]. Mirrors `neoutils/database.go`'s
/// `neoDB`.
pub struct Database {
    session: Session,
}

fn is_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn rows_sink(slot: Arc<Mutex<Vec<Value>>>) -> crate::query::ResultSink {
    Box::new(move |rows| {
        let Value::Array(rows) = rows else {
            return Err(Error::Decoding("expected a JSON array of rows".into()));
        };
        *slot.lock().expect("sink mutex poisoned") = rows;
        Ok(())
    })
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let arr = value?.as_array()?;
    arr.iter().map(|v| v.as_str().map(str::to_string)).collect()
}

impl Database {
    pub fn new(session: Session) -> Self {
        Database { session }
    }

    /// `SHOW INDEXES`, optionally filtered by label. System indexes with
    /// null labels/properties are skipped.
    pub async fn indexes(&self, label: &str) -> Result<Vec<Index>, Error> {
        let statement = if label.is_empty() {
            "SHOW INDEXES"
        } else {
            "SHOW INDEXES WHERE $label IN labelsOrTypes"
        };
        let mut params = serde_json::Map::new();
        params.insert("label".into(), Value::String(label.to_string()));

        let slot = Arc::new(Mutex::new(Vec::new()));
        let mut queries = vec![CypherQuery::new(statement)
            .with_parameters(params)
            .with_sink(rows_sink(slot.clone()))];
        self.session.send(&mut queries).await?;

        let rows = std::mem::take(&mut *slot.lock().expect("sink mutex poisoned"));
        let mut out = Vec::new();
        for row in rows {
            let Some(labels) = string_list(row.get("labelsOrTypes")) else {
                continue; // system index, no label
            };
            let Some(properties) = string_list(row.get("properties")) else {
                continue;
            };
            let Some(label) = labels.last().cloned() else {
                continue;
            };
            let name = row
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Decoding("index row missing name".into()))?
                .to_string();
            out.push(Index {
                name,
                label,
                properties,
            });
        }
        Ok(out)
    }

    /// `SHOW UNIQUE CONSTRAINTS`, filtered by label (required) and
    /// optionally by property.
    pub async fn unique_constraints(
        &self,
        label: &str,
        property: &str,
    ) -> Result<Vec<UniqueConstraint>, Error> {
        if label.is_empty() {
            return Err(Error::Configuration("label not provided".into()));
        }
        let statement = if property.is_empty() {
            "SHOW UNIQUE CONSTRAINTS WHERE $label IN labelsOrTypes"
        } else {
            "SHOW UNIQUE CONSTRAINTS WHERE $label IN labelsOrTypes AND $property IN properties"
        };
        let mut params = serde_json::Map::new();
        params.insert("label".into(), Value::String(label.to_string()));
        params.insert("property".into(), Value::String(property.to_string()));

        let slot = Arc::new(Mutex::new(Vec::new()));
        let mut queries = vec![CypherQuery::new(statement)
            .with_parameters(params)
            .with_sink(rows_sink(slot.clone()))];
        self.session.send(&mut queries).await?;

        let rows = std::mem::take(&mut *slot.lock().expect("sink mutex poisoned"));
        let mut out = Vec::new();
        for row in rows {
            let labels = string_list(row.get("labelsOrTypes"))
                .ok_or_else(|| Error::Decoding("couldn't get constraint labels".into()))?;
            let properties = string_list(row.get("properties"))
                .ok_or_else(|| Error::Decoding("couldn't get constraint properties".into()))?;
            let label = labels
                .last()
                .cloned()
                .ok_or_else(|| Error::Decoding("couldn't get constraint last label".into()))?;
            let name = row
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Decoding("couldn't get constraint name".into()))?
                .to_string();
            out.push(UniqueConstraint {
                name,
                label,
                properties,
            });
        }
        Ok(out)
    }

    /// `CREATE INDEX {label}_{property} FOR (n:{label}) ON (n.{property})`.
    /// Interpolated by string substitution, since Neo4j rejects parameters
    /// in DDL — identifiers are validated first.
    pub async fn create_index(&self, label: &str, property: &str) -> Result<(), Error> {
        if !is_safe_identifier(label) || !is_safe_identifier(property) {
            return Err(Error::Configuration(format!(
                "unsafe identifier in CREATE INDEX: label={label:?} property={property:?}"
            )));
        }
        let statement = format!(
            "CREATE INDEX {label}_{property} FOR (n:{label}) ON (n.{property})",
        );
        let mut queries = vec![CypherQuery::new(statement)];
        self.session.send(&mut queries).await
    }

    /// `CREATE CONSTRAINT {label}_{property} IF NOT EXISTS ON (m:{label}) ASSERT m.{property} IS UNIQUE`.
    pub async fn create_unique_constraint(&self, label: &str, property: &str) -> Result<(), Error> {
        if label.is_empty() || property.is_empty() {
            return Err(Error::Configuration("label or property not set".into()));
        }
        if !is_safe_identifier(label) || !is_safe_identifier(property) {
            return Err(Error::Configuration(format!(
                "unsafe identifier in CREATE CONSTRAINT: label={label:?} property={property:?}"
            )));
        }
        let statement = format!(
            "CREATE CONSTRAINT {label}_{property} IF NOT EXISTS ON (m:{label}) ASSERT m.{property} IS UNIQUE",
        );
        let mut queries = vec![CypherQuery::new(statement)];
        self.session.send(&mut queries).await
    }

    pub async fn cypher_batch(&self, mut queries: Vec<CypherQuery>) -> Result<(), Error> {
        self.session.send(&mut queries).await
    }
}

/// For each `(label, property)` pair, creates the index if no existing
/// index already covers exactly that single property. Stops at the first
/// failure.
pub async fn ensure_indexes(db: &Database, requirements: &[(String, String)]) -> Result<(), Error> {
    for (label, property) in requirements {
        let existing = db.indexes(label).await?;
        let already_present = existing
            .iter()
            .any(|idx| idx.properties == [property.clone()]);
        if !already_present {
            tracing::info!(%label, %property, "creating missing index");
            db.create_index(label, property).await?;
        }
    }
    Ok(())
}

/// Same as [`ensure_indexes`] but for unique constraints.
pub async fn ensure_constraints(
    db: &Database,
    requirements: &[(String, String)],
) -> Result<(), Error> {
    for (label, property) in requirements {
        let existing = db.unique_constraints(label, property).await?;
        let already_present = existing
            .iter()
            .any(|uc| uc.properties == [property.clone()]);
        if !already_present {
            tracing::info!(%label, %property, "creating missing unique constraint");
            db.create_unique_constraint(label, property).await?;
        }
    }
    Ok(())
}
