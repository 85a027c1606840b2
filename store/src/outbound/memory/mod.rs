//! Table-backed [`RemoteGateway`] for offline demos and tests.
//!
//! Rows live in per-collection vectors. The adapter can be seeded from a JSON
//! fixture, told to fail the next call of an operation, or told to park the
//! next call until the test releases it. Every call is recorded.
//!
//! Results of parked calls are computed when the call arrives, not when it
//! is released, so a parked read returns the data as it was at call time.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{GatewayError, RemoteGateway};
use crate::domain::{Collection, OrderKey, Row, SortDirection};

/// The gateway method a call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    FetchCollection,
    FetchOne,
    Patch,
    Insert,
    Delete,
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub operation: GatewayOperation,
    pub collection: Collection,
    /// Row id for single-row operations.
    pub id: Option<String>,
}

/// Errors raised while seeding the gateway from a fixture file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixtureError {
    #[error("failed to read fixture file at '{path}': {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid fixture JSON: {message}")]
    Parse { message: String },
    #[error("fixture names unknown collection '{name}'")]
    UnknownCollection { name: String },
    #[error("fixture collection '{collection}' must hold an array of objects")]
    NotRows { collection: String },
}

/// Releases a call parked by [`InMemoryGateway::hold_next`].
///
/// Dropping the handle releases the call as well.
#[derive(Debug)]
pub struct GateRelease(oneshot::Sender<()>);

impl GateRelease {
    pub fn release(self) {
        // The parked call may already be gone; nothing to release then.
        let _ = self.0.send(());
    }
}

type CallKey = (Collection, GatewayOperation);

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<Collection, Vec<Row>>,
    failures: HashMap<CallKey, VecDeque<GatewayError>>,
    holds: HashMap<CallKey, VecDeque<oneshot::Receiver<()>>>,
    calls: Vec<GatewayCall>,
}

impl MemoryState {
    fn table(&mut self, collection: Collection) -> &mut Vec<Row> {
        self.tables.entry(collection).or_default()
    }
}

/// In-memory gateway; see the module docs.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `collection` with `rows`, replacing its contents.
    pub fn with_rows(self, collection: Collection, rows: Vec<Row>) -> Self {
        self.set_rows(collection, rows);
        self
    }

    /// Parse a fixture of the form `{ "<collection>": [rows...] }`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] for malformed JSON, unknown collection names,
    /// or collections that are not arrays of objects.
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        let raw: HashMap<String, Value> =
            serde_json::from_str(json).map_err(|e| FixtureError::Parse {
                message: e.to_string(),
            })?;

        let gateway = Self::new();
        for (name, value) in raw {
            let collection = name
                .parse::<Collection>()
                .map_err(|_| FixtureError::UnknownCollection { name: name.clone() })?;
            let Value::Array(items) = value else {
                return Err(FixtureError::NotRows { collection: name });
            };
            let rows = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    _ => Err(FixtureError::NotRows {
                        collection: name.clone(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            gateway.set_rows(collection, rows);
        }
        Ok(gateway)
    }

    /// Load a fixture file; see [`InMemoryGateway::from_json`].
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] if the file cannot be read or parsed.
    pub fn from_fixture(path: &Path) -> Result<Self, FixtureError> {
        let contents = fs::read_to_string(path).map_err(|e| FixtureError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Replace the contents of `collection`.
    pub fn set_rows(&self, collection: Collection, rows: Vec<Row>) {
        *self.lock().table(collection) = rows;
    }

    /// Current contents of `collection`, in storage order.
    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        self.lock()
            .tables
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `operation` on `collection` with `error`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, collection: Collection, operation: GatewayOperation, error: GatewayError) {
        self.lock()
            .failures
            .entry((collection, operation))
            .or_default()
            .push_back(error);
    }

    /// Park the next `operation` on `collection` until the returned handle is
    /// released or dropped.
    pub fn hold_next(&self, collection: Collection, operation: GatewayOperation) -> GateRelease {
        let (sender, receiver) = oneshot::channel();
        self.lock()
            .holds
            .entry((collection, operation))
            .or_default()
            .push_back(receiver);
        GateRelease(sender)
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `operation` on `collection` received so far.
    pub fn call_count(&self, collection: Collection, operation: GatewayOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.collection == collection && call.operation == operation)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch<T>(
        &self,
        collection: Collection,
        operation: GatewayOperation,
        id: Option<&str>,
        apply: impl FnOnce(&mut Vec<Row>) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let (result, gate) = {
            let mut state = self.lock();
            state.calls.push(GatewayCall {
                operation,
                collection,
                id: id.map(str::to_owned),
            });
            let key = (collection, operation);
            let gate = state.holds.get_mut(&key).and_then(VecDeque::pop_front);
            let result = match state.failures.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(error) => Err(error),
                None => apply(state.table(collection)),
            };
            (result, gate)
        };

        if let Some(gate) = gate {
            debug!(%collection, ?operation, "parking gateway call");
            // A dropped release handle counts as a release.
            let _ = gate.await;
        }
        result
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn position_of(rows: &[Row], collection: Collection, id: &str) -> Result<usize, GatewayError> {
    rows.iter()
        .position(|row| row_id(row) == Some(id))
        .ok_or_else(|| GatewayError::not_found(collection.as_str(), id))
}

fn find_mut<'a>(
    rows: &'a mut [Row],
    collection: Collection,
    id: &str,
) -> Result<&'a mut Row, GatewayError> {
    rows.iter_mut()
        .find(|row| row_id(row) == Some(id))
        .ok_or_else(|| GatewayError::not_found(collection.as_str(), id))
}

/// Order JSON values the way a relational backend orders a column: numbers
/// numerically, strings lexically, and nulls last.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn sort_rows(rows: &mut [Row], order: OrderKey) {
    rows.sort_by(|a, b| {
        let ordering = compare_values(a.get(order.column), b.get(order.column));
        match order.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn fetch_collection(
        &self,
        collection: Collection,
        order: Option<OrderKey>,
    ) -> Result<Vec<Row>, GatewayError> {
        self.dispatch(collection, GatewayOperation::FetchCollection, None, |rows| {
            let mut rows = rows.clone();
            if let Some(order) = order {
                sort_rows(&mut rows, order);
            }
            Ok(rows)
        })
        .await
    }

    async fn fetch_one(&self, collection: Collection, id: &str) -> Result<Row, GatewayError> {
        self.dispatch(collection, GatewayOperation::FetchOne, Some(id), |rows| {
            find_mut(rows, collection, id).map(|row| row.clone())
        })
        .await
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Row,
    ) -> Result<Row, GatewayError> {
        self.dispatch(collection, GatewayOperation::Patch, Some(id), |rows| {
            let row = find_mut(rows, collection, id)?;
            for (column, value) in fields {
                row.insert(column, value);
            }
            if row.contains_key("updated_at") {
                row.insert(
                    "updated_at".to_owned(),
                    Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
                );
            }
            Ok(row.clone())
        })
        .await
    }

    async fn insert(&self, collection: Collection, mut fields: Row) -> Result<Row, GatewayError> {
        self.dispatch(collection, GatewayOperation::Insert, None, |rows| {
            if let Some(id) = row_id(&fields) {
                if rows.iter().any(|row| row_id(row) == Some(id)) {
                    return Err(GatewayError::conflict(format!(
                        "{collection} row {id} already exists"
                    )));
                }
            }
            fields
                .entry("id")
                .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
            rows.push(fields.clone());
            Ok(fields)
        })
        .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        self.dispatch(collection, GatewayOperation::Delete, Some(id), |rows| {
            let position = position_of(rows, collection, id)?;
            rows.remove(position);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests;
