//! Port for the remote persistence backend.
//!
//! The [`RemoteGateway`] trait is the only way the store talks to the source
//! of truth. Every call is async and may fail with a [`GatewayError`]; rows
//! travel as untyped JSON objects and are decoded by the domain.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{Collection, Error, OrderKey, Row};

use super::define_port_error;

define_port_error! {
    /// Errors raised by remote gateway adapters.
    pub enum GatewayError {
        /// The backend could not be reached or the connection dropped.
        Network { message: String } => "gateway request failed: {message}",
        /// The request did not complete within the adapter's deadline.
        Timeout { message: String } => "gateway request timed out: {message}",
        /// No row matched the requested identifier.
        NotFound { collection: String, id: String } =>
            "no {collection} row with id {id}",
        /// The backend refused the payload.
        Rejected { message: String } => "gateway rejected request: {message}",
        /// The write lost a concurrency check.
        Conflict { message: String } => "gateway reported a conflict: {message}",
        /// The response body could not be decoded.
        Decode { message: String } => "gateway response was malformed: {message}",
    }
}

impl From<GatewayError> for Error {
    fn from(value: GatewayError) -> Self {
        let message = value.to_string();
        match value {
            GatewayError::Network { .. } | GatewayError::Timeout { .. } => {
                Error::network_failure(message)
            }
            GatewayError::NotFound { collection, id } => Error::not_found(message)
                .with_details(json!({ "collection": collection, "id": id })),
            GatewayError::Rejected { .. } | GatewayError::Decode { .. } => {
                Error::validation_failure(message)
            }
            GatewayError::Conflict { .. } => Error::conflict(message),
        }
    }
}

/// Async request/response access to the backend's collections.
///
/// Implementations must be safe to share across tasks; the store calls them
/// from spawned fetch cycles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch every visible row of `collection`, optionally ordered.
    async fn fetch_collection(
        &self,
        collection: Collection,
        order: Option<OrderKey>,
    ) -> Result<Vec<Row>, GatewayError>;

    /// Fetch the row whose `id` column equals `id`.
    ///
    /// Returns [`GatewayError::NotFound`] when no row matches.
    async fn fetch_one(&self, collection: Collection, id: &str) -> Result<Row, GatewayError>;

    /// Atomically update the named columns of one row and return the stored
    /// row.
    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Row,
    ) -> Result<Row, GatewayError>;

    /// Insert a row and return it as stored, including its assigned `id`.
    async fn insert(&self, collection: Collection, fields: Row) -> Result<Row, GatewayError>;

    /// Delete one row.
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError>;
}
