//! Reqwest-backed gateway speaking the PostgREST dialect.
//!
//! The adapter owns transport details only: URL and filter construction,
//! authentication headers, timeout and status mapping, and decoding response
//! bodies into rows. Every write asks for the stored representation back so
//! the store can adopt server-assigned columns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use tracing::debug;

use crate::domain::ports::{GatewayError, RemoteGateway};
use crate::domain::{Collection, OrderKey, Row};

const PREFER_REPRESENTATION: &str = "return=representation";
const API_KEY_HEADER: &str = "apikey";

/// Gateway adapter that issues one HTTP request per port call.
pub struct RestGateway {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl RestGateway {
    /// Build an adapter using a reqwest client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key: None,
            access_token: None,
        })
    }

    /// Send `key` in the `apikey` header of every request.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Authenticate every request as the signed-in user.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key.as_str());
        }
        if let Some(token) = &self.access_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    async fn send_for_rows(
        &self,
        builder: RequestBuilder,
        target: &Target<'_>,
    ) -> Result<Vec<Row>, GatewayError> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        debug!(
            collection = %target.collection,
            status = status.as_u16(),
            bytes = body.len(),
            "gateway response received"
        );
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref(), target));
        }
        parse_rows(body.as_ref())
    }
}

/// The collection and optional row id a request addresses.
struct Target<'a> {
    collection: Collection,
    id: Option<&'a str>,
}

impl Target<'_> {
    fn not_found(&self) -> GatewayError {
        GatewayError::not_found(self.collection.as_str(), self.id.unwrap_or_default())
    }

    fn single(&self, rows: Vec<Row>) -> Result<Row, GatewayError> {
        rows.into_iter().next().ok_or_else(|| self.not_found())
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn fetch_collection(
        &self,
        collection: Collection,
        order: Option<OrderKey>,
    ) -> Result<Vec<Row>, GatewayError> {
        let url = collection_query(&self.base_url, collection, None, order)?;
        let target = Target {
            collection,
            id: None,
        };
        self.send_for_rows(self.request(Method::GET, url), &target)
            .await
    }

    async fn fetch_one(&self, collection: Collection, id: &str) -> Result<Row, GatewayError> {
        let mut url = collection_query(&self.base_url, collection, Some(id), None)?;
        url.query_pairs_mut().append_pair("limit", "1");
        let target = Target {
            collection,
            id: Some(id),
        };
        let rows = self
            .send_for_rows(self.request(Method::GET, url), &target)
            .await?;
        target.single(rows)
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Row,
    ) -> Result<Row, GatewayError> {
        let url = collection_query(&self.base_url, collection, Some(id), None)?;
        let target = Target {
            collection,
            id: Some(id),
        };
        let builder = self
            .request(Method::PATCH, url)
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&fields);
        let rows = self.send_for_rows(builder, &target).await?;
        target.single(rows)
    }

    async fn insert(&self, collection: Collection, fields: Row) -> Result<Row, GatewayError> {
        let url = collection_query(&self.base_url, collection, None, None)?;
        let target = Target {
            collection,
            id: None,
        };
        let builder = self
            .request(Method::POST, url)
            .header("Prefer", PREFER_REPRESENTATION)
            .json(&fields);
        let rows = self.send_for_rows(builder, &target).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::decode("insert returned no representation"))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError> {
        let url = collection_query(&self.base_url, collection, Some(id), None)?;
        let target = Target {
            collection,
            id: Some(id),
        };
        let builder = self
            .request(Method::DELETE, url)
            .header("Prefer", PREFER_REPRESENTATION);
        let rows = self.send_for_rows(builder, &target).await?;
        target.single(rows).map(|_| ())
    }
}

/// Build `{base}/{collection}?select=*` plus the optional id filter and order.
fn collection_query(
    base: &Url,
    collection: Collection,
    id: Option<&str>,
    order: Option<OrderKey>,
) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| GatewayError::rejected(format!("base URL {base} cannot carry a path")))?
        .pop_if_empty()
        .push(collection.as_str());
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("select", "*");
        if let Some(id) = id {
            query.append_pair("id", &format!("eq.{id}"));
        }
        if let Some(order) = order {
            query.append_pair(
                "order",
                &format!("{}.{}.nullslast", order.column, order.direction.as_str()),
            );
        }
    }
    Ok(url)
}

fn parse_rows(body: &[u8]) -> Result<Vec<Row>, GatewayError> {
    serde_json::from_slice(body).map_err(|error| {
        GatewayError::decode(format!("expected a JSON array of rows: {error}"))
    })
}

fn map_transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::timeout(error.to_string())
    } else if error.is_decode() {
        GatewayError::decode(error.to_string())
    } else {
        GatewayError::network(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8], target: &Target<'_>) -> GatewayError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {preview}", status.as_u16())
    };

    match status {
        StatusCode::NOT_FOUND if target.id.is_some() => target.not_found(),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => GatewayError::conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            GatewayError::timeout(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::rejected(message)
        }
        _ => GatewayError::network(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 200;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        let head: String = compact.chars().take(PREVIEW_CHAR_LIMIT).collect();
        format!("{head}...")
    } else {
        compact
    }
}
