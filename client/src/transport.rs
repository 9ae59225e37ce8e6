//! HTTP transport for the order API.
//!
//! Thin layer over `reqwest`: builds requests, attaches version headers and
//! maps responses onto [`ClientError`] kinds. No retry, no caching.

use crate::config::{ClientConfig, Timeouts};
use crate::error::{ClientError, ConflictInfo, Result};
use comanda_engine::{
    CloseOrder, ItemId, NewItem, NewOrder, Order, OrderId, OrderStatus, UnitId, Version,
};
use comanda_engine::retry::RETRYABLE_STATUSES;
use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default page size of paged listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Timeout class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Read,
    Write,
    /// Closing an order
    Critical,
    Ping,
}

impl RequestClass {
    fn timeout(self, timeouts: &Timeouts) -> Duration {
        match self {
            RequestClass::Read => timeouts.read,
            RequestClass::Write => timeouts.write,
            RequestClass::Critical => timeouts.critical,
            RequestClass::Ping => timeouts.ping,
        }
    }
}

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// 200 with a body; the etag header is folded into the order
    Modified { order: Order, etag: Option<String> },
    /// 304, the cached copy is still current
    NotModified,
}

/// A page of a paged listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

#[derive(Serialize)]
struct StatusBody {
    status: OrderStatus,
}

/// Error body returned by the API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    current_version: Option<Version>,
}

/// HTTP client for the order endpoints.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeouts: Timeouts,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            timeouts: config.timeouts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, class: RequestClass) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, url)
            .timeout(class.timeout(&self.timeouts));

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    fn if_match(request: RequestBuilder, version: Option<Version>) -> RequestBuilder {
        match version {
            Some(v) => request.header(IF_MATCH, format!("\"{v}\"")),
            None => request,
        }
    }

    // ========== Reads ==========

    /// Fetch an order, conditionally when an etag is known.
    pub async fn get_order(&self, id: OrderId, etag: Option<&str>) -> Result<Fetched> {
        let mut request = self.request(Method::GET, &format!("/pedidos/{id}"), RequestClass::Read);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut order: Order = Self::handle_response(response, None).await?;
        if etag.is_some() {
            order.etag = etag.clone();
        }
        let etag = etag.or_else(|| order.etag.clone());

        Ok(Fetched::Modified { order, etag })
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Order> {
        let path = format!("/pedidos/numero/{number}");
        let response = self.request(Method::GET, &path, RequestClass::Read).send().await?;
        Self::handle_response(response, None).await
    }

    pub async fn get_by_status(&self, status: OrderStatus, page: u32, size: u32) -> Result<Page<Order>> {
        let path = format!("/pedidos/status/{}", status.as_str());
        let response = self
            .request(Method::GET, &path, RequestClass::Read)
            .query(&[("page", page), ("size", size)])
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    /// Orders in CREATED or IN_PROGRESS.
    pub async fn get_active(&self) -> Result<Vec<Order>> {
        let response = self
            .request(Method::GET, "/pedidos/ativos", RequestClass::Read)
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    pub async fn get_by_unit(&self, unit_id: UnitId) -> Result<Vec<Order>> {
        let path = format!("/pedidos/unidade/{unit_id}");
        let response = self.request(Method::GET, &path, RequestClass::Read).send().await?;
        Self::handle_response(response, None).await
    }

    /// Changes since `version`. The delta format belongs to the server.
    pub async fn delta_since(&self, id: OrderId, version: Version) -> Result<serde_json::Value> {
        let path = format!("/pedidos/{id}/delta");
        let response = self
            .request(Method::GET, &path, RequestClass::Read)
            .query(&[("versao", version)])
            .send()
            .await?;
        Self::handle_opaque(response).await
    }

    // ========== Writes ==========

    pub async fn create(&self, order: &NewOrder) -> Result<Order> {
        let response = self
            .request(Method::POST, "/pedidos", RequestClass::Write)
            .json(order)
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    pub async fn add_item(&self, id: OrderId, item: &NewItem, version: Option<Version>) -> Result<Order> {
        let request = self
            .request(Method::POST, &format!("/pedidos/{id}/itens"), RequestClass::Write)
            .json(item);
        let response = Self::if_match(request, version).send().await?;
        Self::handle_response(response, version).await
    }

    pub async fn update_item_quantity(
        &self,
        id: OrderId,
        item_id: ItemId,
        quantity: u32,
        version: Option<Version>,
    ) -> Result<Order> {
        let path = format!("/pedidos/{id}/itens/{item_id}/quantidade");
        let request = self
            .request(Method::PUT, &path, RequestClass::Write)
            .json(&QuantityBody { quantity });
        let response = Self::if_match(request, version).send().await?;
        Self::handle_response(response, version).await
    }

    pub async fn remove_item(&self, id: OrderId, item_id: ItemId, version: Option<Version>) -> Result<Order> {
        let path = format!("/pedidos/{id}/itens/{item_id}");
        let request = self.request(Method::DELETE, &path, RequestClass::Write);
        let response = Self::if_match(request, version).send().await?;
        Self::handle_response(response, version).await
    }

    /// Finalize an order. Uses the critical timeout.
    pub async fn close(&self, id: OrderId, close: &CloseOrder) -> Result<Order> {
        let response = self
            .request(Method::PUT, &format!("/pedidos/{id}/fechar"), RequestClass::Critical)
            .json(close)
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    pub async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order> {
        let response = self
            .request(Method::PUT, &format!("/pedidos/{id}/cancelar"), RequestClass::Write)
            .query(&[("motivo", reason)])
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    pub async fn change_status(&self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let response = self
            .request(Method::PUT, &format!("/pedidos/{id}/status"), RequestClass::Write)
            .json(&StatusBody { status })
            .send()
            .await?;
        Self::handle_response(response, None).await
    }

    /// Keep-alive for long edits.
    pub async fn ping(&self, id: OrderId) -> Result<serde_json::Value> {
        let response = self
            .request(Method::POST, &format!("/pedidos/{id}/ping"), RequestClass::Ping)
            .send()
            .await?;
        Self::handle_opaque(response).await
    }

    // ========== Response handling ==========

    async fn handle_response<T: DeserializeOwned>(
        response: Response,
        client_version: Option<Version>,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response, client_version).await);
        }

        response.json().await.map_err(Into::into)
    }

    /// Like `handle_response` for endpoints whose body may be empty.
    async fn handle_opaque(response: Response) -> Result<serde_json::Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response, None).await);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn error_from(response: Response, client_version: Option<Version>) -> ClientError {
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return err.into(),
        };
        classify(status.as_u16(), &text, client_version)
    }
}

/// Map a non-success status and its body onto an error kind.
pub(crate) fn classify(status: u16, body: &str, client_version: Option<Version>) -> ClientError {
    let payload: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let parsed: ErrorBody = serde_json::from_value(payload.clone()).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.trim().to_string());

    match status {
        409 => ClientError::Conflict(ConflictInfo {
            message: if message.is_empty() {
                "Order was modified by another user".to_string()
            } else {
                message
            },
            server_version: parsed.current_version,
            client_version,
            payload,
        }),
        _ if RETRYABLE_STATUSES.contains(&status) => ClientError::Transient { status, message },
        _ => ClientError::Http { status, message },
    }
}
