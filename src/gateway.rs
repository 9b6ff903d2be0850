//! HTTP gateway: bearer-token attachment and global handling of unauthorized responses.
//!
//! The wire itself sits behind [`Transport`] so the stores can be driven without a server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::navigation::{Navigator, Route};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw request/response exchange. Only network-level failures are errors here; every
/// HTTP status comes back as an [`ApiResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(HttpTransport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(ApiResponse { status, body })
    }
}

/// Shared request pipeline used by every store.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    navigator: Arc<dyn Navigator>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Gateway {
            transport,
            session,
            navigator,
        }
    }

    pub async fn get<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let query = to_query_pairs(query)?;
        let body = self.request(Method::Get, path, query, None).await?;
        decode(&body)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        let body = self.request(Method::Post, path, Vec::new(), Some(body)).await?;
        decode(&body)
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        let body = self.request(Method::Put, path, Vec::new(), Some(body)).await?;
        decode(&body)
    }

    /// DELETE; the response body is not interpreted.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(Method::Delete, path, Vec::new(), None).await?;
        Ok(())
    }

    /// Send one request and return the raw success body.
    ///
    /// A 401 clears the session and redirects to login before the error is handed back
    /// to the caller, whichever store issued the request. A 401 for a token that has
    /// since been replaced leaves the newer session alone.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<String, ApiError> {
        let bearer = self.session.token();
        let request = ApiRequest {
            method,
            path: path.to_string(),
            query,
            body,
            bearer: bearer.clone(),
        };
        debug!(?method, path, "request");

        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response.body);
        }

        let err = ApiError::from_status(response.status, &response.body);
        if err.is_unauthorized() && self.session.token() != bearer {
            debug!(path, "unauthorized response for a replaced token, session kept");
        } else if err.is_unauthorized() {
            warn!(path, "unauthorized response, ending session");
            self.session.clear();
            self.navigator.navigate(Route::Login);
        }
        Err(err)
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    // Some endpoints answer with an empty body on success.
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Flatten a serializable struct into scalar query pairs, dropping absent values.
pub fn to_query_pairs<Q: Serialize + ?Sized>(query: &Q) -> Result<Vec<(String, String)>, ApiError> {
    let value = serde_json::to_value(query).map_err(|e| ApiError::Decode(e.to_string()))?;
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(ApiError::Decode(format!(
                "query parameters must be an object, got {}",
                other
            )))
        }
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(ApiError::Decode(format!(
                    "query parameter {} is not a scalar: {}",
                    key, other
                )))
            }
        };
        pairs.push((key, value));
    }
    Ok(pairs)
}
