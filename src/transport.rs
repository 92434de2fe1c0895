use crate::error::{RpcError, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// One JSON-RPC round trip per call. No retries, no caching.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the `result` member, which may be `null`.
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        (**self).call(method, params).await
    }
}

#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bounds every request, connect and body read included.
    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(method, id, "bundler request");

        let resp = self.http.post(&self.url).json(&req).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    body: text,
                })
            }
            Err(e) => {
                return Err(TransportError::malformed(format!(
                    "failed to decode JSON: {e}"
                )))
            }
        };

        // Bundlers often pair 4xx/5xx with a JSON-RPC error object; prefer that.
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(TransportError::Rpc(parse_rpc_error(err)?));
        }

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| TransportError::malformed("missing result field"))
    }
}

fn parse_rpc_error(err: &Value) -> Result<RpcError, TransportError> {
    let code = err
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::malformed(format!("RPC error without code: {err}")))?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(RpcError {
        code,
        message,
        data: err.get("data").cloned(),
    })
}
