//! Request/reply transport over TCP.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::error::{Result, ServiceError, codes};

/// Sends one request and waits for its reply.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, pattern: &str, data: Value, timeout: Duration) -> Result<Value>;
}

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    pattern: &'a str,
    data: Value,
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    is_disposed: bool,
}

/// Extracts `{code, message}` from whatever shape the remote fault has.
fn fault_from(pattern: &str, err: &Value) -> ServiceError {
    let code = err
        .get("code")
        .or_else(|| err.get("statusCode"))
        .and_then(Value::as_i64)
        .unwrap_or(codes::INTERNAL);
    let message = match err.get("message") {
        Some(Value::String(m)) => m.clone(),
        Some(other) => other.to_string(),
        None => match err {
            Value::String(m) => m.clone(),
            other => other.to_string(),
        },
    };
    ServiceError::fault(pattern, code, message)
}

/// TCP client for one downstream service.
///
/// Holds a single long-lived connection that is opened lazily and dropped
/// after any transport failure or timeout, so the next call reconnects and
/// never reads a stale reply.
pub struct TcpTransport {
    service: String,
    addr: String,
    conn: Mutex<Option<Framed<TcpStream, FrameCodec>>>,
}

impl TcpTransport {
    pub fn new(service: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn round_trip(
        &self,
        slot: &mut Option<Framed<TcpStream, FrameCodec>>,
        pattern: &str,
        data: Value,
    ) -> Result<Value> {
        if slot.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| ServiceError::transport(pattern, e))?;
            stream
                .set_nodelay(true)
                .map_err(|e| ServiceError::transport(pattern, e))?;
            tracing::debug!(service = %self.service, addr = %self.addr, "connected");
            *slot = Some(Framed::new(stream, FrameCodec));
        }
        let Some(framed) = slot.as_mut() else {
            return Err(ServiceError::transport(pattern, "connection unavailable"));
        };

        let id = Uuid::new_v4().to_string();
        let request = serde_json::to_string(&RequestFrame {
            pattern,
            data,
            id: id.clone(),
        })?;
        framed
            .send(request)
            .await
            .map_err(|e| ServiceError::transport(pattern, e))?;

        let mut last_response = Value::Null;
        loop {
            let frame = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ServiceError::transport(pattern, e)),
                None => return Err(ServiceError::transport(pattern, "connection closed")),
            };
            let reply: ReplyFrame = serde_json::from_str(&frame)?;
            if reply.id.as_deref().is_some_and(|r| r != id) {
                tracing::warn!(service = %self.service, %pattern, "dropping reply for another request");
                continue;
            }
            if let Some(err) = reply.err.filter(|e| !e.is_null()) {
                return Err(fault_from(pattern, &err));
            }
            if let Some(response) = reply.response {
                last_response = response;
            }
            if reply.is_disposed {
                return Ok(last_response);
            }
        }
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    #[tracing::instrument(skip(self, data), fields(service = %self.service))]
    async fn send(&self, pattern: &str, data: Value, timeout: Duration) -> Result<Value> {
        let mut slot = self.conn.lock().await;
        let outcome = tokio::time::timeout(timeout, self.round_trip(&mut *slot, pattern, data)).await;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if !matches!(err, ServiceError::Fault { .. }) {
                    *slot = None;
                }
                Err(err)
            }
            Err(_) => {
                *slot = None;
                Err(ServiceError::Timeout {
                    pattern: pattern.to_string(),
                    after: timeout,
                })
            }
        }
    }
}

/// Serializes `request`, sends it and decodes the reply as `R`.
pub(crate) async fn call<Q, R>(
    transport: &dyn RpcTransport,
    pattern: &str,
    request: &Q,
    timeout: Duration,
) -> Result<R>
where
    Q: Serialize + Sync,
    R: DeserializeOwned,
{
    let data = serde_json::to_value(request)?;
    let reply = transport.send(pattern, data, timeout).await?;
    Ok(serde_json::from_value(reply)?)
}
