// crates/core/src/rpc.rs
//! Transport-agnostic call dispatch.
//!
//! A [`CallCodec`] reads one JSON-RPC 1.0 style call from any async reader,
//! invokes the single bound [`Service`], and encodes the reply. Both the
//! stream and the unary transport go through [`CallCodec::dispatch`], so
//! neither knows anything about the service.
//!
//! Frame in:  `{"id": 1, "method": "Service.Exec", "params": [{...}]}`
//! Frame out: `{"id": 1, "result": ..., "error": null}`

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

use crate::error::CallError;

/// A decoded call.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// The single argument of the call.
    ///
    /// Callers send `params` as a one-element array; a bare value or a missing
    /// field is accepted too.
    pub fn argument(&self) -> Value {
        match &self.params {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

/// An encoded reply. Exactly one of `result` and `error` is non-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub result: Value,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Value, error: &CallError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error.to_string()),
        }
    }
}

/// The one service bound into the process.
///
/// Methods are addressed on the wire as `"<name>.<Method>"`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Prefix of every method name, e.g. `"Service"`.
    fn name(&self) -> &str;

    /// Run `method` (without the prefix) with its decoded argument.
    ///
    /// Unknown methods must return [`CallError::MethodNotFound`].
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError>;
}

/// Decode a typed argument, mapping failures to `InvalidParams`.
pub fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, CallError> {
    serde_json::from_value(params).map_err(|e| CallError::invalid_params(method, e))
}

/// Encode a typed result.
pub fn to_result<T: Serialize>(value: T) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|e| CallError::service(format!("encode result: {e}")))
}

/// Outcome of one dispatch: the encoded reply plus what happened, for logs and metrics.
#[derive(Debug)]
pub struct Reply {
    pub body: Vec<u8>,
    /// Method name as sent, when the frame decoded that far.
    pub method: Option<String>,
    pub error: Option<CallError>,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn outcome(&self) -> &'static str {
        self.error.as_ref().map(CallError::kind).unwrap_or("ok")
    }
}

/// Decodes a call, invokes the bound service, encodes the reply.
#[derive(Clone)]
pub struct CallCodec {
    service: Arc<dyn Service>,
}

impl CallCodec {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self { service }
    }

    /// Name of the bound service.
    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Handle exactly one call read from `reader`.
    ///
    /// Decode, lookup and domain failures are encoded into the reply. Only an
    /// I/O failure of the reader itself is returned as `Err`.
    pub async fn dispatch<R>(&self, reader: R) -> io::Result<Reply>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (id, method, outcome) = match decode(reader).await? {
            Ok(request) => {
                let method = request.method.clone();
                let outcome = self.invoke(&request).await;
                (request.id, Some(method), outcome)
            }
            Err((id, err)) => (id, None, Err(err)),
        };

        let (response, error) = match outcome {
            Ok(result) => (Response::ok(id, result), None),
            Err(err) => {
                warn!(
                    method = method.as_deref().unwrap_or("<undecoded>"),
                    kind = err.kind(),
                    error = %err,
                    "call failed"
                );
                (Response::err(id, &err), Some(err))
            }
        };

        let body = serde_json::to_vec(&response).map_err(io::Error::from)?;
        Ok(Reply {
            body,
            method,
            error,
        })
    }

    async fn invoke(&self, request: &Request) -> Result<Value, CallError> {
        let not_found = || CallError::MethodNotFound(request.method.clone());

        let (prefix, method) = request.method.rsplit_once('.').ok_or_else(not_found)?;
        if prefix != self.service.name() || method.is_empty() {
            return Err(not_found());
        }

        debug!(method = %request.method, "dispatching call");
        match self.service.call(method, request.argument()).await {
            Err(CallError::MethodNotFound(_)) => Err(not_found()),
            other => other,
        }
    }
}

impl std::fmt::Debug for CallCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCodec")
            .field("service", &self.service.name())
            .finish()
    }
}

/// Read one JSON value from `reader` as the bytes arrive.
///
/// The outer `Err` is a transport failure. The inner `Err` carries whatever
/// id could be recovered along with the decode error.
async fn decode<R>(reader: R) -> io::Result<Result<Request, (Value, CallError)>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let bridge = SyncIoBridge::new(reader);
    let value = tokio::task::spawn_blocking(move || {
        let mut de = serde_json::Deserializer::from_reader(bridge);
        Value::deserialize(&mut de)
    })
    .await
    .map_err(io::Error::other)?;

    let value = match value {
        Ok(value) => value,
        Err(e) if e.is_io() => return Err(io::Error::from(e)),
        Err(e) => return Ok(Err((Value::Null, CallError::Decode(e.to_string())))),
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value::<Request>(value).map_err(|e| (id, CallError::Decode(e.to_string()))))
}
