use async_trait::async_trait;
use serde_json::Value;

use crate::form;

/// Failure modes of one Bitrix24 REST round trip. The platform answers
/// HTTP 200 even for logical failures, so classification happens on the
/// body, not the status line.
#[derive(Debug, thiserror::Error)]
pub enum BitrixError {
    #[error("bitrix24 error {code}: {description}")]
    Api { code: String, description: String },

    #[error("empty response from bitrix24 for {method}")]
    EmptyResponse { method: String },

    #[error("malformed response from bitrix24 for {method}: {source}")]
    Malformed {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport failure calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
}

/// One outbound REST call: exactly one round trip, no retries. Retry
/// policy, if ever wanted, belongs to the caller.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, method: &str, params: &Value) -> Result<Value, BitrixError>;
}

/// Live client for a Bitrix24 inbound-webhook REST base.
pub struct BitrixClient {
    http: reqwest::Client,
    base: String,
}

impl BitrixClient {
    /// `base` must end with `/` (see `Config::normalized_webhook_base`).
    pub fn new(http: reqwest::Client, base: String) -> Self {
        Self { http, base }
    }
}

#[async_trait]
impl RemoteCall for BitrixClient {
    async fn call(&self, method: &str, params: &Value) -> Result<Value, BitrixError> {
        let url = format!("{}{}.json", self.base, method);
        let fields = form::flatten_params(params);
        let resp = self
            .http
            .post(&url)
            .form(&fields)
            .send()
            .await
            .map_err(|source| BitrixError::Transport {
                method: method.to_string(),
                source,
            })?;
        let text = resp
            .text()
            .await
            .map_err(|source| BitrixError::Transport {
                method: method.to_string(),
                source,
            })?;
        decode_response(method, &text)
    }
}

/// Normalize a raw response body into the call result.
///
/// A non-null `error` field means logical failure regardless of HTTP
/// status; otherwise the `result` payload is the success value.
fn decode_response(method: &str, text: &str) -> Result<Value, BitrixError> {
    if text.trim().is_empty() {
        return Err(BitrixError::EmptyResponse {
            method: method.to_string(),
        });
    }
    let body: Value = serde_json::from_str(text).map_err(|source| BitrixError::Malformed {
        method: method.to_string(),
        source,
    })?;
    if let Some(err) = body.get("error").filter(|v| !v.is_null()) {
        let code = match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let description = body
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(BitrixError::Api { code, description });
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}
