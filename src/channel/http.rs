//! HTTP JSON-RPC channel to the agent under test.
//!
//! Speaks `message/send` over a single POST endpoint: the outbound envelope
//! goes in the request params, the agent's reply envelope comes back in the
//! result. The agent assigns a context id on the first exchange; we echo it
//! on every later turn so the agent can thread the conversation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::base::AgentChannel;
use super::retry::transport_backoff;
use crate::errors::EvalError;
use crate::protocol::Envelope;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Envelope>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct HttpAgentChannel {
    client: Client,
    url: String,
    turn_timeout_secs: u64,
    context_id: Option<String>,
}

impl HttpAgentChannel {
    pub fn new(url: impl Into<String>, turn_timeout_secs: u64) -> Self {
        HttpAgentChannel {
            client: Client::new(),
            url: url.into(),
            turn_timeout_secs,
            context_id: None,
        }
    }

    async fn post_once(client: &Client, url: &str, body: &serde_json::Value) -> Result<RpcResponse> {
        let response = client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("agent endpoint returned HTTP {status}"));
        }
        Ok(response.json::<RpcResponse>().await?)
    }
}

#[async_trait]
impl AgentChannel for HttpAgentChannel {
    async fn send(&mut self, envelope: &Envelope, new_conversation: bool) -> Result<Envelope> {
        if new_conversation {
            self.context_id = None;
        }

        let mut message = envelope.clone();
        message.context_id = self.context_id.clone();

        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": { "message": message },
        });

        let client = &self.client;
        let url = &self.url;
        let rpc = (|| Self::post_once(client, url, &body))
            .retry(transport_backoff())
            .notify(|err, dur| {
                warn!(error = %err, "agent delivery failed, retrying in {dur:?}");
            })
            .await
            .map_err(|e| {
                anyhow!(EvalError::AgentTimeout {
                    timeout_secs: self.turn_timeout_secs,
                })
                .context(format!("delivery retries exhausted: {e}"))
            })?;

        if let Some(err) = rpc.error {
            return Err(anyhow!(EvalError::Protocol(format!(
                "agent returned RPC error {}: {}",
                err.code, err.message
            ))));
        }
        let reply = rpc
            .result
            .ok_or_else(|| anyhow!(EvalError::Protocol("RPC response carried no result".into())))?;

        if let Some(ctx) = &reply.context_id {
            if self.context_id.is_none() {
                debug!(context_id = %ctx, "agent assigned conversation context");
            }
            self.context_id = Some(ctx.clone());
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Part;

    #[test]
    fn test_rpc_response_parses_result() {
        let raw = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "role": "agent",
                "parts": [{"kind": "text", "text": "hello"}],
                "messageId": "m1",
                "contextId": "ctx-9"
            }
        });
        let rpc: RpcResponse = serde_json::from_value(raw).unwrap();
        let reply = rpc.result.unwrap();
        assert_eq!(reply.context_id.as_deref(), Some("ctx-9"));
        assert_eq!(reply.parts, vec![Part::text("hello")]);
    }

    #[test]
    fn test_rpc_response_parses_error() {
        let raw = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": { "code": -32600, "message": "bad request" }
        });
        let rpc: RpcResponse = serde_json::from_value(raw).unwrap();
        assert!(rpc.result.is_none());
        assert_eq!(rpc.error.unwrap().code, -32600);
    }
}
