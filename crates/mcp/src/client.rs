//! HTTP session client for a toolhost.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, RequestId, SESSION_ID_HEADER, Tool,
};

/// Default timeout for a single round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum response body size (1MB).
/// Sized for large tool outputs (file reads, directory listings).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Configuration for a toolhost connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the MCP endpoint, e.g. `http://127.0.0.1:3333/mcp`.
    pub url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Handle to one session on a toolhost.
pub struct Client {
    config: ClientConfig,
    http: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
    server_info: Mutex<Option<InitializeResult>>,
    tools: Mutex<Vec<Tool>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
            server_info: Mutex::new(None),
            tools: Mutex::new(Vec::new()),
        }
    }

    /// Create a client and run the initialization handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config);
        client.initialize().await?;
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Session identifier assigned by the toolhost, once initialized.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    /// Open a session and fetch the tool list.
    pub async fn initialize(&self) -> Result<&Self> {
        self.handshake().await?;
        self.refresh_tools().await?;
        Ok(self)
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Refresh the list of available tools.
    pub async fn refresh_tools(&self) -> Result<()> {
        let result: ListToolsResult = self.request_in_session("tools/list", None::<()>).await?;
        *self.tools.lock().await = result.tools;
        Ok(())
    }

    /// Get the cached list of available tools.
    pub async fn tools(&self) -> Vec<Tool> {
        self.tools.lock().await.clone()
    }

    /// Call a tool by name.
    ///
    /// An error-flagged result is returned as `Ok`; only transport and
    /// protocol failures are `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request_in_session("tools/call", Some(params)).await
    }

    /// Terminate the session on the toolhost (best effort).
    pub async fn close(&self) -> Result<()> {
        let Some(session_id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let response = self
            .http
            .delete(&self.config.url)
            .header(SESSION_ID_HEADER, &session_id)
            .send()
            .await?;
        debug!(session = %session_id, status = %response.status(), "closed toolhost session");
        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn handshake(&self) -> Result<()> {
        // A fresh handshake never reuses a stale identifier.
        *self.session_id.lock().await = None;

        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        if self.session_id.lock().await.is_none() {
            return Err(Error::InvalidResponse(format!(
                "initialize response carried no {SESSION_ID_HEADER} header"
            )));
        }

        self.notify("notifications/initialized").await?;
        debug!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "toolhost session initialized"
        );
        *self.server_info.lock().await = Some(result);
        Ok(())
    }

    /// Send a request, re-opening the session once if the toolhost no
    /// longer knows it.
    async fn request_in_session<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize + Clone,
        R: DeserializeOwned,
    {
        match self.request(method, params.clone()).await {
            Err(Error::JsonRpc(e)) if e.is_not_initialized() => {
                warn!(method, "toolhost session was lost, re-initializing");
                self.handshake().await?;
                self.request(method, params).await
            }
            other => other,
        }
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let response = timeout(self.config.timeout, self.post(&request))
            .await
            .map_err(|_| Error::Timeout)??
            .ok_or_else(|| Error::InvalidResponse(format!("empty response to {method}")))?;

        // Verify response ID matches
        if response.id.as_ref() != Some(&id) {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        let result_value = response.into_result()?;
        let result: R = serde_json::from_value(result_value)?;
        Ok(result)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcRequest::notification(method);
        timeout(self.config.timeout, self.post(&notification))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>> {
        let mut req = self
            .http
            .post(&self.config.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = self.session_id.lock().await.as_deref() {
            req = req.header(SESSION_ID_HEADER, session_id);
        }

        let response = req.send().await?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session_id.to_string());
        }

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.bytes().await?;

        if body.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: body.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        if status.as_u16() == 202 || body.is_empty() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&body);
        if is_event_stream {
            return parse_event_stream(&text).map(Some);
        }

        match serde_json::from_str::<JsonRpcResponse>(&text) {
            Ok(response) => Ok(Some(response)),
            Err(_) if !status.is_success() => Err(Error::Status {
                status: status.as_u16(),
                body: text.into_owned(),
            }),
            Err(e) => Err(Error::InvalidResponse(e.to_string())),
        }
    }
}

/// Pick the last JSON-RPC response out of an SSE body.
fn parse_event_stream(body: &str) -> Result<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .last()
        .ok_or_else(|| Error::InvalidResponse("event stream carried no response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::new("http://127.0.0.1:3333/mcp");
        assert_eq!(config.url, "http://127.0.0.1:3333/mcp");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn event_stream_takes_last_response() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":true}}\n\n";
        let response = parse_event_stream(body).unwrap();
        assert_eq!(response.id, Some(RequestId::Number(2)));
    }

    #[test]
    fn event_stream_without_data_is_invalid() {
        assert!(matches!(
            parse_event_stream(": keep-alive\n\n"),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn new_client_has_no_session() {
        let client = Client::new(ClientConfig::new("http://127.0.0.1:1/mcp"));
        assert!(client.session_id().await.is_none());
        assert!(client.tools().await.is_empty());
        // Closing without a session is a no-op.
        client.close().await.unwrap();
    }
}
