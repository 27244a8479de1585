//! HTTP session transport: one POST per envelope.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::Mutex;

use toolwire_core::{ConfigError, Logger, RuntimeConfig, ServerConfig, TransportKind};
use toolwire_notify::{NotificationBus, ServerStatus};

use super::{initialize_params, into_result, ConnectionState, McpTransport, StateCell};
use crate::cancel::CancelSignal;
use crate::error::McpError;
use crate::types::{
    methods, InitializeResult, JsonRpcMessage, RpcId, HEADER_PROTOCOL_VERSION, HEADER_SESSION_ID,
};

/// Upper bound on the best-effort session teardown.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to a tool server exposed over HTTP.
pub struct HttpTransport {
    config: ServerConfig,
    url: String,
    runtime: RuntimeConfig,
    timeout: Duration,
    client: reqwest::Client,
    /// Static headers: content negotiation, protocol version, configured extras.
    headers: HeaderMap,
    session: RwLock<Option<String>>,
    next_id: AtomicI64,
    state: StateCell,
    lifecycle: Mutex<()>,
    bus: NotificationBus,
    log: Logger,
}

impl HttpTransport {
    pub fn new(
        config: ServerConfig,
        runtime: &RuntimeConfig,
        bus: NotificationBus,
        log: Logger,
    ) -> Result<Self, McpError> {
        config.validate()?;
        let url = config
            .url
            .clone()
            .ok_or_else(|| ConfigError::MissingUrl {
                server: config.name.clone(),
            })?;
        let headers = build_headers(&config, &runtime.protocol_version)?;
        let client = reqwest::Client::builder().build()?;
        let timeout = runtime.timeout_for(&config);
        let log = log.for_server(&config.name);

        Ok(Self {
            config,
            url,
            runtime: runtime.clone(),
            timeout,
            client,
            headers,
            session: RwLock::new(None),
            next_id: AtomicI64::new(1),
            state: StateCell::new(),
            lifecycle: Mutex::new(()),
            bus,
            log,
        })
    }

    /// Session token issued by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, value: Option<String>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    fn capture_session(&self, response: &reqwest::Response) {
        let Some(issued) = response
            .headers()
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if self.session_id().as_deref() != Some(issued) {
            tracing::debug!(parent: self.log.span(), session = %issued, "Session issued");
            self.set_session(Some(issued.to_string()));
        }
    }

    /// POST one envelope and return the response body.
    async fn post(&self, message: &JsonRpcMessage, cancel: &CancelSignal) -> Result<String, McpError> {
        let method = message.method.as_deref().unwrap_or_default();
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(message);
        if let Some(session) = self.session_id() {
            request = request.header(HEADER_SESSION_ID, session);
        }

        let exchange = async {
            let response = request.send().await?;
            self.capture_session(&response);
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(McpError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok::<_, McpError>(body)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpError::Cancelled {
                method: method.to_string(),
            }),
            outcome = tokio::time::timeout(self.timeout, exchange) => outcome.unwrap_or_else(|_| {
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                })
            }),
        }
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelSignal,
    ) -> Result<Value, McpError> {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let message = JsonRpcMessage::request(id.clone(), method, params);
        tracing::debug!(parent: self.log.span(), method = %method, id = %id, "Sending request");

        let body = self.post(&message, cancel).await?;
        let response: JsonRpcMessage = serde_json::from_str(&body)
            .map_err(|e| McpError::InvalidResponse(format!("{method}: {e}")))?;
        if response.id.as_ref() != Some(&id) {
            return Err(McpError::InvalidResponse(format!(
                "{method}: expected id {id}, got {}",
                response
                    .id
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string)
            )));
        }
        into_result(response)
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = initialize_params(&self.runtime)?;
        let result = self
            .exchange(methods::INITIALIZE, Some(params), &CancelSignal::never())
            .await?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InvalidResponse(e.to_string()))?;
        self.post(
            &JsonRpcMessage::notification(methods::INITIALIZED, None),
            &CancelSignal::never(),
        )
        .await?;

        tracing::info!(
            parent: self.log.span(),
            protocol = %init.protocol_version,
            session = ?self.session_id(),
            "Handshake complete"
        );
        Ok(())
    }

    /// Best-effort DELETE of the server-side session.
    async fn end_session(&self, session: String) {
        let request = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(HEADER_SESSION_ID, session);
        match tokio::time::timeout(TEARDOWN_TIMEOUT, request.send()).await {
            Ok(Ok(response)) => {
                tracing::debug!(parent: self.log.span(), status = %response.status(), "Session closed");
            }
            Ok(Err(e)) => {
                tracing::debug!(parent: self.log.span(), error = %e, "Session teardown failed");
            }
            Err(_) => {
                tracing::debug!(parent: self.log.span(), "Session teardown timed out");
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    fn server_name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }

        self.state.set(ConnectionState::Connecting);
        tracing::info!(parent: self.log.span(), url = %self.url, "Connecting");
        match self.handshake().await {
            Ok(()) => {
                self.state.set(ConnectionState::Connected);
                self.bus
                    .notify_server_status(&self.config.name, ServerStatus::Connected, None);
                Ok(())
            }
            Err(e) => {
                let e = McpError::handshake(&self.config.name, e);
                self.set_session(None);
                self.state.set(ConnectionState::Disconnected);
                tracing::error!(parent: self.log.span(), error = %e, "Connect failed");
                self.bus.notify_server_status(
                    &self.config.name,
                    ServerStatus::Error,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.state.swap(ConnectionState::Disconnected);
        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(session) = session {
            self.end_session(session).await;
        }
        if previous == ConnectionState::Connected {
            tracing::info!(parent: self.log.span(), "Disconnected");
            self.bus
                .notify_server_status(&self.config.name, ServerStatus::Disconnected, None);
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelSignal,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        self.exchange(method, params, cancel).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        self.post(&JsonRpcMessage::notification(method, params), &CancelSignal::never())
            .await
            .map(|_| ())
    }
}

fn build_headers(config: &ServerConfig, protocol_version: &str) -> Result<HeaderMap, ConfigError> {
    let invalid = |header: &str| ConfigError::InvalidHeader {
        server: config.name.clone(),
        header: header.to_string(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("mcp-protocol-version"),
        HeaderValue::from_str(protocol_version).map_err(|_| invalid(HEADER_PROTOCOL_VERSION))?,
    );

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid(name))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_protocol_version_and_extras() {
        let config = ServerConfig::http("remote", "http://localhost:9/mcp")
            .with_header("Authorization", "Bearer abc");
        let headers = build_headers(&config, "2025-06-18").unwrap();
        assert_eq!(headers.get(HEADER_PROTOCOL_VERSION).unwrap(), "2025-06-18");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn invalid_header_is_config_error() {
        let config = ServerConfig::http("remote", "http://localhost:9/mcp")
            .with_header("Bad Header", "x");
        let err = build_headers(&config, "2025-06-18").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { ref header, .. } if header == "Bad Header"));

        let err = HttpTransport::new(
            config,
            &RuntimeConfig::default(),
            NotificationBus::new(Logger::disabled()),
            Logger::disabled(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, McpError::Config(ConfigError::InvalidHeader { .. })));
    }

    #[tokio::test]
    async fn unreachable_server_fails_handshake() {
        // Port 9 (discard) is almost never served over HTTP locally.
        let transport = HttpTransport::new(
            ServerConfig::http("remote", "http://127.0.0.1:9/mcp")
                .with_timeout(Duration::from_millis(500)),
            &RuntimeConfig::default(),
            NotificationBus::new(Logger::disabled()),
            Logger::disabled(),
        )
        .unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Handshake { .. }));
        assert!(!transport.is_connected());
        assert!(transport.session_id().is_none());
    }
}
