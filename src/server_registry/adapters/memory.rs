//! Scripted in-memory connection adapter.

use crate::server_registry::{
    domain::{PromptDefinition, ResourceDefinition, ServerConfig, ServerId, ToolDefinition},
    ports::{ConnectionFactory, ServerConnection, ServerConnectionError, ServerConnectionResult},
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// In-memory connection with a scripted catalogue and failure injection.
///
/// This adapter talks to no external process. It is suitable for unit and
/// integration tests and for offline selection runs where the catalogue is
/// supplied up front.
#[derive(Debug, Default)]
pub struct InMemoryServerConnection {
    script: RwLock<ConnectionScript>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    list_tools_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct ConnectionScript {
    tools: Vec<ToolDefinition>,
    prompts: Option<Vec<PromptDefinition>>,
    resources: Option<Vec<ResourceDefinition>>,
    responses: HashMap<String, Value>,
    connect_delay: Option<Duration>,
    connect_failure: Option<String>,
    disconnect_failure: Option<String>,
    list_tools_failure: Option<String>,
}

impl InMemoryServerConnection {
    /// Creates a connection with an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection serving `tools`.
    #[must_use]
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        let connection = Self::new();
        if let Ok(mut script) = connection.script.write() {
            script.tools = tools;
        }
        connection
    }

    fn script(&self) -> ServerConnectionResult<RwLockReadGuard<'_, ConnectionScript>> {
        self.script
            .read()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))
    }

    fn script_mut(&self) -> ServerConnectionResult<RwLockWriteGuard<'_, ConnectionScript>> {
        self.script
            .write()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))
    }

    /// Replaces the tool catalogue.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_tools(&self, tools: Vec<ToolDefinition>) -> ServerConnectionResult<()> {
        self.script_mut()?.tools = tools;
        Ok(())
    }

    /// Replaces the prompt catalogue. `None` makes prompts unsupported.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_prompts(&self, prompts: Option<Vec<PromptDefinition>>) -> ServerConnectionResult<()> {
        self.script_mut()?.prompts = prompts;
        Ok(())
    }

    /// Replaces the resource catalogue. `None` makes resources unsupported.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_resources(
        &self,
        resources: Option<Vec<ResourceDefinition>>,
    ) -> ServerConnectionResult<()> {
        self.script_mut()?.resources = resources;
        Ok(())
    }

    /// Scripts the payload returned when `tool` is called.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_response(&self, tool: impl Into<String>, response: Value) -> ServerConnectionResult<()> {
        self.script_mut()?.responses.insert(tool.into(), response);
        Ok(())
    }

    /// Delays every connect attempt by `delay`.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_connect_delay(&self, delay: Option<Duration>) -> ServerConnectionResult<()> {
        self.script_mut()?.connect_delay = delay;
        Ok(())
    }

    /// Makes connect attempts fail with `message` until cleared.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn fail_connect(&self, message: Option<String>) -> ServerConnectionResult<()> {
        self.script_mut()?.connect_failure = message;
        Ok(())
    }

    /// Makes disconnect fail with `message` until cleared.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn fail_disconnect(&self, message: Option<String>) -> ServerConnectionResult<()> {
        self.script_mut()?.disconnect_failure = message;
        Ok(())
    }

    /// Makes tool listing fail with `message` until cleared.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn fail_list_tools(&self, message: Option<String>) -> ServerConnectionResult<()> {
        self.script_mut()?.list_tools_failure = message;
        Ok(())
    }

    /// Simulates the transport dropping without a disconnect call.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Returns how many times `connect` was invoked.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times `disconnect` was invoked.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times `list_tools` was invoked.
    #[must_use]
    pub fn list_tools_calls(&self) -> usize {
        self.list_tools_calls.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> ServerConnectionResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ServerConnectionError::NotConnected)
        }
    }
}

#[async_trait]
impl ServerConnection for InMemoryServerConnection {
    async fn connect(&self) -> ServerConnectionResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.script()?.connect_delay;
        if let Some(wait) = delay {
            tokio::time::sleep(wait).await;
        }

        if let Some(message) = self.script()?.connect_failure.clone() {
            return Err(ServerConnectionError::ConnectFailed(message));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ServerConnectionResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.script()?.disconnect_failure.clone() {
            return Err(ServerConnectionError::request_failed("disconnect", message));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_tools(&self) -> ServerConnectionResult<Vec<ToolDefinition>> {
        self.list_tools_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        let script = self.script()?;
        if let Some(message) = &script.list_tools_failure {
            return Err(ServerConnectionError::request_failed(
                "tools/list",
                message.clone(),
            ));
        }
        Ok(script.tools.clone())
    }

    async fn list_prompts(&self) -> ServerConnectionResult<Vec<PromptDefinition>> {
        self.ensure_connected()?;
        self.script()?
            .prompts
            .clone()
            .ok_or(ServerConnectionError::Unsupported("prompts"))
    }

    async fn list_resources(&self) -> ServerConnectionResult<Vec<ResourceDefinition>> {
        self.ensure_connected()?;
        self.script()?
            .resources
            .clone()
            .ok_or(ServerConnectionError::Unsupported("resources"))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _timeout: Option<Duration>,
    ) -> ServerConnectionResult<Value> {
        self.ensure_connected()?;
        let script = self.script()?;
        if !script.tools.iter().any(|tool| tool.name() == name) {
            return Err(ServerConnectionError::request_failed(
                "tools/call",
                format!("unknown tool '{name}'"),
            ));
        }

        Ok(script
            .responses
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!({ "tool": name, "arguments": arguments })))
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ServerConnectionResult<Value> {
        self.ensure_connected()?;
        let script = self.script()?;
        let prompts = script
            .prompts
            .as_ref()
            .ok_or(ServerConnectionError::Unsupported("prompts"))?;
        let prompt = prompts
            .iter()
            .find(|prompt| prompt.name == name)
            .ok_or_else(|| {
                ServerConnectionError::request_failed("prompts/get", format!("unknown prompt '{name}'"))
            })?;
        Ok(json!({ "description": prompt.description, "arguments": arguments }))
    }

    async fn read_resource(&self, uri: &str) -> ServerConnectionResult<Value> {
        self.ensure_connected()?;
        let script = self.script()?;
        let resources = script
            .resources
            .as_ref()
            .ok_or(ServerConnectionError::Unsupported("resources"))?;
        let resource = resources
            .iter()
            .find(|resource| resource.uri == uri)
            .ok_or_else(|| {
                ServerConnectionError::request_failed(
                    "resources/read",
                    format!("unknown resource '{uri}'"),
                )
            })?;
        Ok(json!({ "contents": [{ "uri": resource.uri, "mimeType": resource.mime_type }] }))
    }
}

/// Factory handing out scripted in-memory connections by server id.
///
/// Unknown ids receive a fresh empty connection, which is remembered so
/// tests can inspect it afterwards.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectionFactory {
    connections: Arc<RwLock<HashMap<ServerId, Arc<InMemoryServerConnection>>>>,
    created: Arc<AtomicUsize>,
}

impl InMemoryConnectionFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the connection handed out for `server_id`.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn insert(
        &self,
        server_id: ServerId,
        connection: Arc<InMemoryServerConnection>,
    ) -> ServerConnectionResult<()> {
        self.connections
            .write()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))?
            .insert(server_id, connection);
        Ok(())
    }

    /// Returns the connection registered for `server_id`.
    #[must_use]
    pub fn connection(&self, server_id: &ServerId) -> Option<Arc<InMemoryServerConnection>> {
        self.connections
            .read()
            .ok()
            .and_then(|connections| connections.get(server_id).cloned())
    }

    /// Returns how many connection objects were handed out.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for InMemoryConnectionFactory {
    fn create(&self, config: &ServerConfig) -> ServerConnectionResult<Arc<dyn ServerConnection>> {
        let mut connections = self
            .connections
            .write()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))?;
        let connection: Arc<dyn ServerConnection> = connections
            .entry(config.id().clone())
            .or_insert_with(|| Arc::new(InMemoryServerConnection::new()))
            .clone();
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, json!({"type": "object"})).expect("valid tool")
    }

    #[tokio::test]
    async fn listing_requires_connection() {
        let connection = InMemoryServerConnection::with_tools(vec![tool("read_file")]);

        assert!(matches!(
            connection.list_tools().await,
            Err(ServerConnectionError::NotConnected)
        ));

        connection.connect().await.expect("connect should succeed");
        let tools = connection.list_tools().await.expect("listing should succeed");

        assert_eq!(tools.len(), 1);
        assert_eq!(connection.list_tools_calls(), 2);
    }

    #[tokio::test]
    async fn scripted_connect_failure_leaves_connection_closed() {
        let connection = InMemoryServerConnection::new();
        connection
            .fail_connect(Some("handshake refused".to_owned()))
            .expect("script update");

        let result = connection.connect().await;

        assert!(matches!(result, Err(ServerConnectionError::ConnectFailed(_))));
        assert!(!connection.is_connected());
        assert_eq!(connection.connect_calls(), 1);
    }

    #[tokio::test]
    async fn prompts_are_unsupported_until_scripted() {
        let connection = InMemoryServerConnection::new();
        connection.connect().await.expect("connect should succeed");

        assert!(matches!(
            connection.list_prompts().await,
            Err(ServerConnectionError::Unsupported("prompts"))
        ));
    }

    #[tokio::test]
    async fn call_tool_returns_scripted_response() {
        let connection = InMemoryServerConnection::with_tools(vec![tool("add")]);
        connection
            .set_response("add", json!({"sum": 3}))
            .expect("script update");
        connection.connect().await.expect("connect should succeed");

        let response = connection
            .call_tool("add", Map::new(), None)
            .await
            .expect("call should succeed");

        assert_eq!(response, json!({"sum": 3}));
    }
}
