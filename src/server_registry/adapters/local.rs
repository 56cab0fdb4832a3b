//! In-process servers built from registered local modules.
//!
//! A local module is a named factory that yields [`LocalTool`]s. The
//! `local` transport resolves its module through a [`LocalModuleRegistry`]
//! instead of loading code dynamically.

use crate::server_registry::{
    domain::{LocalTransportConfig, PromptDefinition, ResourceDefinition, ToolDefinition},
    ports::{ServerConnection, ServerConnectionError, ServerConnectionResult},
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

type LocalToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

type LocalModuleFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Vec<LocalTool>, String> + Send + Sync>;

/// Tool executed in-process.
#[derive(Clone)]
pub struct LocalTool {
    definition: ToolDefinition,
    handler: LocalToolHandler,
}

impl LocalTool {
    /// Creates a tool from its definition and an async handler.
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            definition,
            handler: Arc::new(move |arguments| handler(arguments).boxed()),
        }
    }

    /// Returns the tool definition.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for LocalTool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LocalTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Maps logical module names to tool factories.
#[derive(Clone, Default)]
pub struct LocalModuleRegistry {
    modules: Arc<RwLock<HashMap<String, LocalModuleFactory>>>,
}

impl fmt::Debug for LocalModuleRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .modules
            .read()
            .map(|modules| modules.keys().cloned().collect())
            .unwrap_or_default();
        formatter
            .debug_struct("LocalModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}

impl LocalModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `module`, replacing any previous entry.
    ///
    /// The factory receives the configured export name, if any.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn register<F>(&self, module: impl Into<String>, factory: F) -> ServerConnectionResult<()>
    where
        F: Fn(Option<&str>) -> Result<Vec<LocalTool>, String> + Send + Sync + 'static,
    {
        self.modules
            .write()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))?
            .insert(module.into(), Arc::new(factory));
        Ok(())
    }

    /// Returns whether `module` is registered.
    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        self.modules
            .read()
            .is_ok_and(|modules| modules.contains_key(module))
    }

    /// Instantiates the tools of the module named by `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConnectionError::ConnectFailed`] when the module is
    /// unknown or its factory fails.
    pub fn resolve(&self, transport: &LocalTransportConfig) -> ServerConnectionResult<Vec<LocalTool>> {
        let factory = self
            .modules
            .read()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))?
            .get(transport.module())
            .cloned()
            .ok_or_else(|| {
                ServerConnectionError::ConnectFailed(format!(
                    "local module '{}' is not registered",
                    transport.module()
                ))
            })?;

        factory(transport.export()).map_err(ServerConnectionError::ConnectFailed)
    }

    /// Creates an unconnected connection for `transport`.
    #[must_use]
    pub fn connection(&self, transport: LocalTransportConfig) -> LocalServerConnection {
        LocalServerConnection {
            registry: self.clone(),
            transport,
            tools: RwLock::new(None),
        }
    }
}

/// Connection serving tools from a local module.
#[derive(Debug)]
pub struct LocalServerConnection {
    registry: LocalModuleRegistry,
    transport: LocalTransportConfig,
    tools: RwLock<Option<Vec<LocalTool>>>,
}

impl LocalServerConnection {
    fn loaded_tools(&self) -> ServerConnectionResult<Vec<LocalTool>> {
        self.tools
            .read()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))?
            .clone()
            .ok_or(ServerConnectionError::NotConnected)
    }

    fn store_tools(&self, tools: Option<Vec<LocalTool>>) -> ServerConnectionResult<()> {
        *self
            .tools
            .write()
            .map_err(|err| ServerConnectionError::runtime(std::io::Error::other(err.to_string())))? =
            tools;
        Ok(())
    }
}

#[async_trait]
impl ServerConnection for LocalServerConnection {
    async fn connect(&self) -> ServerConnectionResult<()> {
        let tools = self.registry.resolve(&self.transport)?;
        self.store_tools(Some(tools))
    }

    async fn disconnect(&self) -> ServerConnectionResult<()> {
        self.store_tools(None)
    }

    fn is_connected(&self) -> bool {
        self.tools.read().is_ok_and(|tools| tools.is_some())
    }

    async fn list_tools(&self) -> ServerConnectionResult<Vec<ToolDefinition>> {
        Ok(self
            .loaded_tools()?
            .iter()
            .map(|tool| tool.definition().clone())
            .collect())
    }

    async fn list_prompts(&self) -> ServerConnectionResult<Vec<PromptDefinition>> {
        self.loaded_tools()?;
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> ServerConnectionResult<Vec<ResourceDefinition>> {
        self.loaded_tools()?;
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        _timeout: Option<Duration>,
    ) -> ServerConnectionResult<Value> {
        let tool = self
            .loaded_tools()?
            .into_iter()
            .find(|tool| tool.definition().name() == name)
            .ok_or_else(|| {
                ServerConnectionError::request_failed("tools/call", format!("unknown tool '{name}'"))
            })?;

        tool.invoke(arguments)
            .await
            .map_err(|reason| ServerConnectionError::request_failed("tools/call", reason))
    }

    async fn get_prompt(
        &self,
        _name: &str,
        _arguments: Map<String, Value>,
    ) -> ServerConnectionResult<Value> {
        Err(ServerConnectionError::Unsupported("prompts"))
    }

    async fn read_resource(&self, _uri: &str) -> ServerConnectionResult<Value> {
        Err(ServerConnectionError::Unsupported("resources"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator_registry() -> LocalModuleRegistry {
        let registry = LocalModuleRegistry::new();
        registry
            .register("calculator", |_export| {
                let definition = ToolDefinition::new("add", json!({"type": "object"}))
                    .map_err(|err| err.to_string())?
                    .with_description("Add two numbers");
                Ok(vec![LocalTool::new(definition, |arguments| async move {
                    let lhs = arguments.get("a").and_then(Value::as_i64).unwrap_or(0);
                    let rhs = arguments.get("b").and_then(Value::as_i64).unwrap_or(0);
                    Ok(json!({ "sum": lhs + rhs }))
                })])
            })
            .expect("registration should succeed");
        registry
    }

    fn transport(module: &str) -> LocalTransportConfig {
        LocalTransportConfig::new(module).expect("valid module")
    }

    #[tokio::test]
    async fn local_tools_are_served_after_connect() {
        let connection = calculator_registry().connection(transport("calculator"));
        assert!(!connection.is_connected());

        connection.connect().await.expect("connect should succeed");
        let tools = connection.list_tools().await.expect("listing should succeed");

        assert!(connection.is_connected());
        assert_eq!(tools.first().map(ToolDefinition::name), Some("add"));
    }

    #[tokio::test]
    async fn local_tool_handler_runs_in_process() {
        let connection = calculator_registry().connection(transport("calculator"));
        connection.connect().await.expect("connect should succeed");

        let mut arguments = Map::new();
        arguments.insert("a".to_owned(), json!(2));
        arguments.insert("b".to_owned(), json!(5));
        let result = connection
            .call_tool("add", arguments, None)
            .await
            .expect("call should succeed");

        assert_eq!(result, json!({"sum": 7}));
    }

    #[tokio::test]
    async fn unknown_module_fails_to_connect() {
        let connection = calculator_registry().connection(transport("weather"));

        let result = connection.connect().await;

        assert!(matches!(result, Err(ServerConnectionError::ConnectFailed(_))));
        assert!(!connection.is_connected());
    }
}
