pub mod datetime;
pub mod schema;
pub mod web_search;

use async_trait::async_trait;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ ConfigurationError, ToolError };

/// Name, description and JSON-schema parameters advertised to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> &ToolSchema;

    /// Runs the tool body. Arguments have already been validated by `invoke`.
    async fn execute(&self, arguments: Value) -> Result<String, ToolError>;

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let schema = self.schema();
        schema::validate(&schema.parameters, &arguments).map_err(|reason|
            ToolError::invalid_arguments(schema.name.clone(), reason)
        )?;
        self.execute(arguments).await
    }
}

/// Immutable set of tools keyed by name, built once at startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, ConfigurationError> {
        let mut registry = Self::default();
        for tool in tools {
            let name = tool.schema().name.clone();
            if registry.tools.contains_key(&name) {
                return Err(ConfigurationError::invalid("tools", format!("duplicate tool name '{}'", name)));
            }
            registry.order.push(name.clone());
            registry.tools.insert(name, tool);
        }
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema().clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::execution_failed(name, "no such tool is registered"))?;
        info!("Invoking tool '{}'", name);
        let result = tool.invoke(arguments).await;
        if let Err(e) = &result {
            warn!("{}", e);
        }
        result
    }
}
