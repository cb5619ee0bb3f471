//! The tool trait and the process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use vox_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameter schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-Schema type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
        }
    }

    /// Whether a JSON value conforms to this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            // Accept 2.0 for integer parameters; reject 2.5.
            ParameterType::Integer => {
                value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Object => value.is_object(),
            ParameterType::Array => value.is_array(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParameterType,
    pub description: String,
    pub required: bool,
    /// Permitted values, when the parameter is an enumeration.
    pub enum_values: Option<Vec<Value>>,
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn new(name: &str, kind: ParameterType, description: &str, required: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required,
            enum_values: None,
            default: None,
        }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An externally defined capability invoked by the model.
///
/// `execute` receives arguments already validated against
/// [`Tool::parameters`], with declared defaults filled in.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Stable name: lowercase with underscores.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    async fn execute(&self, args: &serde_json::Map<String, Value>) -> Result<Value>;

    /// Per-tool execution budget; `None` uses the executor default. The
    /// executor enforces it.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// OpenAI function-calling schema for this tool.
    fn schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in self.parameters() {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), Value::String(param.kind.as_str().into()));
            prop.insert("description".into(), Value::String(param.description.clone()));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name, Value::Object(prop));
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide name→tool mapping. Registration is rare; reads dominate.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails on a name collision or a malformed name.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(Error::Validation(format!(
                "invalid tool name {name:?}: expected lowercase with underscores"
            )));
        }

        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(Error::Validation(format!(
                "tool {name:?} is already registered"
            )));
        }
        tools.insert(name.clone(), tool);
        tracing::debug!(tool = %name, "tool registered");
        Ok(())
    }

    /// Remove a tool; absent names are a non-error.
    pub fn unregister(&self, name: &str) {
        if self.tools.write().remove(name).is_some() {
            tracing::debug!(tool = %name, "tool unregistered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Registered tool names, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// OpenAI function-calling schemas for every registered tool, sorted
    /// by name.
    pub fn schemas(&self) -> Vec<Value> {
        let tools = self.tools.read();
        let mut entries: Vec<(&String, &Arc<dyn Tool>)> = tools.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());
        entries.into_iter().map(|(_, tool)| tool.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
