/// Flow definition types
///
/// Deserialized from the flow file. Nodes keep every property they were
/// authored with; the fields the runtime itself needs are pulled out.

use crate::scope::EnvDeclaration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A deployable flow (tab)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Unique flow identifier
    pub id: String,
    /// Display name, answered as `NR_FLOW_NAME`
    #[serde(default)]
    pub label: String,
    /// Flow-level declarations
    #[serde(default)]
    pub env: Vec<EnvDeclaration>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// A group of nodes; groups may nest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Enclosing group, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvDeclaration>,
}

/// A single graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Registered node type (e.g. "link in")
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    /// Enclosing group, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<String>,
    /// Output ports; each port lists the ids it is wired to
    #[serde(default)]
    pub wires: Vec<Vec<String>>,
    /// Everything else the node was authored with
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: String::new(),
            g: None,
            wires: Vec::new(),
            props: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.g = Some(group.into());
        self
    }

    /// Wire output `port` to `targets`
    pub fn with_wires<I, S>(mut self, port: usize, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.wires.len() <= port {
            self.wires.resize_with(port + 1, Vec::new);
        }
        self.wires[port] = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    /// A string property, empty values treated as absent
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.prop(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

/// Parse a flow file: either one flow object or an array of them
pub fn parse_flows(text: &str) -> anyhow::Result<Vec<FlowConfig>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| anyhow::anyhow!("Invalid flow file JSON: {}", e))?;
    let flows = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(flows)
}
