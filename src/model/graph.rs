use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Result,
    model::{CallNode, InterfaceConfig, NodeId},
};

/// A resolved call graph as stored by the host service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<CallNode>,
    #[serde(default)]
    pub interfaces: HashMap<NodeId, InterfaceConfig>,
}

impl GraphDefinition {
    pub fn from_json(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        jsonschema::validate(&Self::schema(), &value)?;
        let graph = serde_json::from_value::<Self>(value)?;
        Ok(graph)
    }

    /// Ordered by `order`, then id. Scheduling never depends on this.
    pub fn sorted_nodes(&self) -> Vec<&CallNode> {
        let mut nodes: Vec<&CallNode> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        nodes
    }

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["nodes"],
            "properties": {
                "nodes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {
                            "id": { "type": ["string", "integer"] },
                            "order": { "type": "integer" },
                            "mode": { "type": "string", "enum": ["single", "polling"] },
                            "timeout": { "type": ["integer", "null"], "minimum": 0 },
                            "delayBeforeStart": { "type": ["integer", "null"], "minimum": 0 },
                            "retryCount": { "type": ["integer", "null"], "minimum": 0 },
                            "retryDelay": { "type": ["integer", "null"], "minimum": 0 },
                            "interval": { "type": ["integer", "null"], "minimum": 0 },
                            "maxAttempts": { "type": ["integer", "null"], "minimum": 0 },
                            "successors": {
                                "type": ["array", "null"],
                                "items": { "type": ["string", "integer"] }
                            },
                            "params": { "type": "object" },
                            "pollingCondition": {
                                "type": ["object", "null"],
                                "required": ["field", "operator"],
                                "properties": {
                                    "field": { "type": "string" },
                                    "operator": {
                                        "type": "string",
                                        "enum": ["equals", "notEquals", "contains", "greaterThan", "lessThan", "exists", "notExists"]
                                    }
                                }
                            }
                        }
                    }
                },
                "interfaces": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": ["baseUrl", "path"],
                        "properties": {
                            "baseUrl": { "type": "string" },
                            "pathPrefix": { "type": "string" },
                            "path": { "type": "string" },
                            "method": { "type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"] },
                            "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                            "timeout": { "type": ["integer", "null"], "minimum": 0 }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CallMode, HttpMethod};

    #[test]
    fn test_graph_from_json() {
        let graph = GraphDefinition::from_json(
            r#"{
                "nodes": [
                    { "id": 2, "order": 2, "mode": "polling", "interval": 1000, "maxAttempts": 5, "timeout": 10000,
                      "params": { "taskId": "{{#1.taskId}}" } },
                    { "id": 1, "order": 1, "successors": [2], "params": { "file": "image" } }
                ],
                "interfaces": {
                    "1": { "baseUrl": "http://model:8000", "path": "/predict", "method": "POST" },
                    "2": { "baseUrl": "http://model:8000", "pathPrefix": "/api", "path": "/tasks/{taskId}" }
                }
            }"#,
        )
        .unwrap();

        let sorted: Vec<&str> = graph.sorted_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(sorted, vec!["1", "2"]);
        assert_eq!(graph.nodes[0].mode, CallMode::Polling);
        assert_eq!(graph.interfaces["1"].method, HttpMethod::POST);
        assert_eq!(graph.interfaces["2"].method, HttpMethod::GET);
    }

    #[test]
    fn test_graph_schema_rejects_bad_operator() {
        let graph = GraphDefinition::from_json(
            r#"{ "nodes": [ { "id": "a", "pollingCondition": { "field": "status", "operator": "matches" } } ] }"#,
        );
        assert!(graph.is_err());
    }

    #[test]
    fn test_graph_schema_requires_nodes() {
        assert!(GraphDefinition::from_json(r#"{ "interfaces": {} }"#).is_err());
    }
}
