use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// node id
pub type NodeId = String;

/// How a node talks to its interface.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallMode {
    /// One request, optionally retried.
    #[default]
    Single,
    /// Repeated requests until the polling condition holds.
    Polling,
}

/// Comparison applied by a polling condition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollingCondition {
    /// dot path into the polled result, eg. `data.status`
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One configured remote interface invocation within the call graph.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    /// node id, unique within a graph
    #[serde(deserialize_with = "deserialize_id")]
    pub id: NodeId,
    /// display order, never used for scheduling
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub mode: CallMode,
    /// timeout in milliseconds; per request for single calls, overall for polling
    #[serde(default)]
    pub timeout: Option<u64>,
    /// delay in milliseconds before the node starts
    #[serde(default)]
    pub delay_before_start: Option<u64>,
    /// total number of attempts for single calls
    #[serde(default)]
    pub retry_count: Option<u32>,
    /// retry delay in milliseconds
    #[serde(default)]
    pub retry_delay: Option<u64>,
    /// polling interval in milliseconds
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_ids")]
    pub successors: Vec<NodeId>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    pub polling_condition: Option<PollingCondition>,
}

impl CallNode {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_successors<I, S>(
        mut self,
        successors: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.successors = successors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_retry(
        mut self,
        count: u32,
        delay_ms: u64,
    ) -> Self {
        self.retry_count = Some(count);
        self.retry_delay = Some(delay_ms);
        self
    }

    pub fn with_polling(
        mut self,
        interval_ms: u64,
        max_attempts: u32,
        timeout_ms: u64,
        condition: Option<PollingCondition>,
    ) -> Self {
        self.mode = CallMode::Polling;
        self.interval = Some(interval_ms);
        self.max_attempts = Some(max_attempts);
        self.timeout = Some(timeout_ms);
        self.polling_condition = condition;
        self
    }

    pub fn with_delay(
        mut self,
        delay_ms: u64,
    ) -> Self {
        self.delay_before_start = Some(delay_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    pub fn delay_before_start(&self) -> Option<Duration> {
        self.delay_before_start.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Node ids are stored as strings but configuration often carries them as numbers.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<NodeId, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).map_err(de::Error::custom)
}

fn deserialize_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<NodeId>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    values.iter().map(|v| id_from_value(v).map_err(de::Error::custom)).collect()
}

fn id_from_value(value: &Value) -> std::result::Result<NodeId, InvalidId> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(InvalidId(other.to_string())),
    }
}

struct InvalidId(String);

impl fmt::Display for InvalidId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "invalid node id '{}', expected a non-empty string or a number", self.0)
    }
}
