//! Per-node sub-state machine.
//!
//! `NotStarted -> Waiting -> Attempting -> (Retrying | Polling) -> Done`.
//! `Waiting` is skipped without a start delay; a direct call goes from
//! `Attempting` straight to `Done`.

use std::time::Duration;

use serde_json::Value;

use crate::{
    Config, Result,
    executor::OutboundRequest,
    model::{CallMode, CallNode, PollingCondition},
};

/// How a node's request is dispatched. Exactly one per node.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Direct,
    Retry {
        count: u32,
        delay: Duration,
    },
    Poll(PollPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPlan {
    pub interval: Duration,
    pub max_attempts: u32,
    /// overall wall-clock budget
    pub timeout: Duration,
    pub condition: Option<PollingCondition>,
}

impl Strategy {
    /// Polling wins over retry; retry applies when `retry_count > 0`.
    pub fn for_node(
        node: &CallNode,
        config: &Config,
    ) -> Self {
        if node.mode == CallMode::Polling {
            return Strategy::Poll(PollPlan {
                interval: Duration::from_millis(node.interval.unwrap_or(config.polling.interval_ms)),
                max_attempts: node.max_attempts.filter(|n| *n > 0).unwrap_or(config.polling.max_attempts),
                timeout: node.timeout().unwrap_or(Duration::MAX),
                condition: node.polling_condition.clone(),
            });
        }

        match node.retry_count {
            Some(count) if count > 0 => Strategy::Retry {
                count,
                delay: Duration::from_millis(node.retry_delay.unwrap_or(config.retry.delay_ms)),
            },
            _ => Strategy::Direct,
        }
    }
}

#[derive(Debug)]
pub enum NodePhase {
    NotStarted,
    Waiting(Duration),
    Attempting,
    Retrying {
        request: OutboundRequest,
        count: u32,
        delay: Duration,
    },
    Polling {
        request: OutboundRequest,
        plan: PollPlan,
    },
    Done(Result<Value>),
}

impl NodePhase {
    pub fn name(&self) -> &'static str {
        match self {
            NodePhase::NotStarted => "not_started",
            NodePhase::Waiting(_) => "waiting",
            NodePhase::Attempting => "attempting",
            NodePhase::Retrying {
                ..
            } => "retrying",
            NodePhase::Polling {
                ..
            } => "polling",
            NodePhase::Done(_) => "done",
        }
    }

    /// The phase after `NotStarted`.
    pub fn start(node: &CallNode) -> Self {
        match node.delay_before_start() {
            Some(delay) => NodePhase::Waiting(delay),
            None => NodePhase::Attempting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConditionOperator;

    #[test]
    fn test_strategy_direct() {
        assert_eq!(Strategy::for_node(&CallNode::new("a"), &Config::default()), Strategy::Direct);
        assert_eq!(Strategy::for_node(&CallNode::new("a").with_retry(0, 10), &Config::default()), Strategy::Direct);
    }

    #[test]
    fn test_strategy_retry_uses_default_delay() {
        let mut node = CallNode::new("a");
        node.retry_count = Some(3);
        assert_eq!(
            Strategy::for_node(&node, &Config::default()),
            Strategy::Retry {
                count: 3,
                delay: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn test_polling_wins_over_retry() {
        let condition = PollingCondition {
            field: "status".to_string(),
            operator: ConditionOperator::Equals,
            value: Some(serde_json::json!("done")),
        };
        let node = CallNode::new("a").with_retry(3, 10).with_polling(200, 5, 3_000, Some(condition.clone()));

        assert_eq!(
            Strategy::for_node(&node, &Config::default()),
            Strategy::Poll(PollPlan {
                interval: Duration::from_millis(200),
                max_attempts: 5,
                timeout: Duration::from_millis(3_000),
                condition: Some(condition),
            })
        );
    }

    #[test]
    fn test_polling_defaults() {
        let mut node = CallNode::new("a");
        node.mode = CallMode::Polling;
        let Strategy::Poll(plan) = Strategy::for_node(&node, &Config::default()) else {
            panic!("expected polling");
        };
        assert_eq!(plan.interval, Duration::from_millis(1_000));
        assert_eq!(plan.max_attempts, 10);
        assert_eq!(plan.timeout, Duration::MAX);
    }

    #[test]
    fn test_start_phase() {
        assert_eq!(NodePhase::start(&CallNode::new("a")).name(), "attempting");
        assert_eq!(NodePhase::start(&CallNode::new("a").with_delay(50)).name(), "waiting");
    }
}
