use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallflowError, Result, model::NodeId, utils};

/// Scheduler-visible state of a node within one run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallState {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Success | CallState::Failed)
    }

    /// `Pending -> Processing -> {Success | Failed}`, nothing else.
    pub fn can_transition_to(
        &self,
        next: CallState,
    ) -> bool {
        matches!(
            (self, next),
            (CallState::Pending, CallState::Processing) | (CallState::Processing, CallState::Success) | (CallState::Processing, CallState::Failed)
        )
    }
}

/// Runtime record of one node in one run. Never persisted, never shared across runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallContext {
    pub id: NodeId,
    pub state: CallState,
    pub result: Option<Value>,
    pub error: Option<CallflowError>,
    /// attempts made beyond the first one
    pub retry_count: u32,
    /// epoch millis; creation time until the node starts processing
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl CallContext {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            state: CallState::Pending,
            result: None,
            error: None,
            retry_count: 0,
            start_time: utils::time::time_millis(),
            end_time: None,
        }
    }

    /// Moves to `next`, stamping times. Illegal transitions leave the context untouched.
    pub fn transition(
        &mut self,
        next: CallState,
    ) -> Result<CallState> {
        if !self.state.can_transition_to(next) {
            return Err(CallflowError::Engine(format!(
                "node '{}': illegal transition {} -> {}",
                self.id,
                self.state.as_ref(),
                next.as_ref()
            )));
        }

        let prev = self.state;
        self.state = next;
        match next {
            CallState::Processing => self.start_time = utils::time::time_millis(),
            CallState::Success | CallState::Failed => self.end_time = Some(utils::time::time_millis()),
            CallState::Pending => {}
        }
        Ok(prev)
    }

    pub fn duration_millis(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}
