//! Per-node transition callbacks, used for progress reporting.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use globset::{Glob, GlobMatcher};

use crate::{
    CallflowError, Result,
    model::NodeId,
    runtime::CallState,
};

/// One state change of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTransition {
    pub run_id: String,
    pub nid: NodeId,
    pub from: CallState,
    pub to: CallState,
    pub error: Option<String>,
    /// epoch millis
    pub timestamp: i64,
}

pub type TransitionHandle = Arc<dyn Fn(&NodeTransition) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct TransitionCallback {
    /// glob over node ids, eg. `*` or `poll-*`
    matcher: GlobMatcher,
    handle: TransitionHandle,
}

impl TransitionCallback {
    pub fn new(
        pattern: &str,
        handle: TransitionHandle,
    ) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|err| CallflowError::Config(format!("invalid node pattern '{}': {}", pattern, err)))?
            .compile_matcher();
        Ok(Self {
            matcher,
            handle,
        })
    }

    /// Runs the handle if the node matches. A panicking handle is logged and otherwise ignored.
    pub fn notify(
        &self,
        transition: &NodeTransition,
    ) {
        if !self.matcher.is_match(&transition.nid) {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| (self.handle)(transition))).is_err() {
            tracing::warn!(run_id = %transition.run_id, "transition callback for node '{}' panicked", transition.nid);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn transition(nid: &str) -> NodeTransition {
        NodeTransition {
            run_id: "run".to_string(),
            nid: nid.to_string(),
            from: CallState::Pending,
            to: CallState::Processing,
            error: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_pattern_filters_nodes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = TransitionCallback::new("poll-*", Arc::new(move |t: &NodeTransition| sink.lock().unwrap().push(t.nid.clone()))).unwrap();

        callback.notify(&transition("poll-status"));
        callback.notify(&transition("upload"));

        assert_eq!(*seen.lock().unwrap(), vec!["poll-status".to_string()]);
    }

    #[test]
    fn test_panicking_handle_is_contained() {
        let callback = TransitionCallback::new("*", Arc::new(|_: &NodeTransition| panic!("boom"))).unwrap();
        callback.notify(&transition("1"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(TransitionCallback::new("[", Arc::new(|_: &NodeTransition| {})).is_err());
    }
}
