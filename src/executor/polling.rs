use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::{CallflowError, Result, executor::condition, model::PollingCondition};

/// Invokes `op` until its result satisfies `condition`.
///
/// Up to `max_attempts` attempts (at least one), sleeping `interval` before
/// every attempt after the first. At the top of each attempt the wall-clock time
/// since the first attempt is checked against `timeout`, which ends polling with
/// [`CallflowError::Timeout`] regardless of the attempts left. Without a
/// condition any result that is not a pending marker is accepted. Failed
/// attempts are swallowed; the last failure rides along in
/// [`CallflowError::PollingAttemptsExhausted`].
pub async fn poll_with_timeout<F, Fut>(
    mut op: F,
    interval: Duration,
    max_attempts: u32,
    timeout: Duration,
    condition: Option<&PollingCondition>,
) -> Result<Value>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let max_attempts = max_attempts.max(1);
    let started = Instant::now();
    let mut last_err: Option<CallflowError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        let elapsed = started.elapsed();
        if elapsed > timeout {
            return Err(CallflowError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        match op(attempt).await {
            Ok(result) => {
                let matched = match condition {
                    Some(cond) => condition::evaluate(cond, &result),
                    None => !condition::is_pending_marker(&result),
                };
                if matched {
                    tracing::debug!("polling matched on attempt {}/{}", attempt, max_attempts);
                    return Ok(result);
                }
                last_err = None;
                tracing::trace!("polling attempt {}/{} not ready", attempt, max_attempts);
            }
            Err(err) => {
                tracing::debug!("polling attempt {}/{} failed: {}", attempt, max_attempts, err);
                last_err = Some(err);
            }
        }
    }

    Err(CallflowError::PollingAttemptsExhausted {
        attempts: max_attempts,
        last: last_err.map(Box::new),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use serde_json::json;

    use super::*;
    use crate::model::ConditionOperator;

    fn status_done() -> PollingCondition {
        PollingCondition {
            field: "status".to_string(),
            operator: ConditionOperator::Equals,
            value: Some(json!("done")),
        }
    }

    /// Replays `responses`, repeating the last one once the script runs out.
    fn scripted(responses: Vec<Result<Value>>) -> (Arc<AtomicU32>, impl FnMut(u32) -> std::future::Ready<Result<Value>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(responses)));
        let counter = calls.clone();
        let op = move |_attempt: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut script = script.lock().unwrap();
            let next = if script.len() > 1 { script.pop_front().unwrap() } else { script.front().cloned().unwrap() };
            std::future::ready(next)
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_second_attempt() {
        let (calls, op) = scripted(vec![Ok(json!({ "status": "pending" })), Ok(json!({ "status": "done" }))]);
        let condition = status_done();

        let result = poll_with_timeout(op, Duration::from_millis(500), 5, Duration::from_secs(10), Some(&condition)).await;

        assert_eq!(result.unwrap(), json!({ "status": "done" }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_attempts_run_out() {
        let (calls, op) = scripted(vec![Ok(json!({ "status": "pending" }))]);
        let condition = status_done();

        let result = poll_with_timeout(op, Duration::from_millis(100), 10, Duration::from_millis(250), Some(&condition)).await;

        assert!(matches!(result.unwrap_err(), CallflowError::Timeout { timeout_ms: 250, .. }));
        // attempts at 0ms, 100ms and 200ms; the one at 300ms hits the timeout
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let (calls, op) = scripted(vec![Ok(json!({ "status": "pending" }))]);
        let condition = status_done();

        let result = poll_with_timeout(op, Duration::from_millis(10), 3, Duration::from_secs(60), Some(&condition)).await;

        assert!(matches!(
            result.unwrap_err(),
            CallflowError::PollingAttemptsExhausted {
                attempts: 3,
                last: None
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed_until_match() {
        let (calls, op) = scripted(vec![
            Err(CallflowError::Transport {
                status: Some(503),
                message: "busy".to_string(),
            }),
            Ok(json!({ "status": "done" })),
        ]);
        let condition = status_done();

        let result = poll_with_timeout(op, Duration::from_millis(10), 3, Duration::from_secs(60), Some(&condition)).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_failure_is_kept() {
        let (_, op) = scripted(vec![Err(CallflowError::Transport {
            status: Some(503),
            message: "busy".to_string(),
        })]);

        let err = poll_with_timeout(op, Duration::from_millis(10), 2, Duration::from_secs(60), None).await.unwrap_err();

        assert!(matches!(err, CallflowError::PollingAttemptsExhausted { attempts: 2, last: Some(_) }));
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_condition_skips_pending_marker() {
        let (calls, op) = scripted(vec![Ok(Value::Null), Ok(json!({ "status": "processing" })), Ok(json!({ "label": "leaf-blight" }))]);

        let result = poll_with_timeout(op, Duration::from_millis(10), 5, Duration::from_secs(60), None).await;

        assert_eq!(result.unwrap(), json!({ "label": "leaf-blight" }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
