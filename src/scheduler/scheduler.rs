//! Graph scheduler for executing one call graph.
//!
//! The scheduler is responsible for:
//! - Validating the graph and creating per-node contexts
//! - Launching root nodes concurrently
//! - Driving each node through delay, dispatch and result recording
//! - Starting successors once all of their predecessors have succeeded

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use serde_json::{Value, json};

use crate::{
    CallflowError, Config, Result, ShareLock,
    common::MemCache,
    executor::{OutboundRequest, RequestExecutor, poll_with_timeout, retry_with_delay},
    model::{CallMode, CallNode, EnvironmentVariables, InterfaceConfig, NodeId},
    runtime::{CallContext, CallState, LogLevel, LogSink},
    scheduler::{
        callback::{NodeTransition, TransitionCallback},
        graph::CallGraph,
        phase::{NodePhase, Strategy},
    },
    template::{process_params, process_url_template},
    utils,
};

/// Executes one call graph per run.
///
/// Create a fresh scheduler (or call [`GraphScheduler::initialize`] again) for
/// every run; contexts and results of a run live and die with it.
///
/// # Example
///
/// ```rust,ignore
/// let mut scheduler = engine.scheduler();
/// scheduler.initialize(nodes, interfaces)?;
/// let results = scheduler.execute(EnvironmentVariables::new(token)).await?;
/// ```
pub struct GraphScheduler {
    run_id: String,
    executor: Arc<RequestExecutor>,
    logs: Arc<dyn LogSink>,
    config: Arc<Config>,
    callbacks: Vec<TransitionCallback>,
    /// State of the current run, set by `initialize`.
    state: Option<Arc<RunState>>,
}

/// Per-run arena.
struct RunState {
    graph: CallGraph,
    contexts: ShareLock<HashMap<NodeId, CallContext>>,
    /// append-only results of succeeded nodes
    results: MemCache<NodeId, Value>,
    /// nodes already handed to execution
    claimed: Mutex<HashSet<NodeId>>,
    started: AtomicBool,
}

/// Everything a node task needs, shared by all tasks of one `execute`.
struct Run {
    run_id: String,
    state: Arc<RunState>,
    executor: Arc<RequestExecutor>,
    logs: Arc<dyn LogSink>,
    config: Arc<Config>,
    callbacks: Arc<Vec<TransitionCallback>>,
    env: Arc<EnvironmentVariables>,
}

impl GraphScheduler {
    pub fn new(
        executor: Arc<RequestExecutor>,
        logs: Arc<dyn LogSink>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            run_id: utils::longid(),
            executor,
            logs,
            config,
            callbacks: Vec::new(),
            state: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Registers a callback for transitions of nodes whose id matches the glob `pattern`.
    pub fn on_transition(
        &mut self,
        pattern: &str,
        f: impl Fn(&NodeTransition) + Send + Sync + 'static,
    ) -> Result<()> {
        self.callbacks.push(TransitionCallback::new(pattern, Arc::new(f))?);
        Ok(())
    }

    /// Validates the graph and resets all per-node state to `Pending`.
    ///
    /// Must not be called while `execute` is in flight.
    pub fn initialize(
        &mut self,
        nodes: Vec<CallNode>,
        interfaces: HashMap<NodeId, InterfaceConfig>,
    ) -> Result<()> {
        self.state = None;

        let graph = CallGraph::build(nodes, interfaces)?;
        let contexts: HashMap<NodeId, CallContext> = graph.ids().iter().map(|id| (id.clone(), CallContext::new(id.clone()))).collect();
        let results = MemCache::new(graph.len());

        self.run_id = utils::longid();
        self.state = Some(Arc::new(RunState {
            graph,
            contexts: Arc::new(RwLock::new(contexts)),
            results,
            claimed: Mutex::new(HashSet::new()),
            started: AtomicBool::new(false),
        }));

        Ok(())
    }

    /// Runs the graph to completion and returns the results of succeeded nodes.
    ///
    /// Node failures stay local to their branch and never fail this call;
    /// inspect [`GraphScheduler::context`] for details.
    pub async fn execute(
        &self,
        env: EnvironmentVariables,
    ) -> Result<HashMap<NodeId, Value>> {
        let state = self.state.clone().ok_or_else(|| CallflowError::Engine("scheduler is not initialized".to_string()))?;
        if state.started.swap(true, Ordering::SeqCst) {
            return Err(CallflowError::Engine(format!("run '{}' was already executed, initialize a new run", self.run_id)));
        }

        let run = Arc::new(Run {
            run_id: self.run_id.clone(),
            state: state.clone(),
            executor: self.executor.clone(),
            logs: self.logs.clone(),
            config: self.config.clone(),
            callbacks: Arc::new(self.callbacks.clone()),
            env: Arc::new(env),
        });

        let roots = run.claim(state.graph.roots());
        run.logs.add_log(
            &run.run_id,
            LogLevel::Info,
            "run started",
            json!({ "nodes": state.graph.len(), "roots": roots }),
        );

        join_all(roots.into_iter().map(|nid| run.clone().execute_node(nid))).await;

        let results = self.results();
        run.logs.add_log(
            &run.run_id,
            LogLevel::Info,
            "run finished",
            json!({ "nodes": state.graph.len(), "succeeded": results.len(), "completed": self.is_all_completed() }),
        );

        Ok(results)
    }

    /// Results of every node in `Success`.
    pub fn results(&self) -> HashMap<NodeId, Value> {
        self.contexts()
            .into_iter()
            .filter(|(_, ctx)| ctx.state == CallState::Success)
            .filter_map(|(id, ctx)| ctx.result.map(|result| (id, result)))
            .collect()
    }

    /// Whether every node ended in `Success` or `Failed`.
    pub fn is_all_completed(&self) -> bool {
        match &self.state {
            Some(state) => read(&state.contexts).values().all(|ctx| ctx.state.is_terminal()),
            None => false,
        }
    }

    pub fn context(
        &self,
        nid: &str,
    ) -> Option<CallContext> {
        self.state.as_ref().and_then(|state| read(&state.contexts).get(nid).cloned())
    }

    pub fn contexts(&self) -> HashMap<NodeId, CallContext> {
        self.state.as_ref().map(|state| read(&state.contexts).clone()).unwrap_or_default()
    }
}

impl Run {
    /// Marks nodes as handed to execution; returns the ones not claimed before.
    fn claim(
        &self,
        nids: Vec<NodeId>,
    ) -> Vec<NodeId> {
        let mut claimed = self.state.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        nids.into_iter().filter(|nid| claimed.insert(nid.clone())).collect()
    }

    fn execute_node(
        self: Arc<Self>,
        nid: NodeId,
    ) -> BoxFuture<'static, ()> {
        async move {
            let (Some(node), Some(interface)) = (self.state.graph.node(&nid), self.state.graph.interface(&nid)) else {
                tracing::error!(run_id = %self.run_id, "node '{}' vanished from the graph", nid);
                return;
            };

            let (outcome, attempts) = self.drive(&node, &interface).await;

            match outcome {
                Ok(result) => {
                    self.transition(&nid, CallState::Success, Some(result), None, attempts);
                    let ready = self.claim(self.ready_successors(&node));
                    join_all(ready.into_iter().map(|succ| self.clone().execute_node(succ))).await;
                }
                Err(err) => {
                    self.transition(&nid, CallState::Failed, None, Some(err), attempts);
                }
            }
        }
        .boxed()
    }

    /// Walks the node's phases until it is done. Returns the outcome and the number of attempts made.
    async fn drive(
        &self,
        node: &CallNode,
        interface: &InterfaceConfig,
    ) -> (Result<Value>, u32) {
        let attempts = AtomicU32::new(0);
        let mut phase = NodePhase::NotStarted;

        loop {
            tracing::trace!(run_id = %self.run_id, nid = %node.id, phase = phase.name());
            phase = match phase {
                NodePhase::NotStarted => NodePhase::start(node),
                NodePhase::Waiting(delay) => {
                    tokio::time::sleep(delay).await;
                    NodePhase::Attempting
                }
                NodePhase::Attempting => {
                    self.transition(&node.id, CallState::Processing, None, None, 0);
                    match self.prepare(node, interface) {
                        Err(err) => NodePhase::Done(Err(err)),
                        Ok(request) => match Strategy::for_node(node, &self.config) {
                            Strategy::Direct => NodePhase::Done(self.attempt(&node.id, &request, &attempts).await),
                            Strategy::Retry {
                                count,
                                delay,
                            } => NodePhase::Retrying {
                                request,
                                count,
                                delay,
                            },
                            Strategy::Poll(plan) => NodePhase::Polling {
                                request,
                                plan,
                            },
                        },
                    }
                }
                NodePhase::Retrying {
                    request,
                    count,
                    delay,
                } => NodePhase::Done(retry_with_delay(|_| self.attempt(&node.id, &request, &attempts), count, delay).await),
                NodePhase::Polling {
                    request,
                    plan,
                } => NodePhase::Done(
                    poll_with_timeout(
                        |_| self.attempt(&node.id, &request, &attempts),
                        plan.interval,
                        plan.max_attempts,
                        plan.timeout,
                        plan.condition.as_ref(),
                    )
                    .await,
                ),
                NodePhase::Done(outcome) => return (outcome, attempts.load(Ordering::SeqCst)),
            };
        }
    }

    /// Resolves url and payload against the results collected so far.
    fn prepare(
        &self,
        node: &CallNode,
        interface: &InterfaceConfig,
    ) -> Result<OutboundRequest> {
        let results = &self.state.results;
        let path = process_url_template(&interface.path, &node.params, results)?;
        let payload = process_params(&node.params, results, &interface.path, self.env.file_meta.as_ref(), self.env.file_data.as_deref())?;

        let timeout = match node.mode {
            CallMode::Single => node.timeout().or(interface.timeout()),
            CallMode::Polling => interface.timeout(),
        };

        let mut request = OutboundRequest::new(interface.method, interface.full_url(&path), payload);
        request.headers = interface.headers.clone();
        request.timeout = Some(timeout.unwrap_or(self.config.http.request_timeout()));

        Ok(request.with_bearer(&self.env.token))
    }

    /// One request; the node's result is the envelope's `data`.
    async fn attempt(
        &self,
        nid: &str,
        request: &OutboundRequest,
        attempts: &AtomicU32,
    ) -> Result<Value> {
        attempts.fetch_add(1, Ordering::SeqCst);
        let envelope = self.executor.send_request(&self.run_id, nid, request).await?;
        Ok(envelope.data)
    }

    /// Successors of `node` whose predecessors have all succeeded.
    fn ready_successors(
        &self,
        node: &CallNode,
    ) -> Vec<NodeId> {
        let contexts = read(&self.state.contexts);
        node.successors
            .iter()
            .filter(|succ| {
                self.state
                    .graph
                    .predecessors(succ)
                    .iter()
                    .all(|pred| contexts.get(pred).is_some_and(|ctx| ctx.state == CallState::Success))
            })
            .cloned()
            .collect()
    }

    /// The only place a context changes. Stores results before the state flips
    /// to `Success` so successors always see them.
    fn transition(
        &self,
        nid: &str,
        to: CallState,
        result: Option<Value>,
        error: Option<CallflowError>,
        attempts: u32,
    ) {
        if let Some(result) = &result {
            self.state.results.set(nid.to_string(), result.clone());
        }

        let transition = {
            let mut contexts = self.state.contexts.write().unwrap_or_else(PoisonError::into_inner);
            let Some(ctx) = contexts.get_mut(nid) else {
                tracing::error!(run_id = %self.run_id, "no context for node '{}'", nid);
                return;
            };

            let from = match ctx.transition(to) {
                Ok(from) => from,
                Err(err) => {
                    tracing::warn!(run_id = %self.run_id, "{}", err);
                    return;
                }
            };

            if to.is_terminal() {
                ctx.retry_count = attempts.saturating_sub(1);
            }
            ctx.result = result;
            ctx.error = error;

            NodeTransition {
                run_id: self.run_id.clone(),
                nid: nid.to_string(),
                from,
                to,
                error: ctx.error.as_ref().map(|e| e.to_string()),
                timestamp: utils::time::time_millis(),
            }
        };

        self.report(&transition);
    }

    fn report(
        &self,
        transition: &NodeTransition,
    ) {
        tracing::debug!(run_id = %self.run_id, "node '{}' {} -> {}", transition.nid, transition.from.as_ref(), transition.to.as_ref());

        let (level, message) = match transition.to {
            CallState::Processing => (LogLevel::Debug, format!("node '{}' processing", transition.nid)),
            CallState::Success => (LogLevel::Info, format!("node '{}' succeeded", transition.nid)),
            CallState::Failed => (LogLevel::Error, format!("node '{}' failed", transition.nid)),
            CallState::Pending => (LogLevel::Debug, format!("node '{}' pending", transition.nid)),
        };
        self.logs.add_log(
            &self.run_id,
            level,
            &message,
            json!({ "nid": transition.nid, "from": transition.from.as_ref(), "to": transition.to.as_ref(), "error": transition.error }),
        );

        for callback in self.callbacks.iter() {
            callback.notify(transition);
        }
    }
}

fn read<T>(lock: &ShareLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}
