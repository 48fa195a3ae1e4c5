//! Engine - the main entry point for Callflow.
//!
//! The engine owns everything shared between runs:
//! - The configuration
//! - The request executor and its transport
//! - The log sink every run reports to
//!
//! Runs themselves are isolated; each gets its own [`GraphScheduler`].

use std::sync::Arc;

use crate::{
    Config, Result,
    executor::{RequestExecutor, ReqwestTransport, Transport},
    model::{EnvironmentVariables, GraphDefinition},
    runtime::{LogChannel, LogSink},
    scheduler::GraphScheduler,
};

/// The call graph engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
///
/// let graph = GraphDefinition::from_json(json_str)?;
/// let scheduler = engine.run(&graph, EnvironmentVariables::new(token)).await?;
/// let results = scheduler.results();
/// ```
pub struct Engine {
    config: Arc<Config>,
    executor: Arc<RequestExecutor>,
    /// Sink handed to every scheduler.
    logs: Arc<dyn LogSink>,
    /// Set when the engine created the default log channel itself.
    channel: Option<LogChannel>,
}

impl Engine {
    /// Creates an engine with a default HTTP client and log channel.
    pub fn new_with_config(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let channel = LogChannel::new(config.log.queue_size);
        Ok(Self::from_parts(config, Arc::new(ReqwestTransport::new(client)), Arc::new(channel.clone()), Some(channel)))
    }

    pub(crate) fn from_parts(
        config: Config,
        transport: Arc<dyn Transport>,
        logs: Arc<dyn LogSink>,
        channel: Option<LogChannel>,
    ) -> Self {
        let executor = Arc::new(RequestExecutor::new(transport, logs.clone(), config.http.success_codes.clone()));
        Self {
            config: Arc::new(config),
            executor,
            logs,
            channel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh, uninitialized scheduler for one run.
    pub fn scheduler(&self) -> GraphScheduler {
        GraphScheduler::new(self.executor.clone(), self.logs.clone(), self.config.clone())
    }

    /// Initializes and executes `graph` in a new scheduler.
    ///
    /// Returns the finished scheduler so callers can read results and contexts.
    pub async fn run(
        &self,
        graph: &GraphDefinition,
        env: EnvironmentVariables,
    ) -> Result<GraphScheduler> {
        let mut scheduler = self.scheduler();
        scheduler.initialize(graph.nodes.clone(), graph.interfaces.clone())?;
        scheduler.execute(env).await?;
        Ok(scheduler)
    }

    /// The engine-owned log channel, `None` when a custom sink was installed.
    pub fn logs(&self) -> Option<LogChannel> {
        self.channel.clone()
    }
}
