use std::{path::Path, sync::Arc};

use crate::{
    Config, Engine, Result,
    executor::{ReqwestTransport, Transport},
    runtime::{LogChannel, LogSink},
};

#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    client: Option<reqwest::Client>,
    transport: Option<Arc<dyn Transport>>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    /// Loads the config from a toml file.
    pub fn config_file<T: AsRef<Path>>(
        mut self,
        path: T,
    ) -> Result<Self> {
        self.config = Config::create(path)?;
        Ok(self)
    }

    /// HTTP client for the default transport. Ignored when a transport is set.
    pub fn client(
        mut self,
        client: reqwest::Client,
    ) -> Self {
        self.client = Some(client);
        self
    }

    pub fn transport(
        mut self,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default log channel.
    pub fn log_sink(
        mut self,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(&self) -> Result<Engine> {
        let transport: Arc<dyn Transport> = match (&self.transport, &self.client) {
            (Some(transport), _) => transport.clone(),
            (None, Some(client)) => Arc::new(ReqwestTransport::new(client.clone())),
            (None, None) => Arc::new(ReqwestTransport::new(reqwest::Client::builder().build()?)),
        };

        let engine = match &self.log_sink {
            Some(sink) => Engine::from_parts(self.config.clone(), transport, sink.clone(), None),
            None => {
                let channel = LogChannel::new(self.config.log.queue_size);
                Engine::from_parts(self.config.clone(), transport, Arc::new(channel.clone()), Some(channel))
            }
        };

        Ok(engine)
    }
}
