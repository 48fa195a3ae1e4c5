mod context;
mod log;

pub use context::{CallContext, CallState};
pub use log::{LogChannel, LogLevel, LogRecord, LogSink};
