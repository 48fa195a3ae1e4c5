//! Execution strategies for a single node: one request, bounded retry, polling.

pub mod condition;
pub mod polling;
pub mod request;
pub mod retry;

pub use polling::poll_with_timeout;
pub use request::{Envelope, OutboundRequest, RawResponse, RequestExecutor, ReqwestTransport, Transport};
pub use retry::retry_with_delay;
