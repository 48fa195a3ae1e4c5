mod env;
mod graph;
mod interface;
mod node;

pub use env::{EnvironmentVariables, FileMeta};
pub use graph::GraphDefinition;
pub use interface::{HttpMethod, InterfaceConfig};
pub use node::{CallMode, CallNode, ConditionOperator, NodeId, PollingCondition};
