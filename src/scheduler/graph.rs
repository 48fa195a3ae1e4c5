//! Validated, immutable view of one call graph.
//!
//! Edges run from a node to each of its successors. Validation rejects
//! duplicate ids, dangling successors, nodes without an interface and cycles
//! before anything is executed.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use petgraph::{algo::toposort, graph::DiGraph};

use crate::{
    CallflowError, Result,
    model::{CallNode, InterfaceConfig, NodeId},
};

pub struct CallGraph {
    /// node ids in definition order
    ids: Vec<NodeId>,
    nodes: HashMap<NodeId, Arc<CallNode>>,
    interfaces: HashMap<NodeId, Arc<InterfaceConfig>>,
    /// reverse of `successors`
    predecessors: HashMap<NodeId, Vec<NodeId>>,
}

impl CallGraph {
    pub fn build(
        nodes: Vec<CallNode>,
        mut interfaces: HashMap<NodeId, InterfaceConfig>,
    ) -> Result<Self> {
        let mut ids: Vec<NodeId> = Vec::with_capacity(nodes.len());
        let mut by_id: HashMap<NodeId, Arc<CallNode>> = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if node.id.is_empty() {
                return Err(CallflowError::Config("node id must not be empty".to_string()));
            }
            if by_id.contains_key(&node.id) {
                return Err(CallflowError::Config(format!("duplicate node id '{}'", node.id)));
            }
            ids.push(node.id.clone());
            by_id.insert(node.id.clone(), Arc::new(node));
        }

        let mut predecessors: HashMap<NodeId, Vec<NodeId>> = ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        for id in &ids {
            let node = &by_id[id];
            let mut seen = HashSet::new();
            for succ in &node.successors {
                let preds = predecessors
                    .get_mut(succ)
                    .ok_or_else(|| CallflowError::Config(format!("node '{}' lists unknown successor '{}'", id, succ)))?;
                if seen.insert(succ) {
                    preds.push(id.clone());
                }
            }
        }

        let mut node_interfaces = HashMap::with_capacity(ids.len());
        for id in &ids {
            let config = interfaces
                .remove(id)
                .ok_or_else(|| CallflowError::Config(format!("node '{}' has no interface config", id)))?;
            node_interfaces.insert(id.clone(), Arc::new(config));
        }
        for orphan in interfaces.keys() {
            tracing::warn!("interface config for unknown node '{}' ignored", orphan);
        }

        let graph = Self {
            ids,
            nodes: by_id,
            interfaces: node_interfaces,
            predecessors,
        };
        graph.ensure_acyclic()?;

        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<()> {
        let mut graph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self.ids.iter().map(|id| (id.as_str(), graph.add_node(id.as_str()))).collect();

        for id in &self.ids {
            for succ in &self.nodes[id].successors {
                graph.add_edge(indices[id.as_str()], indices[succ.as_str()], ());
            }
        }

        toposort(&graph, None).map_err(|cycle| CallflowError::Config(format!("cycle detected involving node '{}'", graph[cycle.node_id()])))?;
        Ok(())
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn node(
        &self,
        id: &str,
    ) -> Option<Arc<CallNode>> {
        self.nodes.get(id).cloned()
    }

    pub fn interface(
        &self,
        id: &str,
    ) -> Option<Arc<InterfaceConfig>> {
        self.interfaces.get(id).cloned()
    }

    pub fn predecessors(
        &self,
        id: &str,
    ) -> &[NodeId] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Nodes that appear in no other node's `successors`, in definition order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.ids.iter().filter(|id| self.predecessors(id).is_empty()).cloned().collect()
    }
}

/// Root set of an unvalidated node list: ids absent from every `successors` list.
pub fn root_set(nodes: &[CallNode]) -> Vec<NodeId> {
    let referenced: HashSet<&str> = nodes.iter().flat_map(|n| n.successors.iter().map(String::as_str)).collect();
    nodes.iter().filter(|n| !referenced.contains(n.id.as_str())).map(|n| n.id.clone()).collect()
}
