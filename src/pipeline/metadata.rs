//! Out-of-band key/value forwarding between nodes of one phase.
//!
//! Values are stored against the forwarding node. A lookup from node `B`
//! walks item-flow predecessors breadth-first; the nearest ancestor that
//! forwarded the key within its hop bound wins. The store is cleared when
//! the phase finishes.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Conventional key carrying the expected number of upstream items (`u64`).
pub const ITEMS_KEY: &str = "items";

/// One forwarded value.
#[derive(Clone)]
pub struct MetadataEntry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    max_hop: Option<usize>,
}

impl MetadataEntry {
    fn reaches(&self, distance: usize) -> bool {
        self.max_hop.map_or(true, |hops| distance <= hops)
    }

    /// Downcast the stored value.
    pub fn get<T: Any + Clone>(&self, key: &str) -> PipelineResult<T> {
        self.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| PipelineError::MetadataType {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
                actual: self.type_name,
            })
    }
}

impl std::fmt::Debug for MetadataEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataEntry")
            .field("type", &self.type_name)
            .field("max_hop", &self.max_hop)
            .finish()
    }
}

/// Phase-scoped metadata store.
#[derive(Debug, Default)]
pub struct MetadataStore {
    entries: HashMap<NodeId, HashMap<String, MetadataEntry>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` under `key` as forwarded by `from`. Forwarding the same
    /// key twice from one node replaces the earlier value.
    pub fn forward<T: Any + Send + Sync>(
        &mut self,
        from: NodeId,
        key: &str,
        value: T,
        max_hop: Option<usize>,
    ) {
        let entry = MetadataEntry {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            max_hop,
        };
        self.entries
            .entry(from)
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// Nearest entry for `key` forwarded by an item-flow ancestor of `at`.
    pub fn lookup(&self, graph: &Graph, at: NodeId, key: &str) -> Option<&MetadataEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let mut seen = HashSet::from([at]);
        let mut queue: VecDeque<(NodeId, usize)> = graph
            .flow_predecessors(at)
            .into_iter()
            .map(|id| (id, 1))
            .collect();

        while let Some((node, distance)) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            if let Some(entry) = self.entries.get(&node).and_then(|m| m.get(key)) {
                if entry.reaches(distance) {
                    return Some(entry);
                }
            }
            for pred in graph.flow_predecessors(node) {
                queue.push_back((pred, distance + 1));
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::GraphBuilder;

    /// a -> b -> c, plus an unrelated node d.
    fn chain() -> (Graph, [NodeId; 4]) {
        let mut b = GraphBuilder::new();
        let a = b.add_node("a");
        let bb = b.add_node("b");
        let c = b.add_node("c");
        let d = b.add_node("d");
        b.add_push_destination(a, bb);
        b.add_push_destination(bb, c);
        (b.finish(), [a, bb, c, d])
    }

    #[test]
    fn test_forwarded_value_reaches_descendants() {
        let (graph, [a, _, c, _]) = chain();
        let mut store = MetadataStore::new();
        store.forward(a, ITEMS_KEY, 42u64, None);

        let entry = store.lookup(&graph, c, ITEMS_KEY).unwrap();
        assert_eq!(entry.get::<u64>(ITEMS_KEY).unwrap(), 42);
    }

    #[test]
    fn test_unrelated_and_upstream_nodes_see_nothing() {
        let (graph, [a, b, _, d]) = chain();
        let mut store = MetadataStore::new();
        store.forward(b, "k", 1u8, None);

        assert!(store.lookup(&graph, d, "k").is_none());
        assert!(store.lookup(&graph, a, "k").is_none());
        assert!(store.lookup(&graph, b, "k").is_none());
        assert!(store.lookup(&graph, b, "other").is_none());
    }

    #[test]
    fn test_hop_bound_limits_reach() {
        let (graph, [a, b, c, _]) = chain();
        let mut store = MetadataStore::new();
        store.forward(a, "k", "near".to_string(), Some(1));

        assert!(store.lookup(&graph, b, "k").is_some());
        assert!(store.lookup(&graph, c, "k").is_none());
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let (graph, [a, b, c, _]) = chain();
        let mut store = MetadataStore::new();
        store.forward(a, ITEMS_KEY, 10u64, None);
        store.forward(b, ITEMS_KEY, 5u64, None);

        let entry = store.lookup(&graph, c, ITEMS_KEY).unwrap();
        assert_eq!(entry.get::<u64>(ITEMS_KEY).unwrap(), 5);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let (graph, [a, b, _, _]) = chain();
        let mut store = MetadataStore::new();
        store.forward(a, "k", 1u32, None);

        let err = store
            .lookup(&graph, b, "k")
            .unwrap()
            .get::<String>("k")
            .unwrap_err();
        assert!(matches!(err, PipelineError::MetadataType { .. }));
    }

    #[test]
    fn test_pull_edges_flow_toward_the_consumer() {
        let mut b = GraphBuilder::new();
        let consumer = b.add_node("consumer");
        let source = b.add_node("source");
        b.add_pull_source(consumer, source);
        let graph = b.finish();

        let mut store = MetadataStore::new();
        store.forward(source, ITEMS_KEY, 3u64, None);
        assert!(store.lookup(&graph, consumer, ITEMS_KEY).is_some());

        store.clear();
        assert!(store.lookup(&graph, consumer, ITEMS_KEY).is_none());
    }
}
