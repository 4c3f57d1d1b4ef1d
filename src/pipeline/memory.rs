//! Memory assignment: splits one byte budget across the nodes and auxiliary
//! data structures active in a phase.
//!
//! Every entry declares `(minimum, maximum, priority)`. The solver searches a
//! scalar price `c` and gives each entry `clamp(c * priority, minimum, maximum)`,
//! choosing the largest `c` whose total still fits the budget. Entries with
//! priority 0 always get exactly their minimum.

use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use std::collections::{BTreeMap, HashMap};

/// Upper bound on bisection steps. Halving an `f64` interval down to two
/// adjacent values never needs more than ~2100 steps.
const MAX_BISECTION_STEPS: usize = 4096;

/// One participant in the assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryRequest {
    pub minimum: u64,
    pub maximum: u64,
    pub priority: f64,
}

impl MemoryRequest {
    pub fn new(minimum: u64, maximum: u64, priority: f64) -> Self {
        Self {
            minimum,
            maximum: maximum.max(minimum),
            priority: if priority.is_finite() && priority > 0.0 {
                priority
            } else {
                0.0
            },
        }
    }

    #[inline]
    fn at_price(&self, price: f64) -> u64 {
        if self.priority == 0.0 {
            return self.minimum;
        }
        // `as` saturates and maps NaN to 0.
        let raw = (price * self.priority) as u64;
        raw.clamp(self.minimum, self.maximum)
    }
}

/// Result of one solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Bytes per request, in input order.
    pub bytes: Vec<u64>,
    /// True when the minimums alone exceeded the budget.
    pub overcommitted: bool,
}

impl Solution {
    pub fn total(&self) -> u128 {
        self.bytes.iter().map(|&b| b as u128).sum()
    }
}

fn total_at(requests: &[MemoryRequest], price: f64) -> u128 {
    requests.iter().map(|r| r.at_price(price) as u128).sum()
}

/// Distribute `budget` bytes over `requests`.
///
/// When the minimums alone exceed the budget the minimums are returned anyway
/// and `overcommitted` is set; callers log this and keep running.
pub fn solve(requests: &[MemoryRequest], budget: u64) -> Solution {
    let budget = budget as u128;
    let minimums: u128 = requests.iter().map(|r| r.minimum as u128).sum();

    if minimums > budget {
        return Solution {
            bytes: requests.iter().map(|r| r.minimum).collect(),
            overcommitted: true,
        };
    }

    // Smallest price at which every weighted entry sits at its maximum.
    let mut hi = requests
        .iter()
        .filter(|r| r.priority > 0.0)
        .map(|r| r.maximum as f64 / r.priority)
        .fold(0.0_f64, f64::max);
    if hi == 0.0 {
        return Solution {
            bytes: requests.iter().map(|r| r.minimum).collect(),
            overcommitted: false,
        };
    }
    hi = hi * 2.0 + 1.0;
    if !hi.is_finite() {
        hi = f64::MAX;
    }

    if total_at(requests, hi) <= budget {
        return Solution {
            bytes: requests.iter().map(|r| r.at_price(hi)).collect(),
            overcommitted: false,
        };
    }

    // Invariant: total(lo) <= budget < total(hi). Stop once no f64 lies between.
    let mut lo = 0.0_f64;
    for _ in 0..MAX_BISECTION_STEPS {
        let mid = lo + (hi - lo) / 2.0;
        if mid <= lo || mid >= hi {
            break;
        }
        if total_at(requests, mid) <= budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Solution {
        bytes: requests.iter().map(|r| r.at_price(lo)).collect(),
        overcommitted: false,
    }
}

/// Auxiliary data structures registered by nodes during prepare/propagate.
///
/// Several nodes may register the same name (e.g. both halves of a buffer);
/// their declarations are merged by taking the larger bounds and priority.
#[derive(Debug, Default)]
pub struct DatastructureRegistry {
    requests: BTreeMap<String, MemoryRequest>,
}

impl DatastructureRegistry {
    pub fn register(&mut self, name: &str, request: MemoryRequest) {
        self.requests
            .entry(name.to_string())
            .and_modify(|existing| {
                *existing = MemoryRequest::new(
                    existing.minimum.max(request.minimum),
                    existing.maximum.max(request.maximum),
                    existing.priority.max(request.priority),
                );
            })
            .or_insert(request);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &MemoryRequest)> {
        self.requests.iter()
    }
}

/// Immutable per-phase mapping from node / data structure to bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssignment {
    nodes: HashMap<NodeId, u64>,
    datastructures: HashMap<String, u64>,
    pub budget: u64,
    pub total: u128,
    pub overcommitted: bool,
}

impl MemoryAssignment {
    /// Solve for the given phase members and the data structures they registered.
    pub fn compute(
        graph: &Graph,
        members: &[NodeId],
        registry: &DatastructureRegistry,
        budget: u64,
    ) -> Self {
        let mut requests = Vec::with_capacity(members.len());
        for &id in members {
            if let Ok(info) = graph.node(id) {
                requests.push(MemoryRequest::new(
                    info.minimum_memory,
                    info.maximum_memory,
                    info.memory_priority,
                ));
            }
        }
        let names: Vec<String> = registry.iter().map(|(name, _)| name.clone()).collect();
        requests.extend(registry.iter().map(|(_, req)| *req));

        let solution = solve(&requests, budget);
        if solution.overcommitted {
            tracing::warn!(
                "Memory minimums exceed budget of {} bytes; assigning minimums ({} bytes)",
                budget,
                solution.total()
            );
        }

        let nodes = members
            .iter()
            .copied()
            .zip(solution.bytes.iter().copied())
            .collect();
        let datastructures = names
            .into_iter()
            .zip(solution.bytes.iter().skip(members.len()).copied())
            .collect();

        Self {
            nodes,
            datastructures,
            budget,
            total: solution.total(),
            overcommitted: solution.overcommitted,
        }
    }

    pub fn node(&self, id: NodeId) -> u64 {
        self.nodes.get(&id).copied().unwrap_or(0)
    }

    pub fn datastructure(&self, name: &str) -> Option<u64> {
        self.datastructures.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::GraphBuilder;
    use proptest::prelude::*;

    fn req(min: u64, max: u64, priority: f64) -> MemoryRequest {
        MemoryRequest::new(min, max, priority)
    }

    #[test]
    fn test_surplus_split_by_priority() {
        let sol = solve(&[req(0, u64::MAX, 1.0), req(0, u64::MAX, 3.0)], 4000);
        assert!(!sol.overcommitted);
        assert!(sol.total() <= 4000);
        // Within rounding of a 1:3 split.
        assert!((999..=1000).contains(&sol.bytes[0]), "{:?}", sol.bytes);
        assert!((2999..=3000).contains(&sol.bytes[1]), "{:?}", sol.bytes);
    }

    #[test]
    fn test_caps_redistribute_to_others() {
        let sol = solve(&[req(0, 100, 1.0), req(0, u64::MAX, 1.0)], 1000);
        assert_eq!(sol.bytes[0], 100);
        assert!(sol.bytes[1] >= 899);
        assert!(sol.total() <= 1000);
    }

    #[test]
    fn test_zero_priority_gets_minimum() {
        let sol = solve(&[req(50, 10_000, 0.0), req(10, 10_000, 1.0)], 5000);
        assert_eq!(sol.bytes[0], 50);
        assert!(sol.bytes[1] > 10);
    }

    #[test]
    fn test_infeasible_budget_overcommits_minimums() {
        let sol = solve(&[req(600, 1000, 1.0), req(600, 1000, 1.0)], 1000);
        assert!(sol.overcommitted);
        assert_eq!(sol.bytes, vec![600, 600]);
    }

    #[test]
    fn test_everything_fits_at_maximum() {
        let sol = solve(&[req(0, 10, 1.0), req(5, 20, 2.0)], 1_000_000);
        assert_eq!(sol.bytes, vec![10, 20]);
    }

    #[test]
    fn test_empty_input() {
        let sol = solve(&[], 10);
        assert!(sol.bytes.is_empty());
        assert!(!sol.overcommitted);
    }

    #[test]
    fn test_registry_merges_duplicate_names() {
        let mut registry = DatastructureRegistry::default();
        registry.register("buf", req(10, 100, 1.0));
        registry.register("buf", req(20, 50, 2.0));
        let (_, merged) = registry.iter().next().unwrap();
        assert_eq!(merged.minimum, 20);
        assert_eq!(merged.maximum, 100);
        assert_eq!(merged.priority, 2.0);
    }

    #[test]
    fn test_assignment_covers_nodes_and_datastructures() {
        let mut b = GraphBuilder::new();
        let a = b.add_node("a");
        let c = b.add_node("c");
        b.set_minimum_memory(a, 100);
        b.set_maximum_memory(c, 200);
        let graph = b.finish();

        let mut registry = DatastructureRegistry::default();
        registry.register("table", req(300, 300, 1.0));

        let assignment = MemoryAssignment::compute(&graph, &[a, c], &registry, 10_000);
        assert!(assignment.node(a) >= 100);
        assert_eq!(assignment.node(c), 200);
        assert_eq!(assignment.datastructure("table"), Some(300));
        assert!(assignment.total <= 10_000);
        assert_eq!(assignment.node(NodeId(7)), 0);
    }

    fn request_strategy() -> impl Strategy<Value = MemoryRequest> {
        (0u64..5_000, 0u64..50_000, prop_oneof![Just(0.0), 0.01f64..10.0])
            .prop_map(|(min, span, p)| MemoryRequest::new(min, min + span, p))
    }

    proptest! {
        #[test]
        fn test_assignment_respects_bounds_and_budget(
            requests in prop::collection::vec(request_strategy(), 1..12),
            slack in 0u64..200_000,
        ) {
            let minimums: u64 = requests.iter().map(|r| r.minimum).sum();
            let budget = minimums + slack;
            let sol = solve(&requests, budget);

            prop_assert!(!sol.overcommitted);
            prop_assert!(sol.total() <= budget as u128);
            for (r, &a) in requests.iter().zip(&sol.bytes) {
                prop_assert!(r.minimum <= a && a <= r.maximum);
            }
        }

        #[test]
        fn test_raising_priority_never_shrinks_share(
            requests in prop::collection::vec(request_strategy(), 1..8),
            slack in 0u64..100_000,
            pick in any::<prop::sample::Index>(),
            boost in 0.01f64..5.0,
        ) {
            let minimums: u64 = requests.iter().map(|r| r.minimum).sum();
            let budget = minimums + slack;
            let j = pick.index(requests.len());

            let before = solve(&requests, budget);
            let mut raised = requests.clone();
            raised[j] = MemoryRequest::new(
                raised[j].minimum,
                raised[j].maximum,
                raised[j].priority + boost,
            );
            let after = solve(&raised, budget);

            prop_assert!(after.bytes[j] >= before.bytes[j],
                "entry {} shrank from {} to {}", j, before.bytes[j], after.bytes[j]);
        }
    }
}
