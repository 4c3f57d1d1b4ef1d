use super::compiled_plan::{CompiledPlan, Phase, PlanStats};
use super::error::{PipelineError, PipelineResult};
use super::graph::{EdgeKind, FlushPriority, Graph};
use super::id::{NodeId, PhaseId};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// Validates a pipeline graph and partitions it into ordered phases
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile a pipeline graph into an execution plan.
    ///
    /// # Arguments
    /// * `graph` - Node declarations and edges
    /// * `owned` - Every constructed node as `(id, is_initiator)`
    /// * `driven_externally` - Nodes fed by the caller rather than by a
    ///   node in the graph (the entry of a worker sub-chain)
    ///
    /// # Errors
    /// Any configuration error: unknown node ids, cyclic item flow, nodes
    /// nothing can drive, or cyclic phase dependencies.
    pub fn compile(
        graph: &Graph,
        owned: &[(NodeId, bool)],
        driven_externally: &[NodeId],
    ) -> PipelineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();
        let n = graph.node_count();

        Self::check_edges(graph)?;

        let all: Vec<NodeId> = graph.node_ids().collect();
        let flow_edges: Vec<(NodeId, NodeId)> =
            graph.edges().iter().filter_map(|e| e.flow()).collect();
        let call_edges: Vec<(NodeId, NodeId)> =
            graph.edges().iter().filter_map(|e| e.call()).collect();

        // Item flow must be acyclic, and so must the call graph (no re-entry)
        for edges in [&flow_edges, &call_edges] {
            let (_, leftover) = topological_order(n, &all, edges);
            if !leftover.is_empty() {
                return Err(PipelineError::CyclicFlow {
                    nodes: leftover
                        .iter()
                        .map(|&id| graph.name_of(id).to_string())
                        .collect(),
                });
            }
        }

        let initiator = Self::check_ownership(graph, owned)?;
        Self::check_drivers(graph, &initiator, &call_edges, driven_externally)?;

        // Union nodes connected by push/pull edges
        let mut components = UnionFind::new(n);
        for &(a, b) in &call_edges {
            components.union(a.index(), b.index());
        }

        // Number phases by their smallest member (declaration order)
        let mut phase_of_root: HashMap<usize, usize> = HashMap::new();
        let mut members: Vec<Vec<NodeId>> = Vec::new();
        for id in graph.node_ids() {
            let root = components.find(id.index());
            let phase = *phase_of_root.entry(root).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[phase].push(id);
        }
        let phase_of = |id: NodeId| phase_of_root[&components.find_const(id.index())];

        // Dependency edges become phase edges
        let mut prerequisites: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); members.len()];
        for edge in graph.edges().iter().filter(|e| e.kind == EdgeKind::Dependency) {
            let (before, after) = (phase_of(edge.from), phase_of(edge.to));
            if before == after {
                return Err(PipelineError::CyclicPhaseDependency {
                    phases: vec![before],
                });
            }
            prerequisites[after].insert(before);
        }

        let flush: Vec<FlushPriority> = members
            .iter()
            .map(|m| {
                m.iter()
                    .filter_map(|&id| graph.node(id).ok())
                    .map(|info| info.flush_priority)
                    .max()
                    .unwrap_or_default()
            })
            .collect();

        let order = Self::order_phases(&prerequisites, &flush)?;

        let mut phases = Vec::with_capacity(order.len());
        let mut position_of = HashMap::with_capacity(n);
        for (position, &p) in order.iter().enumerate() {
            let nodes = &members[p];
            let local_flow: Vec<(NodeId, NodeId)> = flow_edges
                .iter()
                .filter(|(a, _)| phase_of(*a) == p)
                .copied()
                .collect();
            let local_calls: Vec<(NodeId, NodeId)> = call_edges
                .iter()
                .filter(|(a, _)| phase_of(*a) == p)
                .copied()
                .collect();
            let (flow_order, _) = topological_order(n, nodes, &local_flow);
            let (call_order, _) = topological_order(n, nodes, &local_calls);

            for &id in nodes {
                position_of.insert(id, position);
            }
            phases.push(Phase {
                id: PhaseId(p as u32),
                members: nodes.clone(),
                flow_order,
                call_order,
                initiators: nodes
                    .iter()
                    .copied()
                    .filter(|id| initiator[id.index()])
                    .collect(),
                flush_priority: flush[p],
                prerequisites: prerequisites[p]
                    .iter()
                    .map(|&q| PhaseId(q as u32))
                    .collect(),
            });
        }

        let stats = PlanStats {
            total_nodes: n,
            phases: phases.len(),
            initiators: initiator.iter().filter(|&&i| i).count(),
            flow_edges: flow_edges.len(),
            dependency_edges: graph.edges().len() - flow_edges.len(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(CompiledPlan {
            phases,
            position_of,
            stats,
        })
    }

    fn check_edges(graph: &Graph) -> PipelineResult<()> {
        for edge in graph.edges() {
            for id in [edge.from, edge.to] {
                if id.index() >= graph.node_count() {
                    return Err(PipelineError::UnknownNode(id));
                }
            }
        }
        Ok(())
    }

    /// Every declared node must be constructed exactly once.
    /// Returns the initiator flag per node index.
    fn check_ownership(graph: &Graph, owned: &[(NodeId, bool)]) -> PipelineResult<Vec<bool>> {
        let n = graph.node_count();
        let mut seen = vec![false; n];
        let mut initiator = vec![false; n];

        for &(id, is_initiator) in owned {
            if id.index() >= n {
                return Err(PipelineError::UnknownNode(id));
            }
            if seen[id.index()] {
                return Err(PipelineError::MalformedNode {
                    node: graph.name_of(id).to_string(),
                    reason: "constructed more than once",
                });
            }
            seen[id.index()] = true;
            initiator[id.index()] = is_initiator;
        }

        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(PipelineError::MalformedNode {
                node: graph.name_of(NodeId(missing as u32)).to_string(),
                reason: "declared but never constructed",
            });
        }
        Ok(initiator)
    }

    /// A node must be driven by exactly one of: its own `go`, a caller's
    /// push/pull, or the external caller.
    fn check_drivers(
        graph: &Graph,
        initiator: &[bool],
        call_edges: &[(NodeId, NodeId)],
        driven_externally: &[NodeId],
    ) -> PipelineResult<()> {
        let mut called = vec![false; graph.node_count()];
        for &(_, callee) in call_edges {
            called[callee.index()] = true;
        }
        for id in driven_externally {
            if id.index() < called.len() {
                called[id.index()] = true;
            }
        }

        for id in graph.node_ids() {
            let i = id.index();
            let reason = match (initiator[i], called[i]) {
                (false, false) => "no push destination, pull source or go()",
                (true, true) => "initiator is also driven by another node",
                _ => continue,
            };
            return Err(PipelineError::MalformedNode {
                node: graph.name_of(id).to_string(),
                reason,
            });
        }
        Ok(())
    }

    /// Topological order of phases: ready phases by descending flush
    /// priority, then ascending declaration index.
    fn order_phases(
        prerequisites: &[BTreeSet<usize>],
        flush: &[FlushPriority],
    ) -> PipelineResult<Vec<usize>> {
        let count = prerequisites.len();
        let mut remaining: Vec<usize> = prerequisites.iter().map(|p| p.len()).collect();
        let mut dependents = vec![Vec::new(); count];
        for (after, before) in prerequisites.iter().enumerate() {
            for &b in before {
                dependents[b].push(after);
            }
        }

        let mut ready: BinaryHeap<(FlushPriority, Reverse<usize>)> = (0..count)
            .filter(|&p| remaining[p] == 0)
            .map(|p| (flush[p], Reverse(p)))
            .collect();
        let mut order = Vec::with_capacity(count);

        while let Some((_, Reverse(phase))) = ready.pop() {
            order.push(phase);
            for &next in &dependents[phase] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push((flush[next], Reverse(next)));
                }
            }
        }

        if order.len() != count {
            return Err(PipelineError::CyclicPhaseDependency {
                phases: (0..count).filter(|&p| remaining[p] > 0).collect(),
            });
        }
        Ok(order)
    }
}

/// Kahn's algorithm over `nodes` using only `edges` between them; ties go to
/// the smallest id. Returns the order and the nodes left on a cycle.
fn topological_order(
    n: usize,
    nodes: &[NodeId],
    edges: &[(NodeId, NodeId)],
) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut included = vec![false; n];
    for id in nodes {
        included[id.index()] = true;
    }

    let mut adj: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for &(from, to) in edges {
        if included[from.index()] && included[to.index()] {
            adj[from.index()].push(to);
            in_degree[to.index()] += 1;
        }
    }

    let mut ready: BTreeSet<NodeId> = nodes
        .iter()
        .copied()
        .filter(|id| in_degree[id.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &adj[node.index()] {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(next);
            }
        }
    }

    let leftover = nodes
        .iter()
        .copied()
        .filter(|id| in_degree[id.index()] > 0)
        .collect();
    (order, leftover)
}

/// Disjoint-set forest with path halving.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn find_const(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the smaller index as root so roots are stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
