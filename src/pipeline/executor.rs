//! Phase executor and the runnable [`Pipeline`].
//!
//! The executor drives one phase at a time:
//! 1. `prepare` then `propagate` on every member, ancestors first.
//! 2. Solve the memory assignment for the phase.
//! 3. `begin` callees before their callers (destinations before sources).
//! 4. `go` on each initiator.
//! 5. `end` callers before callees, so residual items still reach open nodes.
//!
//! Between phases, nodes whose dependents are not in the very next phase
//! are offered evacuation.

use crate::config::EngineConfig;
use crate::pipeline::compiled_plan::{CompiledPlan, Phase};
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::factory::TerminalFactory;
use crate::pipeline::graph::{Graph, GraphBuilder};
use crate::pipeline::id::{NodeId, PhaseId};
use crate::pipeline::memory::{DatastructureRegistry, MemoryAssignment};
use crate::pipeline::metadata::MetadataStore;
use crate::pipeline::node::{collect_tree, with_node, Node, NodeContext};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Prepare,
    Propagate,
    Begin,
    Go,
    End,
}

/// Apply `op` to node `id`, searching every root's ownership tree.
fn visit(
    roots: &mut [&mut dyn Node],
    id: NodeId,
    op: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
) -> PipelineResult<()> {
    for root in roots.iter_mut() {
        if with_node(&mut **root, id, &mut *op)? {
            return Ok(());
        }
    }
    Err(PipelineError::UnknownNode(id))
}

/// Per-phase state shared by every hook call: the metadata store, the
/// registered data structures and the memory assignment once solved.
#[derive(Debug, Default)]
pub struct PhaseExecutor {
    metadata: MetadataStore,
    datastructures: DatastructureRegistry,
    assignment: Option<MemoryAssignment>,
}

impl PhaseExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The assignment solved by the last [`prepare`](Self::prepare).
    pub fn assignment(&self) -> Option<&MemoryAssignment> {
        self.assignment.as_ref()
    }

    fn call(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        id: NodeId,
        hook: Hook,
    ) -> PipelineResult<()> {
        tracing::debug!("{:?} '{}'", hook, graph.name_of(id));

        let Self {
            metadata,
            datastructures,
            assignment,
        } = self;
        let assignment = assignment.as_ref();

        let result = {
            let mut op = |node: &mut dyn Node| {
                let mut ctx =
                    NodeContext::new(id, position, graph, metadata, datastructures, assignment);
                match hook {
                    Hook::Prepare => node.prepare(&mut ctx),
                    Hook::Propagate => node.propagate(&mut ctx),
                    Hook::Begin => node.begin(&mut ctx),
                    Hook::Go => node.go(&mut ctx),
                    Hook::End => node.end(&mut ctx),
                }
            };
            visit(roots, id, &mut op)
        };
        result.map_err(|e| e.at_node(graph.name_of(id), position))
    }

    /// Reset per-phase state, run `prepare` and `propagate`, and solve the
    /// memory assignment for `budget` bytes.
    pub fn prepare(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        phase: &Phase,
        budget: u64,
    ) -> PipelineResult<()> {
        self.metadata.clear();
        self.datastructures.clear();
        self.assignment = None;

        for &id in &phase.flow_order {
            self.call(graph, roots, position, id, Hook::Prepare)?;
        }
        for &id in &phase.flow_order {
            self.call(graph, roots, position, id, Hook::Propagate)?;
        }

        let assignment =
            MemoryAssignment::compute(graph, &phase.members, &self.datastructures, budget);
        tracing::debug!(
            "Assigned {} of {} bytes across {} nodes",
            assignment.total,
            budget,
            phase.members.len()
        );
        self.assignment = Some(assignment);
        Ok(())
    }

    pub fn begin(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        phase: &Phase,
    ) -> PipelineResult<()> {
        for &id in phase.call_order.iter().rev() {
            self.call(graph, roots, position, id, Hook::Begin)?;
        }
        Ok(())
    }

    pub fn go(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        phase: &Phase,
    ) -> PipelineResult<()> {
        for &id in &phase.initiators {
            self.call(graph, roots, position, id, Hook::Go)?;
        }
        Ok(())
    }

    /// Run `end` on every member and drop the phase's metadata.
    pub fn end(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        phase: &Phase,
    ) -> PipelineResult<()> {
        for &id in &phase.call_order {
            self.call(graph, roots, position, id, Hook::End)?;
        }
        self.metadata.clear();
        Ok(())
    }

    /// Full lifecycle of one phase.
    pub fn run_phase(
        &mut self,
        graph: &mut Graph,
        roots: &mut [&mut dyn Node],
        position: usize,
        phase: &Phase,
        budget: u64,
    ) -> PipelineResult<()> {
        self.prepare(graph, roots, position, phase, budget)?;
        self.begin(graph, roots, position, phase)?;
        self.go(graph, roots, position, phase)?;
        self.end(graph, roots, position, phase)
    }
}

/// Outcome of one phase within a run.
#[derive(Debug, Clone)]
pub struct PhaseSummary {
    pub id: PhaseId,
    pub nodes: usize,
    /// Bytes handed out by the memory assignment
    pub assigned_bytes: u128,
    /// Minimums alone exceeded the budget
    pub overcommitted: bool,
    /// Sum of the steps declared by members, if any declared
    pub steps_total: Option<u64>,
    pub steps_done: u64,
    /// Names of nodes evacuated after this phase
    pub evacuated: Vec<String>,
    pub elapsed: Duration,
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Phases in execution order
    pub phases: Vec<PhaseSummary>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn steps_done(&self) -> u64 {
        self.phases.iter().map(|p| p.steps_done).sum()
    }

    pub fn evacuations(&self) -> usize {
        self.phases.iter().map(|p| p.evacuated.len()).sum()
    }
}

/// A validated, runnable pipeline.
pub struct Pipeline {
    graph: Graph,
    roots: Vec<Box<dyn Node>>,
    plan: CompiledPlan,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("nodes", &self.graph.node_count())
            .field("roots", &self.roots.len())
            .field("phases", &self.plan.phases.len())
            .finish()
    }
}

impl Pipeline {
    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run using the memory budget from `config`.
    pub fn run_with_config(&mut self, config: &EngineConfig) -> PipelineResult<RunSummary> {
        self.run(config.memory.budget_bytes)
    }

    /// Execute every phase in plan order with `budget` bytes per phase.
    ///
    /// The pipeline may be run again afterwards; nodes reset their
    /// per-run state in `begin`.
    pub fn run(&mut self, budget: u64) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        tracing::info!(
            "Running pipeline: {} nodes in {} phases, budget {} bytes",
            self.graph.node_count(),
            self.plan.phases.len(),
            budget
        );

        for id in self.graph.node_ids().collect::<Vec<_>>() {
            let info = self.graph.node_mut(id)?;
            info.total_steps = None;
            info.steps_done = 0;
        }

        let Self { graph, roots, plan } = self;
        let mut roots: Vec<&mut dyn Node> = roots
            .iter_mut()
            .map(|root| root.as_mut() as &mut dyn Node)
            .collect();
        let mut executor = PhaseExecutor::new();
        let mut summary = RunSummary::default();

        for (position, phase) in plan.phases.iter().enumerate() {
            let span = tracing::info_span!("phase", index = position, nodes = phase.members.len());
            let _enter = span.enter();
            let phase_started = Instant::now();

            if let Err(e) = executor.run_phase(graph, &mut roots, position, phase, budget) {
                tracing::error!("Phase {} aborted: {}", phase.id, e);
                return Err(e);
            }

            let evacuated = evacuate_after(graph, plan, &mut roots, position, phase)?;
            let assignment = executor.assignment();
            let steps_total = phase
                .members
                .iter()
                .filter_map(|&id| graph.node(id).ok().and_then(|n| n.total_steps))
                .reduce(|a, b| a + b);
            let steps_done = phase
                .members
                .iter()
                .filter_map(|&id| graph.node(id).ok())
                .map(|n| n.steps_done)
                .sum();

            let phase_summary = PhaseSummary {
                id: phase.id,
                nodes: phase.members.len(),
                assigned_bytes: assignment.map_or(0, |a| a.total),
                overcommitted: assignment.is_some_and(|a| a.overcommitted),
                steps_total,
                steps_done,
                evacuated,
                elapsed: phase_started.elapsed(),
            };
            tracing::info!(
                "Phase {} finished in {:?} ({} steps)",
                phase.id,
                phase_summary.elapsed,
                phase_summary.steps_done
            );
            summary.phases.push(phase_summary);
        }

        summary.elapsed = started.elapsed();
        tracing::info!("Pipeline finished in {:?}", summary.elapsed);
        Ok(summary)
    }
}

/// Evacuate members of the phase at `position` whose dependents run later
/// than the next phase.
fn evacuate_after(
    graph: &Graph,
    plan: &CompiledPlan,
    roots: &mut [&mut dyn Node],
    position: usize,
    phase: &Phase,
) -> PipelineResult<Vec<String>> {
    let mut evacuated = Vec::new();
    for &id in &phase.members {
        let deferred = graph
            .dependents(id)
            .filter_map(|d| plan.position(d))
            .any(|p| p > position + 1);
        if !deferred {
            continue;
        }

        let name = graph.name_of(id);
        let mut did_evacuate = false;
        visit(roots, id, &mut |node: &mut dyn Node| {
            if node.can_evacuate() {
                node.evacuate()
                    .map_err(|e| PipelineError::Evacuation {
                        node: name.to_string(),
                        phase: position,
                        source: Box::new(e),
                    })?;
                did_evacuate = true;
            }
            Ok(())
        })?;
        if did_evacuate {
            tracing::debug!("Evacuated '{}' after phase {}", name, phase.id);
            evacuated.push(name.to_string());
        }
    }
    Ok(evacuated)
}

/// Collects segments sharing one graph and compiles them into a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    graph: GraphBuilder,
    roots: Vec<Box<dyn Node>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the graph, e.g. to reserve node ids before the
    /// segments that use them are constructed.
    pub fn graph_mut(&mut self) -> &mut GraphBuilder {
        &mut self.graph
    }

    /// Construct `segment` and return the id of its outermost node.
    pub fn add<S>(&mut self, segment: S) -> NodeId
    where
        S: TerminalFactory,
        S::Node: 'static,
    {
        let node = segment.construct(&mut self.graph);
        self.add_root(node)
    }

    /// Register an already-constructed node tree.
    pub fn add_root<N: Node + 'static>(&mut self, node: N) -> NodeId {
        let id = node.id();
        self.roots.push(Box::new(node));
        id
    }

    /// `dependent`'s phase runs only after `prerequisite`'s phase has ended.
    pub fn add_dependency(&mut self, dependent: NodeId, prerequisite: NodeId) {
        self.graph.add_dependency(dependent, prerequisite);
    }

    /// Validate the graph and compile the phase plan.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let graph = self.graph.finish();
        let mut roots = self.roots;

        let mut owned = Vec::with_capacity(graph.node_count());
        for root in roots.iter_mut() {
            collect_tree(root.as_mut(), &mut owned)?;
        }

        let plan = PipelineCompiler::compile(&graph, &owned, &[])?;
        tracing::info!(
            "Compiled pipeline: {} nodes, {} phases in {}us",
            plan.stats.total_nodes,
            plan.stats.phases,
            plan.stats.compile_time_us
        );

        Ok(Pipeline { graph, roots, plan })
    }
}
