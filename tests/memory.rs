//! Per-phase memory assignment seen from inside nodes

mod common;

use phaseflow::pipeline::nodes::{collect, generate, map, null_sink, Collected};
use phaseflow::pipeline::{
    GraphBuilder, Node, NodeContext, NodeId, PipeEnd, PipelineResult, Push, TerminalFactory,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone, Copy)]
struct Grant {
    node: u64,
    table: Option<u64>,
}

/// Sink that registers a lookup table and records what it was granted.
struct Greedy {
    grant: Arc<Mutex<Grant>>,
}

struct GreedyNode {
    id: NodeId,
    grant: Arc<Mutex<Grant>>,
}

impl TerminalFactory for Greedy {
    type Node = GreedyNode;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        GreedyNode {
            id: graph.add_node("greedy"),
            grant: self.grant,
        }
    }
}

impl Node for GreedyNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn prepare(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        ctx.set_minimum_memory(100);
        ctx.set_maximum_memory(1_000);
        ctx.register_datastructure_usage("table", 200, 5_000, 1.0);
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        *self.grant.lock().unwrap() = Grant {
            node: ctx.available_memory(),
            table: ctx.get_datastructure_memory("table"),
        };
        Ok(())
    }
}

impl Push for GreedyNode {
    type Item = u64;

    fn push(&mut self, _item: u64) -> PipelineResult<()> {
        Ok(())
    }
}

fn greedy(grant: &Arc<Mutex<Grant>>) -> PipeEnd<Greedy> {
    PipeEnd(Greedy {
        grant: Arc::clone(grant),
    })
}

#[test]
fn test_node_and_datastructure_share_budget() {
    let grant = Arc::new(Mutex::new(Grant::default()));
    // Only the greedy node and its table take part; the source wants nothing.
    let mut pipeline = (generate(1, |i| i).memory_fraction(0.0) | greedy(&grant))
        .build()
        .unwrap();

    let summary = pipeline.run(4_000).unwrap();
    let grant = *grant.lock().unwrap();
    assert_eq!(grant.node, 1_000);
    assert!(grant.table.is_some_and(|t| (200..=3_000).contains(&t)));
    assert!(summary.phases[0].assigned_bytes <= 4_000);
    assert!(!summary.phases[0].overcommitted);
}

#[test]
fn test_infeasible_budget_still_runs() {
    let out = Collected::new();
    let mut pipeline = (generate(4, |i| i)
        | map(|x: u64| x + 1).minimum_memory(10_000)
        | collect(&out).minimum_memory(10_000))
    .build()
    .unwrap();

    let summary = pipeline.run(1_000).unwrap();
    assert!(summary.phases[0].overcommitted);
    assert_eq!(summary.phases[0].assigned_bytes, 20_000);
    assert_eq!(out.take(), vec![1, 2, 3, 4]);
}

#[test]
fn test_maximum_caps_assignment() {
    let mut pipeline =
        (generate(1, |i| i).maximum_memory(10) | null_sink::<u64>().maximum_memory(10))
            .build()
            .unwrap();
    let summary = pipeline.run(1 << 20).unwrap();
    assert_eq!(summary.phases[0].assigned_bytes, 20);
}
