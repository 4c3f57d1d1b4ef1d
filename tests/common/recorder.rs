//! Hand-built nodes that record their lifecycle calls.
//!
//! Events are recorded as `"<node name>:<hook>"` into a shared log. Sinks
//! and relays reject items that arrive outside their `begin`/`end` window,
//! so a run succeeding also shows the scheduler kept that window open.

use phaseflow::pipeline::{
    Node, NodeContext, NodeId, PipelineBuilder, PipelineError, PipelineResult, Push, ITEMS_KEY,
};
use std::sync::{Arc, Mutex};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &EventLog, ctx: &NodeContext, hook: &str) {
    log.lock().unwrap().push(format!("{}:{}", ctx.name(), hook));
}

/// Initiator pushing `0..count`.
pub struct RecordingSource<D> {
    pub id: NodeId,
    pub count: u64,
    pub log: EventLog,
    pub dest: D,
}

impl<D: Push<Item = u64>> Node for RecordingSource<D> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        ctx.forward(ITEMS_KEY, self.count);
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "begin");
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        true
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "go");
        for i in 0..self.count {
            self.dest.push(i)?;
        }
        Ok(())
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "end");
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

/// Forwards items unchanged, holding the last one back until `end`.
pub struct RecordingRelay<D> {
    pub id: NodeId,
    pub log: EventLog,
    pub open: bool,
    pub held: Option<u64>,
    pub dest: D,
}

impl<D: Push<Item = u64>> Node for RecordingRelay<D> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "begin");
        self.open = true;
        self.held = None;
        Ok(())
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "end");
        if let Some(item) = self.held.take() {
            self.dest.push(item)?;
        }
        self.open = false;
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<D: Push<Item = u64>> Push for RecordingRelay<D> {
    type Item = u64;

    fn push(&mut self, item: u64) -> PipelineResult<()> {
        if !self.open {
            return Err(PipelineError::Message("relay pushed to while closed".into()));
        }
        if let Some(previous) = self.held.replace(item) {
            self.dest.push(previous)?;
        }
        Ok(())
    }
}

/// Terminal node storing everything it receives.
pub struct RecordingSink {
    pub id: NodeId,
    pub log: EventLog,
    pub open: bool,
    pub expected: Option<u64>,
    pub received: Arc<Mutex<Vec<u64>>>,
}

impl Node for RecordingSink {
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.expected = if ctx.can_fetch(ITEMS_KEY) {
            Some(ctx.fetch::<u64>(ITEMS_KEY)?)
        } else {
            None
        };
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "begin");
        self.open = true;
        self.received.lock().unwrap().clear();
        Ok(())
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        record(&self.log, ctx, "end");
        self.open = false;
        Ok(())
    }
}

impl Push for RecordingSink {
    type Item = u64;

    fn push(&mut self, item: u64) -> PipelineResult<()> {
        if !self.open {
            return Err(PipelineError::Message("sink pushed to while closed".into()));
        }
        self.received.lock().unwrap().push(item);
        Ok(())
    }
}

/// Ids of a recorded `source -> relay -> sink` chain.
pub struct RecordedChain {
    pub source: NodeId,
    pub relay: NodeId,
    pub sink: NodeId,
    pub received: Arc<Mutex<Vec<u64>>>,
}

/// Add `<label> source -> <label> relay -> <label> sink` to `builder`.
pub fn recorded_chain(
    builder: &mut PipelineBuilder,
    label: &str,
    count: u64,
    log: &EventLog,
) -> RecordedChain {
    let graph = builder.graph_mut();
    let sink = graph.add_node(format!("{label} sink"));
    let relay = graph.add_node(format!("{label} relay"));
    let source = graph.add_node(format!("{label} source"));
    graph.add_push_destination(relay, sink);
    graph.add_push_destination(source, relay);

    let received = Arc::new(Mutex::new(Vec::new()));
    builder.add_root(RecordingSource {
        id: source,
        count,
        log: Arc::clone(log),
        dest: RecordingRelay {
            id: relay,
            log: Arc::clone(log),
            open: false,
            held: None,
            dest: RecordingSink {
                id: sink,
                log: Arc::clone(log),
                open: false,
                expected: None,
                received: Arc::clone(&received),
            },
        },
    });

    RecordedChain {
        source,
        relay,
        sink,
        received,
    }
}

/// A node with no edges and no `go`.
pub struct Inert {
    pub id: NodeId,
}

impl Node for Inert {
    fn id(&self) -> NodeId {
        self.id
    }
}
