#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bt_core::{BbKey, TickContext, WorldMut, WorldView};
use bt_engine::{
    AuxiliaryNode, BehaviorTree, BehaviorTreeComponent, BtNode, DecoratorNode, EngineConfig,
    FlowAbortMode, MemoryBlock, NodeCx, NodeResult, ServiceNode, TaskNode, TreeManager,
};
use bt_tools::{SharedTraceSink, VecTraceSink};
use tracing_subscriber::EnvFilter;

pub const AGENT: u64 = 1;

#[derive(Debug, Default)]
pub struct RecordingWorld {
    pub events: Vec<String>,
}

impl RecordingWorld {
    pub fn record(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }
}

impl WorldView for RecordingWorld {
    type Agent = u64;
}

impl WorldMut for RecordingWorld {}

pub type Cx<'a> = NodeCx<'a, RecordingWorld>;
pub type Component = BehaviorTreeComponent<RecordingWorld>;

/// Finishes inside `execute_task`.
#[derive(Debug)]
pub struct Instant {
    name: &'static str,
    result: NodeResult,
}

impl Instant {
    pub fn succeed(name: &'static str) -> Self {
        Self {
            name,
            result: NodeResult::Succeeded,
        }
    }

    pub fn fail(name: &'static str) -> Self {
        Self {
            name,
            result: NodeResult::Failed,
        }
    }
}

impl BtNode for Instant {}

impl TaskNode<RecordingWorld> for Instant {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record(format!("run:{}", self.name));
        self.result
    }
}

/// Runs until the message `<name>.done` arrives. Aborts instantly unless
/// built with `latent_abort`, in which case the abort waits for
/// `<name>.stopped`.
#[derive(Debug)]
pub struct Latent {
    name: &'static str,
    latent_abort: bool,
}

impl Latent {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            latent_abort: false,
        }
    }

    pub fn latent_abort(name: &'static str) -> Self {
        Self {
            name,
            latent_abort: true,
        }
    }
}

impl BtNode for Latent {}

impl TaskNode<RecordingWorld> for Latent {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record(format!("start:{}", self.name));
        cx.wait_for_message(format!("{}.done", self.name), None);
        NodeResult::InProgress
    }

    fn abort_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record(format!("abort:{}", self.name));
        if self.latent_abort {
            cx.wait_for_message(format!("{}.stopped", self.name), None);
            NodeResult::InProgress
        } else {
            NodeResult::Aborted
        }
    }
}

/// Counts its executions in node memory.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
}

impl Counter {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl BtNode for Counter {
    fn init_memory(&self) -> Option<Box<dyn MemoryBlock>> {
        Some(Box::new(0u32))
    }
}

impl TaskNode<RecordingWorld> for Counter {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        let count = match cx.memory::<u32>() {
            Some(count) => {
                *count += 1;
                *count
            }
            None => return NodeResult::Failed,
        };
        cx.world_mut().record(format!("{}:{count}", self.name));
        NodeResult::Succeeded
    }
}

/// Passes while a boolean blackboard key is true.
#[derive(Debug)]
pub struct BbFlag {
    key: BbKey<bool>,
    mode: FlowAbortMode,
}

impl BbFlag {
    pub fn new(key: BbKey<bool>, mode: FlowAbortMode) -> Self {
        Self { key, mode }
    }
}

impl BtNode for BbFlag {}

impl AuxiliaryNode<RecordingWorld> for BbFlag {}

impl DecoratorNode<RecordingWorld> for BbFlag {
    fn calculate_raw_condition(&self, cx: &mut Cx<'_>) -> bool {
        cx.blackboard().get(self.key).copied().unwrap_or(false)
    }

    fn flow_abort_mode(&self) -> FlowAbortMode {
        self.mode
    }

    fn observes_key(&self, key: u64) -> bool {
        key == self.key.id()
    }
}

/// Records relevance changes and ticks.
#[derive(Debug)]
pub struct Probe {
    name: &'static str,
}

impl Probe {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl BtNode for Probe {}

impl AuxiliaryNode<RecordingWorld> for Probe {
    fn on_become_relevant(&self, cx: &mut Cx<'_>) {
        cx.world_mut().record(format!("relevant:{}", self.name));
    }

    fn on_cease_relevant(&self, cx: &mut Cx<'_>) {
        cx.world_mut().record(format!("cease:{}", self.name));
    }

    fn tick_node(&self, cx: &mut Cx<'_>, _dt: f32) {
        cx.world_mut().record(format!("tick:{}", self.name));
    }
}

impl ServiceNode<RecordingWorld> for Probe {}

pub fn manager(trees: Vec<BehaviorTree<RecordingWorld>>) -> Rc<TreeManager<RecordingWorld>> {
    let manager = TreeManager::new();
    for tree in trees {
        manager.register(tree);
    }
    Rc::new(manager)
}

pub fn component(trees: &Rc<TreeManager<RecordingWorld>>) -> Component {
    component_with(trees, EngineConfig::default())
}

/// Engine logs show up with `RUST_LOG=bt_engine=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn component_with(trees: &Rc<TreeManager<RecordingWorld>>, config: EngineConfig) -> Component {
    init_tracing();
    BehaviorTreeComponent::new(AGENT, trees.clone(), config)
}

pub fn traced(comp: Component) -> (Component, SharedTraceSink) {
    let sink: SharedTraceSink = Rc::new(RefCell::new(VecTraceSink::default()));
    (comp.with_trace(sink.clone()), sink)
}

/// Runs `ticks` frames of 0.1 seconds, continuing the tick counter.
pub fn run(comp: &mut Component, world: &mut RecordingWorld, ticks: u64) {
    for _ in 0..ticks {
        step(comp, world, 0.1);
    }
}

pub fn step(comp: &mut Component, world: &mut RecordingWorld, dt_seconds: f32) {
    let ctx = TickContext {
        tick: (comp.time_seconds() * 10.0).round() as u64,
        dt_seconds,
        seed: 0,
    };
    comp.tick(&ctx, world);
}

pub fn active_task(comp: &Component) -> Option<String> {
    comp.active_node()
        .and_then(|node| comp.node_name(node))
        .map(str::to_string)
}
