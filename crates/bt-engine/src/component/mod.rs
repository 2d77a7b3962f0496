//! Per-agent runtime of behavior trees.
//!
//! A [`BehaviorTreeComponent`] owns everything one agent needs to run a tree:
//! the execution stack of subtree instances, their memory, the pending
//! execution request and the search state. Tree assets are shared; the
//! component is not.
//!
//! Work is split over submodules:
//! - `dispatch`: routing calls to template or instanced node objects
//! - `request`: request arbitration and decorator driven aborts
//! - `search`: resolving a request into the next task
//! - `stack`: pushing subtrees, executing and finishing tasks
//! - `lifecycle`: start, stop, pause and subtree injection
//! - `tick`: the per-frame driver

mod dispatch;
mod lifecycle;
mod request;
mod search;
mod stack;
mod tick;

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use bt_core::rng::derive_seed;
use bt_core::{AgentId, Blackboard, SplitMix64, WorldMut};
use bt_tools::{NullTraceSink, TraceEvent, TraceSink};

use crate::config::EngineConfig;
use crate::cooldown::CooldownMap;
use crate::index::{NodeIndex, NodeIndexRange};
use crate::instance::{KnownInstance, SubtreeInstance};
use crate::loader::TreeLoader;
use crate::memory::{AuxMemory, CompositeMemory, MemoryHandle};
use crate::message::{AiMessage, MessageObservers};
use crate::request::{ExecutionRequest, PendingExecution};
use crate::search::SearchData;
use crate::tree::{BehaviorTree, TreeId};
use crate::types::{ActiveNodeKind, ExecutionMode, TaskStatus};

const LOCK_TICK: u8 = 1;
const LOCK_REENTRY: u8 = 2;

/// Tree the component was asked to run.
#[derive(Debug, Clone)]
struct TreeStartInfo {
    tree: TreeId,
    mode: ExecutionMode,
    pending_initialize: bool,
}

pub struct BehaviorTreeComponent<W: WorldMut + 'static> {
    agent: W::Agent,
    config: EngineConfig,
    trees: Rc<dyn TreeLoader<W>>,
    blackboard: Blackboard,
    trace: Box<dyn TraceSink>,
    rng: SplitMix64,
    tick_count: u64,
    time: f64,
    /// Delta of the last processed tick, used to tick newly activated aux nodes.
    frame_dt: f32,

    stack: Vec<SubtreeInstance<W>>,
    known: Vec<KnownInstance<W>>,
    active_instance: usize,

    request: ExecutionRequest,
    pending: PendingExecution,
    search: SearchData,
    pending_unregister: Vec<NodeIndexRange>,

    observers: MessageObservers,
    messages: VecDeque<AiMessage>,
    cooldowns: CooldownMap,
    dynamic_subtrees: BTreeMap<String, TreeId>,
    start_info: Option<TreeStartInfo>,

    loop_execution: bool,
    running: bool,
    paused: bool,
    requested_flow_update: bool,
    requested_stop: bool,
    waiting_for_aborting_tasks: bool,
    stop_lock: u8,
    deferred_stop: bool,
    next_tick_delta: f32,
    accumulated_dt: f32,
}

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    pub fn new(agent: W::Agent, trees: Rc<dyn TreeLoader<W>>, config: EngineConfig) -> Self {
        let rng = SplitMix64::new(derive_seed(config.seed, agent.stable_id(), 0));
        Self {
            agent,
            config,
            trees,
            blackboard: Blackboard::new(),
            trace: Box::new(NullTraceSink),
            rng,
            tick_count: 0,
            time: 0.0,
            frame_dt: 0.0,
            stack: Vec::new(),
            known: Vec::new(),
            active_instance: 0,
            request: ExecutionRequest::default(),
            pending: PendingExecution::default(),
            search: SearchData::default(),
            pending_unregister: Vec::new(),
            observers: MessageObservers::default(),
            messages: VecDeque::new(),
            cooldowns: CooldownMap::default(),
            dynamic_subtrees: BTreeMap::new(),
            start_info: None,
            loop_execution: false,
            running: false,
            paused: false,
            requested_flow_update: false,
            requested_stop: false,
            waiting_for_aborting_tasks: false,
            stop_lock: 0,
            deferred_stop: false,
            next_tick_delta: 0.0,
            accumulated_dt: 0.0,
        }
    }

    pub fn with_blackboard(mut self, blackboard: Blackboard) -> Self {
        self.blackboard = blackboard;
        self
    }

    /// Routes diagnostic events to `sink` instead of dropping them.
    pub fn with_trace(mut self, sink: impl TraceSink + 'static) -> Self {
        self.trace = Box::new(sink);
        self
    }

    pub fn agent(&self) -> W::Agent {
        self.agent
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    /// Seconds accumulated from tick deltas.
    pub fn time_seconds(&self) -> f64 {
        self.time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tree_has_been_started(&self) -> bool {
        self.running && !self.stack.is_empty()
    }

    /// Asset of the root instance.
    pub fn root_tree(&self) -> Option<&TreeId> {
        self.stack.first().map(|inst| inst.tree.id())
    }

    pub fn instance_count(&self) -> usize {
        self.stack.len()
    }

    pub fn known_instance_count(&self) -> usize {
        self.known.len()
    }

    pub fn active_instance_index(&self) -> usize {
        self.active_instance
    }

    /// Active node of the active instance.
    pub fn active_node(&self) -> Option<NodeIndex> {
        let inst = self.stack.get(self.active_instance)?;
        inst.active_node
            .map(|node| NodeIndex::at(self.active_instance, node))
    }

    /// Name of a node on the stack.
    pub fn node_name(&self, node: NodeIndex) -> Option<&str> {
        self.stack.get(node.instance_pos())?.tree.node_name(node.execution)
    }

    /// Finds a node by name, searching instances from the top of the stack.
    pub fn find_node(&self, name: &str) -> Option<NodeIndex> {
        self.stack
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, inst)| inst.tree.find_node(name).map(|exec| NodeIndex::at(i, exec)))
    }

    /// The node's own memory block.
    pub fn node_memory<T: 'static>(&self, node: NodeIndex) -> Option<&T> {
        let inst = self.stack.get(node.instance_pos())?;
        let slot = inst.tree.node(node.execution)?.memory_slot?;
        inst.memory.get(MemoryHandle::<T>::new(slot))
    }

    pub(crate) fn node_memory_mut<T: 'static>(&mut self, node: NodeIndex) -> Option<&mut T> {
        let inst = self.stack.get_mut(node.instance_pos())?;
        let slot = inst.tree.node(node.execution)?.memory_slot?;
        inst.memory.get_mut(MemoryHandle::<T>::new(slot))
    }

    pub fn task_status(&self, task: NodeIndex) -> TaskStatus {
        let Some(inst) = self.stack.get(task.instance_pos()) else {
            return TaskStatus::Inactive;
        };
        if let Some(status) = inst.parallel_status(task.execution) {
            return status;
        }
        if inst.active_node == Some(task.execution) {
            return match inst.active_kind {
                ActiveNodeKind::ActiveTask => TaskStatus::Active,
                ActiveNodeKind::AbortingTask => TaskStatus::Aborting,
                _ => TaskStatus::Inactive,
            };
        }
        TaskStatus::Inactive
    }

    pub fn is_aux_node_active(&self, node: NodeIndex) -> bool {
        self.stack
            .get(node.instance_pos())
            .is_some_and(|inst| inst.is_aux_active(node.execution))
    }

    /// Whether `node` is the running task, an active parallel task or an
    /// active aux node.
    pub fn has_active_node(&self, node: NodeIndex) -> bool {
        self.stack
            .get(node.instance_pos())
            .is_some_and(|inst| inst.has_active_node(node.execution))
    }

    /// Active aux nodes of every instance, bottom of the stack first.
    pub fn active_aux_nodes(&self) -> Vec<NodeIndex> {
        self.stack
            .iter()
            .enumerate()
            .flat_map(|(i, inst)| inst.active_aux.iter().map(move |aux| NodeIndex::at(i, *aux)))
            .collect()
    }

    pub fn parallel_tasks(&self) -> Vec<(NodeIndex, TaskStatus)> {
        self.stack
            .iter()
            .enumerate()
            .flat_map(|(i, inst)| {
                inst.parallel_tasks
                    .iter()
                    .map(move |p| (NodeIndex::at(i, p.task), p.status))
            })
            .collect()
    }

    /// Instance running `execution` of `tree`: the active instance when that
    /// node is its active node, else the lowest instance of the asset.
    pub fn find_instance_containing_node(&self, tree: &TreeId, execution: u16) -> Option<usize> {
        if let Some(inst) = self.stack.get(self.active_instance) {
            if inst.tree.id() == tree && inst.active_node == Some(execution) {
                return Some(self.active_instance);
            }
        }
        self.stack.iter().position(|inst| inst.tree.id() == tree)
    }

    /// A search is queued that restarts at a specific node.
    pub fn is_restart_pending(&self) -> bool {
        self.request.is_set() && !self.request.try_next_child
    }

    /// A latent abort is running or a resolved task waits for one.
    pub fn is_abort_pending(&self) -> bool {
        self.waiting_for_aborting_tasks || self.pending.is_set()
    }

    pub fn message_observer_count(&self) -> usize {
        self.observers.count()
    }

    pub fn cooldown_end_time(&self, tag: &str) -> f64 {
        self.cooldowns.end_time(tag)
    }

    pub fn is_cooling_down(&self, tag: &str) -> bool {
        self.cooldowns.is_cooling_down(tag, self.time)
    }

    pub fn add_cooldown(&mut self, tag: &str, duration: f64, add_to_existing: bool) {
        self.cooldowns.add_duration(tag, duration, add_to_existing, self.time);
    }

    pub fn dynamic_subtree(&self, tag: &str) -> Option<&TreeId> {
        self.dynamic_subtrees.get(tag)
    }

    /// Primary task of the top instance plus every active parallel task.
    pub fn describe_active_tasks(&self) -> String {
        let Some(top) = self.stack.last() else {
            return "None".to_string();
        };
        let mut description = match top.active_node {
            Some(node) if top.active_kind == ActiveNodeKind::ActiveTask => top
                .tree
                .node_name(node)
                .unwrap_or("None")
                .to_string(),
            _ => "None".to_string(),
        };

        let parallel: Vec<&str> = self
            .stack
            .iter()
            .flat_map(|inst| {
                inst.parallel_tasks
                    .iter()
                    .filter(|p| p.status == TaskStatus::Active)
                    .filter_map(|p| inst.tree.node_name(p.task))
            })
            .collect();
        if !parallel.is_empty() {
            description.push_str(&format!(" ({})", parallel.join(", ")));
        }
        description
    }

    pub fn describe_active_trees(&self) -> String {
        if self.stack.is_empty() {
            return "None".to_string();
        }
        self.stack
            .iter()
            .map(|inst| inst.tree.id().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Multi-line dump of every instance's active path with runtime values.
    pub fn debug_info_string(&self) -> String {
        let mut out = String::new();
        for inst in &self.stack {
            out.push_str(&format!("Behavior tree: {}\n", inst.tree.id()));
            let mut path = Vec::new();
            let mut node = inst.active_node;
            while let Some(exec) = node {
                path.push(exec);
                node = inst.tree.parent_of(exec);
            }
            for (depth, exec) in path.iter().rev().enumerate() {
                let Some(def) = inst.tree.node(*exec) else {
                    continue;
                };
                let memory = def.memory_slot.and_then(|slot| inst.memory.block(slot));
                let values = match &def.kind {
                    crate::tree::NodeKind::Composite(c) => c.behavior.template().describe_runtime(memory),
                    crate::tree::NodeKind::Task(t) => t.behavior.template().describe_runtime(memory),
                    _ => Vec::new(),
                };
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(&def.describe());
                if !values.is_empty() {
                    out.push_str(&format!(" [{}]", values.join(", ")));
                }
                out.push('\n');
            }
        }
        out
    }

    pub(crate) fn tree_at(&self, instance: usize) -> Option<Rc<BehaviorTree<W>>> {
        self.stack.get(instance).map(|inst| inst.tree.clone())
    }

    pub(crate) fn child_index_of(&self, node: NodeIndex) -> Option<usize> {
        self.stack
            .get(node.instance_pos())?
            .tree
            .node(node.execution)?
            .child_index
    }

    pub(crate) fn child_count_of(&self, node: NodeIndex) -> usize {
        self.stack
            .get(node.instance_pos())
            .and_then(|inst| inst.tree.composite(node.execution))
            .map_or(0, |def| def.children.len())
    }

    /// Task on child edge `child` of `composite`.
    pub(crate) fn child_task_index(&self, composite: NodeIndex, child: usize) -> Option<NodeIndex> {
        let def = self
            .stack
            .get(composite.instance_pos())?
            .tree
            .composite(composite.execution)?
            .children
            .get(child)?;
        def.is_task
            .then(|| NodeIndex::new(composite.instance, def.node))
    }

    pub(crate) fn composite_memory(&self, composite: NodeIndex) -> Option<&CompositeMemory> {
        let inst = self.stack.get(composite.instance_pos())?;
        let slot = inst.tree.node(composite.execution)?.special_slot?;
        inst.memory.get(MemoryHandle::<CompositeMemory>::new(slot))
    }

    pub(crate) fn composite_memory_mut(&mut self, composite: NodeIndex) -> Option<&mut CompositeMemory> {
        let inst = self.stack.get_mut(composite.instance_pos())?;
        let slot = inst.tree.node(composite.execution)?.special_slot?;
        inst.memory.get_mut(MemoryHandle::<CompositeMemory>::new(slot))
    }

    pub(crate) fn aux_memory_mut(&mut self, aux: NodeIndex) -> Option<&mut AuxMemory> {
        let inst = self.stack.get_mut(aux.instance_pos())?;
        let slot = inst.tree.node(aux.execution)?.special_slot?;
        inst.memory.get_mut(MemoryHandle::<AuxMemory>::new(slot))
    }

    fn emit(&mut self, tag: &'static str, instance: usize, execution: u16) {
        self.trace.emit(
            TraceEvent::new(self.tick_count, tag)
                .with_a(instance as u64)
                .with_b(u64::from(execution)),
        );
    }
}
