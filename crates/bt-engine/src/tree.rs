//! Built tree assets.
//!
//! A [`BehaviorTree`] is immutable once built and shared (through `Rc`)
//! between every agent running it. Nodes are stored in execution order, so a
//! node's execution index is also its position in the node table.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bt_core::{BlackboardSchema, WorldMut};

use crate::index::ChildSlot;
use crate::memory::{InstanceMemory, MemoryHandle};
use crate::node::{Binding, CompositeNode, DecoratorNode, NodeObject, ServiceNode, TaskNode};
use crate::types::DecoratorLogic;

/// Identity of a tree asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeId(Cow<'static, str>);

impl TreeId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TreeId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for TreeId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a composite's child list.
#[derive(Debug, Clone)]
pub(crate) struct ChildDef {
    pub decorators: Vec<u16>,
    pub decorator_ops: Vec<DecoratorLogic>,
    /// Execution index of the child composite or task.
    pub node: u16,
    pub is_task: bool,
    /// Number of services attached to a child task.
    pub task_services: u16,
}

pub(crate) struct CompositeDef<W: WorldMut + 'static> {
    pub behavior: Binding<dyn CompositeNode<W>>,
    pub children: Vec<ChildDef>,
    pub services: Vec<u16>,
    pub last_execution_index: u16,
    pub apply_decorator_scope: bool,
}

pub(crate) struct TaskDef<W: WorldMut + 'static> {
    pub behavior: Binding<dyn TaskNode<W>>,
    pub services: Vec<u16>,
}

pub(crate) struct ServiceDef<W: WorldMut + 'static> {
    pub behavior: Binding<dyn ServiceNode<W>>,
    pub timing: ServiceTiming,
}

/// Tick interval settings of a service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceTiming {
    pub interval: f32,
    pub random_deviation: f32,
    pub call_tick_on_search_start: bool,
    pub restart_timer_on_activation: bool,
}

pub(crate) enum NodeKind<W: WorldMut + 'static> {
    Composite(CompositeDef<W>),
    Decorator(Binding<dyn DecoratorNode<W>>),
    Service(ServiceDef<W>),
    Task(TaskDef<W>),
}

pub(crate) struct NodeDef<W: WorldMut + 'static> {
    pub name: Cow<'static, str>,
    pub execution_index: u16,
    /// Owning composite; `None` only for the root.
    pub parent: Option<u16>,
    /// Composite nesting depth; aux nodes and tasks use their parent's.
    pub depth: u16,
    /// Child edge of the parent this node hangs on. `None` for the root and
    /// for services owned by a composite itself.
    pub child_index: Option<usize>,
    pub special_slot: Option<u32>,
    pub memory_slot: Option<u32>,
    pub kind: NodeKind<W>,
}

impl<W: WorldMut + 'static> NodeDef<W> {
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, NodeKind::Composite(_))
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, NodeKind::Service(_))
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, NodeKind::Decorator(_))
    }

    pub fn composite(&self) -> Option<&CompositeDef<W>> {
        match &self.kind {
            NodeKind::Composite(def) => Some(def),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<&TaskDef<W>> {
        match &self.kind {
            NodeKind::Task(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_instanced(&self) -> bool {
        match &self.kind {
            NodeKind::Composite(def) => def.behavior.is_instanced(),
            NodeKind::Decorator(binding) => binding.is_instanced(),
            NodeKind::Service(def) => def.behavior.is_instanced(),
            NodeKind::Task(def) => def.behavior.is_instanced(),
        }
    }

    pub fn instantiate(&self) -> Option<NodeObject<W>> {
        match &self.kind {
            NodeKind::Composite(def) => def.behavior.instantiate().map(NodeObject::Composite),
            NodeKind::Decorator(binding) => binding.instantiate().map(NodeObject::Decorator),
            NodeKind::Service(def) => def.behavior.instantiate().map(NodeObject::Service),
            NodeKind::Task(def) => def.behavior.instantiate().map(NodeObject::Task),
        }
    }

    pub fn describe(&self) -> String {
        let kind = match &self.kind {
            NodeKind::Composite(def) => def.behavior.template().describe(),
            NodeKind::Decorator(binding) => binding.template().describe(),
            NodeKind::Service(def) => def.behavior.template().describe(),
            NodeKind::Task(def) => def.behavior.template().describe(),
        };
        format!("{}[{}] ({})", self.name, self.execution_index, kind)
    }
}

/// An immutable, shareable tree asset.
pub struct BehaviorTree<W: WorldMut + 'static> {
    pub(crate) id: TreeId,
    pub(crate) nodes: Vec<NodeDef<W>>,
    pub(crate) blackboard: Option<Arc<BlackboardSchema>>,
    pub(crate) memory: InstanceMemory,
    pub(crate) injection_tags: Vec<String>,
}

impl<W: WorldMut + 'static> fmt::Debug for BehaviorTree<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorTree")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("memory_slots", &self.memory.len())
            .finish()
    }
}

impl<W: WorldMut + 'static> BehaviorTree<W> {
    pub fn id(&self) -> &TreeId {
        &self.id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of memory slots every instance of this tree allocates.
    pub fn instance_memory_size(&self) -> usize {
        self.memory.len()
    }

    pub fn blackboard_schema(&self) -> Option<&BlackboardSchema> {
        self.blackboard.as_deref()
    }

    /// Execution index of the node with the given name.
    pub fn find_node(&self, name: &str) -> Option<u16> {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| node.execution_index)
    }

    pub fn node_name(&self, execution: u16) -> Option<&str> {
        self.node(execution).map(|node| node.name.as_ref())
    }

    /// Typed handle to a node's own memory slot.
    pub fn memory_handle<T: 'static>(&self, execution: u16) -> Option<MemoryHandle<T>> {
        self.node(execution)?.memory_slot.map(MemoryHandle::new)
    }

    pub fn has_injection_tag(&self, tag: &str) -> bool {
        self.injection_tags.iter().any(|t| t == tag)
    }

    pub(crate) fn node(&self, execution: u16) -> Option<&NodeDef<W>> {
        self.nodes.get(usize::from(execution))
    }

    pub(crate) fn composite(&self, execution: u16) -> Option<&CompositeDef<W>> {
        self.node(execution)?.composite()
    }

    pub(crate) fn parent_of(&self, execution: u16) -> Option<u16> {
        self.node(execution)?.parent
    }

    pub(crate) fn new_memory(&self) -> InstanceMemory {
        self.memory.clone()
    }

    /// Position of `child` (a composite or task) in `parent`'s child list.
    pub(crate) fn child_index(&self, parent: u16, child: u16) -> Option<usize> {
        self.composite(parent)?
            .children
            .iter()
            .position(|c| c.node == child)
    }

    /// First execution index that belongs to child `idx` of `composite`,
    /// counting its decorators and task services. One past the composite's
    /// range when `idx` is out of bounds.
    pub(crate) fn child_first_index(&self, composite: u16, idx: usize) -> u16 {
        let Some(def) = self.composite(composite) else {
            return u16::MAX;
        };
        match def.children.get(idx) {
            Some(child) => child
                .node
                .saturating_sub(child.decorators.len() as u16 + child.task_services),
            None => def.last_execution_index.saturating_add(1),
        }
    }

    /// Execution index of child `idx` itself, or one past the composite's range.
    pub(crate) fn child_node_index(&self, composite: u16, idx: usize) -> u16 {
        let Some(def) = self.composite(composite) else {
            return u16::MAX;
        };
        match def.children.get(idx) {
            Some(child) => child.node,
            None => def.last_execution_index.saturating_add(1),
        }
    }

    /// Child to resume at when a search restarts inside `composite` from
    /// `start`.
    pub(crate) fn matching_child(&self, composite: u16, start: u16) -> ChildSlot {
        let Some(def) = self.composite(composite) else {
            return ChildSlot::ReturnToParent;
        };
        if composite > start {
            return ChildSlot::ReturnToParent;
        }
        for idx in 0..def.children.len() {
            if self.child_first_index(composite, idx) > start {
                return ChildSlot::Child(idx.saturating_sub(1));
            }
        }
        match def.children.len() {
            0 => ChildSlot::ReturnToParent,
            n => ChildSlot::Child(n - 1),
        }
    }

    /// The node an aux node is attached to: its composite for composite
    /// services, otherwise the child on its edge.
    pub(crate) fn aux_owner(&self, aux: u16) -> Option<u16> {
        let def = self.node(aux)?;
        let parent = def.parent?;
        match def.child_index {
            None => Some(parent),
            Some(idx) => Some(self.composite(parent)?.children.get(idx)?.node),
        }
    }
}
