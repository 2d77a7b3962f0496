//! Node contracts.
//!
//! A tree is made of four node kinds: composites, decorators, services and
//! tasks. Each kind has its own trait; all of them share [`BtNode`]. The
//! engine never looks at concrete node types. It calls these traits on the
//! object selected by the node's [`Binding`].

use std::rc::Rc;

use bt_core::WorldMut;

use crate::context::NodeCx;
use crate::index::ChildSlot;
use crate::memory::MemoryBlock;
use crate::message::AiMessage;
use crate::tree::TreeId;
use crate::types::{AbortRequest, FlowAbortMode, NodeResult, TaskStatus};

/// Behavior common to all node kinds.
pub trait BtNode: 'static {
    /// Static description used by diagnostics.
    fn describe(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// Initial per-instance state. Called once per node when a tree is built;
    /// every new subtree instance starts from a copy.
    fn init_memory(&self) -> Option<Box<dyn MemoryBlock>> {
        None
    }

    /// Runtime values shown by `debug_info_string`.
    fn describe_runtime(&self, _memory: Option<&dyn MemoryBlock>) -> Vec<String> {
        Vec::new()
    }
}

/// Flow control node. Picks which child runs next.
pub trait CompositeNode<W: WorldMut + 'static>: BtNode {
    fn next_child(&self, cx: &mut NodeCx<'_, W>, prev: ChildSlot, last_result: NodeResult) -> ChildSlot;

    /// Called when the composite becomes active during a search.
    fn on_node_activation(&self, _cx: &mut NodeCx<'_, W>) {}

    /// Called when the search leaves the composite. May rewrite the result
    /// reported to the parent.
    fn on_node_deactivation(&self, _cx: &mut NodeCx<'_, W>, _result: &mut NodeResult) {}

    /// Called whenever a task directly below this composite starts or finishes.
    fn on_child_execution(&self, _cx: &mut NodeCx<'_, W>, _child: usize, _result: &mut NodeResult) {}

    /// Intercepts a decorator asking to run `child` next. Return true when
    /// the composite handled it; otherwise the engine stores the override.
    fn override_child(&self, _cx: &mut NodeCx<'_, W>, _child: ChildSlot) -> bool {
        false
    }

    /// Whether a subtree may be pushed from the given child.
    fn can_push_subtree(&self, _cx: &mut NodeCx<'_, W>, _child: Option<usize>) -> bool {
        true
    }

    fn can_notify_decorators_on_activation(&self, _cx: &mut NodeCx<'_, W>, _child: usize) -> bool {
        true
    }

    fn can_notify_decorators_on_deactivation(
        &self,
        _cx: &mut NodeCx<'_, W>,
        _child: usize,
        _result: NodeResult,
    ) -> bool {
        true
    }

    fn can_notify_decorators_on_failed_activation(
        &self,
        _cx: &mut NodeCx<'_, W>,
        _child: usize,
        _result: NodeResult,
    ) -> bool {
        true
    }

    /// Checked when the tree is built.
    fn validate_children(&self, _children: &[ChildShape]) -> Result<(), String> {
        Ok(())
    }
}

/// Shape of a composite child, as seen by [`CompositeNode::validate_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildShape {
    Composite,
    Task,
}

/// Hooks shared by decorators and services.
pub trait AuxiliaryNode<W: WorldMut + 'static>: BtNode {
    fn on_become_relevant(&self, _cx: &mut NodeCx<'_, W>) {}

    fn on_cease_relevant(&self, _cx: &mut NodeCx<'_, W>) {}

    /// Decorators tick every frame when this is true. Services always tick
    /// on their interval.
    fn wants_tick(&self) -> bool {
        false
    }

    fn tick_node(&self, _cx: &mut NodeCx<'_, W>, _dt: f32) {}
}

/// Condition gate on a composite child edge.
pub trait DecoratorNode<W: WorldMut + 'static>: AuxiliaryNode<W> {
    fn calculate_raw_condition(&self, _cx: &mut NodeCx<'_, W>) -> bool {
        true
    }

    fn inverse_condition(&self) -> bool {
        false
    }

    fn flow_abort_mode(&self) -> FlowAbortMode {
        FlowAbortMode::None
    }

    fn abort_request(&self) -> AbortRequest {
        AbortRequest::ResultChanged
    }

    /// Blackboard keys whose changes re-evaluate this decorator.
    fn observes_key(&self, _key: u64) -> bool {
        false
    }

    fn on_node_activation(&self, _cx: &mut NodeCx<'_, W>) {}

    fn on_node_deactivation(&self, _cx: &mut NodeCx<'_, W>, _result: NodeResult) {}

    /// Called after the decorated branch finished; may rewrite its result.
    fn on_node_processed(&self, _cx: &mut NodeCx<'_, W>, _result: &mut NodeResult) {}
}

/// Periodic background logic attached to a composite or a task.
pub trait ServiceNode<W: WorldMut + 'static>: AuxiliaryNode<W> {
    /// Called when the owning branch is entered by a search.
    fn on_search_start(&self, _cx: &mut NodeCx<'_, W>) {}
}

/// Leaf action.
pub trait TaskNode<W: WorldMut + 'static>: BtNode {
    /// `InProgress` makes the task latent; it finishes later through
    /// [`NodeCx::finish_latent_task`].
    fn execute_task(&self, _cx: &mut NodeCx<'_, W>) -> NodeResult {
        NodeResult::Succeeded
    }

    /// `InProgress` makes the abort latent; it finishes later through
    /// [`NodeCx::finish_latent_abort`].
    fn abort_task(&self, _cx: &mut NodeCx<'_, W>) -> NodeResult {
        NodeResult::Aborted
    }

    fn wants_tick(&self) -> bool {
        false
    }

    fn tick_task(&self, _cx: &mut NodeCx<'_, W>, _dt: f32) {}

    fn on_task_finished(&self, _cx: &mut NodeCx<'_, W>, _result: NodeResult) {}

    /// Default handling of an observed message: an executing task finishes
    /// with the message's success flag, an aborting task completes its abort.
    fn on_message(&self, cx: &mut NodeCx<'_, W>, message: &AiMessage) {
        match cx.task_status() {
            TaskStatus::Active => {
                let result = if message.success {
                    NodeResult::Succeeded
                } else {
                    NodeResult::Failed
                };
                cx.finish_latent_task(result);
            }
            TaskStatus::Aborting => cx.finish_latent_abort(),
            TaskStatus::Inactive => {}
        }
    }

    /// A task that returns true is not restarted by a search that would pick
    /// it again while it is running.
    fn ignore_restart_self(&self) -> bool {
        false
    }

    /// Tag of a dynamic subtree injection point.
    fn injection_tag(&self) -> Option<&str> {
        None
    }

    /// Default asset of a subtree task.
    fn subtree_asset(&self) -> Option<&TreeId> {
        None
    }

    /// Called when the subtree instance pushed by this task leaves the stack.
    fn on_subtree_deactivated(&self, _cx: &mut NodeCx<'_, W>, _result: NodeResult) {}
}

/// How node calls are routed for an agent.
pub enum Binding<T: ?Sized> {
    /// One object serves every agent running the tree. It must keep its
    /// per-agent state in node memory.
    Shared(Rc<T>),
    /// Every known subtree instance gets its own object from the factory.
    Instanced {
        template: Rc<T>,
        factory: Rc<dyn Fn() -> Rc<T>>,
    },
}

impl<T: ?Sized> Binding<T> {
    pub fn is_instanced(&self) -> bool {
        matches!(self, Binding::Instanced { .. })
    }

    pub fn template(&self) -> &Rc<T> {
        match self {
            Binding::Shared(node) => node,
            Binding::Instanced { template, .. } => template,
        }
    }

    pub(crate) fn instantiate(&self) -> Option<Rc<T>> {
        match self {
            Binding::Shared(_) => None,
            Binding::Instanced { factory, .. } => Some(factory()),
        }
    }
}

impl<T: ?Sized> Clone for Binding<T> {
    fn clone(&self) -> Self {
        match self {
            Binding::Shared(node) => Binding::Shared(node.clone()),
            Binding::Instanced { template, factory } => Binding::Instanced {
                template: template.clone(),
                factory: factory.clone(),
            },
        }
    }
}

/// A per-agent node object created from an instanced binding.
pub(crate) enum NodeObject<W: WorldMut + 'static> {
    Composite(Rc<dyn CompositeNode<W>>),
    Decorator(Rc<dyn DecoratorNode<W>>),
    Service(Rc<dyn ServiceNode<W>>),
    Task(Rc<dyn TaskNode<W>>),
}

impl<W: WorldMut + 'static> Clone for NodeObject<W> {
    fn clone(&self) -> Self {
        match self {
            NodeObject::Composite(node) => NodeObject::Composite(node.clone()),
            NodeObject::Decorator(node) => NodeObject::Decorator(node.clone()),
            NodeObject::Service(node) => NodeObject::Service(node.clone()),
            NodeObject::Task(node) => NodeObject::Task(node.clone()),
        }
    }
}

/// Either kind of auxiliary node, resolved for one call.
pub(crate) enum AuxObject<W: WorldMut + 'static> {
    Decorator(Rc<dyn DecoratorNode<W>>),
    Service(Rc<dyn ServiceNode<W>>),
}

impl<W: WorldMut + 'static> AuxObject<W> {
    pub fn on_become_relevant(&self, cx: &mut NodeCx<'_, W>) {
        match self {
            AuxObject::Decorator(node) => node.on_become_relevant(cx),
            AuxObject::Service(node) => node.on_become_relevant(cx),
        }
    }

    pub fn on_cease_relevant(&self, cx: &mut NodeCx<'_, W>) {
        match self {
            AuxObject::Decorator(node) => node.on_cease_relevant(cx),
            AuxObject::Service(node) => node.on_cease_relevant(cx),
        }
    }
}
