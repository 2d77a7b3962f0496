//! The handle nodes receive on every callback.

use std::borrow::Cow;

use bt_core::{Blackboard, WorldMut};

use crate::component::BehaviorTreeComponent;
use crate::error::Result;
use crate::index::{ChildSlot, NodeIndex};
use crate::message::{AiMessage, RequestId};
use crate::tree::TreeId;
use crate::types::{AbortRequest, NodeResult, NodeUpdateMode, TaskStatus};

/// Access to the owning component, the world and the calling node's memory.
///
/// A `NodeCx` is only alive for the duration of one node callback. Node
/// objects may be shared between agents, so everything agent-specific goes
/// through here.
pub struct NodeCx<'a, W: WorldMut + 'static> {
    comp: &'a mut BehaviorTreeComponent<W>,
    world: &'a mut W,
    node: NodeIndex,
}

impl<'a, W: WorldMut + 'static> NodeCx<'a, W> {
    pub(crate) fn new(comp: &'a mut BehaviorTreeComponent<W>, world: &'a mut W, node: NodeIndex) -> Self {
        Self { comp, world, node }
    }

    /// The calling node.
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn agent(&self) -> W::Agent {
        self.comp.agent()
    }

    pub fn world(&self) -> &W {
        self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        self.world
    }

    pub fn blackboard(&self) -> &Blackboard {
        self.comp.blackboard()
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.comp.blackboard_mut()
    }

    /// Seconds of simulated time seen by the component.
    pub fn time_seconds(&self) -> f64 {
        self.comp.time_seconds()
    }

    /// The calling node's own memory block.
    pub fn memory<T: 'static>(&mut self) -> Option<&mut T> {
        self.comp.node_memory_mut::<T>(self.node)
    }

    /// Position of the calling node's edge in its parent composite.
    pub fn child_index(&self) -> Option<usize> {
        self.comp.child_index_of(self.node)
    }

    /// Number of children when the calling node is a composite.
    pub fn child_count(&self) -> usize {
        self.comp.child_count_of(self.node)
    }

    /// A search is queued that restarts at a specific node.
    pub fn is_restart_pending(&self) -> bool {
        self.comp.is_restart_pending()
    }

    pub fn task_status(&self) -> TaskStatus {
        self.comp.task_status(self.node)
    }

    /// Completes a latent execution. Ignored when the task is not running.
    pub fn finish_latent_task(&mut self, result: NodeResult) {
        if self.comp.task_status(self.node) == TaskStatus::Inactive {
            tracing::debug!(node = %self.node, "Ignoring finish of inactive task");
            return;
        }
        self.comp.on_task_finished(self.world, self.node, result);
    }

    /// Completes a latent abort. Ignored unless the task is aborting.
    pub fn finish_latent_abort(&mut self) {
        if self.comp.task_status(self.node) != TaskStatus::Aborting {
            tracing::debug!(node = %self.node, "Ignoring abort finish of task that is not aborting");
            return;
        }
        self.comp.on_task_finished(self.world, self.node, NodeResult::Aborted);
    }

    /// Registers the calling task as an observer of `name`. The first
    /// matching message is delivered to [`crate::TaskNode::on_message`].
    pub fn wait_for_message(&mut self, name: impl Into<Cow<'static, str>>, request_id: Option<RequestId>) {
        self.comp.register_message_observer(self.node, name.into(), request_id);
    }

    pub fn stop_waiting_for_messages(&mut self) {
        self.comp.unregister_message_observers_from(self.node);
    }

    /// Queues a message for delivery on the next tick.
    pub fn send_message(&mut self, message: AiMessage) {
        self.comp.handle_message(message);
    }

    /// Asks the component to re-evaluate the calling decorator's branch.
    ///
    /// The request follows the decorator's [`FlowAbortMode`]; `None` ignores
    /// it. A self-branch request from inside the executing branch finishes
    /// that branch as failed even when the decorator itself still passes.
    /// Only a child edge with a decorator logic expression re-checks the
    /// decorators first and drops the request while they allow execution.
    ///
    /// [`FlowAbortMode`]: crate::FlowAbortMode
    pub fn request_execution(&mut self) {
        self.comp.request_execution_by_decorator(self.world, self.node);
    }

    /// Re-evaluates the calling decorator and requests a search when its
    /// outcome no longer matches the executing branch.
    pub fn conditional_flow_abort(&mut self, request: AbortRequest) {
        self.comp.conditional_flow_abort(self.world, self.node, request);
    }

    /// Whether the calling node's branch is the one executing.
    pub fn is_executing_branch(&self) -> bool {
        match self.comp.child_index_of(self.node) {
            Some(child) => self.comp.is_executing_branch(self.node, child),
            None => self.comp.is_executing_branch(self.node, 0),
        }
    }

    /// Makes the parent composite pick `child` the next time it chooses.
    pub fn set_child_override(&mut self, child: ChildSlot) {
        self.comp.set_child_override(self.world, self.node, child);
    }

    /// Pushes a subtree instance on top of the execution stack. The calling
    /// task becomes its origin.
    pub fn push_subtree(&mut self, tree: &TreeId) -> Result<()> {
        self.comp.push_instance(self.world, tree)
    }

    /// Asset bound to a dynamic subtree tag on this component.
    pub fn dynamic_subtree(&self, tag: &str) -> Option<TreeId> {
        self.comp.dynamic_subtree(tag).cloned()
    }

    pub fn cooldown_end_time(&self, tag: &str) -> f64 {
        self.comp.cooldown_end_time(tag)
    }

    pub fn is_cooling_down(&self, tag: &str) -> bool {
        self.comp.is_cooling_down(tag)
    }

    pub fn add_cooldown(&mut self, tag: &str, duration: f64, add_to_existing: bool) {
        self.comp.add_cooldown(tag, duration, add_to_existing);
    }

    pub(crate) fn child_task_status(&self, child: usize) -> TaskStatus {
        match self.comp.child_task_index(self.node, child) {
            Some(task) => self.comp.task_status(task),
            None => TaskStatus::Inactive,
        }
    }

    pub(crate) fn register_parallel_task(&mut self, child: usize) {
        if let Some(task) = self.comp.child_task_index(self.node, child) {
            self.comp.register_parallel_task(task);
        }
    }

    pub(crate) fn unregister_parallel_task(&mut self, child: usize) {
        if let Some(task) = self.comp.child_task_index(self.node, child) {
            self.comp.unregister_parallel_task(task);
        }
    }

    /// Queues removal of a child task from the parallel set.
    pub(crate) fn remove_parallel_task_on_apply(&mut self, child: usize) {
        if let Some(task) = self.comp.child_task_index(self.node, child) {
            let instance = self.comp.active_instance_index();
            self.comp.queue_parallel_update(task, instance, NodeUpdateMode::Remove);
        }
    }

    /// Requests a search that continues after the active node with `result`.
    pub(crate) fn request_delayed_execution(&mut self, result: NodeResult) {
        self.comp.request_execution_with_result(self.world, result);
    }

    /// Asks this composite to restart from `child`, as if the child's task
    /// finished with `result`.
    pub(crate) fn request_execution_from_child(&mut self, child: usize, result: NodeResult) {
        if let Some(task) = self.comp.child_task_index(self.node, child) {
            self.comp.request_execution_on(
                self.world,
                self.node.execution,
                self.node.instance_pos(),
                task.execution,
                Some(child),
                result,
            );
        }
    }

    /// Runs the deactivation hooks of `child`'s decorators without recording
    /// any activation changes.
    pub(crate) fn notify_child_decorators_detached(&mut self, child: usize, result: &mut NodeResult) {
        self.comp.notify_decorators_detached(self.world, self.node, child, result);
    }
}
