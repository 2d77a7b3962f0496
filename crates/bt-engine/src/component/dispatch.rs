//! Node object resolution and the activation hooks run during a search.

use std::rc::Rc;

use bt_core::{DeterministicRng, WorldMut};

use super::BehaviorTreeComponent;
use crate::context::NodeCx;
use crate::index::{ChildSlot, NodeIndex};
use crate::node::{AuxObject, CompositeNode, DecoratorNode, NodeObject, ServiceNode, TaskNode};
use crate::search::{SearchUpdate, UpdateTarget};
use crate::tree::{BehaviorTree, NodeKind, ServiceTiming};
use crate::types::{DecoratorLogic, FlowAbortMode, NodeResult, NodeUpdateMode};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    pub(crate) fn cx<'a>(&'a mut self, world: &'a mut W, node: NodeIndex) -> NodeCx<'a, W> {
        NodeCx::new(self, world, node)
    }

    fn instanced_object(&self, node: NodeIndex) -> Option<&NodeObject<W>> {
        let inst = self.stack.get(node.instance_pos())?;
        self.known
            .get(inst.known)?
            .nodes
            .get(usize::from(node.execution))?
            .as_ref()
    }

    pub(crate) fn composite_object(&self, node: NodeIndex) -> Option<Rc<dyn CompositeNode<W>>> {
        if let Some(NodeObject::Composite(object)) = self.instanced_object(node) {
            return Some(object.clone());
        }
        let def = self.stack.get(node.instance_pos())?.tree.composite(node.execution)?;
        Some(def.behavior.template().clone())
    }

    pub(crate) fn decorator_object(&self, node: NodeIndex) -> Option<Rc<dyn DecoratorNode<W>>> {
        if let Some(NodeObject::Decorator(object)) = self.instanced_object(node) {
            return Some(object.clone());
        }
        match &self.stack.get(node.instance_pos())?.tree.node(node.execution)?.kind {
            NodeKind::Decorator(binding) => Some(binding.template().clone()),
            _ => None,
        }
    }

    pub(crate) fn service_object(&self, node: NodeIndex) -> Option<Rc<dyn ServiceNode<W>>> {
        if let Some(NodeObject::Service(object)) = self.instanced_object(node) {
            return Some(object.clone());
        }
        match &self.stack.get(node.instance_pos())?.tree.node(node.execution)?.kind {
            NodeKind::Service(def) => Some(def.behavior.template().clone()),
            _ => None,
        }
    }

    pub(crate) fn task_object(&self, node: NodeIndex) -> Option<Rc<dyn TaskNode<W>>> {
        if let Some(NodeObject::Task(object)) = self.instanced_object(node) {
            return Some(object.clone());
        }
        let def = self.stack.get(node.instance_pos())?.tree.node(node.execution)?.task()?;
        Some(def.behavior.template().clone())
    }

    pub(crate) fn aux_object(&self, node: NodeIndex) -> Option<AuxObject<W>> {
        if let Some(object) = self.decorator_object(node) {
            return Some(AuxObject::Decorator(object));
        }
        self.service_object(node).map(AuxObject::Service)
    }

    /// Queues an activation change. Removals of aux nodes that are not
    /// active only cancel a queued addition.
    pub(crate) fn add_search_update(&mut self, mut update: SearchUpdate) {
        let mut drop_new = false;
        if let UpdateTarget::Aux(aux) = update.target {
            let index = update.index();
            if update.mode == NodeUpdateMode::Remove && !self.is_aux_node_active(index) {
                drop_new = true;
            }
            let is_service = self
                .stack
                .get(index.instance_pos())
                .and_then(|inst| inst.tree.node(aux))
                .is_some_and(|def| def.is_service());
            update.post = update.mode == NodeUpdateMode::Add && is_service;
        }
        self.search.add_unique_update(update, drop_new);
    }

    pub(crate) fn queue_parallel_update(&mut self, task: NodeIndex, instance: usize, mode: NodeUpdateMode) {
        let instance = u16::try_from(instance).unwrap_or(u16::MAX);
        self.add_search_update(SearchUpdate::parallel_task(task.execution, instance, mode));
    }

    fn queue_aux_update(&mut self, aux: NodeIndex, mode: NodeUpdateMode) {
        self.add_search_update(SearchUpdate::aux(aux.execution, aux.instance, mode));
    }

    /// Passing state of one decorator, with its inversion applied.
    pub(crate) fn decorator_passes(&mut self, world: &mut W, decorator: NodeIndex) -> bool {
        let Some(object) = self.decorator_object(decorator) else {
            return true;
        };
        let raw = object.calculate_raw_condition(&mut self.cx(world, decorator));
        raw != object.inverse_condition()
    }

    /// Evaluates the decorators on child edge `child` of `composite`.
    pub(crate) fn decorators_allow_execution(
        &mut self,
        world: &mut W,
        composite: u16,
        instance: usize,
        child: usize,
    ) -> bool {
        let Some(tree) = self.tree_at(instance) else {
            return false;
        };
        let Some(edge) = tree.composite(composite).and_then(|def| def.children.get(child)) else {
            return false;
        };
        if edge.decorators.is_empty() {
            return true;
        }

        let allowed = if edge.decorator_ops.is_empty() {
            edge.decorators
                .iter()
                .all(|dec| self.decorator_passes(world, NodeIndex::at(instance, *dec)))
        } else {
            evaluate_decorator_logic(&edge.decorator_ops, |idx| {
                edge.decorators
                    .get(idx)
                    .is_some_and(|dec| self.decorator_passes(world, NodeIndex::at(instance, *dec)))
            })
        };

        if !allowed {
            tracing::debug!(
                instance,
                execution = edge.node,
                child,
                "Child execution blocked by decorators"
            );
        }
        allowed
    }

    pub(crate) fn notify_decorators_on_activation(&mut self, world: &mut W, composite: NodeIndex, child: usize) {
        for dec in child_decorators(self.tree_at(composite.instance_pos()), composite.execution, child) {
            let idx = NodeIndex::new(composite.instance, dec);
            let Some(object) = self.decorator_object(idx) else {
                continue;
            };
            object.on_node_activation(&mut self.cx(world, idx));
            match object.flow_abort_mode() {
                FlowAbortMode::LowerPriority => self.queue_aux_update(idx, NodeUpdateMode::Remove),
                FlowAbortMode::SelfBranch | FlowAbortMode::Both => {
                    self.queue_aux_update(idx, NodeUpdateMode::Add)
                }
                FlowAbortMode::None => {}
            }
        }
    }

    pub(crate) fn notify_decorators_on_deactivation(
        &mut self,
        world: &mut W,
        composite: NodeIndex,
        child: usize,
        result: &mut NodeResult,
    ) {
        for dec in child_decorators(self.tree_at(composite.instance_pos()), composite.execution, child) {
            let idx = NodeIndex::new(composite.instance, dec);
            let Some(object) = self.decorator_object(idx) else {
                continue;
            };
            if *result == NodeResult::Aborted {
                object.on_node_deactivation(&mut self.cx(world, idx), *result);
                continue;
            }
            object.on_node_processed(&mut self.cx(world, idx), result);
            object.on_node_deactivation(&mut self.cx(world, idx), *result);
            match object.flow_abort_mode() {
                FlowAbortMode::SelfBranch => self.queue_aux_update(idx, NodeUpdateMode::Remove),
                FlowAbortMode::LowerPriority => self.queue_aux_update(idx, NodeUpdateMode::Add),
                FlowAbortMode::Both | FlowAbortMode::None => {}
            }
        }
    }

    pub(crate) fn notify_decorators_on_failed_activation(
        &mut self,
        world: &mut W,
        composite: NodeIndex,
        child: usize,
        result: &mut NodeResult,
    ) {
        for dec in child_decorators(self.tree_at(composite.instance_pos()), composite.execution, child) {
            let idx = NodeIndex::new(composite.instance, dec);
            let Some(object) = self.decorator_object(idx) else {
                continue;
            };
            object.on_node_processed(&mut self.cx(world, idx), result);
            if matches!(object.flow_abort_mode(), FlowAbortMode::LowerPriority | FlowAbortMode::Both) {
                self.queue_aux_update(idx, NodeUpdateMode::Add);
            }
        }
    }

    /// Runs the deactivation hooks of a child's decorators and throws away
    /// whatever activation changes they queue.
    pub(crate) fn notify_decorators_detached(
        &mut self,
        world: &mut W,
        composite: NodeIndex,
        child: usize,
        result: &mut NodeResult,
    ) {
        let saved = std::mem::take(&mut self.search.pending_updates);
        self.notify_decorators_on_deactivation(world, composite, child, result);
        self.search.pending_updates = saved;
    }

    /// Composite entered by a search: resets its child bookkeeping and
    /// activates its services.
    pub(crate) fn on_node_activation(&mut self, world: &mut W, composite: NodeIndex) {
        if let Some(memory) = self.composite_memory_mut(composite) {
            memory.current_child = ChildSlot::NotInitialized;
            memory.override_child = ChildSlot::NotInitialized;
        }
        if let Some(object) = self.composite_object(composite) {
            object.on_node_activation(&mut self.cx(world, composite));
        }
        let services = self
            .tree_at(composite.instance_pos())
            .and_then(|tree| tree.composite(composite.execution).map(|def| def.services.clone()))
            .unwrap_or_default();
        for service in services {
            let idx = NodeIndex::new(composite.instance, service);
            self.queue_aux_update(idx, NodeUpdateMode::Add);
            self.notify_service_parent_activation(world, idx);
        }
    }

    pub(crate) fn on_node_deactivation(&mut self, world: &mut W, composite: NodeIndex, result: &mut NodeResult) {
        if let Some(object) = self.composite_object(composite) {
            object.on_node_deactivation(&mut self.cx(world, composite), result);
        }
        let Some(tree) = self.tree_at(composite.instance_pos()) else {
            return;
        };
        let Some(def) = tree.composite(composite.execution) else {
            return;
        };
        for service in &def.services {
            self.queue_aux_update(NodeIndex::new(composite.instance, *service), NodeUpdateMode::Remove);
        }
        if def.apply_decorator_scope {
            let from = composite;
            let to = NodeIndex::new(composite.instance, def.last_execution_index);
            self.unregister_aux_in_range(from, to);
            self.search.drop_pending_adds_between(from, to);
        }
    }

    /// Restarting a composite in place forgets which child it was running.
    pub(crate) fn on_node_restart(&mut self, composite: NodeIndex) {
        if let Some(memory) = self.composite_memory_mut(composite) {
            memory.current_child = ChildSlot::NotInitialized;
            memory.override_child = ChildSlot::NotInitialized;
        }
    }

    pub(crate) fn on_child_activation(&mut self, world: &mut W, composite: NodeIndex, child: usize) {
        let Some(tree) = self.tree_at(composite.instance_pos()) else {
            return;
        };
        let Some(edge) = tree.composite(composite.execution).and_then(|def| def.children.get(child)) else {
            return;
        };
        if let Some(object) = self.composite_object(composite) {
            if object.can_notify_decorators_on_activation(&mut self.cx(world, composite), child) {
                self.notify_decorators_on_activation(world, composite, child);
            }
        }
        if !edge.is_task {
            self.on_node_activation(world, NodeIndex::new(composite.instance, edge.node));
        }
        if let Some(memory) = self.composite_memory_mut(composite) {
            memory.current_child = ChildSlot::Child(child);
        }
    }

    pub(crate) fn on_child_deactivation(
        &mut self,
        world: &mut W,
        composite: NodeIndex,
        child: usize,
        result: &mut NodeResult,
    ) {
        let Some(tree) = self.tree_at(composite.instance_pos()) else {
            return;
        };
        let Some(edge) = tree.composite(composite.execution).and_then(|def| def.children.get(child)) else {
            return;
        };
        if edge.is_task {
            let services = tree
                .node(edge.node)
                .and_then(|def| def.task())
                .map(|def| def.services.clone())
                .unwrap_or_default();
            for service in services {
                self.queue_aux_update(NodeIndex::new(composite.instance, service), NodeUpdateMode::Remove);
            }
        } else {
            self.on_node_deactivation(world, NodeIndex::new(composite.instance, edge.node), result);
        }

        if let Some(object) = self.composite_object(composite) {
            if object.can_notify_decorators_on_deactivation(&mut self.cx(world, composite), child, *result) {
                self.notify_decorators_on_deactivation(world, composite, child, result);
            }
        }
    }

    pub(crate) fn set_child_override(&mut self, world: &mut W, requested_by: NodeIndex, child: ChildSlot) {
        let Some(parent) = self
            .tree_at(requested_by.instance_pos())
            .and_then(|tree| tree.parent_of(requested_by.execution))
        else {
            return;
        };
        let composite = NodeIndex::new(requested_by.instance, parent);
        let Some(object) = self.composite_object(composite) else {
            return;
        };
        if object.override_child(&mut self.cx(world, composite), child) {
            return;
        }
        let valid = match child {
            ChildSlot::Child(idx) => idx < self.child_count_of(composite),
            ChildSlot::ReturnToParent => true,
            ChildSlot::NotInitialized => false,
        };
        if let Some(memory) = self.composite_memory_mut(composite).filter(|_| valid) {
            memory.override_child = child;
        }
    }

    fn service_timing(&self, service: NodeIndex) -> Option<ServiceTiming> {
        match &self.stack.get(service.instance_pos())?.tree.node(service.execution)?.kind {
            NodeKind::Service(def) => Some(def.timing),
            _ => None,
        }
    }

    /// Draws the next interval of a service.
    pub(crate) fn schedule_service_tick(&mut self, service: NodeIndex) {
        let Some(timing) = self.service_timing(service) else {
            return;
        };
        let min = (timing.interval - timing.random_deviation).max(0.0);
        let max = timing.interval + timing.random_deviation;
        let next = if max > min {
            self.rng.next_f32_range(min, max)
        } else {
            timing.interval
        };
        if let Some(memory) = self.aux_memory_mut(service) {
            memory.next_tick_remaining = next;
        }
    }

    /// Service whose owner was just entered by a search.
    pub(crate) fn notify_service_parent_activation(&mut self, world: &mut W, service: NodeIndex) {
        let Some(timing) = self.service_timing(service) else {
            return;
        };
        let Some(object) = self.service_object(service) else {
            return;
        };
        let remaining = if timing.restart_timer_on_activation {
            0.0
        } else {
            self.aux_memory_mut(service)
                .map_or(0.0, |memory| memory.next_tick_remaining.max(0.0))
        };
        if remaining <= 0.0 {
            self.schedule_service_tick(service);
        }

        object.on_search_start(&mut self.cx(world, service));
        if timing.call_tick_on_search_start {
            self.schedule_service_tick(service);
            object.tick_node(&mut self.cx(world, service), 0.0);
        }
    }

    /// Ticks one active aux node and lowers `next_needed` to its next due time.
    pub(crate) fn tick_aux_node(&mut self, world: &mut W, aux: NodeIndex, dt: f32, next_needed: &mut f32) {
        match self.aux_object(aux) {
            Some(AuxObject::Service(object)) => {
                let due = match self.aux_memory_mut(aux) {
                    Some(memory) => {
                        memory.next_tick_remaining -= dt;
                        memory.accumulated_dt += dt;
                        if memory.next_tick_remaining <= 0.0 {
                            let elapsed = memory.accumulated_dt;
                            memory.accumulated_dt = 0.0;
                            Some(elapsed)
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                if let Some(elapsed) = due {
                    self.schedule_service_tick(aux);
                    object.tick_node(&mut self.cx(world, aux), elapsed);
                }
                if let Some(memory) = self.aux_memory_mut(aux) {
                    *next_needed = next_needed.min(memory.next_tick_remaining.max(0.0));
                }
            }
            Some(AuxObject::Decorator(object)) => {
                if object.wants_tick() {
                    object.tick_node(&mut self.cx(world, aux), dt);
                    *next_needed = 0.0;
                }
            }
            None => {}
        }
    }

    /// Next due time over every active aux node.
    pub(crate) fn next_aux_delta(&mut self) -> f32 {
        let mut next = f32::MAX;
        for aux in self.active_aux_nodes() {
            match self.aux_object(aux) {
                Some(AuxObject::Service(_)) => {
                    if let Some(memory) = self.aux_memory_mut(aux) {
                        next = next.min(memory.next_tick_remaining.max(0.0));
                    }
                }
                Some(AuxObject::Decorator(object)) if object.wants_tick() => next = 0.0,
                _ => {}
            }
        }
        next
    }
}

fn child_decorators<W: WorldMut + 'static>(
    tree: Option<Rc<BehaviorTree<W>>>,
    composite: u16,
    child: usize,
) -> Vec<u16> {
    tree.and_then(|tree| {
        tree.composite(composite)
            .and_then(|def| def.children.get(child))
            .map(|edge| edge.decorators.clone())
    })
    .unwrap_or_default()
}

struct LogicFrame {
    op: DecoratorLogic,
    num_left: usize,
    forced: Option<bool>,
}

/// Evaluates a prefix-ordered decorator expression. `test` is called with
/// the decorator position for every operand that is not already decided.
pub(crate) fn evaluate_decorator_logic(ops: &[DecoratorLogic], mut test: impl FnMut(usize) -> bool) -> bool {
    let mut stack: Vec<LogicFrame> = Vec::new();
    let mut result = true;
    for op in ops {
        match *op {
            DecoratorLogic::Test(idx) => {
                let value = match stack.last().and_then(|frame| frame.forced) {
                    Some(forced) => forced,
                    None => test(idx),
                };
                result = fold_logic_stack(&mut stack, value);
                if stack.is_empty() {
                    break;
                }
            }
            DecoratorLogic::And(count) | DecoratorLogic::Or(count) => stack.push(LogicFrame {
                op: *op,
                num_left: count,
                forced: None,
            }),
            DecoratorLogic::Not => stack.push(LogicFrame {
                op: *op,
                num_left: 1,
                forced: None,
            }),
        }
    }
    result
}

fn fold_logic_stack(stack: &mut Vec<LogicFrame>, mut value: bool) -> bool {
    while let Some(frame) = stack.last_mut() {
        frame.num_left = frame.num_left.saturating_sub(1);
        match frame.op {
            DecoratorLogic::And(_) if frame.forced.is_none() && !value => frame.forced = Some(false),
            DecoratorLogic::Or(_) if frame.forced.is_none() && value => frame.forced = Some(true),
            DecoratorLogic::Not => value = !value,
            _ => {}
        }
        if let Some(forced) = frame.forced {
            value = forced;
        }
        if frame.num_left > 0 {
            break;
        }
        stack.pop();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use DecoratorLogic::{And, Not, Or, Test};

    fn eval(ops: &[DecoratorLogic], values: &[bool]) -> (bool, Vec<usize>) {
        let mut tested = Vec::new();
        let result = evaluate_decorator_logic(ops, |idx| {
            tested.push(idx);
            values[idx]
        });
        (result, tested)
    }

    #[test]
    fn and_short_circuits_after_first_failure() {
        let (result, tested) = eval(&[And(3), Test(0), Test(1), Test(2)], &[true, false, true]);
        assert!(!result);
        assert_eq!(tested, vec![0, 1]);
    }

    #[test]
    fn or_passes_when_any_operand_passes() {
        let (result, tested) = eval(&[Or(2), Test(0), Test(1)], &[false, true]);
        assert!(result);
        assert_eq!(tested, vec![0, 1]);

        let (result, tested) = eval(&[Or(2), Test(0), Test(1)], &[true, false]);
        assert!(result);
        assert_eq!(tested, vec![0]);
    }

    #[test]
    fn not_inverts_nested_expression() {
        // not (a or b)
        let ops = [Not, Or(2), Test(0), Test(1)];
        assert!(eval(&ops, &[false, false]).0);
        assert!(!eval(&ops, &[false, true]).0);
    }

    #[test]
    fn nested_and_inside_or() {
        // a or (b and c)
        let ops = [Or(2), Test(0), And(2), Test(1), Test(2)];
        assert!(eval(&ops, &[false, true, true]).0);
        assert!(!eval(&ops, &[false, true, false]).0);
        assert!(eval(&ops, &[true, false, false]).0);
    }
}
