//! Subtree instances, task execution and task messages.

use std::borrow::Cow;

use bt_core::WorldMut;

use super::BehaviorTreeComponent;
use crate::error::{BtError, Result};
use crate::index::{NodeIndex, ROOT};
use crate::instance::{KnownInstance, SubtreeInstance};
use crate::message::{AiMessage, RequestId};
use crate::tree::TreeId;
use crate::types::{ActiveNodeKind, NodeResult, StopMode, TaskStatus};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    /// Pushes an instance of `tree` on top of the execution stack and
    /// requests a search from its root.
    ///
    /// The instance is identified by the asset and the path of active nodes
    /// below it; pushing the same asset through the same path restores the
    /// memory it had when it was last left.
    pub(crate) fn push_instance(&mut self, world: &mut W, id: &TreeId) -> Result<()> {
        let tree = self
            .trees
            .load_tree(id)
            .ok_or_else(|| BtError::MissingTree(id.clone()))?;

        if !self.blackboard.is_compatible_with(tree.blackboard_schema()) {
            return Err(BtError::IncompatibleBlackboard {
                tree: id.clone(),
                schema: tree
                    .blackboard_schema()
                    .map(|schema| schema.id().to_string())
                    .unwrap_or_default(),
            });
        }

        let origin = self.stack.last().and_then(|inst| inst.active_node).map(|node| {
            NodeIndex::at(self.stack.len() - 1, node)
        });
        if let Some(origin) = origin {
            let parent = self
                .tree_at(origin.instance_pos())
                .and_then(|tree| tree.parent_of(origin.execution).map(|p| (p, tree.child_index(p, origin.execution))));
            if let Some((parent, child)) = parent {
                let parent = NodeIndex::new(origin.instance, parent);
                if let Some(object) = self.composite_object(parent) {
                    if !object.can_push_subtree(&mut self.cx(world, parent), child) {
                        return Err(BtError::PushRefused(id.clone()));
                    }
                }
            }
        }

        if self.stack.len() >= self.config.max_stack_depth {
            return Err(BtError::StackDepthExceeded {
                tree: id.clone(),
                depth: self.stack.len(),
            });
        }

        let mut path = vec![origin.map_or(u16::MAX, |node| node.execution)];
        path.extend(
            self.stack
                .iter()
                .rev()
                .skip(1)
                .map(|inst| inst.active_node.unwrap_or(u16::MAX)),
        );
        let known = match self
            .known
            .iter()
            .position(|known| known.tree_id == *id && known.path == path)
        {
            Some(known) => known,
            None => {
                if self.known.len() >= self.config.max_known_instances {
                    return Err(BtError::TooManyInstances(self.known.len()));
                }
                self.known.push(KnownInstance::new(id.clone(), path));
                self.known.len() - 1
            }
        };

        let entry = &mut self.known[known];
        let memory = match &entry.memory {
            Some(saved) => saved.clone(),
            None => tree.new_memory(),
        };
        entry.instantiate_nodes(&tree);

        let mut instance = SubtreeInstance::new(tree.clone(), known, memory);
        instance.origin = origin;
        self.stack.push(instance);
        self.active_instance = self.stack.len() - 1;
        let index = self.active_instance;

        // Root services stay active for the whole life of the instance.
        let services = tree.composite(ROOT).map(|def| def.services.clone()).unwrap_or_default();
        for service in services {
            let service = NodeIndex::at(index, service);
            self.notify_service_parent_activation(world, service);
            self.stack[index].add_active_aux(service.execution);
            if let Some(object) = self.aux_object(service) {
                object.on_become_relevant(&mut self.cx(world, service));
            }
        }

        tracing::debug!(tree = %id, instance = index, known, "Pushed subtree instance");
        self.emit("bt.tree.start", index, ROOT);
        self.request_execution_on(world, ROOT, index, ROOT, Some(0), NodeResult::InProgress);
        Ok(())
    }

    /// Makes `task` the active node of the active instance and runs it.
    pub(crate) fn execute_task(&mut self, world: &mut W, task: NodeIndex) {
        let instance = task.instance_pos();
        let Some(tree) = self.tree_at(instance) else {
            return;
        };

        let services = tree
            .node(task.execution)
            .and_then(|def| def.task())
            .map(|def| def.services.clone())
            .unwrap_or_default();
        for service in services {
            let service = NodeIndex::new(task.instance, service);
            self.notify_service_parent_activation(world, service);
            self.stack[instance].add_active_aux(service.execution);
            if let Some(object) = self.aux_object(service) {
                object.on_become_relevant(&mut self.cx(world, service));
            }
        }

        let inst = &mut self.stack[instance];
        inst.active_node = Some(task.execution);
        inst.active_kind = ActiveNodeKind::ActiveTask;
        tracing::debug!(task = %task, name = tree.node_name(task.execution).unwrap_or("?"), "Executing task");
        self.emit("bt.task.execute", instance, task.execution);

        let Some(object) = self.task_object(task) else {
            return;
        };
        let result = object.execute_task(&mut self.cx(world, task));

        // A pushed subtree or a finish from inside execute_task already moved on.
        let still_active = self.active_instance == instance
            && self.stack.get(instance).is_some_and(|inst| {
                inst.active_node == Some(task.execution) && inst.active_kind == ActiveNodeKind::ActiveTask
            });
        if still_active {
            self.on_task_finished(world, task, result);
        }
    }

    /// Aborts the task of the top instance.
    pub(crate) fn abort_current_task(&mut self, world: &mut W) {
        let Some(last) = self.stack.len().checked_sub(1) else {
            return;
        };
        let Some(task) = self.stack[last].active_node else {
            return;
        };
        let task = NodeIndex::at(last, task);
        self.stack[last].active_kind = ActiveNodeKind::AbortingTask;
        self.unregister_message_observers_from(task);
        self.search.preserve_active_node_memory = true;

        tracing::debug!(%task, "Aborting task");
        self.emit("bt.task.abort", last, task.execution);
        let Some(object) = self.task_object(task) else {
            return;
        };
        let result = object.abort_task(&mut self.cx(world, task));

        let still_aborting = self.stack.len() == last + 1
            && self.stack[last].active_kind == ActiveNodeKind::AbortingTask;
        if still_aborting {
            self.on_task_finished(world, task, result);
        }
    }

    /// Reports a task's execution or abort result. `InProgress` only
    /// informs the parent composite.
    pub(crate) fn on_task_finished(&mut self, world: &mut W, task: NodeIndex, result: NodeResult) {
        let instance = task.instance_pos();
        let Some(tree) = self.tree_at(instance) else {
            return;
        };
        let was_waiting = self.waiting_for_aborting_tasks;
        let mut result = result;

        if let Some(parent) = tree.parent_of(task.execution) {
            let parent = NodeIndex::new(task.instance, parent);
            if let (Some(object), Some(child)) = (
                self.composite_object(parent),
                tree.child_index(parent.execution, task.execution),
            ) {
                object.on_child_execution(&mut self.cx(world, parent), child, &mut result);
            }
        }

        if result.is_finished() {
            self.unregister_message_observers_from(task);
            if self.stack.len() > instance {
                if let Some(object) = self.task_object(task) {
                    object.on_task_finished(&mut self.cx(world, task), result);
                }
            }
            tracing::debug!(%task, ?result, "Task finished");
            self.trace.emit(
                bt_tools::TraceEvent::new(self.tick_count, "bt.task.finished")
                    .with_a(u64::from(task.execution))
                    .with_b(result.trace_code()),
            );

            let is_active_task = instance == self.active_instance
                && self
                    .stack
                    .get(instance)
                    .is_some_and(|inst| inst.active_node == Some(task.execution));
            if is_active_task {
                let inst = &mut self.stack[instance];
                let was_aborting = inst.active_kind == ActiveNodeKind::AbortingTask;
                inst.active_kind = ActiveNodeKind::InactiveTask;
                if !was_aborting {
                    self.request_execution_with_result(world, result);
                }
            } else if result == NodeResult::Aborted {
                // The search may have already moved the active instance below this task.
                if let Some(inst) = self.stack.get_mut(instance) {
                    if inst.active_node == Some(task.execution) {
                        inst.active_kind = ActiveNodeKind::InactiveTask;
                    }
                }
            }

            self.update_aborting_tasks();
            if !self.waiting_for_aborting_tasks && was_waiting {
                if self.requested_stop {
                    self.stop_tree(world, StopMode::Safe);
                } else {
                    if self.request.is_set() {
                        // Requests made while waiting start a fresh search.
                        self.pending.lock();
                        self.request.search_end = NodeIndex::UNSET;
                    }
                    self.schedule_execution_update();
                }
            }
        } else {
            self.update_aborting_tasks();
        }

        if self.start_info.as_ref().is_some_and(|info| info.pending_initialize) && self.stop_lock == 0 {
            self.process_pending_initialize(world);
        }
    }

    pub(crate) fn update_aborting_tasks(&mut self) {
        self.waiting_for_aborting_tasks = self
            .stack
            .last()
            .is_some_and(|inst| inst.active_kind == ActiveNodeKind::AbortingTask)
            || self
                .stack
                .iter()
                .any(|inst| inst.parallel_tasks.iter().any(|p| p.status == TaskStatus::Aborting));
    }

    /// Lets `task` keep running while the search continues elsewhere.
    pub(crate) fn register_parallel_task(&mut self, task: NodeIndex) {
        let Some(inst) = self.stack.get_mut(task.instance_pos()) else {
            return;
        };
        inst.add_parallel_task(task.execution);
        if inst.active_node == Some(task.execution) {
            inst.active_kind = ActiveNodeKind::InactiveTask;
        }
    }

    pub(crate) fn unregister_parallel_task(&mut self, task: NodeIndex) {
        if let Some(inst) = self.stack.get_mut(task.instance_pos()) {
            inst.remove_parallel_task(task.execution);
        }
        self.update_aborting_tasks();
    }

    pub(crate) fn register_message_observer(
        &mut self,
        node: NodeIndex,
        name: Cow<'static, str>,
        request_id: Option<RequestId>,
    ) {
        tracing::trace!(%node, %name, ?request_id, "Waiting for message");
        self.observers.register(node, name, request_id);
    }

    pub(crate) fn unregister_message_observers_from(&mut self, node: NodeIndex) {
        self.observers.unregister_from(node);
    }

    /// Queues a message; it is delivered at the start of the next tick.
    pub fn handle_message(&mut self, message: AiMessage) {
        self.messages.push_back(message);
        self.schedule_next_tick(0.0);
    }

    /// Delivers one message to every task observing it. Each observer
    /// receives it at most once.
    pub(crate) fn send_message_now(&mut self, world: &mut W, message: &AiMessage) {
        let owners = self.observers.take_matching(message);
        if owners.is_empty() {
            tracing::trace!(name = %message.name, "Message had no observers");
        }
        for owner in owners {
            let Some(object) = self.task_object(owner) else {
                continue;
            };
            self.emit("bt.message", owner.instance_pos(), owner.execution);
            object.on_message(&mut self.cx(world, owner), message);
        }
    }
}
