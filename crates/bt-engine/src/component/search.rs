//! Resolving the pending request into the next task.
//!
//! A search walks composites from the request's execute node, collecting
//! activation changes in [`SearchData`](crate::search::SearchData) instead of
//! applying them. Only when a task is picked and every latent abort has
//! finished are the changes applied; an invalid or superseded search is
//! rolled back from the snapshot taken when it started.

use bt_core::WorldMut;

use super::BehaviorTreeComponent;
use crate::index::{ChildSlot, NodeIndex, ROOT};
use crate::search::{SearchNotify, SearchTransaction, SearchUpdate, UpdateTarget};
use crate::types::{ActiveNodeKind, NodeResult, NodeUpdateMode, TaskStatus};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    pub(crate) fn process_execution_request(&mut self, world: &mut W) {
        self.requested_flow_update = false;
        if self.active_instance >= self.stack.len() || self.paused || self.waiting_for_aborting_tasks {
            return;
        }
        if self.pending.is_set() {
            self.process_pending_execution(world);
            return;
        }
        let Some(execute) = self.request.execute_node else {
            return;
        };

        self.search.transaction = Some(SearchTransaction {
            active_instance: self.active_instance,
            deactivated_start: self.search.deactivated_start,
            deactivated_end: self.search.deactivated_end,
            active_nodes: self.stack.iter().map(|inst| inst.active_node).collect(),
        });
        self.copy_instance_memory_to_known();
        self.search.preserve_active_node_memory = false;

        let mut result = self.request.continue_with_result;
        let mut search_valid = true;
        let mut next_task: Option<u16> = None;

        let at_execute = self.active_instance == execute.instance_pos()
            && self.stack[self.active_instance].active_node == Some(execute.execution);
        if !at_execute {
            let (deactivated, last_child) = self.deactivate_up_to(world, execute, &mut result);
            if !deactivated {
                self.search.pending_updates.clear();
                self.search.transaction = None;
                return;
            }
            if let (Some(last_child), Some(tree)) = (last_child, self.tree_at(execute.instance_pos())) {
                let start = NodeIndex::new(
                    execute.instance,
                    tree.child_first_index(execute.execution, last_child),
                );
                if start.takes_priority_over(&self.search.deactivated_start) {
                    self.search.deactivated_start = start;
                    self.search.deactivated_end = NodeIndex::new(
                        execute.instance,
                        tree.child_first_index(execute.execution, last_child + 1),
                    );
                }
            }
        }

        self.search.postpone_search = false;
        self.search.search_in_progress = true;
        self.search.search_root = execute;

        if self.stack[self.active_instance].active_node.is_none() {
            self.stack[self.active_instance].active_node = Some(ROOT);
            let root = NodeIndex::at(self.active_instance, ROOT);
            self.on_node_activation(world, root);
        }

        if !self.request.try_next_child {
            let start = self.request.search_start;
            let deactivate_to = if start.execution > 0 {
                NodeIndex::new(start.instance, start.execution - 1)
            } else {
                start
            };
            self.unregister_aux_up_to(deactivate_to);
            self.on_node_restart(execute);
            self.search.search_start = self.request.search_start;
            self.search.search_end = self.request.search_end;
        } else {
            if self.request.continue_with_result == NodeResult::Failed {
                self.unregister_aux_up_to(self.request.search_start);
            }
            self.search.search_start = NodeIndex::UNSET;
            self.search.search_end = NodeIndex::UNSET;
        }

        let mut node = Some(execute.execution);
        while let Some(composite) = node {
            if next_task.is_some() {
                break;
            }
            let current = NodeIndex::at(self.active_instance, composite);
            let child = self.find_child_to_execute(world, current, &mut result);

            if self.search.postpone_search {
                search_valid = false;
                break;
            }
            match child {
                ChildSlot::Child(idx) => {
                    let Some(edge) = self
                        .tree_at(self.active_instance)
                        .and_then(|tree| tree.composite(composite).and_then(|def| def.children.get(idx).cloned()))
                    else {
                        break;
                    };
                    if edge.is_task {
                        next_task = Some(edge.node);
                    } else {
                        node = Some(edge.node);
                    }
                }
                _ => {
                    let tree = self.tree_at(self.active_instance);
                    let mut parent = tree.as_ref().and_then(|tree| tree.parent_of(composite));
                    let mut left_instance = false;
                    if parent.is_none() {
                        self.on_node_deactivation(world, current, &mut result);
                        if self.active_instance > 0 {
                            self.deactivate_instance_nodes(self.active_instance);
                            self.search.pending_notifies.push(SearchNotify {
                                instance: current.instance,
                                result,
                            });
                            self.active_instance -= 1;
                            left_instance = true;
                            let below = &self.stack[self.active_instance];
                            parent = below.active_node.and_then(|active| below.tree.parent_of(active));
                        }
                    }
                    if let Some(parent) = parent {
                        let parent_index = NodeIndex::at(self.active_instance, parent);
                        let child_index = if left_instance {
                            self.composite_memory(parent_index).and_then(|memory| memory.current_child.index())
                        } else {
                            tree.as_ref().and_then(|tree| tree.child_index(parent, composite))
                        };
                        if let Some(child_index) = child_index {
                            self.on_child_deactivation(world, parent_index, child_index, &mut result);
                        }
                    }
                    node = parent;
                }
            }
        }

        if let Some(task) = next_task {
            let task_index = NodeIndex::at(self.active_instance, task);
            search_valid = task_index.takes_priority_over(&self.request.search_end);
            if search_valid
                && self
                    .task_object(task_index)
                    .is_some_and(|object| object.ignore_restart_self())
                && self.stack[self.active_instance].has_active_node(task)
            {
                tracing::debug!(task = %task_index, "Search picked the running task, keeping it");
                search_valid = false;
            }
        }

        if !search_valid || self.search.postpone_search {
            self.rollback_search_changes();
        }
        self.search.search_in_progress = false;

        if self.search.postpone_search {
            self.schedule_execution_update();
            return;
        }

        self.request = Default::default();
        self.pending.unlock();
        if search_valid {
            if self
                .stack
                .last()
                .is_some_and(|inst| inst.active_kind == ActiveNodeKind::ActiveTask)
            {
                self.search.filter_out_from_deactivated = true;
                self.abort_current_task(world);
                self.search.filter_out_from_deactivated = false;
            }
            if !self.pending.is_locked() {
                self.pending.next_task = next_task.map(|task| NodeIndex::at(self.active_instance, task));
                self.pending.out_of_nodes = next_task.is_none();
            }
        }
        self.process_pending_execution(world);
    }

    /// Picks the first child of `composite` whose decorators pass.
    pub(crate) fn find_child_to_execute(
        &mut self,
        world: &mut W,
        composite: NodeIndex,
        result: &mut NodeResult,
    ) -> ChildSlot {
        if self.child_count_of(composite) == 0 {
            return ChildSlot::ReturnToParent;
        }
        let current = self
            .composite_memory(composite)
            .map_or(ChildSlot::NotInitialized, |memory| memory.current_child);
        let mut child = self.next_child(world, composite, current, *result);

        while let ChildSlot::Child(idx) = child {
            if self.search.postpone_search || idx >= self.child_count_of(composite) {
                break;
            }
            if self.decorators_allow_execution(world, composite.execution, composite.instance_pos(), idx) {
                self.on_child_activation(world, composite, idx);
                return child;
            }

            *result = NodeResult::Failed;
            let notify = self
                .composite_object(composite)
                .map_or(true, |object| {
                    object.can_notify_decorators_on_failed_activation(&mut self.cx(world, composite), idx, *result)
                });
            if notify {
                self.notify_decorators_on_failed_activation(world, composite, idx, result);
            }
            child = self.next_child(world, composite, child, *result);
        }
        ChildSlot::ReturnToParent
    }

    fn next_child(&mut self, world: &mut W, composite: NodeIndex, prev: ChildSlot, result: NodeResult) -> ChildSlot {
        let start = self.search.search_start;
        if prev == ChildSlot::NotInitialized && start.is_set() && composite.takes_priority_over(&start) {
            let Some(tree) = self.tree_at(composite.instance_pos()) else {
                return ChildSlot::ReturnToParent;
            };
            // Enter the branch holding the search start so its decorators are tested.
            return if start.instance == composite.instance {
                tree.matching_child(composite.execution, start.execution)
            } else if start.instance > composite.instance {
                match self.stack[composite.instance_pos()].active_node {
                    Some(active) => tree.matching_child(composite.execution, active),
                    None => ChildSlot::Child(self.child_count_of(composite).saturating_sub(1)),
                }
            } else {
                ChildSlot::ReturnToParent
            };
        }

        let restart_pending = self.is_restart_pending();
        if let Some(memory) = self.composite_memory_mut(composite) {
            if memory.override_child != ChildSlot::NotInitialized && !restart_pending {
                return std::mem::take(&mut memory.override_child);
            }
        }

        match self.composite_object(composite) {
            Some(object) => object.next_child(&mut self.cx(world, composite), prev, result),
            None => ChildSlot::ReturnToParent,
        }
    }

    /// Deactivates the active branch up to `node`, leaving subtree instances
    /// on the way. Returns false when `node` is not on the active path, which
    /// restarts the tree. The second value is the child of `node` that was
    /// deactivated last.
    pub(crate) fn deactivate_up_to(
        &mut self,
        world: &mut W,
        node: NodeIndex,
        result: &mut NodeResult,
    ) -> (bool, Option<usize>) {
        let mut last_child = None;
        let mut deactivate_root = true;
        let mut current = self.stack.get(self.active_instance).and_then(|inst| inst.active_node);
        if current.is_none() && self.active_instance > node.instance_pos() {
            current = Some(ROOT);
            deactivate_root = false;
        }

        while let Some(child) = current {
            let Some(tree) = self.tree_at(self.active_instance) else {
                break;
            };
            match tree.parent_of(child) {
                Some(parent) => {
                    let parent_index = NodeIndex::at(self.active_instance, parent);
                    last_child = tree.child_index(parent, child);
                    if let Some(idx) = last_child {
                        self.on_child_deactivation(world, parent_index, idx, result);
                    }
                    current = Some(parent);
                }
                None => {
                    if deactivate_root {
                        let root = NodeIndex::at(self.active_instance, ROOT);
                        self.on_node_deactivation(world, root, result);
                    }
                    deactivate_root = true;
                    if self.active_instance == 0 {
                        tracing::error!(target_node = %node, "Node not on the active path, restarting tree");
                        self.restart_tree(world);
                        return (false, last_child);
                    }
                    self.deactivate_instance_nodes(self.active_instance);
                    self.search.pending_notifies.push(SearchNotify {
                        instance: u16::try_from(self.active_instance).unwrap_or(u16::MAX),
                        result: *result,
                    });
                    self.active_instance -= 1;
                    current = self.stack[self.active_instance].active_node;
                }
            }
            if current == Some(node.execution) && self.active_instance == node.instance_pos() {
                break;
            }
        }
        (true, last_child)
    }

    /// Queues removal of everything an instance has active.
    pub(crate) fn deactivate_instance_nodes(&mut self, instance: usize) {
        let Some(inst) = self.stack.get(instance) else {
            return;
        };
        let instance_id = u16::try_from(instance).unwrap_or(u16::MAX);
        let parallel: Vec<u16> = inst
            .parallel_tasks
            .iter()
            .filter(|p| p.status == TaskStatus::Active)
            .map(|p| p.task)
            .collect();
        let aux = inst.active_aux.clone();

        self.search.drop_pending_adds_of_instance(instance_id);
        for task in parallel {
            self.add_search_update(SearchUpdate::parallel_task(task, instance_id, NodeUpdateMode::Remove));
        }
        for aux in aux {
            self.add_search_update(SearchUpdate::aux(aux, instance_id, NodeUpdateMode::Remove));
        }
    }

    fn copy_instance_memory_to_known(&mut self) {
        for inst in &self.stack {
            if let Some(known) = self.known.get_mut(inst.known) {
                known.memory = Some(inst.memory.clone());
            }
        }
    }

    /// Undoes the current search: restores the stack bookkeeping and node
    /// memory from the snapshot and discards every collected change.
    pub(crate) fn rollback_search_changes(&mut self) {
        let Some(transaction) = self.search.transaction.take() else {
            return;
        };
        tracing::debug!(active_instance = transaction.active_instance, "Rolling back search");

        self.active_instance = transaction.active_instance;
        self.search.deactivated_start = transaction.deactivated_start;
        self.search.deactivated_end = transaction.deactivated_end;
        for (inst, active) in self.stack.iter_mut().zip(transaction.active_nodes) {
            inst.active_node = active;
        }

        let preserve = self.search.preserve_active_node_memory;
        for inst in &mut self.stack {
            let Some(known) = self.known.get_mut(inst.known) else {
                continue;
            };
            let Some(saved) = known.memory.as_mut() else {
                continue;
            };
            if preserve {
                let slots = inst
                    .active_node
                    .and_then(|active| inst.tree.node(active))
                    .map(|def| [def.memory_slot, def.special_slot]);
                for slot in slots.into_iter().flatten().flatten() {
                    saved.copy_slot_from(&inst.memory, slot);
                }
            }
            inst.memory = saved.clone();
        }

        self.search.pending_updates.clear();
        self.search.pending_notifies.clear();
    }

    /// Starts the task picked by the last search, or finishes the tree when
    /// the search ran out of nodes.
    pub(crate) fn process_pending_execution(&mut self, world: &mut W) {
        if self.waiting_for_aborting_tasks || !self.pending.is_set() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);

        let next = pending.next_task.unwrap_or(NodeIndex::new(0, 0));
        self.unregister_aux_up_to(next);
        self.apply_search_data(world, pending.next_task);

        if self.stack.len() > self.active_instance + 1 {
            let removed = self.stack.split_off(self.active_instance + 1);
            for inst in removed {
                if let Some(known) = self.known.get_mut(inst.known) {
                    known.memory = Some(inst.memory);
                }
            }
        }

        match pending.next_task {
            Some(task) => self.execute_task(world, task),
            None => self.on_tree_finished(world),
        }
    }

    /// Commits the changes collected by a search.
    pub(crate) fn apply_search_data(&mut self, world: &mut W, new_node: Option<NodeIndex>) {
        self.search.transaction = None;

        let notifies = std::mem::take(&mut self.search.pending_notifies);
        for notify in notifies {
            let Some(origin) = self.stack.get(usize::from(notify.instance)).and_then(|inst| inst.origin) else {
                continue;
            };
            if let Some(object) = self.task_object(origin) {
                object.on_subtree_deactivated(&mut self.cx(world, origin), notify.result);
            }
        }

        let new_node = new_node.unwrap_or(NodeIndex::new(0, 0));
        let updates = std::mem::take(&mut self.search.pending_updates);
        self.search.filter_out_from_deactivated = true;
        self.apply_search_updates(world, &updates, new_node, false);
        self.apply_search_updates(world, &updates, new_node, true);
        self.search.filter_out_from_deactivated = false;

        // Newly activated aux nodes catch up with the current frame.
        let frame_dt = self.frame_dt;
        let mut next_needed = f32::MAX;
        for update in &updates {
            if let (NodeUpdateMode::Add, UpdateTarget::Aux(_)) = (update.mode, update.target) {
                if self.is_aux_node_active(update.index()) {
                    self.tick_aux_node(world, update.index(), frame_dt, &mut next_needed);
                }
            }
        }

        self.search.pending_updates.clear();
        self.search.pending_notifies.clear();
        self.search.deactivated_start = NodeIndex::UNSET;
        self.search.deactivated_end = NodeIndex::UNSET;
    }

    pub(crate) fn apply_search_updates(
        &mut self,
        world: &mut W,
        updates: &[SearchUpdate],
        new_node: NodeIndex,
        post: bool,
    ) {
        for update in updates {
            let index = update.index();
            let Some(inst) = self.stack.get(index.instance_pos()) else {
                continue;
            };
            let active = match update.target {
                UpdateTarget::Aux(aux) => inst.is_aux_active(aux),
                UpdateTarget::ParallelTask(task) => inst.parallel_status(task) == Some(TaskStatus::Active),
            };
            let skip = match update.mode {
                NodeUpdateMode::Remove => !active,
                NodeUpdateMode::Add => active || new_node.takes_priority_over(&index),
            };
            if skip || update.post != post {
                continue;
            }

            match update.target {
                UpdateTarget::Aux(aux) => {
                    // Root services of a looping tree stay active across runs.
                    if self.loop_execution && index.instance == 0 {
                        let root = &self.stack[0];
                        let root_service = root.tree.aux_owner(aux) == Some(ROOT)
                            && root.tree.node(aux).is_some_and(|def| def.is_service());
                        if root_service && (update.mode == NodeUpdateMode::Remove || root.is_aux_active(aux)) {
                            continue;
                        }
                    }
                    let Some(object) = self.aux_object(index) else {
                        continue;
                    };
                    match update.mode {
                        NodeUpdateMode::Remove => {
                            self.stack[index.instance_pos()].remove_active_aux(aux);
                            object.on_cease_relevant(&mut self.cx(world, index));
                        }
                        NodeUpdateMode::Add => {
                            self.stack[index.instance_pos()].add_active_aux(aux);
                            object.on_become_relevant(&mut self.cx(world, index));
                        }
                    }
                }
                UpdateTarget::ParallelTask(task) => match update.mode {
                    NodeUpdateMode::Remove => {
                        self.unregister_message_observers_from(index);
                        let Some(object) = self.task_object(index) else {
                            continue;
                        };
                        let result = object.abort_task(&mut self.cx(world, index));
                        let still_listed = self
                            .stack
                            .get(index.instance_pos())
                            .is_some_and(|inst| inst.parallel_status(task).is_some());
                        if still_listed {
                            if result == NodeResult::InProgress {
                                self.stack[index.instance_pos()].set_parallel_status(task, TaskStatus::Aborting);
                                self.waiting_for_aborting_tasks = true;
                            }
                            self.on_task_finished(world, index, result);
                        }
                    }
                    NodeUpdateMode::Add => {
                        self.stack[index.instance_pos()].add_parallel_task(task);
                    }
                },
            }
        }
    }

    /// Queues removal of every active aux node that `index` outranks.
    pub(crate) fn unregister_aux_up_to(&mut self, index: NodeIndex) {
        for aux in self.active_aux_nodes() {
            if index.takes_priority_over(&aux) {
                self.add_search_update(SearchUpdate::aux(aux.execution, aux.instance, NodeUpdateMode::Remove));
            }
        }
    }

    /// Queues removal of every active aux node strictly between `from` and `to`.
    pub(crate) fn unregister_aux_in_range(&mut self, from: NodeIndex, to: NodeIndex) {
        for aux in self.active_aux_nodes() {
            if from.takes_priority_over(&aux) && aux.takes_priority_over(&to) {
                self.add_search_update(SearchUpdate::aux(aux.execution, aux.instance, NodeUpdateMode::Remove));
            }
        }
    }

    /// Applies branch unregistrations requested by failing observers.
    pub(crate) fn process_pending_unregister(&mut self, world: &mut W) -> bool {
        if self.pending_unregister.is_empty() {
            return false;
        }
        let saved = std::mem::take(&mut self.search.pending_updates);
        for range in std::mem::take(&mut self.pending_unregister) {
            self.unregister_aux_in_range(range.from, range.to);
        }
        let updates = std::mem::replace(&mut self.search.pending_updates, saved);
        self.apply_search_updates(world, &updates, NodeIndex::new(0, 0), false);
        true
    }
}
