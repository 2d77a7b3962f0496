//! Starting, stopping and pausing the component.

use bt_core::WorldMut;

use super::{BehaviorTreeComponent, TreeStartInfo, LOCK_REENTRY, LOCK_TICK};
use crate::index::{NodeIndex, ROOT};
use crate::tree::TreeId;
use crate::types::{ActiveNodeKind, ExecutionMode, NodeResult, StopMode, TaskStatus};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    /// Starts running `tree` from its root, stopping whatever runs now.
    ///
    /// Returns whether the tree is running afterwards. A latent abort of the
    /// previous tree delays the start until the abort finishes.
    pub fn start_tree(&mut self, world: &mut W, tree: impl Into<TreeId>, mode: ExecutionMode) -> bool {
        let tree = tree.into();
        if self.root_tree() == Some(&tree) && self.tree_has_been_started() {
            return true;
        }
        self.requested_stop = false;
        self.start_info = Some(TreeStartInfo {
            tree,
            mode,
            pending_initialize: true,
        });
        self.process_pending_initialize(world);
        self.running
    }

    /// Starts the last requested tree, or the configured default tree.
    pub fn start_logic(&mut self, world: &mut W) -> bool {
        if self.tree_has_been_started() {
            return true;
        }
        if self.start_info.is_none() {
            self.start_info = self.config.default_tree.clone().map(|tree| TreeStartInfo {
                tree: TreeId::from(tree),
                mode: self.config.execution_mode,
                pending_initialize: false,
            });
        }
        match self.start_info.as_mut() {
            Some(info) => {
                info.pending_initialize = true;
                self.process_pending_initialize(world);
                self.running
            }
            None => {
                tracing::warn!(agent = ?self.agent, "No behavior tree to start");
                false
            }
        }
    }

    pub(crate) fn process_pending_initialize(&mut self, world: &mut W) -> bool {
        if self.stop_lock & LOCK_TICK != 0 {
            // Finished after the tick, once nothing is iterating the stack.
            self.deferred_stop = true;
            self.schedule_next_tick(0.0);
            return false;
        }
        self.stop_tree(world, StopMode::Safe);
        if self.waiting_for_aborting_tasks {
            return true;
        }
        self.remove_all_instances(world);

        let Some(info) = self.start_info.clone() else {
            return false;
        };
        self.loop_execution = info.mode == ExecutionMode::Looped;
        self.running = true;
        if let Err(err) = self.push_instance(world, &info.tree) {
            tracing::warn!(%err, tree = %info.tree, "Failed to start behavior tree");
            self.running = false;
        } else {
            tracing::info!(tree = %info.tree, mode = ?info.mode, "Behavior tree started");
        }
        if let Some(info) = self.start_info.as_mut() {
            info.pending_initialize = false;
        }
        true
    }

    /// Stops the tree. `Safe` waits for latent aborts and finishes the stop
    /// when they complete; `Forced` tears down immediately.
    pub fn stop_tree(&mut self, world: &mut W, mode: StopMode) {
        if self.stop_lock != 0 {
            self.deferred_stop = true;
            self.schedule_next_tick(0.0);
            return;
        }
        let previous = self.stop_lock;
        self.stop_lock |= LOCK_REENTRY;
        self.stop_tree_locked(world, mode);
        self.stop_lock = previous;
    }

    fn stop_tree_locked(&mut self, world: &mut W, mode: StopMode) {
        self.requested_stop = true;
        let had_instances = !self.stack.is_empty();

        for instance in (0..self.stack.len()).rev() {
            let aux = std::mem::take(&mut self.stack[instance].active_aux);
            for aux in aux {
                let aux = NodeIndex::at(instance, aux);
                if let Some(object) = self.aux_object(aux) {
                    object.on_cease_relevant(&mut self.cx(world, aux));
                }
            }

            let parallel: Vec<u16> = self.stack[instance]
                .parallel_tasks
                .iter()
                .filter(|p| p.status == TaskStatus::Active)
                .map(|p| p.task)
                .collect();
            for task in parallel {
                let task = NodeIndex::at(instance, task);
                self.unregister_message_observers_from(task);
                let Some(object) = self.task_object(task) else {
                    continue;
                };
                let result = object.abort_task(&mut self.cx(world, task));
                let still_listed = self
                    .stack
                    .get(instance)
                    .is_some_and(|inst| inst.parallel_status(task.execution).is_some());
                if still_listed {
                    if result == NodeResult::InProgress {
                        self.stack[instance].set_parallel_status(task.execution, TaskStatus::Aborting);
                        self.waiting_for_aborting_tasks = true;
                    }
                    self.on_task_finished(world, task, result);
                }
            }

            let Some(inst) = self.stack.get_mut(instance) else {
                continue;
            };
            if inst.active_kind != ActiveNodeKind::ActiveTask {
                continue;
            }
            let Some(task) = inst.active_node else {
                continue;
            };
            inst.active_kind = ActiveNodeKind::AbortingTask;
            let task = NodeIndex::at(instance, task);
            self.unregister_message_observers_from(task);
            let Some(object) = self.task_object(task) else {
                continue;
            };
            let result = object.abort_task(&mut self.cx(world, task));
            if self
                .stack
                .get(instance)
                .is_some_and(|inst| inst.active_kind == ActiveNodeKind::AbortingTask)
            {
                self.on_task_finished(world, task, result);
            }
        }

        if self.waiting_for_aborting_tasks {
            match mode {
                StopMode::Safe => {
                    tracing::debug!("Stop delayed until latent aborts finish");
                    return;
                }
                StopMode::Forced => {
                    tracing::warn!("Forcing stop while tasks are still aborting");
                }
            }
        }

        // Every node on the active path gets its deactivation notifies.
        let at_root = self.active_instance == 0
            && self
                .stack
                .first()
                .map_or(true, |inst| matches!(inst.active_node, None | Some(ROOT)));
        if !at_root {
            let mut result = NodeResult::Aborted;
            self.deactivate_up_to(world, NodeIndex::new(0, ROOT), &mut result);
        }

        for inst in self.stack.drain(..) {
            if let Some(known) = self.known.get_mut(inst.known) {
                known.memory = None;
            }
        }
        let root = self.start_info.as_ref().map(|info| info.tree.clone());
        self.observers.clear();
        self.search.reset();
        self.request = Default::default();
        self.pending = Default::default();
        self.pending_unregister.clear();
        self.active_instance = 0;
        self.requested_stop = false;
        self.running = false;
        self.waiting_for_aborting_tasks = false;

        if had_instances {
            self.emit("bt.tree.stop", 0, ROOT);
            if let Some(root) = root {
                tracing::info!(tree = %root, "Behavior tree stopped");
            }
        }
    }

    /// Restarts the running tree from its root.
    pub fn restart_tree(&mut self, world: &mut W) {
        if !self.running {
            match self.start_info.as_mut() {
                Some(info) => {
                    info.pending_initialize = true;
                    self.process_pending_initialize(world);
                }
                None => tracing::warn!("Restart requested before any tree was started"),
            }
        } else if self.requested_stop {
            if let Some(info) = self.start_info.as_mut() {
                info.pending_initialize = true;
            }
        } else if !self.stack.is_empty() {
            self.request_execution_on(world, ROOT, 0, ROOT, None, NodeResult::Aborted);
        }
    }

    /// Freezes execution and queues blackboard notifications.
    pub fn pause_logic(&mut self, reason: &str) {
        tracing::debug!(reason, "Pausing behavior tree");
        self.paused = true;
        self.blackboard.pause_notifications();
    }

    /// Returns false when the component was not paused.
    pub fn resume_logic(&mut self, reason: &str) -> bool {
        if !self.paused {
            return false;
        }
        tracing::debug!(reason, "Resuming behavior tree");
        self.paused = false;
        self.schedule_next_tick(0.0);
        self.blackboard.resume_notifications(true);
        if self.request.is_set() || self.pending.out_of_nodes || self.pending.next_task.is_some() {
            self.schedule_execution_update();
        }
        true
    }

    /// Stops the tree and forgets every subtree identity.
    pub fn cleanup(&mut self, world: &mut W) {
        self.stop_tree(world, StopMode::Forced);
        self.remove_all_instances(world);
        self.known.clear();
    }

    pub(crate) fn remove_all_instances(&mut self, world: &mut W) {
        if !self.stack.is_empty() {
            self.stop_tree(world, StopMode::Forced);
        }
        self.stack.clear();
        self.known.clear();
        self.active_instance = 0;
    }

    /// Called when a search leaves the root without finding a task.
    pub(crate) fn on_tree_finished(&mut self, world: &mut W) {
        self.active_instance = 0;
        tracing::debug!(looped = self.loop_execution, "Behavior tree finished");
        self.emit("bt.tree.finished", 0, ROOT);

        if self.loop_execution && !self.stack.is_empty() {
            let root = &mut self.stack[0];
            root.active_node = None;
            root.active_kind = ActiveNodeKind::Composite;
            self.unregister_aux_up_to(NodeIndex::new(0, 0));
            self.apply_search_data(world, None);
            self.request_execution_on(world, ROOT, 0, ROOT, Some(0), NodeResult::InProgress);
        } else {
            self.stop_tree(world, StopMode::Safe);
        }
    }

    /// Binds `tree` to a dynamic subtree tag and restarts a running
    /// injection point with that tag.
    pub fn set_dynamic_subtree(&mut self, world: &mut W, tag: &str, tree: impl Into<TreeId>) {
        let tree = tree.into();
        let current = self.dynamic_subtrees.get(tag).cloned();
        let changed = current.as_ref() != Some(&tree);
        let injected = changed && self.stack.iter().any(|inst| inst.tree.has_injection_tag(tag));
        self.dynamic_subtrees.insert(tag.to_string(), tree.clone());
        if !injected {
            return;
        }
        tracing::debug!(tag, %tree, "Injected dynamic subtree");

        for instance in 0..self.stack.len() {
            let inst = &self.stack[instance];
            if inst.active_kind != ActiveNodeKind::ActiveTask {
                continue;
            }
            let Some(task) = inst.active_node else {
                continue;
            };
            let task_index = NodeIndex::at(instance, task);
            let matches = self
                .task_object(task_index)
                .is_some_and(|object| object.injection_tag() == Some(tag));
            if !matches {
                continue;
            }
            let tree = inst.tree.clone();
            let Some(parent) = tree.parent_of(task) else {
                continue;
            };
            let child = tree.child_index(parent, task);
            self.request_execution_on(world, parent, instance, task, child, NodeResult::Aborted);
            break;
        }
    }
}
