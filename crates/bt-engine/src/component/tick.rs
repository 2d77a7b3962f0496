//! The per-frame driver.

use bt_core::{TickContext, WorldMut};

use super::{BehaviorTreeComponent, LOCK_TICK};
use crate::index::NodeIndex;
use crate::node::AuxObject;
use crate::types::{ActiveNodeKind, StopMode, TaskStatus};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    /// Advances the component by one frame.
    ///
    /// Returns the time until the component next needs a tick: `0.0` when it
    /// wants every frame, `f32::MAX` when it only reacts to events. Calling
    /// `tick` earlier is harmless; the elapsed time is accumulated and handed
    /// to the nodes on the next tick that does work.
    pub fn tick(&mut self, ctx: &TickContext, world: &mut W) -> f32 {
        if self.paused {
            return self.next_tick_delta;
        }
        self.tick_count = ctx.tick;
        self.time += f64::from(ctx.dt_seconds);

        let has_events = !self.messages.is_empty()
            || self.blackboard.has_pending_notifications()
            || !self.pending_unregister.is_empty()
            || self.requested_flow_update
            || self.deferred_stop;
        if self.next_tick_delta > 0.0 && !has_events {
            self.next_tick_delta -= ctx.dt_seconds;
            if self.next_tick_delta > 0.0 {
                self.accumulated_dt += ctx.dt_seconds;
                return self.next_tick_delta;
            }
        }
        let dt = ctx.dt_seconds + std::mem::take(&mut self.accumulated_dt);
        self.frame_dt = dt;

        while let Some(message) = self.messages.pop_front() {
            self.send_message_now(world, &message);
        }
        self.process_blackboard_changes(world);
        self.process_pending_unregister(world);

        // Aux nodes tick before the search so they can still queue requests.
        let mut next_needed = f32::MAX;
        for aux in self.active_aux_nodes() {
            if self.is_aux_node_active(aux) {
                self.tick_aux_node(world, aux, dt, &mut next_needed);
            }
        }

        let mut aux_delta_dirty = false;
        if self.requested_flow_update {
            self.process_execution_request(world);
            aux_delta_dirty = true;
            next_needed = f32::MAX;
        }

        if self.running && !self.paused && !self.stack.is_empty() {
            self.stop_lock |= LOCK_TICK;
            self.tick_tasks(world, dt, &mut next_needed);
            self.stop_lock &= !LOCK_TICK;

            if self.deferred_stop {
                self.deferred_stop = false;
                self.stop_tree(world, StopMode::Safe);
            }
        } else if self.deferred_stop && self.stop_lock == 0 {
            self.deferred_stop = false;
            self.stop_tree(world, StopMode::Safe);
        }
        if self.start_info.as_ref().is_some_and(|info| info.pending_initialize)
            && !self.waiting_for_aborting_tasks
            && self.stop_lock == 0
        {
            self.process_pending_initialize(world);
        }

        if aux_delta_dirty {
            next_needed = next_needed.min(self.next_aux_delta());
        }
        if self.requested_flow_update || !self.messages.is_empty() || !self.pending_unregister.is_empty() {
            next_needed = 0.0;
        }
        self.next_tick_delta = next_needed;
        next_needed
    }

    fn tick_tasks(&mut self, world: &mut W, dt: f32, next_needed: &mut f32) {
        let parallel: Vec<(NodeIndex, TaskStatus)> = self.parallel_tasks();
        for (task, status) in parallel {
            if status != TaskStatus::Active || self.task_status(task) != TaskStatus::Active {
                continue;
            }
            self.tick_task(world, task, dt, next_needed);
        }

        if let Some(inst) = self.stack.get(self.active_instance) {
            if matches!(inst.active_kind, ActiveNodeKind::ActiveTask | ActiveNodeKind::AbortingTask) {
                if let Some(task) = inst.active_node {
                    self.tick_task(world, NodeIndex::at(self.active_instance, task), dt, next_needed);
                }
            }
        }

        // A task of a subtree the search already left may still be aborting.
        let last = self.stack.len().saturating_sub(1);
        if last > self.active_instance {
            let inst = &self.stack[last];
            if inst.active_kind == ActiveNodeKind::AbortingTask {
                if let Some(task) = inst.active_node {
                    self.tick_task(world, NodeIndex::at(last, task), dt, next_needed);
                }
            }
        }
    }

    fn tick_task(&mut self, world: &mut W, task: NodeIndex, dt: f32, next_needed: &mut f32) {
        let Some(object) = self.task_object(task) else {
            return;
        };
        if object.wants_tick() {
            object.tick_task(&mut self.cx(world, task), dt);
            *next_needed = 0.0;
        }
    }

    /// Re-checks every active decorator observing a blackboard key that
    /// changed since the last call.
    pub fn process_blackboard_changes(&mut self, world: &mut W) {
        let keys = self.blackboard.take_notifications();
        if keys.is_empty() {
            return;
        }
        for aux in self.active_aux_nodes() {
            if !self.is_aux_node_active(aux) {
                continue;
            }
            let Some(AuxObject::Decorator(object)) = self.aux_object(aux) else {
                continue;
            };
            if keys.iter().any(|key| object.observes_key(*key)) {
                tracing::trace!(decorator = %aux, "Observed blackboard key changed");
                self.conditional_flow_abort(world, aux, object.abort_request());
            }
        }
    }
}
