//! Request arbitration.
//!
//! Every reason to re-evaluate the tree ends up in `request_execution_on`,
//! which merges it into the single pending [`crate::ExecutionRequest`]. The
//! request with the highest priority start index wins; the others only widen
//! or clear its end bound.

use bt_core::WorldMut;

use super::BehaviorTreeComponent;
use crate::index::{NodeIndex, NodeIndexRange, ROOT};
use crate::tree::BehaviorTree;
use crate::types::{AbortRequest, ActiveNodeKind, FlowAbortMode, NodeResult};

impl<W: WorldMut + 'static> BehaviorTreeComponent<W> {
    /// Whether the branch below child edge `child` of `node`'s parent is the
    /// one executing. `node` is the decorator or child node on that edge.
    pub fn is_executing_branch(&self, node: NodeIndex, child: usize) -> bool {
        let Some(inst) = self.stack.get(node.instance_pos()) else {
            return false;
        };
        let Some(active) = inst.active_node else {
            return false;
        };
        if node.execution == ROOT || node.execution == active {
            return true;
        }
        let Some(parent) = inst.tree.parent_of(node.execution) else {
            return false;
        };
        let next_child = inst.tree.child_node_index(parent, child + 1);
        active >= node.execution && active < next_child
    }

    pub(crate) fn schedule_next_tick(&mut self, delta: f32) {
        self.next_tick_delta = delta;
    }

    pub(crate) fn schedule_execution_update(&mut self) {
        self.schedule_next_tick(0.0);
        self.requested_flow_update = true;
    }

    /// Asks for a search that continues after the active node, as if it
    /// finished with `result`.
    pub(crate) fn request_execution_with_result(&mut self, world: &mut W, result: NodeResult) {
        if matches!(result, NodeResult::Aborted | NodeResult::InProgress) {
            return;
        }
        let Some(inst) = self.stack.get(self.active_instance) else {
            return;
        };
        let parent = match inst.active_node {
            None => ROOT,
            Some(node) if inst.active_kind == ActiveNodeKind::Composite => node,
            Some(node) => inst.tree.parent_of(node).unwrap_or(ROOT),
        };
        let requested_by = inst.active_node.unwrap_or(ROOT);
        let instance = self.stack.len() - 1;
        self.request_execution_on(world, parent, instance, requested_by, None, result);
    }

    /// Requests a search on behalf of a decorator, scoped by its abort mode.
    pub(crate) fn request_execution_by_decorator(&mut self, world: &mut W, decorator: NodeIndex) {
        let Some(object) = self.decorator_object(decorator) else {
            return;
        };
        let Some(tree) = self.tree_at(decorator.instance_pos()) else {
            return;
        };
        let Some(def) = tree.node(decorator.execution) else {
            return;
        };
        let (Some(parent), Some(child)) = (def.parent, def.child_index) else {
            return;
        };

        let mode = match object.flow_abort_mode() {
            FlowAbortMode::None => return,
            FlowAbortMode::Both if self.is_executing_branch(decorator, child) => FlowAbortMode::SelfBranch,
            FlowAbortMode::Both => FlowAbortMode::LowerPriority,
            mode => mode,
        };
        let result = if mode == FlowAbortMode::SelfBranch {
            NodeResult::Failed
        } else {
            NodeResult::Aborted
        };
        self.request_execution_on(
            world,
            parent,
            decorator.instance_pos(),
            decorator.execution,
            Some(child),
            result,
        );
    }

    /// Re-checks a decorator and requests whatever its new state calls for.
    pub(crate) fn conditional_flow_abort(&mut self, world: &mut W, decorator: NodeIndex, request: AbortRequest) {
        let Some(object) = self.decorator_object(decorator) else {
            return;
        };
        if object.flow_abort_mode() == FlowAbortMode::None {
            return;
        }
        let Some(tree) = self.tree_at(decorator.instance_pos()) else {
            return;
        };
        let Some(def) = tree.node(decorator.execution) else {
            return;
        };
        let (Some(parent), Some(child)) = (def.parent, def.child_index) else {
            return;
        };

        let executing = self.is_executing_branch(decorator, child);
        let passes = self.decorator_passes(world, decorator);
        let abort_pending = self.is_abort_pending();

        if executing != passes {
            self.request_execution_by_decorator(world, decorator);
        } else if !executing && !passes {
            if let Some(edge) = tree.composite(parent).and_then(|c| c.children.get(child)) {
                if !edge.is_task {
                    self.request_unregister_aux_in_branch(NodeIndex::new(decorator.instance, edge.node));
                }
            }
        } else if executing && passes && (request == AbortRequest::ConditionPassing || abort_pending) {
            self.request_execution_on(
                world,
                parent,
                decorator.instance_pos(),
                decorator.execution,
                Some(child),
                NodeResult::Aborted,
            );
        }
    }

    /// Deactivates every aux node below `composite` at the start of the next tick.
    pub(crate) fn request_unregister_aux_in_branch(&mut self, composite: NodeIndex) {
        let Some(last) = self
            .tree_at(composite.instance_pos())
            .and_then(|tree| tree.composite(composite.execution).map(|def| def.last_execution_index))
        else {
            return;
        };
        let range = NodeIndexRange::new(composite, NodeIndex::new(composite.instance, last));
        if !self.pending_unregister.contains(&range) {
            self.pending_unregister.push(range);
        }
        self.schedule_next_tick(0.0);
    }

    /// Merges a request to resume the search at composite `on` of stack
    /// position `instance`, raised by node `requested_by` on child edge `child`.
    ///
    /// `Aborted` switches to a higher priority branch starting at `child`;
    /// any other result continues with the next child.
    pub(crate) fn request_execution_on(
        &mut self,
        world: &mut W,
        on: u16,
        instance: usize,
        requested_by: u16,
        child: Option<usize>,
        result: NodeResult,
    ) {
        if !self.running || self.active_instance >= self.stack.len() {
            return;
        }
        if self.requested_stop {
            tracing::debug!("Ignoring request while the tree is stopping");
            return;
        }
        if self.pending.is_set() && self.pending.out_of_nodes {
            tracing::debug!("Ignoring request while the tree finishes");
            return;
        }
        let Some(tree) = self.tree_at(instance) else {
            return;
        };

        let switch_to_higher = result == NodeResult::Aborted;
        let had_request = self.request.is_set();
        let mut exec_index = NodeIndex::at(instance, requested_by);
        let mut last_execution = u16::MAX;

        if self.pending_unregister.iter().any(|range| range.contains(exec_index)) {
            tracing::debug!(%exec_index, "Ignoring request from a branch being unregistered");
            return;
        }

        if switch_to_higher {
            if let Some(child) = child {
                exec_index.execution = tree.child_first_index(on, child);
                last_execution = tree.child_first_index(on, child + 1);
            }
        }
        let search_end = NodeIndex::at(instance, last_execution);

        if had_request && self.request.search_start.takes_priority_over(&exec_index) {
            tracing::debug!(%exec_index, start = %self.request.search_start, "Merging into higher priority request");
            if switch_to_higher {
                if self.request.search_end.is_set() && self.request.search_end.takes_priority_over(&search_end) {
                    self.request.search_end = search_end;
                }
            } else if self.request.search_end.is_set() {
                self.request.search_end = NodeIndex::UNSET;
            }
            return;
        }

        if self.search.filter_out_from_deactivated || self.waiting_for_aborting_tasks {
            let root = self.search.search_root;
            if root != exec_index && root.takes_priority_over(&exec_index) {
                let start = self.search.deactivated_start;
                let end = self.search.deactivated_end;
                if exec_index == start
                    || (start.takes_priority_over(&exec_index) && exec_index.takes_priority_over(&end))
                {
                    tracing::debug!(%exec_index, "Ignoring request from a deactivated branch");
                    return;
                }
            }
        }

        let requested_on = NodeIndex::at(instance, on);
        if switch_to_higher {
            if let Some(child) = child {
                let by = NodeIndex::at(instance, requested_by);
                if !self.is_executing_branch(by, child)
                    && !self.decorators_allow_execution(world, on, instance, child)
                {
                    return;
                }
            }

            let current = match self.request.execute_node {
                Some(node) => node,
                None => {
                    let Some(active) = self.stack.get(self.active_instance) else {
                        return;
                    };
                    let node = match active.active_node {
                        None => ROOT,
                        Some(node) if active.tree.node(node).is_some_and(|def| def.is_composite()) => node,
                        Some(node) => active.tree.parent_of(node).unwrap_or(ROOT),
                    };
                    NodeIndex::at(self.active_instance, node)
                }
            };

            if self.request.execute_node != Some(requested_on) {
                let Some(common) = self.find_common_parent(requested_on, current) else {
                    tracing::error!(
                        on = %requested_on,
                        current = %current,
                        "No common parent between requested and executing node, restarting tree"
                    );
                    self.restart_tree(world);
                    return;
                };

                // Every decorator between the request and the common parent must pass.
                let mut it_instance = instance;
                let mut it = Some(on);
                while let Some(node) = it {
                    if NodeIndex::at(it_instance, node) == common {
                        break;
                    }
                    let Some(it_tree) = self.tree_at(it_instance) else {
                        break;
                    };
                    let (parent, child_index) = match it_tree.parent_of(node) {
                        Some(parent) => (parent, it_tree.child_index(parent, node)),
                        None if it_instance > 0 => {
                            it_instance -= 1;
                            let Some(below) = self.stack.get(it_instance) else {
                                break;
                            };
                            let Some(origin) = below.active_node else {
                                break;
                            };
                            let Some(parent) = below.tree.parent_of(origin) else {
                                break;
                            };
                            (parent, below.tree.child_index(parent, origin))
                        }
                        None => break,
                    };
                    if let Some(child_index) = child_index {
                        if !self.decorators_allow_execution(world, parent, it_instance, child_index) {
                            return;
                        }
                    }
                    it = Some(parent);
                }

                self.request.execute_node = Some(common);
            }
        } else {
            let gated = child.is_some_and(|child| {
                tree.composite(on)
                    .and_then(|def| def.children.get(child))
                    .is_some_and(|edge| !edge.decorator_ops.is_empty())
            }) && tree.node(requested_by).is_some_and(|def| def.is_decorator());
            if let Some(child) = child.filter(|_| gated) {
                if self.decorators_allow_execution(world, on, instance, child) {
                    return;
                }
            }
            self.request.execute_node = Some(requested_on);
        }

        if (!had_request && switch_to_higher)
            || (self.request.search_end.is_set() && self.request.search_end.takes_priority_over(&search_end))
        {
            self.request.search_end = search_end;
        }

        self.request.search_start = exec_index;
        self.request.continue_with_result = result;
        self.request.try_next_child = !switch_to_higher;
        self.request.is_restart = !(instance == self.active_instance
            && self.stack.get(self.active_instance).and_then(|inst| inst.active_node) == Some(requested_by));
        self.pending.lock();

        tracing::debug!(
            instance,
            execution = requested_by,
            start = %self.request.search_start,
            end = %self.request.search_end,
            ?result,
            "Execution request"
        );
        self.emit("bt.request", instance, requested_by);

        if self.search.search_in_progress {
            self.search.postpone_search = true;
        }

        let last_aborting = self
            .stack
            .last()
            .is_some_and(|inst| inst.active_kind == ActiveNodeKind::AbortingTask);
        if self.waiting_for_aborting_tasks || last_aborting {
            if self.request.search_end.is_set() {
                self.request.search_end = NodeIndex::UNSET;
            }
            self.rollback_search_changes();
        }

        if !self.waiting_for_aborting_tasks {
            self.schedule_execution_update();
        }
    }

    /// Lowest composite shared by the paths to two composites.
    pub(crate) fn find_common_parent(&self, a: NodeIndex, b: NodeIndex) -> Option<NodeIndex> {
        let common_instance = a.instance.min(b.instance);
        let inst = self.stack.get(usize::from(common_instance))?;
        let tree = &inst.tree;
        let project = |node: NodeIndex| -> u16 {
            if node.instance == common_instance {
                node.execution
            } else {
                inst.active_node
                    .and_then(|active| tree.parent_of(active))
                    .unwrap_or(ROOT)
            }
        };

        let mut node_a = project(a);
        let mut node_b = project(b);
        let depth = |tree: &BehaviorTree<W>, node: u16| tree.node(node).map(|def| def.depth);
        let mut depth_a = depth(tree, node_a)?;
        let mut depth_b = depth(tree, node_b)?;

        while depth_a > depth_b {
            node_a = tree.parent_of(node_a)?;
            depth_a = depth(tree, node_a)?;
        }
        while depth_b > depth_a {
            node_b = tree.parent_of(node_b)?;
            depth_b = depth(tree, node_b)?;
        }
        while node_a != node_b {
            node_a = tree.parent_of(node_a)?;
            node_b = tree.parent_of(node_b)?;
        }
        Some(NodeIndex::new(common_instance, node_a))
    }
}
