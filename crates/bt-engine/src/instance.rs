//! Execution stack entries and persistent subtree identities.

use std::rc::Rc;

use bt_core::WorldMut;

use crate::index::NodeIndex;
use crate::memory::InstanceMemory;
use crate::node::NodeObject;
use crate::tree::{BehaviorTree, TreeId};
use crate::types::{ActiveNodeKind, TaskStatus};

/// A task running next to the primary active node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParallelTask {
    pub task: u16,
    pub status: TaskStatus,
}

/// One running copy of a tree asset on the execution stack.
pub(crate) struct SubtreeInstance<W: WorldMut + 'static> {
    pub tree: Rc<BehaviorTree<W>>,
    /// Entry in the component's known-instance list.
    pub known: usize,
    pub active_node: Option<u16>,
    pub active_kind: ActiveNodeKind,
    /// Active aux nodes in activation order.
    pub active_aux: Vec<u16>,
    pub parallel_tasks: Vec<ParallelTask>,
    pub memory: InstanceMemory,
    /// Task in the instance below that pushed this one.
    pub origin: Option<NodeIndex>,
}

impl<W: WorldMut + 'static> SubtreeInstance<W> {
    pub fn new(tree: Rc<BehaviorTree<W>>, known: usize, memory: InstanceMemory) -> Self {
        Self {
            tree,
            known,
            active_node: None,
            active_kind: ActiveNodeKind::Composite,
            active_aux: Vec::new(),
            parallel_tasks: Vec::new(),
            memory,
            origin: None,
        }
    }

    pub fn is_aux_active(&self, aux: u16) -> bool {
        self.active_aux.contains(&aux)
    }

    pub fn add_active_aux(&mut self, aux: u16) {
        if !self.is_aux_active(aux) {
            self.active_aux.push(aux);
        }
    }

    pub fn remove_active_aux(&mut self, aux: u16) {
        self.active_aux.retain(|a| *a != aux);
    }

    pub fn add_parallel_task(&mut self, task: u16) {
        match self.parallel_tasks.iter_mut().find(|p| p.task == task) {
            Some(entry) => entry.status = TaskStatus::Active,
            None => self.parallel_tasks.push(ParallelTask {
                task,
                status: TaskStatus::Active,
            }),
        }
    }

    pub fn remove_parallel_task(&mut self, task: u16) {
        self.parallel_tasks.retain(|p| p.task != task);
    }

    pub fn set_parallel_status(&mut self, task: u16, status: TaskStatus) {
        if let Some(entry) = self.parallel_tasks.iter_mut().find(|p| p.task == task) {
            entry.status = status;
        }
    }

    pub fn parallel_status(&self, task: u16) -> Option<TaskStatus> {
        self.parallel_tasks
            .iter()
            .find(|p| p.task == task)
            .map(|p| p.status)
    }

    /// Whether `execution` is the running task, an active parallel task or
    /// an active aux node of this instance.
    pub fn has_active_node(&self, execution: u16) -> bool {
        if self.active_node == Some(execution) {
            return self.active_kind == ActiveNodeKind::ActiveTask;
        }
        if let Some(status) = self.parallel_status(execution) {
            return status == TaskStatus::Active;
        }
        self.is_aux_active(execution)
    }
}

/// Persistent identity of a subtree: asset plus the path of task indices it
/// was entered through. Re-entering the same path restores its memory.
pub(crate) struct KnownInstance<W: WorldMut + 'static> {
    pub tree_id: TreeId,
    pub path: Vec<u16>,
    /// Saved memory; `None` until first pushed or after being destroyed.
    pub memory: Option<InstanceMemory>,
    /// Per-agent objects of instanced nodes, indexed by execution index.
    pub nodes: Vec<Option<NodeObject<W>>>,
}

impl<W: WorldMut + 'static> KnownInstance<W> {
    pub fn new(tree_id: TreeId, path: Vec<u16>) -> Self {
        Self {
            tree_id,
            path,
            memory: None,
            nodes: Vec::new(),
        }
    }

    /// Creates objects for every instanced node of `tree` that has none yet.
    pub fn instantiate_nodes(&mut self, tree: &BehaviorTree<W>) {
        if self.nodes.len() != tree.nodes.len() {
            self.nodes = (0..tree.nodes.len()).map(|_| None).collect();
        }
        for (slot, def) in self.nodes.iter_mut().zip(&tree.nodes) {
            if slot.is_none() && def.is_instanced() {
                *slot = def.instantiate();
            }
        }
    }
}
