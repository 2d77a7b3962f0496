//! Transient state of one search pass.

use crate::index::NodeIndex;
use crate::types::{NodeResult, NodeUpdateMode};

/// Which node a [`SearchUpdate`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// A decorator or service entering or leaving the active aux set.
    Aux(u16),
    /// A task entering or leaving the parallel task list.
    ParallelTask(u16),
}

impl UpdateTarget {
    pub fn execution(self) -> u16 {
        match self {
            UpdateTarget::Aux(idx) | UpdateTarget::ParallelTask(idx) => idx,
        }
    }
}

/// Deferred activation change collected while searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchUpdate {
    pub target: UpdateTarget,
    pub instance: u16,
    pub mode: NodeUpdateMode,
    /// Applied in the second pass, after every non-post update.
    pub post: bool,
}

impl SearchUpdate {
    pub fn aux(aux: u16, instance: u16, mode: NodeUpdateMode) -> Self {
        Self {
            target: UpdateTarget::Aux(aux),
            instance,
            mode,
            post: false,
        }
    }

    pub fn parallel_task(task: u16, instance: u16, mode: NodeUpdateMode) -> Self {
        Self {
            target: UpdateTarget::ParallelTask(task),
            instance,
            mode,
            post: false,
        }
    }

    pub fn index(&self) -> NodeIndex {
        NodeIndex::new(self.instance, self.target.execution())
    }
}

/// A subtree instance left during the search, reported to its origin task
/// once the search is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchNotify {
    pub instance: u16,
    pub result: NodeResult,
}

/// Rollback point taken when a search starts.
///
/// The memory snapshot itself lives in the known-instance store; this keeps
/// the stack bookkeeping needed to undo the search.
#[derive(Debug, Clone, Default)]
pub(crate) struct SearchTransaction {
    pub active_instance: usize,
    pub deactivated_start: NodeIndex,
    pub deactivated_end: NodeIndex,
    pub active_nodes: Vec<Option<u16>>,
}

#[derive(Debug, Default)]
pub(crate) struct SearchData {
    pub pending_updates: Vec<SearchUpdate>,
    pub pending_notifies: Vec<SearchNotify>,
    pub search_root: NodeIndex,
    pub search_start: NodeIndex,
    pub search_end: NodeIndex,
    pub deactivated_start: NodeIndex,
    pub deactivated_end: NodeIndex,
    pub transaction: Option<SearchTransaction>,
    /// Keep the memory of aborting active nodes when rolling back.
    pub preserve_active_node_memory: bool,
    pub filter_out_from_deactivated: bool,
    pub search_in_progress: bool,
    pub postpone_search: bool,
}

impl SearchData {
    /// Queues an update unless the same one is already queued. An opposite
    /// update for the same node cancels the queued one and the new one.
    /// `drop_new` discards the update when nothing cancelled, which callers
    /// use for removals of aux nodes that are not active.
    pub fn add_unique_update(&mut self, update: SearchUpdate, drop_new: bool) -> bool {
        if let Some(pos) = self
            .pending_updates
            .iter()
            .position(|u| u.target == update.target && u.instance == update.instance)
        {
            if self.pending_updates[pos].mode != update.mode {
                self.pending_updates.remove(pos);
            }
            return false;
        }
        if drop_new {
            return false;
        }
        self.pending_updates.push(update);
        true
    }

    /// Drops queued additions strictly between `from` and `to`.
    pub fn drop_pending_adds_between(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pending_updates.retain(|u| {
            let idx = u.index();
            !(u.mode == NodeUpdateMode::Add
                && from.takes_priority_over(&idx)
                && idx.takes_priority_over(&to))
        });
    }

    pub fn drop_pending_adds_of_instance(&mut self, instance: u16) {
        self.pending_updates
            .retain(|u| !(u.instance == instance && u.mode == NodeUpdateMode::Add));
    }

    pub fn reset(&mut self) {
        self.pending_updates.clear();
        self.pending_notifies.clear();
        self.search_root = NodeIndex::UNSET;
        self.search_start = NodeIndex::UNSET;
        self.search_end = NodeIndex::UNSET;
        self.deactivated_start = NodeIndex::UNSET;
        self.deactivated_end = NodeIndex::UNSET;
        self.transaction = None;
        self.preserve_active_node_memory = false;
        self.filter_out_from_deactivated = false;
        self.search_in_progress = false;
        self.postpone_search = false;
    }
}
