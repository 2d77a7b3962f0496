//! The per-tick request accumulator and the resolved next task.

use crate::index::NodeIndex;
use crate::types::NodeResult;

/// Dominant pending re-evaluation. Every call site merges into this one
/// record; the component resolves it once per flow update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Composite to resume the search from, as `(instance, execution)`.
    pub execute_node: Option<NodeIndex>,
    /// First index the search may accept.
    pub search_start: NodeIndex,
    /// The found task must outrank this index.
    pub search_end: NodeIndex,
    pub continue_with_result: NodeResult,
    /// Continue with the next child instead of restarting at `search_start`.
    pub try_next_child: bool,
    /// Raised by something other than the active node.
    pub is_restart: bool,
}

impl Default for ExecutionRequest {
    fn default() -> Self {
        Self {
            execute_node: None,
            search_start: NodeIndex::UNSET,
            search_end: NodeIndex::UNSET,
            continue_with_result: NodeResult::Succeeded,
            try_next_child: false,
            is_restart: false,
        }
    }
}

impl ExecutionRequest {
    pub fn is_set(&self) -> bool {
        self.execute_node.is_some()
    }

    pub fn execute_instance(&self) -> Option<u16> {
        self.execute_node.map(|node| node.instance)
    }
}

/// Task picked by a finished search, waiting for aborts to complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PendingExecution {
    pub next_task: Option<NodeIndex>,
    pub out_of_nodes: bool,
    pub locked: bool,
}

impl PendingExecution {
    /// A locked slot counts as empty until the search that locked it ends.
    pub fn is_set(&self) -> bool {
        (self.next_task.is_some() || self.out_of_nodes) && !self.locked
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_pending_execution_is_not_set() {
        let mut pending = PendingExecution {
            next_task: Some(NodeIndex::new(0, 4)),
            ..PendingExecution::default()
        };
        assert!(pending.is_set());
        pending.lock();
        assert!(!pending.is_set());
        assert!(pending.is_locked());
        pending.unlock();
        assert!(pending.is_set());
    }

    #[test]
    fn default_request_has_open_bounds() {
        let request = ExecutionRequest::default();
        assert!(!request.is_set());
        assert!(!request.search_start.is_set());
        assert!(NodeIndex::new(40, 9).takes_priority_over(&request.search_end));
    }
}
