use serde::{Deserialize, Serialize};

/// Outcome of executing or aborting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeResult {
    Succeeded,
    Failed,
    Aborted,
    InProgress,
}

impl NodeResult {
    pub fn is_finished(self) -> bool {
        !matches!(self, NodeResult::InProgress)
    }

    pub(crate) fn trace_code(self) -> u64 {
        match self {
            NodeResult::Succeeded => 0,
            NodeResult::Failed => 1,
            NodeResult::Aborted => 2,
            NodeResult::InProgress => 3,
        }
    }
}

/// Which part of the tree a decorator's condition change may interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowAbortMode {
    #[default]
    None,
    /// Interrupt lower priority branches when the condition starts passing.
    LowerPriority,
    /// Leave the decorated branch when the condition stops passing.
    SelfBranch,
    Both,
}

/// When an observing decorator re-requests execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortRequest {
    /// Only on a passing/failing edge relative to the executing branch.
    #[default]
    ResultChanged,
    /// Also restart an executing branch whenever the condition re-checks as passing.
    ConditionPassing,
}

/// Status of a task as seen by the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Active,
    Aborting,
    Inactive,
}

/// What the active node slot of a subtree instance currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveNodeKind {
    /// A composite that has not descended into a task yet.
    #[default]
    Composite,
    ActiveTask,
    AbortingTask,
    /// A task that was superseded, for example by becoming a parallel task.
    InactiveTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Wait for latent aborts to finish before tearing down.
    Safe,
    /// Tear down immediately.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleRun,
    #[default]
    Looped,
}

/// Whether a search update activates or deactivates a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeUpdateMode {
    Add,
    Remove,
}

/// One step of a decorator logic expression on a child edge.
///
/// `Test` evaluates the decorator at the given position in the edge's
/// decorator list. `And`/`Or` consume the given number of operands and `Not`
/// consumes exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorLogic {
    Test(usize),
    And(usize),
    Or(usize),
    Not,
}
