//! Priority ordering of nodes across the execution stack.

use std::fmt;

/// Execution index of every tree's root composite.
pub(crate) const ROOT: u16 = 0;

/// Position of a node on the execution stack: `(subtree instance, execution index)`.
///
/// The derived ordering is the priority order: a lower instance position
/// always outranks any node of a higher one, and within one instance the
/// lower execution index wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex {
    pub instance: u16,
    pub execution: u16,
}

impl NodeIndex {
    pub const UNSET: NodeIndex = NodeIndex {
        instance: u16::MAX,
        execution: u16::MAX,
    };

    pub const fn new(instance: u16, execution: u16) -> Self {
        Self {
            instance,
            execution,
        }
    }

    /// Builds an index from a stack position, saturating out-of-range values.
    pub fn at(instance: usize, execution: u16) -> Self {
        Self::new(u16::try_from(instance).unwrap_or(u16::MAX), execution)
    }

    pub fn is_set(&self) -> bool {
        self.instance < u16::MAX
    }

    pub fn takes_priority_over(&self, other: &NodeIndex) -> bool {
        self < other
    }

    pub fn instance_pos(&self) -> usize {
        usize::from(self.instance)
    }
}

impl Default for NodeIndex {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}:{}", self.instance, self.execution)
        } else {
            f.write_str("unset")
        }
    }
}

/// Inclusive range of execution indices inside one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIndexRange {
    pub from: NodeIndex,
    pub to: NodeIndex,
}

impl NodeIndexRange {
    pub fn new(from: NodeIndex, to: NodeIndex) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, index: NodeIndex) -> bool {
        index.instance == self.from.instance
            && self.from.execution <= index.execution
            && index.execution <= self.to.execution
    }
}

/// Child position stored in composite memory and returned by child selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildSlot {
    /// The composite has not picked a child since its last activation.
    #[default]
    NotInitialized,
    /// Leave the composite and continue in its parent.
    ReturnToParent,
    Child(usize),
}

impl ChildSlot {
    pub fn index(self) -> Option<usize> {
        match self {
            ChildSlot::Child(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn is_child(self) -> bool {
        matches!(self, ChildSlot::Child(_))
    }
}
