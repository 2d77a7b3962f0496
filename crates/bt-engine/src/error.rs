use thiserror::Error;

use crate::tree::TreeId;

/// Errors from building trees and entering subtrees.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BtError {
    #[error("tree asset {0} is not registered")]
    MissingTree(TreeId),

    #[error("blackboard is not compatible with tree {tree} (requires schema {schema})")]
    IncompatibleBlackboard { tree: TreeId, schema: String },

    #[error("parent composite refused to push subtree {0}")]
    PushRefused(TreeId),

    #[error("execution stack is full ({depth} instances), cannot push {tree}")]
    StackDepthExceeded { tree: TreeId, depth: usize },

    #[error("too many known subtree instances ({0})")]
    TooManyInstances(usize),

    #[error("invalid tree {tree}: {reason}")]
    InvalidTree { tree: TreeId, reason: String },

    #[error("tree {0} exceeds the execution index range")]
    TooManyNodes(TreeId),
}

pub type Result<T> = std::result::Result<T, BtError>;
