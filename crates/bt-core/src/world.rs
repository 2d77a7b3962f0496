use crate::AgentId;

/// Read access to whatever the host simulation exposes to tree nodes.
///
/// Nodes receive the world on every callback; the engine itself never looks
/// inside it.
pub trait WorldView {
    type Agent: AgentId;
}

/// Mutable world access handed to task, decorator and service callbacks.
pub trait WorldMut: WorldView {}
