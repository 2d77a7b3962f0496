use core::fmt::Debug;

/// Stable identifier for the agent that owns a behavior tree component.
///
/// `stable_id` feeds per-agent seeding (service jitter) and log fields, so it
/// must not change for the lifetime of the agent.
pub trait AgentId: Copy + Ord + Eq + Debug {
    fn stable_id(self) -> u64;
}

impl AgentId for u64 {
    fn stable_id(self) -> u64 {
        self
    }
}

impl AgentId for u32 {
    fn stable_id(self) -> u64 {
        u64::from(self)
    }
}

impl AgentId for usize {
    fn stable_id(self) -> u64 {
        self as u64
    }
}
