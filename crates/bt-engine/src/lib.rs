//! Behavior tree execution and search engine built on `bt-core`.
//!
//! Trees are built once with a [`TreeBuilder`], shared through a
//! [`TreeLoader`], and run per agent by a [`BehaviorTreeComponent`]. The
//! component keeps a stack of subtree instances and resolves every reason to
//! re-evaluate the tree (a finished task, a decorator whose condition
//! changed, a message) into one prioritized search per tick.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod builder;
pub mod component;
pub mod composites;
pub mod config;
pub mod context;
pub mod cooldown;
pub mod error;
pub mod index;
mod instance;
pub mod loader;
pub mod memory;
pub mod message;
pub mod node;
pub mod request;
pub mod search;
pub mod tasks;
pub mod tree;
pub mod types;

pub use builder::{Child, Composite, Decorator, Service, Task, TreeBuilder};
pub use component::BehaviorTreeComponent;
pub use composites::{ParallelFinishMode, Selector, Sequence, SimpleParallel};
pub use config::{EngineConfig, ServiceDefaults};
pub use context::NodeCx;
pub use cooldown::CooldownMap;
pub use error::{BtError, Result};
pub use index::{ChildSlot, NodeIndex, NodeIndexRange};
pub use loader::{TreeLoader, TreeManager};
pub use memory::{InstanceMemory, MemoryBlock, MemoryHandle};
pub use message::{AiMessage, RequestId};
pub use node::{
    AuxiliaryNode, Binding, BtNode, ChildShape, CompositeNode, DecoratorNode, ServiceNode, TaskNode,
};
pub use request::ExecutionRequest;
pub use search::{SearchUpdate, UpdateTarget};
pub use tasks::{RunSubtree, RunSubtreeDynamic};
pub use tree::{BehaviorTree, ServiceTiming, TreeId};
pub use types::{
    AbortRequest, ActiveNodeKind, DecoratorLogic, ExecutionMode, FlowAbortMode, NodeResult, NodeUpdateMode,
    StopMode, TaskStatus,
};
