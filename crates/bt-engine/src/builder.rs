//! Declarative tree construction.
//!
//! The builder walks the declared tree once, assigns execution indices in
//! pre-order and lays out the per-instance memory arena.
//!
//! Order inside a composite: the composite itself, its services, then for
//! every child the child's decorators followed by either the child composite
//! (recursively) or the child task's services and the task.

use std::borrow::Cow;
use std::rc::Rc;
use std::sync::Arc;

use bt_core::{BlackboardSchema, WorldMut};

use crate::composites::{ParallelFinishMode, Selector, Sequence, SimpleParallel};
use crate::config::ServiceDefaults;
use crate::error::{BtError, Result};
use crate::memory::{AuxMemory, CompositeMemory, InstanceMemory};
use crate::node::{Binding, ChildShape, CompositeNode, DecoratorNode, ServiceNode, TaskNode};
use crate::tree::{
    BehaviorTree, ChildDef, CompositeDef, NodeDef, NodeKind, ServiceDef, ServiceTiming, TaskDef,
    TreeId,
};
use crate::types::DecoratorLogic;

pub struct Composite<W: WorldMut + 'static> {
    name: Cow<'static, str>,
    behavior: Binding<dyn CompositeNode<W>>,
    services: Vec<Service<W>>,
    children: Vec<Child<W>>,
    apply_decorator_scope: bool,
}

impl<W: WorldMut + 'static> Composite<W> {
    pub fn new<N: CompositeNode<W>>(name: impl Into<Cow<'static, str>>, node: N) -> Self {
        Self::with_binding(name, Binding::Shared(Rc::new(node) as Rc<dyn CompositeNode<W>>))
    }

    pub fn instanced<N, F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        N: CompositeNode<W>,
        F: Fn() -> N + 'static,
    {
        let template: Rc<dyn CompositeNode<W>> = Rc::new(factory());
        let factory: Rc<dyn Fn() -> Rc<dyn CompositeNode<W>>> =
            Rc::new(move || Rc::new(factory()) as Rc<dyn CompositeNode<W>>);
        Self::with_binding(name, Binding::Instanced { template, factory })
    }

    pub fn with_binding(
        name: impl Into<Cow<'static, str>>,
        behavior: Binding<dyn CompositeNode<W>>,
    ) -> Self {
        Self {
            name: name.into(),
            behavior,
            services: Vec::new(),
            children: Vec::new(),
            apply_decorator_scope: false,
        }
    }

    pub fn selector(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Selector)
    }

    pub fn sequence(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Sequence)
    }

    /// Runs `main` while repeatedly executing `background`.
    pub fn simple_parallel(
        name: impl Into<Cow<'static, str>>,
        finish_mode: ParallelFinishMode,
        main: Child<W>,
        background: Child<W>,
    ) -> Self {
        Self::new(name, SimpleParallel::new(finish_mode))
            .child(main)
            .child(background)
    }

    pub fn child(mut self, child: Child<W>) -> Self {
        self.children.push(child);
        self
    }

    pub fn task(self, task: Task<W>) -> Self {
        self.child(Child::task(task))
    }

    pub fn composite(self, composite: Composite<W>) -> Self {
        self.child(Child::composite(composite))
    }

    pub fn service(mut self, service: Service<W>) -> Self {
        self.services.push(service);
        self
    }

    /// Unregister every aux node of this branch when the search leaves it.
    pub fn apply_decorator_scope(mut self, enabled: bool) -> Self {
        self.apply_decorator_scope = enabled;
        self
    }
}

enum ChildNode<W: WorldMut + 'static> {
    Composite(Composite<W>),
    Task(Task<W>),
}

/// A child edge: optional decorators plus a composite or a task.
pub struct Child<W: WorldMut + 'static> {
    decorators: Vec<Decorator<W>>,
    logic: Vec<DecoratorLogic>,
    node: ChildNode<W>,
}

impl<W: WorldMut + 'static> Child<W> {
    pub fn task(task: Task<W>) -> Self {
        Self {
            decorators: Vec::new(),
            logic: Vec::new(),
            node: ChildNode::Task(task),
        }
    }

    pub fn composite(composite: Composite<W>) -> Self {
        Self {
            decorators: Vec::new(),
            logic: Vec::new(),
            node: ChildNode::Composite(composite),
        }
    }

    pub fn decorator(mut self, decorator: Decorator<W>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Combines the edge's decorators with a logic expression instead of
    /// requiring all of them to pass.
    pub fn logic(mut self, ops: impl IntoIterator<Item = DecoratorLogic>) -> Self {
        self.logic = ops.into_iter().collect();
        self
    }

    fn shape(&self) -> ChildShape {
        match self.node {
            ChildNode::Composite(_) => ChildShape::Composite,
            ChildNode::Task(_) => ChildShape::Task,
        }
    }
}

pub struct Task<W: WorldMut + 'static> {
    name: Cow<'static, str>,
    behavior: Binding<dyn TaskNode<W>>,
    services: Vec<Service<W>>,
}

impl<W: WorldMut + 'static> Task<W> {
    pub fn new<N: TaskNode<W>>(name: impl Into<Cow<'static, str>>, node: N) -> Self {
        Self::with_binding(name, Binding::Shared(Rc::new(node) as Rc<dyn TaskNode<W>>))
    }

    pub fn instanced<N, F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        N: TaskNode<W>,
        F: Fn() -> N + 'static,
    {
        let template: Rc<dyn TaskNode<W>> = Rc::new(factory());
        let factory: Rc<dyn Fn() -> Rc<dyn TaskNode<W>>> =
            Rc::new(move || Rc::new(factory()) as Rc<dyn TaskNode<W>>);
        Self::with_binding(name, Binding::Instanced { template, factory })
    }

    pub fn with_binding(name: impl Into<Cow<'static, str>>, behavior: Binding<dyn TaskNode<W>>) -> Self {
        Self {
            name: name.into(),
            behavior,
            services: Vec::new(),
        }
    }

    pub fn service(mut self, service: Service<W>) -> Self {
        self.services.push(service);
        self
    }
}

pub struct Decorator<W: WorldMut + 'static> {
    name: Cow<'static, str>,
    behavior: Binding<dyn DecoratorNode<W>>,
}

impl<W: WorldMut + 'static> Decorator<W> {
    pub fn new<N: DecoratorNode<W>>(name: impl Into<Cow<'static, str>>, node: N) -> Self {
        Self {
            name: name.into(),
            behavior: Binding::Shared(Rc::new(node) as Rc<dyn DecoratorNode<W>>),
        }
    }

    pub fn instanced<N, F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        N: DecoratorNode<W>,
        F: Fn() -> N + 'static,
    {
        let template: Rc<dyn DecoratorNode<W>> = Rc::new(factory());
        let factory: Rc<dyn Fn() -> Rc<dyn DecoratorNode<W>>> =
            Rc::new(move || Rc::new(factory()) as Rc<dyn DecoratorNode<W>>);
        Self {
            name: name.into(),
            behavior: Binding::Instanced { template, factory },
        }
    }
}

pub struct Service<W: WorldMut + 'static> {
    name: Cow<'static, str>,
    behavior: Binding<dyn ServiceNode<W>>,
    interval: Option<(f32, f32)>,
    call_tick_on_search_start: Option<bool>,
    restart_timer_on_activation: Option<bool>,
}

impl<W: WorldMut + 'static> Service<W> {
    pub fn new<N: ServiceNode<W>>(name: impl Into<Cow<'static, str>>, node: N) -> Self {
        Self::with_binding(name, Binding::Shared(Rc::new(node) as Rc<dyn ServiceNode<W>>))
    }

    pub fn instanced<N, F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        N: ServiceNode<W>,
        F: Fn() -> N + 'static,
    {
        let template: Rc<dyn ServiceNode<W>> = Rc::new(factory());
        let factory: Rc<dyn Fn() -> Rc<dyn ServiceNode<W>>> =
            Rc::new(move || Rc::new(factory()) as Rc<dyn ServiceNode<W>>);
        Self::with_binding(name, Binding::Instanced { template, factory })
    }

    pub fn with_binding(name: impl Into<Cow<'static, str>>, behavior: Binding<dyn ServiceNode<W>>) -> Self {
        Self {
            name: name.into(),
            behavior,
            interval: None,
            call_tick_on_search_start: None,
            restart_timer_on_activation: None,
        }
    }

    /// Tick every `interval` seconds, jittered by up to `random_deviation`.
    pub fn interval(mut self, interval: f32, random_deviation: f32) -> Self {
        self.interval = Some((interval.max(0.0), random_deviation.max(0.0)));
        self
    }

    pub fn tick_on_search_start(mut self, enabled: bool) -> Self {
        self.call_tick_on_search_start = Some(enabled);
        self
    }

    pub fn restart_timer_on_activation(mut self, enabled: bool) -> Self {
        self.restart_timer_on_activation = Some(enabled);
        self
    }

    fn timing(&self, defaults: ServiceTiming) -> ServiceTiming {
        let (interval, random_deviation) = self
            .interval
            .unwrap_or((defaults.interval, defaults.random_deviation));
        ServiceTiming {
            interval,
            random_deviation,
            call_tick_on_search_start: self
                .call_tick_on_search_start
                .unwrap_or(defaults.call_tick_on_search_start),
            restart_timer_on_activation: self
                .restart_timer_on_activation
                .unwrap_or(defaults.restart_timer_on_activation),
        }
    }
}

/// Compiles a declared tree into a [`BehaviorTree`].
pub struct TreeBuilder {
    id: TreeId,
    blackboard: Option<Arc<BlackboardSchema>>,
    service_defaults: ServiceTiming,
}

impl TreeBuilder {
    pub fn new(id: impl Into<TreeId>) -> Self {
        Self {
            id: id.into(),
            blackboard: None,
            service_defaults: ServiceDefaults::default().timing(),
        }
    }

    /// Blackboard schema the tree is authored against.
    pub fn blackboard(mut self, schema: Arc<BlackboardSchema>) -> Self {
        self.blackboard = Some(schema);
        self
    }

    pub fn service_defaults(mut self, defaults: &ServiceDefaults) -> Self {
        self.service_defaults = defaults.timing();
        self
    }

    pub fn build<W: WorldMut + 'static>(self, root: Composite<W>) -> Result<BehaviorTree<W>> {
        let mut assembler = Assembler {
            tree: self.id.clone(),
            nodes: Vec::new(),
            memory: InstanceMemory::default(),
            injection_tags: Vec::new(),
            service_defaults: self.service_defaults,
        };
        assembler.add_composite(root, None, None, 0)?;

        let nodes = assembler
            .nodes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BtError::InvalidTree {
                tree: self.id.clone(),
                reason: "unassigned execution index".to_string(),
            })?;

        tracing::debug!(
            tree = %self.id,
            nodes = nodes.len(),
            memory_slots = assembler.memory.len(),
            "Built behavior tree"
        );

        Ok(BehaviorTree {
            id: self.id,
            nodes,
            blackboard: self.blackboard,
            memory: assembler.memory,
            injection_tags: assembler.injection_tags,
        })
    }
}

struct Assembler<W: WorldMut + 'static> {
    tree: TreeId,
    nodes: Vec<Option<NodeDef<W>>>,
    memory: InstanceMemory,
    injection_tags: Vec<String>,
    service_defaults: ServiceTiming,
}

impl<W: WorldMut + 'static> Assembler<W> {
    fn reserve(&mut self) -> Result<u16> {
        let idx = u16::try_from(self.nodes.len())
            .ok()
            .filter(|idx| *idx < u16::MAX - 1)
            .ok_or_else(|| BtError::TooManyNodes(self.tree.clone()))?;
        self.nodes.push(None);
        Ok(idx)
    }

    fn invalid(&self, reason: String) -> BtError {
        BtError::InvalidTree {
            tree: self.tree.clone(),
            reason,
        }
    }

    fn add_composite(
        &mut self,
        decl: Composite<W>,
        parent: Option<u16>,
        child_index: Option<usize>,
        depth: u16,
    ) -> Result<u16> {
        let idx = self.reserve()?;
        let Composite {
            name,
            behavior,
            services,
            children,
            apply_decorator_scope,
        } = decl;

        let shapes: Vec<ChildShape> = children.iter().map(Child::shape).collect();
        behavior
            .template()
            .validate_children(&shapes)
            .map_err(|reason| self.invalid(format!("{name}: {reason}")))?;

        let special_slot = Some(self.memory.push(Box::new(CompositeMemory::default())));
        let memory_slot = behavior
            .template()
            .init_memory()
            .map(|block| self.memory.push(block));

        let mut service_ids = Vec::with_capacity(services.len());
        for service in services {
            service_ids.push(self.add_service(service, idx, None, depth)?);
        }

        let mut child_defs = Vec::with_capacity(children.len());
        for (ci, child) in children.into_iter().enumerate() {
            let Child {
                decorators,
                logic,
                node,
            } = child;
            if let Some(bad) = logic.iter().find_map(|op| match op {
                DecoratorLogic::Test(i) if *i >= decorators.len() => Some(*i),
                _ => None,
            }) {
                return Err(self.invalid(format!(
                    "{name}: child {ci} tests decorator {bad} but has {}",
                    decorators.len()
                )));
            }

            let mut decorator_ids = Vec::with_capacity(decorators.len());
            for decorator in decorators {
                decorator_ids.push(self.add_decorator(decorator, idx, ci, depth)?);
            }

            let def = match node {
                ChildNode::Composite(composite) => ChildDef {
                    decorators: decorator_ids,
                    decorator_ops: logic,
                    node: self.add_composite(composite, Some(idx), Some(ci), depth + 1)?,
                    is_task: false,
                    task_services: 0,
                },
                ChildNode::Task(task) => {
                    let task_services = task.services.len() as u16;
                    ChildDef {
                        decorators: decorator_ids,
                        decorator_ops: logic,
                        node: self.add_task(task, idx, ci, depth)?,
                        is_task: true,
                        task_services,
                    }
                }
            };
            child_defs.push(def);
        }

        let last_execution_index = (self.nodes.len() - 1) as u16;
        self.nodes[usize::from(idx)] = Some(NodeDef {
            name,
            execution_index: idx,
            parent,
            depth,
            child_index,
            special_slot,
            memory_slot,
            kind: NodeKind::Composite(CompositeDef {
                behavior,
                children: child_defs,
                services: service_ids,
                last_execution_index,
                apply_decorator_scope,
            }),
        });
        Ok(idx)
    }

    fn add_task(&mut self, decl: Task<W>, parent: u16, child_index: usize, depth: u16) -> Result<u16> {
        let Task {
            name,
            behavior,
            services,
        } = decl;

        let mut service_ids = Vec::with_capacity(services.len());
        for service in services {
            service_ids.push(self.add_service(service, parent, Some(child_index), depth)?);
        }

        let idx = self.reserve()?;
        if let Some(tag) = behavior.template().injection_tag() {
            if !self.injection_tags.iter().any(|t| t == tag) {
                self.injection_tags.push(tag.to_string());
            }
        }
        let memory_slot = behavior
            .template()
            .init_memory()
            .map(|block| self.memory.push(block));

        self.nodes[usize::from(idx)] = Some(NodeDef {
            name,
            execution_index: idx,
            parent: Some(parent),
            depth: depth + 1,
            child_index: Some(child_index),
            special_slot: None,
            memory_slot,
            kind: NodeKind::Task(TaskDef {
                behavior,
                services: service_ids,
            }),
        });
        Ok(idx)
    }

    fn add_decorator(
        &mut self,
        decl: Decorator<W>,
        parent: u16,
        child_index: usize,
        depth: u16,
    ) -> Result<u16> {
        let idx = self.reserve()?;
        let special_slot = Some(self.memory.push(Box::new(AuxMemory::default())));
        let memory_slot = decl
            .behavior
            .template()
            .init_memory()
            .map(|block| self.memory.push(block));

        self.nodes[usize::from(idx)] = Some(NodeDef {
            name: decl.name,
            execution_index: idx,
            parent: Some(parent),
            depth,
            child_index: Some(child_index),
            special_slot,
            memory_slot,
            kind: NodeKind::Decorator(decl.behavior),
        });
        Ok(idx)
    }

    fn add_service(
        &mut self,
        decl: Service<W>,
        parent: u16,
        child_index: Option<usize>,
        depth: u16,
    ) -> Result<u16> {
        let idx = self.reserve()?;
        let timing = decl.timing(self.service_defaults);
        let special_slot = Some(self.memory.push(Box::new(AuxMemory::default())));
        let memory_slot = decl
            .behavior
            .template()
            .init_memory()
            .map(|block| self.memory.push(block));

        self.nodes[usize::from(idx)] = Some(NodeDef {
            name: decl.name,
            execution_index: idx,
            parent: Some(parent),
            depth,
            child_index,
            special_slot,
            memory_slot,
            kind: NodeKind::Service(ServiceDef {
                behavior: decl.behavior,
                timing,
            }),
        });
        Ok(idx)
    }
}
