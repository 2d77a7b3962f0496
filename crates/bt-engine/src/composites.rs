//! Built-in composites.

use bt_core::WorldMut;

use crate::context::NodeCx;
use crate::index::ChildSlot;
use crate::memory::MemoryBlock;
use crate::node::{BtNode, ChildShape, CompositeNode};
use crate::types::{NodeResult, TaskStatus};

/// Runs children in order until one succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selector;

impl BtNode for Selector {}

impl<W> CompositeNode<W> for Selector
where
    W: WorldMut + 'static,
{
    fn next_child(&self, cx: &mut NodeCx<'_, W>, prev: ChildSlot, last_result: NodeResult) -> ChildSlot {
        match prev {
            ChildSlot::NotInitialized => ChildSlot::Child(0),
            ChildSlot::Child(idx) if last_result == NodeResult::Failed && idx + 1 < cx.child_count() => {
                ChildSlot::Child(idx + 1)
            }
            _ => ChildSlot::ReturnToParent,
        }
    }
}

/// Runs children in order until one fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequence;

impl BtNode for Sequence {}

impl<W> CompositeNode<W> for Sequence
where
    W: WorldMut + 'static,
{
    fn next_child(&self, cx: &mut NodeCx<'_, W>, prev: ChildSlot, last_result: NodeResult) -> ChildSlot {
        match prev {
            ChildSlot::NotInitialized => ChildSlot::Child(0),
            ChildSlot::Child(idx) if last_result == NodeResult::Succeeded && idx + 1 < cx.child_count() => {
                ChildSlot::Child(idx + 1)
            }
            _ => ChildSlot::ReturnToParent,
        }
    }
}

/// What a [`SimpleParallel`] does when its main task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelFinishMode {
    /// Abort the background branch and finish with the main task's result.
    #[default]
    AbortBackground,
    /// Let the background branch run to completion first.
    WaitForBackground,
}

const MAIN_TASK: usize = 0;
const BACKGROUND: usize = 1;

#[derive(Debug, Clone)]
struct ParallelMemory {
    main_task_result: NodeResult,
    repeat_main_task: bool,
    main_task_is_active: bool,
    force_background_tree: bool,
}

impl Default for ParallelMemory {
    fn default() -> Self {
        Self {
            main_task_result: NodeResult::Failed,
            repeat_main_task: false,
            main_task_is_active: false,
            force_background_tree: false,
        }
    }
}

/// Runs a single task while repeating a background branch next to it.
///
/// Child 0 must be a task. Once it goes latent it is registered as a
/// parallel task and the search moves on to child 1, which is re-entered
/// every time it finishes while the main task is still running.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleParallel {
    finish_mode: ParallelFinishMode,
}

impl SimpleParallel {
    pub fn new(finish_mode: ParallelFinishMode) -> Self {
        Self { finish_mode }
    }

    pub fn finish_mode(&self) -> ParallelFinishMode {
        self.finish_mode
    }
}

impl BtNode for SimpleParallel {
    fn init_memory(&self) -> Option<Box<dyn MemoryBlock>> {
        Some(Box::new(ParallelMemory::default()))
    }

    fn describe_runtime(&self, memory: Option<&dyn MemoryBlock>) -> Vec<String> {
        let Some(memory) = memory.and_then(|m| m.as_any().downcast_ref::<ParallelMemory>()) else {
            return Vec::new();
        };
        let state = if memory.main_task_is_active {
            "running".to_string()
        } else {
            format!("{:?}", memory.main_task_result)
        };
        vec![format!("main task: {state}")]
    }
}

impl<W> CompositeNode<W> for SimpleParallel
where
    W: WorldMut + 'static,
{
    fn next_child(&self, cx: &mut NodeCx<'_, W>, prev: ChildSlot, _last_result: NodeResult) -> ChildSlot {
        let restart_pending = cx.is_restart_pending();
        let Some(memory) = cx.memory::<ParallelMemory>() else {
            return ChildSlot::ReturnToParent;
        };

        if prev == ChildSlot::NotInitialized {
            memory.main_task_result = NodeResult::Failed;
            memory.repeat_main_task = false;
            ChildSlot::Child(MAIN_TASK)
        } else if (memory.main_task_is_active || memory.force_background_tree) && !restart_pending {
            // A search started by the background branch's own abort leaves here.
            memory.force_background_tree = false;
            ChildSlot::Child(BACKGROUND)
        } else if memory.repeat_main_task {
            memory.repeat_main_task = false;
            tracing::debug!(node = %cx.node(), "Repeating main task");
            ChildSlot::Child(MAIN_TASK)
        } else {
            ChildSlot::ReturnToParent
        }
    }

    fn on_node_deactivation(&self, cx: &mut NodeCx<'_, W>, result: &mut NodeResult) {
        if let Some(memory) = cx.memory::<ParallelMemory>() {
            if !memory.main_task_is_active {
                *result = memory.main_task_result;
            }
        }
        cx.remove_parallel_task_on_apply(MAIN_TASK);
    }

    fn on_child_execution(&self, cx: &mut NodeCx<'_, W>, child: usize, result: &mut NodeResult) {
        if child != MAIN_TASK {
            return;
        }
        let status = cx.child_task_status(MAIN_TASK);
        let (was_active, repeat) = match cx.memory::<ParallelMemory>() {
            Some(memory) => {
                memory.main_task_result = *result;
                (memory.main_task_is_active, memory.repeat_main_task)
            }
            None => return,
        };

        if *result == NodeResult::InProgress {
            // A latent abort also reports InProgress; only a running task goes parallel.
            if status == TaskStatus::Active {
                if let Some(memory) = cx.memory::<ParallelMemory>() {
                    memory.main_task_is_active = true;
                    memory.force_background_tree = false;
                }
                cx.register_parallel_task(MAIN_TASK);
                cx.request_delayed_execution(NodeResult::Succeeded);
            }
        } else if was_active {
            if let Some(memory) = cx.memory::<ParallelMemory>() {
                memory.main_task_is_active = false;
            }
            cx.notify_child_decorators_detached(MAIN_TASK, result);
            cx.unregister_parallel_task(MAIN_TASK);
            if *result != NodeResult::Aborted
                && !repeat
                && self.finish_mode == ParallelFinishMode::AbortBackground
            {
                cx.request_execution_from_child(MAIN_TASK, *result);
            }
        } else if *result == NodeResult::Succeeded && self.finish_mode == ParallelFinishMode::WaitForBackground {
            // The main task finished instantly; run the background branch once.
            if let Some(memory) = cx.memory::<ParallelMemory>() {
                memory.force_background_tree = true;
            }
            cx.request_delayed_execution(NodeResult::Succeeded);
        }
    }

    fn can_push_subtree(&self, _cx: &mut NodeCx<'_, W>, child: Option<usize>) -> bool {
        child != Some(MAIN_TASK)
    }

    fn can_notify_decorators_on_deactivation(
        &self,
        cx: &mut NodeCx<'_, W>,
        child: usize,
        _result: NodeResult,
    ) -> bool {
        // Decorators of a running main task are notified when it finishes.
        if child == MAIN_TASK {
            if let Some(memory) = cx.memory::<ParallelMemory>() {
                return !memory.main_task_is_active;
            }
        }
        true
    }

    fn override_child(&self, cx: &mut NodeCx<'_, W>, child: ChildSlot) -> bool {
        if let Some(memory) = cx.memory::<ParallelMemory>() {
            if child == ChildSlot::Child(MAIN_TASK) && !memory.main_task_is_active {
                memory.repeat_main_task = true;
            }
        }
        true
    }

    fn validate_children(&self, children: &[ChildShape]) -> Result<(), String> {
        match children {
            [ChildShape::Task, _] => Ok(()),
            [_, _] => Err("main child of a simple parallel must be a task".to_string()),
            _ => Err(format!("simple parallel needs exactly 2 children, got {}", children.len())),
        }
    }
}
