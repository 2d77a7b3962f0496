//! Built-in tasks that enter subtrees.

use bt_core::WorldMut;

use crate::context::NodeCx;
use crate::node::{BtNode, TaskNode};
use crate::tree::TreeId;
use crate::types::NodeResult;

fn push_or_fail<W: WorldMut + 'static>(cx: &mut NodeCx<'_, W>, tree: &TreeId) -> NodeResult {
    match cx.push_subtree(tree) {
        Ok(()) => NodeResult::InProgress,
        Err(err) => {
            tracing::warn!(%err, %tree, node = %cx.node(), "Failed to run subtree");
            NodeResult::Failed
        }
    }
}

/// Runs another tree asset as a subtree instance.
///
/// The task stays in progress until the search leaves the subtree, then the
/// parent composite continues with the subtree's result.
#[derive(Debug, Clone)]
pub struct RunSubtree {
    tree: TreeId,
}

impl RunSubtree {
    pub fn new(tree: impl Into<TreeId>) -> Self {
        Self { tree: tree.into() }
    }
}

impl BtNode for RunSubtree {
    fn describe(&self) -> String {
        format!("RunSubtree {}", self.tree)
    }
}

impl<W> TaskNode<W> for RunSubtree
where
    W: WorldMut + 'static,
{
    fn execute_task(&self, cx: &mut NodeCx<'_, W>) -> NodeResult {
        push_or_fail(cx, &self.tree)
    }

    fn subtree_asset(&self) -> Option<&TreeId> {
        Some(&self.tree)
    }

    fn on_subtree_deactivated(&self, cx: &mut NodeCx<'_, W>, result: NodeResult) {
        tracing::debug!(tree = %self.tree, node = %cx.node(), ?result, "Subtree left");
    }
}

/// Runs whatever asset is bound to an injection tag on the component,
/// falling back to a default asset.
#[derive(Debug, Clone)]
pub struct RunSubtreeDynamic {
    tag: String,
    default_tree: Option<TreeId>,
}

impl RunSubtreeDynamic {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            default_tree: None,
        }
    }

    pub fn with_default(mut self, tree: impl Into<TreeId>) -> Self {
        self.default_tree = Some(tree.into());
        self
    }
}

impl BtNode for RunSubtreeDynamic {
    fn describe(&self) -> String {
        format!("RunSubtreeDynamic {}", self.tag)
    }
}

impl<W> TaskNode<W> for RunSubtreeDynamic
where
    W: WorldMut + 'static,
{
    fn execute_task(&self, cx: &mut NodeCx<'_, W>) -> NodeResult {
        let Some(tree) = cx.dynamic_subtree(&self.tag).or_else(|| self.default_tree.clone()) else {
            tracing::warn!(tag = %self.tag, node = %cx.node(), "No subtree bound to injection tag");
            return NodeResult::Failed;
        };
        push_or_fail(cx, &tree)
    }

    fn injection_tag(&self) -> Option<&str> {
        Some(&self.tag)
    }

    fn subtree_asset(&self) -> Option<&TreeId> {
        self.default_tree.as_ref()
    }
}
