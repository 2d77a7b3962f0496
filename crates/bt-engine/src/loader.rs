//! Tree asset lookup.
//!
//! Components never build trees themselves. They ask a [`TreeLoader`] for a
//! shared asset by id, so every agent running the same tree shares one copy.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use bt_core::WorldMut;

use crate::error::Result;
use crate::tree::{BehaviorTree, TreeId};

pub trait TreeLoader<W: WorldMut + 'static> {
    fn load_tree(&self, id: &TreeId) -> Option<Rc<BehaviorTree<W>>>;
}

type TreeFactory<W> = Box<dyn Fn() -> Result<BehaviorTree<W>>>;

/// Cache of built trees, optionally filled lazily from registered factories.
pub struct TreeManager<W: WorldMut + 'static> {
    trees: RefCell<HashMap<TreeId, Rc<BehaviorTree<W>>>>,
    factories: HashMap<TreeId, TreeFactory<W>>,
    builds: Cell<usize>,
    loads: Cell<usize>,
}

impl<W: WorldMut + 'static> Default for TreeManager<W> {
    fn default() -> Self {
        Self {
            trees: RefCell::new(HashMap::new()),
            factories: HashMap::new(),
            builds: Cell::new(0),
            loads: Cell::new(0),
        }
    }
}

impl<W: WorldMut + 'static> TreeManager<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an already built tree under its own id.
    pub fn register(&self, tree: BehaviorTree<W>) -> Rc<BehaviorTree<W>> {
        let tree = Rc::new(tree);
        self.trees.borrow_mut().insert(tree.id().clone(), tree.clone());
        tree
    }

    /// Registers a factory that builds the tree the first time it is loaded.
    pub fn register_with<F>(&mut self, id: impl Into<TreeId>, factory: F)
    where
        F: Fn() -> Result<BehaviorTree<W>> + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    pub fn contains(&self, id: &TreeId) -> bool {
        self.trees.borrow().contains_key(id) || self.factories.contains_key(id)
    }

    /// Number of trees built from factories so far.
    pub fn build_count(&self) -> usize {
        self.builds.get()
    }

    /// Number of successful lookups.
    pub fn load_count(&self) -> usize {
        self.loads.get()
    }
}

impl<W: WorldMut + 'static> TreeLoader<W> for TreeManager<W> {
    fn load_tree(&self, id: &TreeId) -> Option<Rc<BehaviorTree<W>>> {
        if let Some(tree) = self.trees.borrow().get(id) {
            self.loads.set(self.loads.get() + 1);
            return Some(tree.clone());
        }
        let factory = self.factories.get(id)?;
        match factory() {
            Ok(tree) => {
                self.builds.set(self.builds.get() + 1);
                self.loads.set(self.loads.get() + 1);
                let tree = Rc::new(tree);
                self.trees.borrow_mut().insert(id.clone(), tree.clone());
                Some(tree)
            }
            Err(err) => {
                tracing::error!(%err, tree = %id, "Failed to build behavior tree");
                None
            }
        }
    }
}
