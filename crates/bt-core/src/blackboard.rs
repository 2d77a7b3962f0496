use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BbKey<T: 'static> {
    id: u64,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: 'static> Copy for BbKey<T> {}

impl<T: 'static> Clone for BbKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> BbKey<T> {
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    pub fn id(self) -> u64 {
        self.id
    }
}

/// Signature of a blackboard layout.
///
/// Tree assets name the schema they were authored against; a blackboard is
/// compatible with a tree when its own schema is that schema or derives from
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackboardSchema {
    id: Cow<'static, str>,
    parent: Option<Arc<BlackboardSchema>>,
}

impl BlackboardSchema {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: id.into(),
            parent: None,
        }
    }

    pub fn derived(id: impl Into<Cow<'static, str>>, parent: Arc<BlackboardSchema>) -> Self {
        Self {
            id: id.into(),
            parent: Some(parent),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when `other` is this schema or one of its ancestors.
    pub fn extends(&self, other: &BlackboardSchema) -> bool {
        let mut it = Some(self);
        while let Some(schema) = it {
            if schema.id == other.id {
                return true;
            }
            it = schema.parent.as_deref();
        }
        false
    }
}

/// Typed key/value store shared between an agent's tree nodes.
///
/// Every write records the key as changed. Observers drain the changes with
/// [`Blackboard::take_notifications`]; while notifications are paused the
/// changes keep accumulating and are handed out after
/// [`Blackboard::resume_notifications`].
#[derive(Default)]
pub struct Blackboard {
    values: BTreeMap<u64, Box<dyn Any>>,
    schema: Option<Arc<BlackboardSchema>>,
    changed: BTreeSet<u64>,
    paused: bool,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: Arc<BlackboardSchema>) -> Self {
        Self {
            schema: Some(schema),
            ..Self::default()
        }
    }

    pub fn schema(&self) -> Option<&BlackboardSchema> {
        self.schema.as_deref()
    }

    /// Whether a tree authored against `required` may run on this blackboard.
    pub fn is_compatible_with(&self, required: Option<&BlackboardSchema>) -> bool {
        match (required, self.schema()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(own)) => own.extends(required),
        }
    }

    pub fn clear(&mut self) {
        self.changed.extend(self.values.keys().copied());
        self.values.clear();
    }

    pub fn contains<T: 'static>(&self, key: BbKey<T>) -> bool {
        self.values
            .get(&key.id)
            .is_some_and(|value| value.is::<T>())
    }

    pub fn set<T: 'static>(&mut self, key: BbKey<T>, value: T) {
        self.values.insert(key.id, Box::new(value));
        self.changed.insert(key.id);
    }

    /// Writes `value` and records a change only if it differs from the stored one.
    pub fn set_if_changed<T: PartialEq + 'static>(&mut self, key: BbKey<T>, value: T) -> bool {
        if self.get(key) == Some(&value) {
            return false;
        }
        self.set(key, value);
        true
    }

    /// Stored value for `key`; `None` when missing or stored under another type.
    pub fn get<T: 'static>(&self, key: BbKey<T>) -> Option<&T> {
        self.values.get(&key.id)?.downcast_ref::<T>()
    }

    /// Mutable access counts as a change to `key`.
    pub fn get_mut<T: 'static>(&mut self, key: BbKey<T>) -> Option<&mut T> {
        let value = self.values.get_mut(&key.id)?.downcast_mut::<T>()?;
        self.changed.insert(key.id);
        Some(value)
    }

    pub fn remove<T: 'static>(&mut self, key: BbKey<T>) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let value = self.values.remove(&key.id)?;
        self.changed.insert(key.id);
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn notifications_paused(&self) -> bool {
        self.paused
    }

    pub fn pause_notifications(&mut self) {
        self.paused = true;
    }

    /// Resumes delivery. With `send_queued == false` the changes recorded
    /// while paused are dropped.
    pub fn resume_notifications(&mut self, send_queued: bool) {
        self.paused = false;
        if !send_queued {
            self.changed.clear();
        }
    }

    pub fn has_pending_notifications(&self) -> bool {
        !self.paused && !self.changed.is_empty()
    }

    /// Drains changed key ids in ascending order. Empty while paused.
    pub fn take_notifications(&mut self) -> Vec<u64> {
        if self.paused {
            return Vec::new();
        }
        std::mem::take(&mut self.changed).into_iter().collect()
    }
}
