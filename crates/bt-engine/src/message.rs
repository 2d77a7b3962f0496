//! Message observers for latent task completion.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::index::NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u32);

/// A message delivered to observing tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiMessage {
    pub name: Cow<'static, str>,
    pub request_id: Option<RequestId>,
    pub success: bool,
}

impl AiMessage {
    pub fn new(name: impl Into<Cow<'static, str>>, success: bool) -> Self {
        Self {
            name: name.into(),
            request_id: None,
            success,
        }
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Observer {
    name: Cow<'static, str>,
    request_id: Option<RequestId>,
}

impl Observer {
    /// An observer without a request id accepts any request.
    fn matches(&self, message: &AiMessage) -> bool {
        self.name == message.name
            && match self.request_id {
                None => true,
                Some(id) => message.request_id == Some(id),
            }
    }
}

/// Registered observers keyed by the task that owns them.
#[derive(Debug, Default)]
pub(crate) struct MessageObservers {
    by_node: BTreeMap<NodeIndex, Vec<Observer>>,
}

impl MessageObservers {
    pub fn register(
        &mut self,
        node: NodeIndex,
        name: Cow<'static, str>,
        request_id: Option<RequestId>,
    ) {
        let observer = Observer { name, request_id };
        let list = self.by_node.entry(node).or_default();
        if !list.contains(&observer) {
            list.push(observer);
        }
    }

    pub fn unregister_from(&mut self, node: NodeIndex) {
        self.by_node.remove(&node);
    }

    pub fn clear(&mut self) {
        self.by_node.clear();
    }

    pub fn count(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    /// Removes every observer matching `message` and returns their owners in
    /// priority order. Each registration is consumed by one delivery.
    pub fn take_matching(&mut self, message: &AiMessage) -> Vec<NodeIndex> {
        let mut owners = Vec::new();
        for (node, list) in self.by_node.iter_mut() {
            let before = list.len();
            list.retain(|observer| !observer.matches(message));
            if list.len() != before {
                owners.push(*node);
            }
        }
        self.by_node.retain(|_, list| !list.is_empty());
        owners
    }
}
