//! Typed model notifications.
//!
//! Listeners are registered explicitly and get a [`SubscriptionId`] back.
//! They run in registration order, on the thread that caused the event, and
//! never while the model's internal state is locked, so a listener may call
//! back into the model.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::model::SyncedModel;
use crate::value::{State, Value};

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local `set`.
    Local,
    /// An `update` message from the peer.
    Remote,
}

/// A batch of attribute changes applied together.
#[derive(Debug, Clone)]
pub struct Change {
    pub origin: ChangeOrigin,
    /// New values of the changed attributes.
    pub changed: State,
    /// Values before the change; `None` if the attribute did not exist.
    pub previous: BTreeMap<String, Option<Value>>,
}

impl Change {
    pub(crate) fn new(origin: ChangeOrigin) -> Self {
        Self {
            origin,
            changed: State::new(),
            previous: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn has_changed(&self, attribute: &str) -> bool {
        self.changed.contains_key(attribute)
    }

    /// Previous value of `attribute`, if it changed and existed before.
    pub fn previous(&self, attribute: &str) -> Option<&Value> {
        self.previous.get(attribute).and_then(Option::as_ref)
    }
}

/// Everything a model notifies its listeners about.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Attributes changed.
    Change(Change),
    /// The peer sent a custom message.
    Custom {
        content: JsonValue,
        buffers: Vec<Bytes>,
    },
    /// The peer closed the channel. Followed by `Destroy`.
    CommClosed,
    /// The model was closed. Last event a listener sees.
    Destroy,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked for every model event.
pub type Listener = Arc<dyn Fn(&SyncedModel, &ModelEvent) + Send + Sync>;

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_ids_are_unique_and_removable() {
        let mut subs = Subscribers::default();
        let a = subs.add(Arc::new(|_: &SyncedModel, _: &ModelEvent| {}));
        let b = subs.add(Arc::new(|_: &SyncedModel, _: &ModelEvent| {}));
        assert_ne!(a, b);
        assert_eq!(subs.len(), 2);

        assert!(subs.remove(a));
        assert!(!subs.remove(a));
        assert_eq!(subs.len(), 1);

        subs.clear();
        assert!(subs.snapshot().is_empty());
    }

    #[test]
    fn test_change_previous() {
        let mut change = Change::new(ChangeOrigin::Local);
        change.changed.insert("a".into(), Value::Int(2));
        change.previous.insert("a".into(), Some(Value::Int(1)));
        change.changed.insert("b".into(), Value::Int(5));
        change.previous.insert("b".into(), None);

        assert!(change.has_changed("a"));
        assert_eq!(change.previous("a"), Some(&Value::Int(1)));
        assert_eq!(change.previous("b"), None);
        assert!(!change.has_changed("c"));
    }
}
