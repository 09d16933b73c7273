#![warn(missing_docs)]

//! The in-process event dispatcher.
//!
//! Every successful store commit publishes exactly one event on one of three
//! streams: new unversioned object, new version of a versioned identity, or
//! first sighting of a new identity. Subscribers register with an optional
//! type filter and a stable tag used for diagnostics; fan-out is FIFO within
//! a stream, and a subscriber going away never disturbs the others.

use one_common::{Hash, IdHash};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// The three event streams of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    /// A new unversioned object was committed.
    NewUnversionedObject,
    /// A new version of a versioned identity was committed.
    NewVersion,
    /// A versioned identity was seen for the first time.
    NewIdObject,
}

/// A store-commit notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A new unversioned object was committed.
    NewUnversionedObject {
        /// The object's content address.
        hash: Hash,
        /// The object's type.
        type_name: String,
        /// The object's canonical text.
        payload: String,
    },
    /// A new version of a versioned identity was committed.
    NewVersion {
        /// The identity the version belongs to.
        id_hash: IdHash,
        /// The version's content address.
        hash: Hash,
        /// The object's type.
        type_name: String,
        /// The object's canonical text.
        payload: String,
    },
    /// A versioned identity was seen for the first time.
    NewIdObject {
        /// The new identity.
        id_hash: IdHash,
        /// The identity's type.
        type_name: String,
    },
}

impl StoreEvent {
    /// The stream this event belongs to.
    pub fn stream(&self) -> EventStream {
        match self {
            StoreEvent::NewUnversionedObject { .. } => EventStream::NewUnversionedObject,
            StoreEvent::NewVersion { .. } => EventStream::NewVersion,
            StoreEvent::NewIdObject { .. } => EventStream::NewIdObject,
        }
    }

    /// The type name carried by the event.
    pub fn type_name(&self) -> &str {
        match self {
            StoreEvent::NewUnversionedObject { type_name, .. }
            | StoreEvent::NewVersion { type_name, .. }
            | StoreEvent::NewIdObject { type_name, .. } => type_name,
        }
    }
}

/// A live subscription to one event stream.
pub struct Subscription {
    /// The diagnostic tag given at subscription time.
    pub tag: String,
    receiver: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the dispatcher is
    /// dropped.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    stream: EventStream,
    type_filter: Option<String>,
    tag: String,
    sender: mpsc::UnboundedSender<StoreEvent>,
}

/// The in-process publish/subscribe broker.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber on one stream, optionally filtered by type
    /// name. The tag identifies the subscriber in logs.
    pub fn subscribe(
        &self,
        stream: EventStream,
        type_filter: Option<&str>,
        tag: &str,
    ) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            stream,
            type_filter: type_filter.map(str::to_owned),
            tag: tag.to_owned(),
            sender,
        });
        Subscription {
            tag: tag.to_owned(),
            receiver,
        }
    }

    /// Delivers an event to every matching subscriber, in registration
    /// order. Subscribers whose receiving end is gone are dropped; their
    /// departure is logged and does not interrupt delivery to the rest.
    pub fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            if subscriber.stream != event.stream() {
                return true;
            }
            if let Some(filter) = &subscriber.type_filter
                && filter != event.type_name()
            {
                return true;
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(tag = %subscriber.tag, "dropping dead event subscriber");
                    false
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn version_event(type_name: &str, n: u8) -> StoreEvent {
        StoreEvent::NewVersion {
            id_hash: IdHash::digest([n]),
            hash: Hash::digest([n]),
            type_name: type_name.into(),
            payload: String::new(),
        }
    }

    #[tokio::test]
    async fn it_fans_out_in_fifo_order_with_type_filters() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let mut all = dispatcher.subscribe(EventStream::NewVersion, None, "all");
        let mut only_person = dispatcher.subscribe(EventStream::NewVersion, Some("Person"), "p");

        dispatcher.publish(version_event("Person", 1));
        dispatcher.publish(version_event("ChannelInfo", 2));
        dispatcher.publish(version_event("Person", 3));

        assert_eq!(all.try_recv(), Some(version_event("Person", 1)));
        assert_eq!(all.try_recv(), Some(version_event("ChannelInfo", 2)));
        assert_eq!(all.try_recv(), Some(version_event("Person", 3)));
        assert_eq!(only_person.try_recv(), Some(version_event("Person", 1)));
        assert_eq!(only_person.try_recv(), Some(version_event("Person", 3)));
        assert_eq!(only_person.try_recv(), None);
        Ok(())
    }

    #[tokio::test]
    async fn it_survives_a_dropped_subscriber() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let dead = dispatcher.subscribe(EventStream::NewIdObject, None, "dead");
        drop(dead);
        let mut alive = dispatcher.subscribe(EventStream::NewIdObject, None, "alive");

        dispatcher.publish(StoreEvent::NewIdObject {
            id_hash: IdHash::digest(b"x"),
            type_name: "Person".into(),
        });
        assert!(alive.recv().await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn it_keeps_streams_separate() -> Result<()> {
        let dispatcher = Dispatcher::new();
        let mut versions = dispatcher.subscribe(EventStream::NewVersion, None, "v");

        dispatcher.publish(StoreEvent::NewUnversionedObject {
            hash: Hash::digest(b"x"),
            type_name: "Note".into(),
            payload: String::new(),
        });
        assert_eq!(versions.try_recv(), None);
        Ok(())
    }
}
