use crate::model::{DocumentId, Permission};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Event {
    Created { id: DocumentId },
    Materialized { id: DocumentId, key: String },
    Deleted { id: DocumentId },
    Moved { id: DocumentId, new_parent: String },
    Renamed { id: DocumentId, name: String },
    Shared { id: DocumentId, grantee: String, permission: Permission },
    Unshared { id: DocumentId, grantee: String },
    Pruned { id: DocumentId, key: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
