//! Observer hub: pushes registry snapshots to monitor connections.
//!
//! Each observer gets its own bounded queue. Broadcasts never block the
//! registry: a full queue means the observer drops that update and will
//! catch up on the next one, since every snapshot is complete state.

use std::collections::HashMap;
use tether_core::{ClientInfo, Message};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Queue depth per observer before updates start being dropped.
const OBSERVER_QUEUE_DEPTH: usize = 16;

pub struct ObserverHub {
    observers: RwLock<HashMap<Uuid, mpsc::Sender<Message>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
        }
    }

    /// Add an observer; the returned receiver yields snapshot messages.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE_DEPTH);
        self.observers.write().await.insert(id, tx);
        debug!(observer = %id, "observer subscribed");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.observers.write().await.remove(&id).is_some() {
            debug!(observer = %id, "observer unsubscribed");
        }
    }

    /// Fan a snapshot out to every observer. Observers whose queue is
    /// full miss this update; observers whose receiver is gone are pruned.
    pub async fn broadcast(&self, snapshot: Vec<ClientInfo>) {
        let mut gone = Vec::new();
        {
            let observers = self.observers.read().await;
            if observers.is_empty() {
                return;
            }
            let msg = Message::ClientsInfo { data: snapshot };
            for (id, tx) in observers.iter() {
                match tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(observer = %id, "observer queue full, dropping update");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        gone.push(*id);
                    }
                }
            }
        }
        if !gone.is_empty() {
            let mut observers = self.observers.write().await;
            for id in gone {
                observers.remove(&id);
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.observers.read().await.len()
    }
}
