//! Chain event fan-out
//!
//! Subscribers get an unbounded receiver of [`BlockchainMessage`]s.
//! Sending never blocks, so messages can be emitted while the chain is
//! locked. Queues whose receiver was dropped are forgotten on the next
//! send.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::crypto::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainMessage {
    /// A block was appended to the main chain
    NewBlock(Hash),
    /// A block was stored on an alternative chain
    NewAlternativeBlock(Hash),
    /// The main chain was reorganized. `hashes` starts with the common
    /// root, followed by the blocks that now follow it.
    ChainSwitch { hashes: Vec<Hash> },
}

impl BlockchainMessage {
    pub fn common_root(&self) -> Option<&Hash> {
        match self {
            BlockchainMessage::ChainSwitch { hashes } => hashes.first(),
            _ => None,
        }
    }
}

/// Receiving end handed to a subscriber
#[derive(Debug)]
pub struct MessageQueue {
    id: u64,
    receiver: mpsc::UnboundedReceiver<BlockchainMessage>,
}

impl MessageQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next message; `None` once the chain is gone
    pub async fn recv(&mut self) -> Option<BlockchainMessage> {
        self.receiver.recv().await
    }

    /// Next message if one is ready
    pub fn try_recv(&mut self) -> Option<BlockchainMessage> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Default)]
pub struct MessageQueueList {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<BlockchainMessage>)>,
}

impl MessageQueueList {
    pub fn add(&mut self) -> MessageQueue {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.senders.push((id, sender));
        MessageQueue { id, receiver }
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(queue, _)| *queue != id);
        self.senders.len() != before
    }

    pub fn send(&mut self, message: &BlockchainMessage) {
        self.senders.retain(|(id, sender)| {
            let delivered = sender.send(message.clone()).is_ok();
            if !delivered {
                debug!(queue = id, "Dropping closed message queue");
            }
            delivered
        });
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Synchronous callback run after the main chain grew or switched
pub trait BlockchainObserver: Send + Sync {
    fn blockchain_updated(&self);
}

#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Vec<Arc<dyn BlockchainObserver>>,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Arc<dyn BlockchainObserver>) -> bool {
        if self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub(crate) fn remove(&mut self, observer: &Arc<dyn BlockchainObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
        self.observers.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn BlockchainObserver>> {
        self.observers.clone()
    }
}
