//! Bounded queue between the call path and log consumers.

use std::sync::Arc;

use crate::{CallflowError, Result};

/// Bounded MPMC queue backed by flume.
///
/// Producers use [`Queue::try_send`], which never waits: a full queue rejects
/// the message instead of stalling the caller.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: flume::Receiver<T>,
    sender: flume::Sender<T>,
}

impl<T> Queue<T> {
    pub fn new(cap: usize) -> Arc<Self> {
        let (sender, receiver) = flume::bounded(cap.max(1));

        Arc::new(Self {
            receiver,
            sender,
        })
    }

    /// send a message without waiting for capacity
    pub fn try_send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| CallflowError::Engine(format!("queue: {}", e)))
    }

    /// wait for the next message
    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// take every message that is ready
    pub fn drain(&self) -> Vec<T> {
        self.receiver.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
