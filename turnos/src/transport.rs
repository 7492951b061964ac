//! In-process broadcast hub.
//!
//! [`LocalHub`] fans every message out to all connected peers, sender
//! included, over a `tokio::sync::broadcast` channel. Each peer holds a
//! [`LocalTransport`] that can be disconnected and reconnected to simulate
//! network loss: while disconnected it cannot send, and messages broadcast
//! in the meantime are never delivered to it.

use futures::Stream;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use turnos_core::transport::{MessageStream, Transport, TransportError};

/// A message plus the peers that were offline when it was sent
#[derive(Debug, Clone)]
struct Delivery {
    message: Value,
    offline: Arc<HashSet<u64>>,
}

/// Shared broadcast medium
#[derive(Debug, Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Delivery>,
    offline: Arc<Mutex<HashSet<u64>>>,
    next_peer: Arc<AtomicU64>,
}

impl LocalHub {
    /// Create a hub buffering `capacity` messages per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            offline: Arc::new(Mutex::new(HashSet::new())),
            next_peer: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A new peer, connected
    #[must_use]
    pub fn connect(&self) -> LocalTransport {
        let (connected, _) = watch::channel(true);
        LocalTransport {
            peer: self.next_peer.fetch_add(1, Ordering::Relaxed),
            hub: self.clone(),
            connected: Arc::new(connected),
        }
    }

    /// Number of open subscriptions
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }

    fn offline(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.offline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, message: Value) {
        let offline = Arc::new(self.offline().clone());
        // No subscribers only means nobody is listening yet
        let _ = self.sender.send(Delivery { message, offline });
    }
}

/// One peer's handle on a [`LocalHub`]
///
/// Clones share connectivity.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    peer: u64,
    hub: LocalHub,
    connected: Arc<watch::Sender<bool>>,
}

impl LocalTransport {
    /// Stop sending and receiving
    pub fn disconnect(&self) {
        self.set_connected(false);
    }

    /// Resume sending and receiving
    pub fn reconnect(&self) {
        self.set_connected(true);
    }

    fn set_connected(&self, connected: bool) {
        {
            let mut offline = self.hub.offline();
            if connected {
                offline.remove(&self.peer);
            } else {
                offline.insert(self.peer);
            }
        }

        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed {
            tracing::debug!(peer = self.peer, connected, "Local transport connectivity changed");
        }
    }

    fn stream(
        peer: u64,
        mut rx: broadcast::Receiver<Delivery>,
    ) -> impl Stream<Item = Result<Value, TransportError>> + Send {
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(delivery) => {
                        if !delivery.offline.contains(&peer) {
                            yield Ok(delivery.message);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(TransportError::Lagged(skipped));
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Transport for LocalTransport {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn broadcast(
        &self,
        message: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(TransportError::Disconnected);
            }
            self.hub.publish(message);
            Ok(())
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let stream: MessageStream = Box::pin(Self::stream(self.peer, self.hub.sender.subscribe()));
            Ok(stream)
        })
    }
}
