//! Broadcast transport abstraction for peer-to-peer queue synchronization.
//!
//! This module provides the [`Transport`] trait: a send-to-all / receive-any
//! primitive that every turnos client uses to fan its events out to the other
//! clients. There is no server authority; each peer reconciles its own state
//! from the message stream.
//!
//! # Delivery Contract
//!
//! ```text
//!  client A                 transport                 client B
//! ┌────────┐  broadcast()  ┌──────────┐   stream    ┌────────┐
//! │ action ├──────────────►│  fan-out ├────────────►│reducer │
//! └────────┘               └────┬─────┘             └────────┘
//!                               │ stream (sender included)
//!                               ▼
//!                          ┌────────┐
//!                          │A reducer│
//!                          └────────┘
//! ```
//!
//! - **At-least-once**: messages may arrive more than once
//! - **Sender included**: a broadcast is also delivered back to its sender
//! - **Fire-and-forget**: no acknowledgement, no retry; a broadcast while
//!   disconnected fails with [`TransportError::Disconnected`] and is dropped
//! - **Unordered across tickets**: consumers must not rely on ordering
//!   between messages about different tickets
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! async fn example(transport: &dyn Transport) -> Result<(), TransportError> {
//!     transport
//!         .broadcast(serde_json::json!({ "tipo": "sync_request", "sessionId": "user_abc" }))
//!         .await?;
//!
//!     let mut stream = transport.subscribe().await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(message) => println!("Received: {message}"),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that can occur during transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport is not connected; the message was not sent
    #[error("Transport is disconnected")]
    Disconnected,

    /// Failed to publish a message
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Failed to subscribe to the message stream
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// The subscriber fell behind and missed messages
    #[error("Subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    /// The underlying channel was closed
    #[error("Transport channel closed")]
    Closed,
}

/// Stream of JSON messages received from peers.
///
/// Each item is a `Result`; a lagged subscriber sees
/// [`TransportError::Lagged`] and keeps receiving afterwards.
pub type MessageStream =
    Pin<Box<dyn Stream<Item = Result<serde_json::Value, TransportError>> + Send>>;

/// Trait for broadcast transport implementations.
///
/// Messages are JSON objects addressed to all connected peers, the sender
/// included. Dropping the [`MessageStream`] returned by
/// [`subscribe`](Transport::subscribe) unsubscribes.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be held as `Arc<dyn Transport>` inside environments and captured
/// by effects.
pub trait Transport: Send + Sync {
    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Watch channel tracking connectivity.
    ///
    /// Every false → true change is a fresh connection establishment.
    fn connection(&self) -> watch::Receiver<bool>;

    /// Broadcast a message to every connected peer, including this one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the transport is offline,
    /// or [`TransportError::BroadcastFailed`] if the message could not be sent.
    fn broadcast(
        &self,
        message: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Subscribe to all messages broadcast by any peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if the subscription
    /// cannot be created.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, TransportError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::TransportError;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TransportError::Disconnected.to_string(),
            "Transport is disconnected"
        );
        assert_eq!(
            TransportError::Lagged(3).to_string(),
            "Subscriber lagged, 3 messages skipped"
        );
    }
}
