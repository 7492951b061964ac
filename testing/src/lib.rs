//! # Turnos Testing
//!
//! Testing utilities and helpers for the turnos queue.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clock, transport)
//! - A Given-When-Then builder for reducers
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use turnos_testing::{RecordingTransport, test_clock};
//!
//! #[tokio::test]
//! async fn test_request_broadcasts() {
//!     let transport = RecordingTransport::new();
//!     let env = SessionEnvironment::new(Arc::new(test_clock()), Arc::new(transport.clone()), config);
//!     let store = Store::new(SessionState::new(session_id), SessionReducer::new(), env);
//!
//!     store.send(SessionAction::RequestTicket { kind: TicketKind::Teller }).await?;
//!     assert_eq!(transport.sent().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use turnos_core::environment::Clock;


/// Mock implementations for testing.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)] // Mutex poisoning only follows a panicking test

    use super::{Clock, DateTime, Utc};
    use futures::Stream;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{broadcast, watch};
    use turnos_core::transport::{MessageStream, Transport, TransportError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnos_testing::mocks::FixedClock;
    /// use turnos_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Transport double that records every broadcast.
    ///
    /// - Broadcasts while connected are recorded and, with echo enabled
    ///   (the default), delivered back to subscribers like a real transport
    ///   delivers to the sender.
    /// - Broadcasts while disconnected fail with
    ///   [`TransportError::Disconnected`] and are not recorded.
    /// - [`inject`](Self::inject) simulates a message from another peer.
    ///
    /// Clones share the same recording and connection state.
    #[derive(Debug, Clone)]
    pub struct RecordingTransport {
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
        inbound: broadcast::Sender<serde_json::Value>,
        connected: Arc<watch::Sender<bool>>,
        echo: bool,
    }

    impl RecordingTransport {
        /// Create a connected transport with echo enabled
        #[must_use]
        pub fn new() -> Self {
            let (inbound, _) = broadcast::channel(256);
            let (connected, _) = watch::channel(true);
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound,
                connected: Arc::new(connected),
                echo: true,
            }
        }

        /// Create a transport that starts disconnected
        #[must_use]
        pub fn disconnected() -> Self {
            let transport = Self::new();
            transport.set_connected(false);
            transport
        }

        /// Disable delivery of own broadcasts back to subscribers
        #[must_use]
        pub const fn without_echo(mut self) -> Self {
            self.echo = false;
            self
        }

        /// Flip connectivity; watchers observe the change
        pub fn set_connected(&self, connected: bool) {
            self.connected.send_replace(connected);
        }

        /// Messages broadcast so far, oldest first
        #[must_use]
        pub fn sent(&self) -> Vec<serde_json::Value> {
            self.sent.lock().unwrap().clone()
        }

        /// Values of the `tipo` field of every recorded broadcast
        #[must_use]
        pub fn sent_types(&self) -> Vec<String> {
            self.sent()
                .iter()
                .filter_map(|m| m.get("tipo").and_then(|t| t.as_str()).map(str::to_owned))
                .collect()
        }

        /// Drain the recorded broadcasts
        pub fn take_sent(&self) -> Vec<serde_json::Value> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }

        /// Deliver a message to subscribers as if another peer sent it
        pub fn inject(&self, message: serde_json::Value) {
            let _ = self.inbound.send(message);
        }

        fn stream(
            mut rx: broadcast::Receiver<serde_json::Value>,
        ) -> impl Stream<Item = Result<serde_json::Value, TransportError>> + Send {
            async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(message) => yield Ok(message),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(TransportError::Lagged(skipped));
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    impl Default for RecordingTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for RecordingTransport {
        fn is_connected(&self) -> bool {
            *self.connected.borrow()
        }

        fn connection(&self) -> watch::Receiver<bool> {
            self.connected.subscribe()
        }

        fn broadcast(
            &self,
            message: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
            Box::pin(async move {
                if !self.is_connected() {
                    return Err(TransportError::Disconnected);
                }
                self.sent.lock().unwrap().push(message.clone());
                if self.echo {
                    let _ = self.inbound.send(message);
                }
                Ok(())
            })
        }

        fn subscribe(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<MessageStream, TransportError>> + Send + '_>>
        {
            Box::pin(async move {
                let stream: MessageStream = Box::pin(Self::stream(self.inbound.subscribe()));
                Ok(stream)
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingTransport, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::StreamExt;
    use turnos_core::transport::{Transport, TransportError};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    async fn test_recording_transport_echoes_to_subscribers() {
        let transport = RecordingTransport::new();
        let mut stream = transport.subscribe().await.unwrap();

        transport
            .broadcast(serde_json::json!({ "tipo": "sync_request", "sessionId": "user_a" }))
            .await
            .unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received["tipo"], "sync_request");
        assert_eq!(transport.sent_types(), vec!["sync_request".to_string()]);
    }

    #[tokio::test]
    async fn test_recording_transport_drops_while_disconnected() {
        let transport = RecordingTransport::disconnected();

        let result = transport.broadcast(serde_json::json!({ "tipo": "turno_cancelado" })).await;

        assert_eq!(result, Err(TransportError::Disconnected));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_connection_watch_observes_changes() {
        let transport = RecordingTransport::disconnected();
        let mut watch = transport.connection();
        assert!(!*watch.borrow_and_update());

        transport.set_connected(true);
        watch.changed().await.unwrap();
        assert!(*watch.borrow());
    }
}
