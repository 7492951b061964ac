//! # Turnos
//!
//! A service ticket queue shared by independent peers with no central
//! server. Every client broadcasts state changes to all peers (itself
//! included) and rebuilds its view of the queue from the event stream.
//!
//! ## Layers
//!
//! - [`types`]: tickets, identifiers and the status state machine
//! - [`queue`]: the locally observed queue, sorted by `(number, id)`
//! - [`protocol`]: the events peers exchange and their JSON envelopes
//! - [`reducer`]: how one event changes the queue
//! - [`session`]: the per-client controller (commands, notifications, sync)
//! - [`projections`]: read-only views (waiting list, position, ETA)
//! - [`client`]: a session store wired to a transport
//! - [`transport`]: an in-process broadcast hub
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use turnos::{Config, LocalHub, QueueClient, SessionEnvironment, SessionId, TicketKind};
//! use turnos_core::environment::SystemClock;
//!
//! let config = Config::default();
//! let hub = LocalHub::new(config.hub.capacity);
//! let env = SessionEnvironment::new(Arc::new(SystemClock), Arc::new(hub.connect()), config.session.clone());
//! let client = QueueClient::start(SessionId::generate(), env, &config).await?;
//!
//! client.request_ticket(TicketKind::Teller).await?;
//! println!("position: {:?}", client.my_position().await);
//! ```

pub mod activity;
pub mod client;
pub mod config;
pub mod identity;
pub mod notification;
pub mod projections;
pub mod protocol;
pub mod queue;
pub mod reducer;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ClientError, QueueClient, SessionStore};
pub use config::{Config, ConfigError};
pub use protocol::{ProtocolError, QueueEvent};
pub use queue::Queue;
pub use session::{SessionAction, SessionEnvironment, SessionError, SessionReducer, SessionState};
pub use transport::{LocalHub, LocalTransport};
pub use types::{SessionId, Ticket, TicketId, TicketKind, TicketNumber, TicketStatus};
