//! Identity sources: who this session is and how new tickets are named.
//!
//! Both are environment dependencies of the session controller so tests can
//! substitute deterministic values.

use crate::config::SessionConfig;
use crate::types::{SessionId, TicketId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Source of fresh ticket ids
pub trait TicketIdGenerator: Send + Sync {
    /// Produce an id no peer has used
    fn next_id(&self) -> TicketId;
}

/// Random ids (`turno_<uuid>`)
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTicketIds;

impl TicketIdGenerator for RandomTicketIds {
    fn next_id(&self) -> TicketId {
        TicketId::generate()
    }
}

/// Predictable ids (`<prefix>_1`, `<prefix>_2`, ...) for tests and demos
#[derive(Debug)]
pub struct SequentialTicketIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialTicketIds {
    /// Start counting at 1 under `prefix`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl TicketIdGenerator for SequentialTicketIds {
    fn next_id(&self) -> TicketId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TicketId::new(format!("{}_{n}", self.prefix))
    }
}

/// Errors loading or persisting a session id
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Reading or writing the session file failed
    #[error("session file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Session id persisted in a file, generated on first use.
///
/// The id stays stable for as long as the file survives, which is what lets
/// a restarted client recognize its own ticket.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Persist under `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File holding the id
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored id, generating and storing one if the file is missing or empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] if the file cannot be read or written.
    pub fn load_or_create(&self) -> Result<SessionId, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if !contents.trim().is_empty() => {
                return Ok(SessionId::new(contents.trim()));
            },
            Ok(_) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(source) => {
                return Err(IdentityError::Io {
                    path: self.path.clone(),
                    source,
                });
            },
        }

        let id = SessionId::generate();
        fs::write(&self.path, id.as_str()).map_err(|source| IdentityError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(session_id = %id, path = %self.path.display(), "Generated session id");
        Ok(id)
    }
}

/// Session id for this client: the configured one, else the one persisted in
/// the configured file, else a fresh one.
///
/// # Errors
///
/// Returns [`IdentityError::Io`] if the session file cannot be used.
pub fn resolve_session_id(config: &SessionConfig) -> Result<SessionId, IdentityError> {
    if let Some(id) = &config.session_id {
        return Ok(SessionId::new(id.trim()));
    }
    match &config.session_file {
        Some(path) => FileSessionStore::new(path).load_or_create(),
        None => Ok(SessionId::generate()),
    }
}
