//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use quickpad_core::ports::NoteRepository;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::sync::{AccessGate, SessionRegistry};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn NoteRepository>,
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub gate: Arc<AccessGate>,
    /// Cancelled when the server shuts down; open sockets close on it.
    pub shutdown: CancellationToken,
    /// Every upgraded WebSocket task, so shutdown can wait for their leaves.
    pub connections: TaskTracker,
}

impl AppState {
    /// Wires the synchronization core around one repository.
    pub fn new(db: Arc<dyn NoteRepository>, config: Arc<Config>) -> Self {
        let registry = Arc::new(SessionRegistry::new(db.clone(), config.flush_policy));
        let gate = Arc::new(AccessGate::new(db.clone()));
        Self {
            db,
            config,
            registry,
            gate,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }
}
