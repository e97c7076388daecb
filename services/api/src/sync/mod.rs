//! services/api/src/sync/mod.rs
//!
//! The realtime synchronization core: who may open a note, the one live
//! session per note, how edits to it are resolved, and how its content gets
//! back to the repository.

pub mod engine;
pub mod flush;
pub mod gate;
pub mod registry;

pub use flush::{save_with_retry, start_flusher};
pub use gate::{AccessDecision, AccessGate};
pub use registry::SessionRegistry;
