pub mod connection;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the binary needs to build the router.
pub use rest::{create_note_handler, get_note_handler, health_handler, update_note_handler};
pub use ws_handler::ws_handler;
