pub mod domain;
pub mod ports;
pub mod sync;

pub use domain::{ConnectionId, Edit, EditOutcome, Note, Resolution, SessionSnapshot};
pub use ports::{NoteRepository, PortError, PortResult};
pub use sync::{resolve, Change};
