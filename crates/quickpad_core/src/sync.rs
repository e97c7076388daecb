//! crates/quickpad_core/src/sync.rs
//!
//! The version-gated last-write-wins policy, free of any locking or I/O.
//!
//! An edit is judged only by how its base version compares with the session's
//! current version. Nothing is ever rejected for being concurrent: a stale edit
//! still wins on arrival order, it is merely flagged as a rebase so that every
//! participant re-syncs to the result.

use crate::domain::Resolution;
use crate::ports::{PortError, PortResult};

/// Decides how an edit built on `base_version` lands on a session at `current_version`.
pub fn resolve(current_version: u64, base_version: u64) -> PortResult<Resolution> {
    if base_version == current_version {
        Ok(Resolution::Clean)
    } else if base_version < current_version {
        Ok(Resolution::Rebase)
    } else {
        Err(PortError::InvalidState(format!(
            "edit references version {} but the session is at {}",
            base_version, current_version
        )))
    }
}

/// The payload of an edit: a whole new document or a splice into the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Replace(String),
    /// Offsets and lengths are counted in characters, not bytes.
    Splice {
        offset: usize,
        remove: usize,
        insert: String,
    },
}

impl Change {
    /// Produces the new authoritative content. A splice that reaches past the end
    /// of `current` is a protocol violation.
    pub fn apply(&self, current: &str) -> PortResult<String> {
        match self {
            Change::Replace(text) => Ok(text.clone()),
            Change::Splice {
                offset,
                remove,
                insert,
            } => {
                let len = current.chars().count();
                let end = offset.checked_add(*remove).filter(|end| *end <= len);
                let Some(end) = end else {
                    return Err(PortError::InvalidState(format!(
                        "splice {}+{} is out of range for content of length {}",
                        offset, remove, len
                    )));
                };
                let start_byte = char_to_byte(current, *offset);
                let end_byte = char_to_byte(current, end);

                let mut out = String::with_capacity(current.len() - (end_byte - start_byte) + insert.len());
                out.push_str(&current[..start_byte]);
                out.push_str(insert);
                out.push_str(&current[end_byte..]);
                Ok(out)
            }
        }
    }
}

fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn matching_base_is_clean() {
        assert_eq!(resolve(3, 3), Ok(Resolution::Clean));
        assert_eq!(resolve(0, 0), Ok(Resolution::Clean));
    }

    #[test]
    fn stale_base_is_rebase() {
        assert_eq!(resolve(2, 0), Ok(Resolution::Rebase));
    }

    #[test]
    fn future_base_is_invalid_state() {
        assert_matches!(resolve(1, 2), Err(PortError::InvalidState(_)));
    }

    #[test]
    fn replace_ignores_current_content() {
        let change = Change::Replace("hi".to_string());
        assert_eq!(change.apply("hello").unwrap(), "hi");
    }

    #[test]
    fn splice_inserts_and_removes_by_character() {
        let change = Change::Splice {
            offset: 1,
            remove: 2,
            insert: "ü".to_string(),
        };
        assert_eq!(change.apply("héllo").unwrap(), "hülo");

        let append = Change::Splice {
            offset: 5,
            remove: 0,
            insert: "!".to_string(),
        };
        assert_eq!(append.apply("hello").unwrap(), "hello!");
    }

    #[test]
    fn splice_past_the_end_is_rejected() {
        let change = Change::Splice {
            offset: 4,
            remove: 2,
            insert: String::new(),
        };
        assert_matches!(change.apply("hello"), Err(PortError::InvalidState(_)));

        let overflow = Change::Splice {
            offset: usize::MAX,
            remove: 1,
            insert: String::new(),
        };
        assert_matches!(overflow.apply(""), Err(PortError::InvalidState(_)));
    }
}
