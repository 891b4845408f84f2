//! Identifier and credential generation for gateway sessions.

use std::fmt;

use uuid::Uuid;

/// Length of the opaque signature attached to every session.
pub const SIGNATURE_LEN: usize = 32;

/// Unique identifier for a client session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Random bytes for a session signature.
///
/// Falls back to uuid entropy if the OS source is unavailable.
pub fn signature() -> Vec<u8> {
    let mut bytes = [0u8; SIGNATURE_LEN];
    if getrandom::fill(&mut bytes).is_err() {
        for chunk in bytes.chunks_mut(16) {
            let id = Uuid::new_v4();
            chunk.copy_from_slice(&id.as_bytes()[..chunk.len()]);
        }
    }
    bytes.to_vec()
}

/// Opaque identifier reported as the session's branch.
pub fn branch_id() -> String {
    Uuid::new_v4().simple().to_string()
}
