use std::fmt;

use crate::auth::Credentials;

/// Identity of a pooled connection: one backend connection per
/// (username, secret, target database, session id).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    username: String,
    secret: String,
    database: String,
    session_id: String,
}

impl PoolKey {
    pub fn new(credentials: &Credentials, database: &str, session_id: &str) -> Self {
        Self {
            username: credentials.username().to_string(),
            secret: credentials.secret().to_string(),
            database: database.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolKey")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("database", &self.database)
            .field("session_id", &self.session_id)
            .finish()
    }
}
