//! Session context: who is logged in and with which credential.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identity and credential of the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub tenant_code: Option<String>,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Session {
    pub fn authenticated(
        tenant_code: impl Into<String>,
        user_code: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            tenant_code: Some(tenant_code.into()),
            user_code: Some(user_code.into()),
            access_token: Some(access_token.into()),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::default()
    }

    /// Access token, if one is present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Source of the current session.
pub trait SessionContext: Send + Sync {
    fn current(&self) -> Session;
}

/// Session read from the credential blob the host application persists.
///
/// The file is read on every call so logins and logouts are picked up
/// without restarting the pipeline. A missing or unreadable file means no
/// one is logged in.
pub struct StoredSession {
    path: PathBuf,
}

impl StoredSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionContext for StoredSession {
    fn current(&self) -> Session {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No stored session");
                return Session::unauthenticated();
            }
        };

        match serde_json::from_str::<Option<Session>>(&contents) {
            Ok(Some(session)) => session,
            Ok(None) => Session::unauthenticated(),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Unreadable stored session");
                Session::unauthenticated()
            }
        }
    }
}

/// In-process session the host updates on login and logout.
#[derive(Default)]
pub struct StaticSession {
    inner: RwLock<Session>,
}

impl StaticSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: RwLock::new(session),
        }
    }

    pub fn set(&self, session: Session) {
        match self.inner.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

impl SessionContext for StaticSession {
    fn current(&self) -> Session {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_token_is_unauthenticated() {
        let session = Session {
            access_token: Some(String::new()),
            ..Session::default()
        };
        assert!(!session.is_authenticated());
        assert!(Session::authenticated("t", "u", "tok").is_authenticated());
    }

    #[test]
    fn test_stored_session_reads_fresh() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tenant_code":"t1","user_code":"u1","access_token":"abc","nickname":"x"}}"#
        )
        .unwrap();

        let context = StoredSession::new(file.path());
        let session = context.current();
        assert_eq!(session.tenant_code.as_deref(), Some("t1"));
        assert_eq!(session.token(), Some("abc"));

        std::fs::write(file.path(), "null").unwrap();
        assert!(!context.current().is_authenticated());
    }

    #[test]
    fn test_stored_session_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let context = StoredSession::new(dir.path().join("absent.json"));
        assert_eq!(context.current(), Session::unauthenticated());
    }

    #[test]
    fn test_static_session_update() {
        let context = StaticSession::default();
        assert!(!context.current().is_authenticated());

        context.set(Session::authenticated("t", "u", "tok"));
        assert_eq!(context.current().user_code.as_deref(), Some("u"));
    }
}
