//! Session identity and the key-value store it is read from.
//!
//! The authentication flow (outside this workspace) writes a handful of keys
//! into a persistent store; the sync layer only reads them.

use crate::error::SessionError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const USER_EMAIL: &str = "userEmail";
pub const USER_ID: &str = "userID";
pub const STUDENT_ID: &str = "studentID";
pub const TEACHER_ID: &str = "teacherID";
pub const USER_ROLE: &str = "userRole";

/// Opaque key-value store holding the logged-in session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// Role of the logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "faculty" | "teacher" => Ok(Self::Faculty),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who is logged in, as far as the sync layer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub role: Role,
    pub email: Option<String>,
}

impl SessionIdentity {
    /// Resolve the identity from the store.
    ///
    /// Returns `None` unless both a role and a non-empty user id are present.
    /// The generic `userID` wins; otherwise the role-specific id key is used.
    pub fn resolve(store: &dyn SessionStore) -> Option<Self> {
        let role = store.get(USER_ROLE)?.parse::<Role>().ok()?;
        let user_id = store
            .get(USER_ID)
            .or_else(|| match role {
                Role::Student => store.get(STUDENT_ID),
                Role::Faculty => store.get(TEACHER_ID),
                Role::Admin => None,
            })
            .filter(|id| !id.trim().is_empty())?;

        Some(Self {
            user_id,
            role,
            email: store.get(USER_EMAIL),
        })
    }
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Session store persisted as a flat JSON object on disk.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileSessionStore {
    /// Open the store at `path`. A missing file is an empty session.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str::<BTreeMap<String, String>>(&contents)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("student".parse::<Role>(), Ok(Role::Student));
        assert_eq!("Faculty".parse::<Role>(), Ok(Role::Faculty));
        assert_eq!("teacher".parse::<Role>(), Ok(Role::Faculty));
        assert_eq!(" ADMIN ".parse::<Role>(), Ok(Role::Admin));
        assert!("registrar".parse::<Role>().is_err());
    }

    #[test]
    fn test_identity_requires_role_and_id() {
        let store = MemorySessionStore::new();
        assert!(SessionIdentity::resolve(&store).is_none());

        store.set(USER_ROLE, "student").unwrap();
        assert!(SessionIdentity::resolve(&store).is_none());

        store.set(USER_ID, "  ").unwrap();
        assert!(SessionIdentity::resolve(&store).is_none());

        store.set(USER_ID, "42").unwrap();
        let identity = SessionIdentity::resolve(&store).unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.role, Role::Student);
        assert_eq!(identity.email, None);
    }

    #[test]
    fn test_identity_falls_back_to_role_specific_id() {
        let store = MemorySessionStore::with_entries([
            (USER_ROLE, "faculty"),
            (TEACHER_ID, "T-9"),
            (STUDENT_ID, "S-1"),
            (USER_EMAIL, "prof@uni.edu"),
        ]);
        let identity = SessionIdentity::resolve(&store).unwrap();
        assert_eq!(identity.user_id, "T-9");
        assert_eq!(identity.role, Role::Faculty);
        assert_eq!(identity.email.as_deref(), Some("prof@uni.edu"));
    }

    #[test]
    fn test_admin_needs_generic_user_id() {
        let store = MemorySessionStore::with_entries([(USER_ROLE, "admin"), (TEACHER_ID, "T-1")]);
        assert!(SessionIdentity::resolve(&store).is_none());
    }

    #[test]
    fn test_file_store_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileSessionStore::load(&path).unwrap();
        assert!(store.get(USER_ID).is_none());
        store.set(USER_ID, "17").unwrap();
        store.set(USER_ROLE, "student").unwrap();

        let reloaded = FileSessionStore::load(&path).unwrap();
        assert_eq!(reloaded.get(USER_ID).as_deref(), Some("17"));
        reloaded.remove(USER_ID).unwrap();

        let again = FileSessionStore::load(&path).unwrap();
        assert!(again.get(USER_ID).is_none());
        assert_eq!(again.get(USER_ROLE).as_deref(), Some("student"));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileSessionStore::load(&path),
            Err(SessionError::Serde(_))
        ));
    }
}
