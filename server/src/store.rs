//! User storage
//!
//! The session core only needs two operations from persistent storage: look a
//! user up by credentials and create one. [`MemoryUserStore`] keeps users in
//! memory and can mirror them to a bincode file so accounts survive restarts.

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type UserId = i32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username {0:?} is taken")]
    UsernameTaken(String),
    #[error("username and password must be non-empty")]
    InvalidInput,
    #[error("user file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("user file encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

pub trait UserStore: Send + Sync {
    fn find_user(&self, username: &str, password: &str) -> Option<User>;
    fn create_user(&self, username: &str, password: &str) -> Result<User, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserTable {
    next_id: UserId,
    users: Vec<User>,
}

#[derive(Debug)]
pub struct MemoryUserStore {
    table: Mutex<UserTable>,
    path: Option<PathBuf>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(UserTable {
                next_id: 1,
                users: Vec::new(),
            }),
            path: None,
        }
    }

    /// Opens a file-backed store. A missing file starts an empty table.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let table = match std::fs::read(path) {
            Ok(bytes) => bincode::deserialize::<UserTable>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No user file at {}, starting empty", path.display());
                UserTable {
                    next_id: 1,
                    users: Vec::new(),
                }
            }
            Err(e) => return Err(e.into()),
        };
        info!("Loaded {} user(s) from {}", table.users.len(), path.display());

        Ok(Self {
            table: Mutex::new(table),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.table.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, table: &UserTable) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            std::fs::write(path, bincode::serialize(table)?)?;
        }
        Ok(())
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    fn find_user(&self, username: &str, password: &str) -> Option<User> {
        self.table
            .lock()
            .users
            .iter()
            .find(|user| user.username == username && user.password == password)
            .cloned()
    }

    fn create_user(&self, username: &str, password: &str) -> Result<User, StoreError> {
        if username.is_empty() || password.is_empty() {
            return Err(StoreError::InvalidInput);
        }

        let mut table = self.table.lock();
        if table.users.iter().any(|user| user.username == username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        let user = User {
            id: table.next_id,
            username: username.to_string(),
            password: password.to_string(),
        };
        table.next_id += 1;
        table.users.push(user.clone());

        if let Err(e) = self.persist(&table) {
            table.users.pop();
            table.next_id -= 1;
            return Err(e);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find() {
        let store = MemoryUserStore::new();
        let ann = store.create_user("ann", "secret").unwrap();
        let bob = store.create_user("bob", "hunter2").unwrap();

        assert_eq!(ann.id, 1);
        assert_eq!(bob.id, 2);
        assert_eq!(store.find_user("ann", "secret"), Some(ann));
        assert_eq!(store.find_user("ann", "wrong"), None);
        assert_eq!(store.find_user("nobody", "secret"), None);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = MemoryUserStore::new();
        store.create_user("ann", "a").unwrap();

        assert!(matches!(
            store.create_user("ann", "b"),
            Err(StoreError::UsernameTaken(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let store = MemoryUserStore::new();
        assert!(matches!(store.create_user("", "pw"), Err(StoreError::InvalidInput)));
        assert!(matches!(store.create_user("ann", ""), Err(StoreError::InvalidInput)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_backed_store_survives_reload() {
        let path = std::env::temp_dir().join(format!("arena-users-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let store = MemoryUserStore::load(&path).unwrap();
            store.create_user("ann", "secret").unwrap();
        }

        let reloaded = MemoryUserStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.find_user("ann", "secret").map(|u| u.id), Some(1));
        assert_eq!(reloaded.create_user("bob", "pw").unwrap().id, 2);

        std::fs::remove_file(&path).unwrap();
    }
}
