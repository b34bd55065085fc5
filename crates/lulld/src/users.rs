//! Caller identities and per-caller module options.
//!
//! The daemon keeps its users in a small SQLite file under the data
//! directory. [`Authenticator`] and [`CallerSettings`] are the two views the
//! dispatcher and the modules need; [`MemoryUsers`] backs both in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use camino::Utf8Path;
use lull_config::Settings;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

const USERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::users");

/// File name of the user store below the data directory.
pub const USERS_FILE: &str = "users.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        authkey TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS user_conf (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        module TEXT NOT NULL,
        section TEXT NOT NULL,
        option TEXT NOT NULL,
        value,
        PRIMARY KEY (user_id, module, section, option)
    );
";

/// Identity of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(i64);

impl CallerId {
    /// Wraps a raw user id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw user id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "user#{}", self.0)
    }
}

/// Errors raised by user lookups.
#[derive(Debug, Error)]
pub enum UserStoreError {
    /// No user holds the authkey.
    #[error("no user holds the supplied authkey")]
    UnknownAuthkey,
    /// No user has the id.
    #[error("user {id} does not exist")]
    UnknownUser {
        /// Requested id.
        id: CallerId,
    },
    /// The backing database failed.
    #[error("user store failure: {0}")]
    Storage(#[from] rusqlite::Error),
    /// A thread panicked while holding the store lock.
    #[error("user store lock poisoned")]
    Poisoned,
}

/// Resolves authkeys to callers.
pub trait Authenticator: Send + Sync {
    /// Looks up the caller holding `authkey`.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::UnknownAuthkey`] when nobody holds it.
    fn authenticate(&self, authkey: &str) -> Result<CallerId, UserStoreError>;
}

/// Per-caller option overrides for one module.
pub trait CallerSettings: Send + Sync {
    /// Options stored for `caller` under `module`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read.
    fn settings_for(&self, caller: CallerId, module: &str) -> Result<Settings, UserStoreError>;
}

/// SQLite-backed user store.
#[derive(Debug)]
pub struct UserStore {
    connection: Mutex<Connection>,
}

impl UserStore {
    /// Opens (creating if needed) `<data_dir>/users.db`.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the file cannot be opened or
    /// the schema cannot be created.
    pub fn open(data_dir: &Utf8Path) -> Result<Self, UserStoreError> {
        let path = data_dir.join(USERS_FILE);
        debug!(target: USERS_TARGET, %path, "opening user store");
        Self::with_connection(Connection::open(path.as_std_path())?)
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the schema cannot be created.
    pub fn in_memory() -> Result<Self, UserStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, UserStoreError> {
        connection.pragma_update(None, "foreign_keys", true)?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, UserStoreError> {
        self.connection.lock().map_err(|_| UserStoreError::Poisoned)
    }

    /// Creates a user holding `authkey`.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the key is already taken.
    pub fn add_user(&self, authkey: &str) -> Result<CallerId, UserStoreError> {
        let connection = self.lock()?;
        connection.execute("INSERT INTO users (authkey) VALUES (?1)", params![authkey])?;
        Ok(CallerId(connection.last_insert_rowid()))
    }

    /// Creates a user with a fresh random authkey and returns both.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the insert fails.
    pub fn create_user(&self) -> Result<(CallerId, String), UserStoreError> {
        let authkey = hex::encode(rand::random::<[u8; 20]>());
        let id = self.add_user(&authkey)?;
        Ok((id, authkey))
    }

    /// Removes a user and their options.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::UnknownUser`] when the id does not exist.
    pub fn remove_user(&self, id: CallerId) -> Result<(), UserStoreError> {
        let connection = self.lock()?;
        connection.execute("DELETE FROM user_conf WHERE user_id = ?1", params![id.0])?;
        match connection.execute("DELETE FROM users WHERE id = ?1", params![id.0])? {
            0 => Err(UserStoreError::UnknownUser { id }),
            _ => Ok(()),
        }
    }

    /// All users in id order.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the query fails.
    pub fn list(&self) -> Result<Vec<(CallerId, String)>, UserStoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare("SELECT id, authkey FROM users ORDER BY id ASC")?;
        let users = statement
            .query_map([], |row| Ok((CallerId(row.get(0)?), row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Stores one option for `caller`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the write fails, including
    /// for unknown callers.
    pub fn set_option(
        &self,
        caller: CallerId,
        module: &str,
        section: &str,
        option: &str,
        value: &str,
    ) -> Result<(), UserStoreError> {
        self.lock()?.execute(
            "INSERT INTO user_conf (user_id, module, section, option, value)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, module, section, option) DO UPDATE SET value = excluded.value",
            params![caller.0, module, section, option, value],
        )?;
        Ok(())
    }

    /// Deletes options for `caller`; empty arguments widen the scope.
    ///
    /// # Errors
    ///
    /// Returns [`UserStoreError::Storage`] when the delete fails.
    pub fn delete_options(
        &self,
        caller: CallerId,
        module: &str,
        section: &str,
        option: &str,
    ) -> Result<usize, UserStoreError> {
        let deleted = self.lock()?.execute(
            "DELETE FROM user_conf WHERE user_id = ?1
               AND (?2 = '' OR module = ?2)
               AND (?3 = '' OR section = ?3)
               AND (?4 = '' OR option = ?4)",
            params![caller.0, module, section, option],
        )?;
        Ok(deleted)
    }
}

impl Authenticator for UserStore {
    fn authenticate(&self, authkey: &str) -> Result<CallerId, UserStoreError> {
        self.lock()?
            .query_row(
                "SELECT id FROM users WHERE authkey = ?1",
                params![authkey],
                |row| row.get(0),
            )
            .optional()?
            .map(CallerId)
            .ok_or(UserStoreError::UnknownAuthkey)
    }
}

impl CallerSettings for UserStore {
    fn settings_for(&self, caller: CallerId, module: &str) -> Result<Settings, UserStoreError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT section, option, value FROM user_conf WHERE user_id = ?1 AND module = ?2",
        )?;
        let mut rows = statement.query(params![caller.0, module.to_ascii_lowercase()])?;
        let mut settings = Settings::new();
        while let Some(row) = rows.next()? {
            let section: String = row.get(0)?;
            let option: String = row.get(1)?;
            match row.get_ref(2)? {
                ValueRef::Integer(value) => settings.set(&section, &option, value),
                ValueRef::Real(value) => settings.set(&section, &option, value),
                ValueRef::Text(text) | ValueRef::Blob(text) => {
                    settings.set(&section, &option, String::from_utf8_lossy(text).into_owned());
                }
                ValueRef::Null => {}
            }
        }
        Ok(settings)
    }
}

/// In-memory users for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryUsers {
    keys: BTreeMap<String, CallerId>,
    options: BTreeMap<(CallerId, String), Settings>,
}

impl MemoryUsers {
    /// Creates an empty set of users.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user holding `authkey`.
    #[must_use]
    pub fn with_user(mut self, id: i64, authkey: &str) -> Self {
        self.keys.insert(authkey.to_owned(), CallerId(id));
        self
    }

    /// Sets an option for user `id` under `module`.
    #[must_use]
    pub fn with_option(
        mut self,
        id: i64,
        module: &str,
        section: &str,
        option: &str,
        value: &str,
    ) -> Self {
        self.options
            .entry((CallerId(id), module.to_ascii_lowercase()))
            .or_default()
            .set(section, option, value);
        self
    }
}

impl Authenticator for MemoryUsers {
    fn authenticate(&self, authkey: &str) -> Result<CallerId, UserStoreError> {
        self.keys
            .get(authkey)
            .copied()
            .ok_or(UserStoreError::UnknownAuthkey)
    }
}

impl CallerSettings for MemoryUsers {
    fn settings_for(&self, caller: CallerId, module: &str) -> Result<Settings, UserStoreError> {
        Ok(self
            .options
            .get(&(caller, module.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn store() -> UserStore {
        UserStore::in_memory().expect("in-memory store")
    }

    #[rstest]
    fn authenticates_known_keys_only(store: UserStore) {
        let id = store.add_user("k1").expect("add user");
        assert_eq!(store.authenticate("k1").expect("known key"), id);
        assert!(matches!(
            store.authenticate("k2"),
            Err(UserStoreError::UnknownAuthkey)
        ));
    }

    #[rstest]
    fn generated_keys_are_unique_hex(store: UserStore) {
        let (first, first_key) = store.create_user().expect("first");
        let (second, second_key) = store.create_user().expect("second");
        assert_ne!(first, second);
        assert_ne!(first_key, second_key);
        assert_eq!(first_key.len(), 40);
        assert!(first_key.bytes().all(|byte| byte.is_ascii_hexdigit()));
    }

    #[rstest]
    fn options_are_scoped_per_module_and_replaced(store: UserStore) {
        let id = store.add_user("k1").expect("add user");
        store
            .set_option(id, "database", "database", "name", "shop")
            .expect("set");
        store
            .set_option(id, "database", "database", "name", "archive")
            .expect("replace");
        store
            .set_option(id, "email", "smtp", "host", "mail")
            .expect("other module");

        let settings = store.settings_for(id, "Database").expect("settings");
        assert_eq!(settings.string("database", "name").expect("name"), "archive");
        assert!(!settings.contains("smtp", "host"));
    }

    #[rstest]
    fn deleting_options_widens_with_empty_scopes(store: UserStore) {
        let id = store.add_user("k1").expect("add user");
        store.set_option(id, "database", "a", "x", "1").expect("set");
        store.set_option(id, "database", "b", "y", "2").expect("set");
        store.set_option(id, "email", "c", "z", "3").expect("set");

        assert_eq!(store.delete_options(id, "database", "a", "").expect("delete"), 1);
        assert_eq!(store.delete_options(id, "", "", "").expect("delete rest"), 2);
    }

    #[rstest]
    fn removing_users_drops_their_options(store: UserStore) {
        let id = store.add_user("k1").expect("add user");
        store.set_option(id, "database", "a", "x", "1").expect("set");
        store.remove_user(id).expect("remove");

        assert!(store.list().expect("list").is_empty());
        assert!(store.settings_for(id, "database").expect("settings").is_empty());
        assert!(matches!(
            store.remove_user(id),
            Err(UserStoreError::UnknownUser { .. })
        ));
    }

    #[rstest]
    fn opens_a_file_under_the_data_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let data_dir = Utf8Path::from_path(dir.path()).expect("utf8 path");
        let id = UserStore::open(data_dir)
            .expect("open")
            .add_user("k1")
            .expect("add user");

        let reopened = UserStore::open(data_dir).expect("reopen");
        assert_eq!(reopened.authenticate("k1").expect("persisted"), id);
    }

    #[rstest]
    fn memory_users_mirror_the_store() {
        let users = MemoryUsers::new()
            .with_user(7, "seven")
            .with_option(7, "Database", "database", "name", "shop");
        let caller = users.authenticate("seven").expect("known");
        assert_eq!(caller, CallerId::new(7));
        let settings = users.settings_for(caller, "database").expect("settings");
        assert_eq!(settings.string("database", "name").expect("name"), "shop");
    }
}
