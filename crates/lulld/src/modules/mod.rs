//! Built-in modules.

pub mod auth;
pub mod database;

use std::sync::Arc;

pub use self::auth::AuthModule;
pub use self::database::{DatabaseError, DatabaseModule, QueryRequest, SqlBackend, SqliteBackend};

use crate::registry::ModuleRegistry;
use crate::users::{Authenticator, CallerSettings, UserStore};

/// Registers `Auth` and `Database`, the latter backed by `users`.
pub fn register_builtin(registry: &mut ModuleRegistry, users: &Arc<UserStore>) {
    let auth: Arc<dyn Authenticator> = users.clone();
    let callers: Arc<dyn CallerSettings> = users.clone();
    registry
        .register(Arc::new(AuthModule::new()))
        .register(Arc::new(DatabaseModule::new(auth, callers)));
}
