//! The `Database` module: structured and raw SQL over per-caller databases.
//!
//! Every call resolves the caller's `[database] name` option to a lazily
//! opened connection with its own schema catalog, compiles the request
//! against that catalog and runs it. Reads with a signature go through the
//! result cache; writes invalidate the cached results of the table they touch
//! after they execute, and schema changes refresh the catalog.

mod backend;
mod errors;
mod request;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::Value;
use tracing::{debug, warn};

use lull_config::Settings;
use lull_sql::{
    CacheStore, Compiler, MemcacheConfig, MemcacheStore, MemoryStore, RawFollowUp,
    RawStatement, ResultCache, Row, SchemaCatalog, SchemaSource, Statement, TableRef,
};

use crate::dispatch::DispatchError;
use crate::registry::{CallContext, MethodEntry, Module, ModuleError};
use crate::users::{Authenticator, CallerId, CallerSettings};

pub use self::backend::{Execution, SqlBackend, SqlConnection, SqliteBackend, SqliteConnection};
pub use self::errors::DatabaseError;
pub use self::request::{JoinRequest, OrderRequest, QueryRequest};

pub(crate) const DATABASE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::database");

/// Key prefix of every result cache entry.
pub const CACHE_PREFIX: &str = "lull/database/";

const MODULE_NAME: &str = "database";
const DEFAULT_CACHE_CAPACITY: i64 = 1024;
const DEFAULT_MEMCACHE_PORT: i64 = 11211;
const DEFAULT_MEMCACHE_TIMEOUT_MS: i64 = 500;

/// One open database with its schema catalog.
struct Link {
    name: String,
    connection: Mutex<Box<dyn SqlConnection>>,
    catalog: SchemaCatalog,
}

impl Link {
    fn open(backend: &dyn SqlBackend, name: &str) -> Result<Self, DispatchError> {
        let connection = backend.open(name)?;
        let catalog = SchemaCatalog::new();
        let source: &dyn SchemaSource = &*connection;
        catalog.refresh(source, "", "")?;
        debug!(target: DATABASE_TARGET, database = name, "connection ready");
        Ok(Self {
            name: name.to_owned(),
            connection: Mutex::new(connection),
            catalog,
        })
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.catalog, &self.name)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn SqlConnection>>, DatabaseError> {
        self.connection.lock().map_err(|_| DatabaseError::Poisoned {
            database: self.name.clone(),
        })
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        debug!(target: DATABASE_TARGET, database = %self.name, sql, "query");
        self.lock()?.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<Execution, DatabaseError> {
        debug!(target: DATABASE_TARGET, database = %self.name, sql, "execute");
        self.lock()?.execute(sql, params)
    }

    fn refresh(&self, database: &str, table: &str) -> Result<(), DispatchError> {
        let connection = self.lock()?;
        let source: &dyn SchemaSource = &**connection;
        self.catalog
            .refresh(source, database, table)
            .map_err(DispatchError::from)
    }
}

/// Database module state shared by its methods.
pub struct DatabaseModule {
    auth: Arc<dyn Authenticator>,
    callers: Arc<dyn CallerSettings>,
    backend: OnceLock<Arc<dyn SqlBackend>>,
    cache: OnceLock<ResultCache>,
    links: Mutex<HashMap<String, Arc<Link>>>,
}

impl std::fmt::Debug for DatabaseModule {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DatabaseModule")
            .field("ready", &(self.backend.get().is_some() && self.cache.get().is_some()))
            .field("cache", &self.cache.get())
            .finish_non_exhaustive()
    }
}

impl DatabaseModule {
    /// Creates the module. The backend and cache are chosen at setup unless
    /// supplied beforehand.
    pub fn new(auth: Arc<dyn Authenticator>, callers: Arc<dyn CallerSettings>) -> Self {
        Self {
            auth,
            callers,
            backend: OnceLock::new(),
            cache: OnceLock::new(),
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `backend` instead of the configured SQLite directory.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SqlBackend>) -> Self {
        self.backend = OnceLock::from(backend);
        self
    }

    /// Uses `store` for cached results instead of the configured one.
    #[must_use]
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = OnceLock::from(ResultCache::new(store, CACHE_PREFIX));
        self
    }

    /// Runs a read, serving it from the cache when the signature is known.
    ///
    /// # Errors
    ///
    /// Returns compilation, connection and execution failures.
    pub fn get(&self, context: &CallContext, request: &QueryRequest) -> Result<Vec<Row>, DispatchError> {
        let cache = self.result_cache()?;
        if let Some(rows) = cached(cache, &request.sig) {
            return Ok(rows);
        }
        let link = self.link_for(context, request)?;
        let compiled = link.compiler().select(&request.read())?;
        let rows = link.query(&compiled.sql, &compiled.params)?;
        if let Err(error) = cache.store(
            &rows,
            &request.sig,
            &compiled.target.database,
            &compiled.target.table,
        ) {
            warn!(target: DATABASE_TARGET, %error, sig = %request.sig, "result cache store failed");
        }
        Ok(rows)
    }

    /// Inserts a row, or updates the rows matching the filter.
    ///
    /// Returns the new row id for inserts and the affected row count for
    /// updates.
    ///
    /// # Errors
    ///
    /// Returns compilation, connection and execution failures.
    pub fn put(&self, context: &CallContext, request: &QueryRequest) -> Result<Value, DispatchError> {
        let link = self.link_for(context, request)?;
        let compiled = link.compiler().write(&request.write())?;
        let execution = link.execute(&compiled.sql, &compiled.params)?;
        self.invalidate(&compiled.target);
        Ok(match compiled.statement {
            Statement::Insert(_) => Value::from(execution.last_insert_id),
            _ => Value::from(execution.rows_affected),
        })
    }

    /// Deletes the rows matching the filter and returns their count.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnboundedDelete`] without a filter, and
    /// compilation, connection and execution failures.
    pub fn delete(&self, context: &CallContext, request: &QueryRequest) -> Result<Value, DispatchError> {
        let link = self.link_for(context, request)?;
        let compiled = link.compiler().delete(&request.delete())?;
        let execution = link.execute(&compiled.sql, &compiled.params)?;
        self.invalidate(&compiled.target);
        Ok(Value::from(execution.rows_affected))
    }

    /// Runs a caller-supplied statement.
    ///
    /// Row-returning statements yield their rows, inserts the new row id and
    /// anything else the affected row count. Data changes invalidate cached
    /// results of the named table; schema changes refresh the catalog.
    ///
    /// # Errors
    ///
    /// Returns connection and execution failures, and
    /// [`DispatchError::IdentifierInvalid`] when the statement names an
    /// unknown existing object.
    pub fn query(&self, context: &CallContext, request: &QueryRequest) -> Result<Value, DispatchError> {
        let link = self.link_for(context, request)?;
        let statement = RawStatement::inspect(&request.query)?;
        let plan = link.compiler().plan_raw(&statement)?;
        let result = if plan.returns_rows {
            let rows = link.query(&request.query, &request.parameters)?;
            Value::Array(rows.into_iter().map(Value::Object).collect())
        } else {
            let execution = link.execute(&request.query, &request.parameters)?;
            if plan.is_insert {
                Value::from(execution.last_insert_id)
            } else {
                Value::from(execution.rows_affected)
            }
        };
        let refreshed = match &plan.follow_up {
            RawFollowUp::Nothing => Ok(()),
            RawFollowUp::Invalidate(target) => {
                self.invalidate(target);
                Ok(())
            }
            RawFollowUp::RefreshDatabase(database) => link.refresh(database, ""),
            RawFollowUp::RefreshAll => link.refresh("", ""),
        };
        if let Err(error) = refreshed {
            warn!(target: DATABASE_TARGET, %error, database = %link.name, "schema refresh failed");
        }
        Ok(result)
    }

    fn result_cache(&self) -> Result<&ResultCache, DatabaseError> {
        self.cache.get().ok_or(DatabaseError::NotReady)
    }

    fn invalidate(&self, target: &TableRef) {
        let Some(cache) = self.cache.get() else {
            return;
        };
        if let Err(error) = cache.invalidate(&target.database, &target.table) {
            warn!(target: DATABASE_TARGET, %error, %target, "result cache invalidation failed");
        }
    }

    /// Resolves the connection for the request's authkey, or the caller's.
    fn link_for(&self, context: &CallContext, request: &QueryRequest) -> Result<Arc<Link>, DispatchError> {
        let caller = if request.auth.is_empty() {
            context.caller
        } else {
            self.auth
                .authenticate(&request.auth)
                .map_err(DatabaseError::from)?
        };
        let name = self.database_name(caller)?;
        self.link(&name)
    }

    fn database_name(&self, caller: CallerId) -> Result<String, DatabaseError> {
        let settings = self.callers.settings_for(caller, MODULE_NAME)?;
        settings
            .string("database", "name")
            .ok()
            .filter(|name| !name.is_empty())
            .ok_or(DatabaseError::NoDatabase { caller })
    }

    fn link(&self, name: &str) -> Result<Arc<Link>, DispatchError> {
        let backend = self.backend.get().ok_or(DatabaseError::NotReady)?;
        let mut links = self.links.lock().map_err(|_| DatabaseError::Poisoned {
            database: name.to_owned(),
        })?;
        if let Some(link) = links.get(name) {
            return Ok(Arc::clone(link));
        }
        let link = Arc::new(Link::open(backend.as_ref(), name)?);
        links.insert(name.to_owned(), Arc::clone(&link));
        Ok(link)
    }
}

fn cached(cache: &ResultCache, signature: &str) -> Option<Vec<Row>> {
    match cache.get(signature) {
        Ok(rows) => rows,
        Err(error) => {
            warn!(target: DATABASE_TARGET, %error, sig = signature, "result cache read failed");
            None
        }
    }
}

fn configured_backend(settings: &Settings) -> Result<SqliteBackend, DatabaseError> {
    let data = settings.string_or("directories", "data", ".")?;
    let fallback = Utf8PathBuf::from(data).join("databases");
    let directory = settings.string_or("sqlite", "directory", fallback.as_str())?;
    Ok(SqliteBackend::new(directory))
}

fn configured_cache(settings: &Settings) -> Result<Arc<dyn CacheStore>, ModuleError> {
    let kind = settings.string_or("cache", "backend", "memory")?;
    match kind.to_ascii_lowercase().as_str() {
        "memory" => {
            let capacity = settings.integer_or("cache", "capacity", DEFAULT_CACHE_CAPACITY)?;
            let capacity = usize::try_from(capacity)
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| format!("[cache] capacity must be positive, got {capacity}"))?;
            Ok(Arc::new(MemoryStore::new(capacity)))
        }
        "memcache" | "memcached" => {
            let port = settings.integer_or("cache", "port", DEFAULT_MEMCACHE_PORT)?;
            let timeout = settings.integer_or("cache", "timeout_ms", DEFAULT_MEMCACHE_TIMEOUT_MS)?;
            let config = MemcacheConfig {
                host: settings.string_or("cache", "address", "127.0.0.1")?,
                port: u16::try_from(port).map_err(|_| format!("[cache] port {port} is out of range"))?,
                timeout: Duration::from_millis(
                    u64::try_from(timeout)
                        .map_err(|_| format!("[cache] timeout_ms {timeout} is negative"))?,
                ),
            };
            Ok(Arc::new(MemcacheStore::new(config)))
        }
        other => Err(format!("unknown cache backend '{other}'").into()),
    }
}

impl Module for DatabaseModule {
    fn name(&self) -> &'static str {
        "Database"
    }

    fn setup(&self, settings: &Settings) -> Result<(), ModuleError> {
        if self.backend.get().is_none() {
            let backend = configured_backend(settings)?;
            debug!(
                target: DATABASE_TARGET,
                directory = %backend.directory(),
                "using sqlite backend"
            );
            self.backend.get_or_init(|| Arc::new(backend));
        }
        if self.cache.get().is_none() {
            let store = configured_cache(settings)?;
            self.cache
                .get_or_init(|| ResultCache::new(store, CACHE_PREFIX));
        }
        Ok(())
    }

    fn methods(self: Arc<Self>) -> Vec<MethodEntry> {
        let get = Arc::clone(&self);
        let put = Arc::clone(&self);
        let delete = Arc::clone(&self);
        let query = self;
        vec![
            MethodEntry::record("Get", move |context: &CallContext, request: QueryRequest| {
                get.get(context, &request)
            }),
            MethodEntry::record("Put", move |context: &CallContext, request: QueryRequest| {
                put.put(context, &request)
            }),
            MethodEntry::record("Delete", move |context: &CallContext, request: QueryRequest| {
                delete.delete(context, &request)
            }),
            MethodEntry::record("Query", move |context: &CallContext, request: QueryRequest| {
                query.query(context, &request)
            }),
        ]
    }
}
