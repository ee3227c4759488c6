// Virtual catalog: registered data sources, users and privileges
pub mod schema;
pub mod metastore;
pub mod introspect;
pub mod context;
mod show;

pub use context::CatalogContext;
pub use metastore::MetaStore;
pub use schema::{LikePattern, NamePart, SchemaTree, TableRef, DEFAULT_SCHEMA};

use crate::admin::command::SystemPrivilege;
use crate::{OctopusError, Result};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Which part of a data source a refresh replaces.
#[derive(Debug, Clone, Copy)]
pub enum RefreshScope<'a> {
    All,
    Schemas { pattern: &'a str },
    Tables { schema: &'a str, pattern: &'a str },
}

/// Process-wide catalog shared by every session.
///
/// The schema tree sits behind one reader/writer lock. Validation holds the
/// read lock; registering, dropping or refreshing a data source introspects
/// the backend without the lock and takes the write lock only to swap the
/// result in. The metastore has its own mutex, always taken after the
/// schema lock and never before it.
///
/// User, role, privilege and comment changes take only the metastore mutex.
/// Statement validation reads nothing but the schema tree, so those changes
/// cannot race with it. Only data source changes, which rewrite the tree,
/// need the write lock.
pub struct Catalog {
    schema: RwLock<SchemaTree>,
    meta: Mutex<MetaStore>,
    active_contexts: AtomicUsize,
}

impl Catalog {
    /// Create a catalog holding only the bootstrap user.
    pub fn new(superuser: &str, password: &str) -> Self {
        let mut meta = MetaStore::new();
        let bootstrap = meta
            .create_user(superuser, password)
            .and_then(|_| meta.grant_system_privileges(&SystemPrivilege::ALL, &[superuser.to_string()]));
        match bootstrap {
            Ok(()) => info!("catalog initialised with superuser {}", superuser),
            Err(e) => warn!("failed to create superuser {}: {}", superuser, e),
        }
        Catalog {
            schema: RwLock::new(SchemaTree::new()),
            meta: Mutex::new(meta),
            active_contexts: AtomicUsize::new(0),
        }
    }

    /// Acquire the schema read lock. Hold it only for synchronous work.
    pub fn read_schema(&self) -> RwLockReadGuard<'_, SchemaTree> {
        self.schema.read()
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, MetaStore> {
        self.meta.lock()
    }

    pub fn password_of(&self, user: &str) -> Option<String> {
        self.meta.lock().user(user).map(|u| u.password.clone())
    }

    /// Open the per-session view of the catalog. The returned context is
    /// released when its last clone is dropped.
    pub fn open_context(self: &Arc<Self>, user: &str) -> CatalogContext {
        self.active_contexts.fetch_add(1, Ordering::SeqCst);
        CatalogContext::new(Arc::clone(self), user)
    }

    pub(crate) fn release_context(&self) {
        self.active_contexts.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of session contexts that have not been released.
    pub fn active_contexts(&self) -> usize {
        self.active_contexts.load(Ordering::SeqCst)
    }

    fn data_source_not_found(name: &str) -> OctopusError {
        OctopusError::UndefinedObject(format!("data source \"{name}\" does not exist"))
    }

    pub fn add_data_source(&self, name: &str, url: &str, driver: Option<&str>) -> Result<()> {
        if self.schema.read().contains(name) {
            return Err(OctopusError::DuplicateObject(format!("data source \"{name}\" already exists")));
        }
        let driver = introspect::resolve_driver(url, driver)?;
        let info = introspect::introspect(name, url, &driver)?;

        let mut tree = self.schema.write();
        if tree.contains(name) {
            return Err(OctopusError::DuplicateObject(format!("data source \"{name}\" already exists")));
        }
        let tables: usize = info.schemas.values().map(|s| s.tables.len()).sum();
        tree.insert(info);
        drop(tree);

        info!("data source {} registered ({} tables) from {}", name, tables, url);
        Ok(())
    }

    pub fn drop_data_source(&self, name: &str) -> Result<()> {
        let removed = self.schema.write().remove(name);
        if removed.is_none() {
            return Err(Self::data_source_not_found(name));
        }
        self.meta.lock().forget_data_source(name);
        info!("data source {} dropped", name);
        Ok(())
    }

    /// Re-read a data source from its backend and replace the part of the
    /// tree selected by `scope`.
    pub fn refresh_data_source(&self, name: &str, scope: RefreshScope<'_>) -> Result<()> {
        let (url, driver) = {
            let tree = self.schema.read();
            let ds = tree.data_source(name).ok_or_else(|| Self::data_source_not_found(name))?;
            (ds.url.clone(), ds.driver.clone())
        };
        let fresh = introspect::introspect(name, &url, &driver)?;

        let mut tree = self.schema.write();
        let current = tree.data_source_mut(name).ok_or_else(|| Self::data_source_not_found(name))?;
        match scope {
            RefreshScope::All => *current = fresh,
            RefreshScope::Schemas { pattern } => {
                let pattern = LikePattern::new(pattern)?;
                current.schemas.retain(|schema, _| !pattern.is_match(schema));
                current.schemas.extend(
                    fresh
                        .schemas
                        .into_iter()
                        .filter(|(schema, _)| pattern.is_match(schema)),
                );
            }
            RefreshScope::Tables { schema, pattern } => {
                let pattern = LikePattern::new(pattern)?;
                let fresh_schema = fresh.schemas.get(schema);
                let Some(current_schema) = current.schemas.get_mut(schema) else {
                    return Err(OctopusError::UndefinedObject(format!(
                        "schema \"{name}.{schema}\" does not exist"
                    )));
                };
                current_schema.tables.retain(|table, _| !pattern.is_match(table));
                if let Some(fresh_schema) = fresh_schema {
                    current_schema.tables.extend(
                        fresh_schema
                            .tables
                            .iter()
                            .filter(|(table, _)| pattern.is_match(table))
                            .map(|(k, v)| (k.clone(), v.clone())),
                    );
                }
            }
        }
        drop(tree);

        info!("data source {} refreshed ({:?})", name, scope);
        Ok(())
    }
}
