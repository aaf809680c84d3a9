//! Catalog of tables and secondary indexes
//!
//! # Architecture
//!
//! ```text
//! Database (root directory, config.dat)
//!   └─→ Table (data storage instance)
//!        └─→ Index (own storage instance, back-reference to its table)
//! ```
//!
//! The config record is the source of truth for *which* tables and indexes
//! exist; the storage instances are the source of truth for their contents.
//! Structural changes (create/drop) serialize on one mutex that also covers
//! the config rewrite, so memory and disk agree between mutations. Document
//! reads and writes go straight to the storage instances.

pub mod config;
pub mod opener;

pub use self::config::{DatabaseConfig, IndexConfig, TableConfig, CONFIG_FILE};
pub use self::opener::{DatabaseOptions, OpenMode, Opener};

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{info, instrument};

use crate::error::{Entity, Error, ErrorKind, Result};
use crate::metrics;
use crate::name::Name;
use crate::storage::{SlabError, StorageInstance};

/// An open document database.
///
/// Holds the directory lock of every table and index instance until dropped.
pub struct Database {
    path: PathBuf,
    opener: Opener,
    catalog: Mutex<Catalog>,
}

/// Mutable catalog state, only touched with the structural mutex held.
struct Catalog {
    config: DatabaseConfig,
    tables: HashMap<Name, Arc<Table>>,
}

impl Catalog {
    fn empty() -> Self {
        Self {
            config: DatabaseConfig::default(),
            tables: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("tables", &self.tables())
            .finish()
    }
}

impl Database {
    /// Open the database at `path` with default engine options, creating it
    /// if the path does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    /// Open the database at `path`.
    ///
    /// - Missing path: create the directory and an empty config record.
    /// - Existing directory: load `config.dat` and open every index, then
    ///   every table's data instance, in record order. The first failure
    ///   aborts the open and releases whatever was opened so far.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let opener = Opener::new(path.clone(), options);

        let catalog = match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => Self::bootstrap(&path, &opener)?,
            Ok(_) => {
                return Err(Error::new(ErrorKind::DirectoryCreate, "open")
                    .for_entity(Entity::Database)
                    .with_message(format!("{} is not a directory", path.display())));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::initialize(&path)?,
            Err(e) => {
                return Err(Error::new(ErrorKind::DirectoryCreate, "open")
                    .for_entity(Entity::Database)
                    .with_message(path.display().to_string())
                    .with_source(e));
            }
        };

        metrics::adjust_catalog(
            catalog.tables.len() as i64,
            catalog.config.index_count() as i64,
        );

        Ok(Self {
            path,
            opener,
            catalog: Mutex::new(catalog),
        })
    }

    fn initialize(path: &Path) -> Result<Catalog> {
        opener::ensure_dir(path).map_err(|e| {
            Error::new(ErrorKind::DirectoryCreate, "create database")
                .for_entity(Entity::Database)
                .with_message(path.display().to_string())
                .with_source(e)
        })?;

        let catalog = Catalog::empty();
        config::store(path, &catalog.config).map_err(|e| e.for_entity(Entity::Database))?;

        info!("Created new database");
        Ok(catalog)
    }

    fn bootstrap(path: &Path, opener: &Opener) -> Result<Catalog> {
        let config = config::load(path).map_err(|e| e.for_entity(Entity::Database))?;

        let mut tables = HashMap::with_capacity(config.tables.len());
        for table_config in &config.tables {
            let table = Table::open_existing(opener, table_config)?;
            tables.insert(table_config.name.clone(), table);
        }

        info!(
            tables = tables.len(),
            indexes = config.index_count(),
            "Opened database"
        );
        Ok(Catalog { config, tables })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        self.opener.options()
    }

    /// Snapshot of the config record.
    pub fn config(&self) -> DatabaseConfig {
        self.catalog.lock().config.clone()
    }

    /// Table names in creation order. Takes the structural mutex briefly.
    pub fn tables(&self) -> Vec<Name> {
        self.catalog
            .lock()
            .config
            .tables
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Look up an open table. Takes the structural mutex briefly; keep the
    /// returned handle for document access.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.catalog.lock().tables.get(name).cloned()
    }

    /// Create an empty table and persist it in the config record.
    ///
    /// Leftovers of an earlier, interrupted drop of the same name are
    /// removed first.
    #[instrument(skip(self))]
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>> {
        const PHASE: &str = "create table";
        let name = Name::new(name)?;
        let entity = Entity::Table(name.clone());

        let mut catalog = self.catalog.lock();
        if catalog.tables.contains_key(&name) {
            return Err(Error::new(ErrorKind::TableExists, PHASE).for_entity(entity));
        }

        let segments = [&name];
        self.opener.purge(&segments, &entity, PHASE)?;
        let data = self.opener.open(&segments, OpenMode::Create, &entity, PHASE)?;
        let table = Table::assemble(name.clone(), data, Vec::new());

        let mut next = catalog.config.clone();
        next.tables.push(TableConfig::new(name.clone()));
        if let Err(e) = config::store(&self.path, &next) {
            drop(table);
            self.opener.discard(&segments);
            return Err(e.for_entity(entity));
        }

        catalog.config = next;
        catalog.tables.insert(name.clone(), Arc::clone(&table));
        metrics::adjust_catalog(1, 0);

        info!(table = %name, "Created table");
        Ok(table)
    }

    /// Remove a table, its indexes and all their data.
    ///
    /// Handles obtained earlier stay usable until dropped, but nothing they
    /// write survives.
    #[instrument(skip(self))]
    pub fn drop_table(&self, name: &str) -> Result<()> {
        const PHASE: &str = "drop table";
        let name = Name::new(name)?;
        let entity = Entity::Table(name.clone());

        let mut catalog = self.catalog.lock();
        let table = catalog
            .tables
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::TableNotFound, PHASE).for_entity(entity.clone()))?;

        let mut next = catalog.config.clone();
        next.tables.retain(|t| t.name != name);
        config::store(&self.path, &next).map_err(|e| e.for_entity(entity))?;

        catalog.config = next;
        catalog.tables.remove(&name);
        let index_count = {
            let indexes = table.indexes.read();
            for index in indexes.iter() {
                index.detach();
            }
            indexes.len()
        };
        drop(table);

        self.opener.discard(&[&name]);
        metrics::adjust_catalog(-1, -(index_count as i64));

        info!(table = %name, indexes = index_count, "Dropped table");
        Ok(())
    }

    /// Create an empty index on an existing table.
    #[instrument(skip(self))]
    pub fn create_index(&self, table: &str, index: &str) -> Result<Arc<Index>> {
        const PHASE: &str = "create index";
        let table_name = Name::new(table)?;
        let index_name = Name::new(index)?;
        let entity = Entity::Index {
            table: table_name.clone(),
            index: index_name.clone(),
        };

        let mut catalog = self.catalog.lock();
        let table = catalog.tables.get(&table_name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::TableNotFound, PHASE).for_entity(Entity::Table(table_name.clone()))
        })?;
        if table.index(index_name.as_str()).is_some() {
            return Err(Error::new(ErrorKind::IndexExists, PHASE).for_entity(entity));
        }

        let segments = [&table_name, &index_name];
        self.opener.purge(&segments, &entity, PHASE)?;
        let storage = self.opener.open(&segments, OpenMode::Create, &entity, PHASE)?;
        let index = Arc::new(Index {
            name: index_name.clone(),
            table_name: table_name.clone(),
            table: RwLock::new(Arc::downgrade(&table)),
            storage,
        });

        let mut next = catalog.config.clone();
        next.table_mut(table_name.as_str())
            .ok_or_else(|| {
                Error::new(ErrorKind::TableNotFound, PHASE).for_entity(Entity::Table(table_name.clone()))
            })?
            .indexes
            .push(IndexConfig::new(index_name.clone()));
        if let Err(e) = config::store(&self.path, &next) {
            drop(index);
            self.opener.discard(&segments);
            return Err(e.for_entity(entity));
        }

        catalog.config = next;
        table.indexes.write().push(Arc::clone(&index));
        metrics::adjust_catalog(0, 1);

        info!(table = %table_name, index = %index_name, "Created index");
        Ok(index)
    }

    /// Remove an index and its data. The table is untouched.
    #[instrument(skip(self))]
    pub fn drop_index(&self, table: &str, index: &str) -> Result<()> {
        const PHASE: &str = "drop index";
        let table_name = Name::new(table)?;
        let index_name = Name::new(index)?;
        let entity = Entity::Index {
            table: table_name.clone(),
            index: index_name.clone(),
        };

        let mut catalog = self.catalog.lock();
        let table = catalog.tables.get(&table_name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::TableNotFound, PHASE).for_entity(Entity::Table(table_name.clone()))
        })?;
        if table.index(index_name.as_str()).is_none() {
            return Err(Error::new(ErrorKind::IndexNotFound, PHASE).for_entity(entity));
        }

        let mut next = catalog.config.clone();
        if let Some(table_config) = next.table_mut(table_name.as_str()) {
            table_config.indexes.retain(|i| i.name != index_name);
        }
        config::store(&self.path, &next).map_err(|e| e.for_entity(entity))?;

        catalog.config = next;
        table.indexes.write().retain(|i| {
            if i.name == index_name {
                i.detach();
            }
            i.name != index_name
        });

        self.opener.discard(&[&table_name, &index_name]);
        metrics::adjust_catalog(0, -1);

        info!(table = %table_name, index = %index_name, "Dropped index");
        Ok(())
    }

    /// Flush every table and index instance, then release the database.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn close(self) -> Result<()> {
        let tables: Vec<Arc<Table>> = self.catalog.lock().tables.values().cloned().collect();
        tables.par_iter().try_for_each(|table| table.flush())?;

        info!(tables = tables.len(), "Closed database");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let catalog = self.catalog.get_mut();
        metrics::adjust_catalog(
            -(catalog.tables.len() as i64),
            -(catalog.config.index_count() as i64),
        );
    }
}

fn storage_error(entity: Entity, phase: &'static str) -> impl FnOnce(SlabError) -> Error {
    move |e| {
        Error::new(ErrorKind::Storage, phase)
            .for_entity(entity)
            .with_source(e)
    }
}

/// A named document collection with its own data instance and zero or more
/// indexes.
pub struct Table {
    name: Name,
    data: StorageInstance,
    /// In creation order
    indexes: RwLock<Vec<Arc<Index>>>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("indexes", &self.indexes())
            .finish()
    }
}

impl Table {
    /// Wire a table and its already-open indexes together.
    fn assemble(name: Name, data: StorageInstance, indexes: Vec<(Name, StorageInstance)>) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let indexes = indexes
                .into_iter()
                .map(|(index, storage)| {
                    Arc::new(Index {
                        name: index,
                        table_name: name.clone(),
                        table: RwLock::new(this.clone()),
                        storage,
                    })
                })
                .collect();
            Table {
                name,
                data,
                indexes: RwLock::new(indexes),
            }
        })
    }

    /// Bootstrap one table from its config entry: indexes first, then data.
    fn open_existing(opener: &Opener, config: &TableConfig) -> Result<Arc<Self>> {
        const PHASE: &str = "bootstrap";
        let mut indexes = Vec::with_capacity(config.indexes.len());
        for index in &config.indexes {
            let entity = Entity::Index {
                table: config.name.clone(),
                index: index.name.clone(),
            };
            let storage = opener.open(&[&config.name, &index.name], OpenMode::Existing, &entity, PHASE)?;
            indexes.push((index.name.clone(), storage));
        }

        let entity = Entity::Table(config.name.clone());
        let data = opener.open(&[&config.name], OpenMode::Existing, &entity, PHASE)?;
        Ok(Self::assemble(config.name.clone(), data, indexes))
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The instance holding this table's documents.
    pub fn storage(&self) -> &StorageInstance {
        &self.data
    }

    /// Index names in creation order.
    pub fn indexes(&self) -> Vec<Name> {
        self.indexes.read().iter().map(|i| i.name.clone()).collect()
    }

    pub fn index(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes
            .read()
            .iter()
            .find(|i| i.name.as_str() == name)
            .cloned()
    }

    fn entity(&self) -> Entity {
        Entity::Table(self.name.clone())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.data.get(key).map_err(storage_error(self.entity(), "get"))
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.set(key, value).map_err(storage_error(self.entity(), "set"))
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.data.delete(key).map_err(storage_error(self.entity(), "delete"))
    }

    /// Up to `limit` documents with keys `>= start`, in key order.
    pub fn scan(&self, start: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.data
            .scan(start, limit)
            .map_err(storage_error(self.entity(), "scan"))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flush the data instance and every index instance.
    pub fn flush(&self) -> Result<()> {
        self.data.flush().map_err(storage_error(self.entity(), "flush"))?;
        let indexes = self.indexes.read().clone();
        indexes.par_iter().try_for_each(|index| {
            index
                .storage
                .flush()
                .map_err(storage_error(index.entity(), "flush"))
        })
    }
}

/// A secondary index: an independent ordered store tied to one table.
pub struct Index {
    name: Name,
    table_name: Name,
    /// Cleared when the index or its table is dropped
    table: RwLock<Weak<Table>>,
    storage: StorageInstance,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("table", &self.table_name)
            .field("name", &self.name)
            .finish()
    }
}

impl Index {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn table_name(&self) -> &Name {
        &self.table_name
    }

    /// The owning table. `None` once this index or its table has been
    /// dropped, even while other handles keep the table alive.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.read().upgrade()
    }

    fn detach(&self) {
        *self.table.write() = Weak::new();
    }

    pub fn storage(&self) -> &StorageInstance {
        &self.storage
    }

    fn entity(&self) -> Entity {
        Entity::Index {
            table: self.table_name.clone(),
            index: self.name.clone(),
        }
    }
}
