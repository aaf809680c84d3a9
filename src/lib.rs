// PhotonDB document store - catalog layer
// Named tables and per-table secondary indexes over embedded slab storage

#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod metrics;
pub mod name;
pub mod storage;

// Re-exports for convenience
pub use catalog::{Database, DatabaseConfig, DatabaseOptions, Index, IndexConfig, Table, TableConfig};
pub use error::{Entity, Error, ErrorKind, Result};
pub use name::Name;
pub use storage::StorageInstance;

/// Catalog error types
///
/// Every failure carries an [`ErrorKind`] to branch on, the table or index it
/// concerns, the phase it happened in, and the lower-level cause.
pub mod error {
    use std::fmt;
    use thiserror::Error;

    use crate::name::Name;

    pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ErrorKind {
        /// A directory could not be created (permissions, space, path).
        DirectoryCreate,
        /// The database directory exists but has no config record.
        ConfigMissing,
        /// The config record exists but cannot be read or decoded.
        ConfigCorrupt,
        /// The config record could not be rewritten.
        ConfigWrite,
        /// The storage engine refused to open a directory.
        EngineOpen,
        /// The config references a storage directory that does not exist.
        StorageMissing,
        InvalidName,
        TableExists,
        TableNotFound,
        IndexExists,
        IndexNotFound,
        /// A read or write on an open storage instance failed.
        Storage,
    }

    impl fmt::Display for ErrorKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let text = match self {
                ErrorKind::DirectoryCreate => "failed to create directory",
                ErrorKind::ConfigMissing => "database configuration missing",
                ErrorKind::ConfigCorrupt => "database configuration unreadable",
                ErrorKind::ConfigWrite => "failed to write database configuration",
                ErrorKind::EngineOpen => "storage engine failed to open",
                ErrorKind::StorageMissing => "storage directory missing",
                ErrorKind::InvalidName => "invalid name",
                ErrorKind::TableExists => "table already exists",
                ErrorKind::TableNotFound => "table not found",
                ErrorKind::IndexExists => "index already exists",
                ErrorKind::IndexNotFound => "index not found",
                ErrorKind::Storage => "storage error",
            };
            f.write_str(text)
        }
    }

    /// The logical entity an error concerns.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Entity {
        Database,
        Table(Name),
        Index { table: Name, index: Name },
    }

    impl fmt::Display for Entity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Entity::Database => f.write_str("database"),
                Entity::Table(table) => write!(f, "table {:?}", table.as_str()),
                Entity::Index { table, index } => {
                    write!(f, "index {:?} of table {:?}", index.as_str(), table.as_str())
                }
            }
        }
    }

    #[derive(Error, Debug)]
    #[error("{kind}{}{}", context(.entity, .phase), detail(.message))]
    pub struct Error {
        kind: ErrorKind,
        entity: Option<Entity>,
        phase: &'static str,
        message: Option<String>,
        #[source]
        source: Option<BoxError>,
    }

    fn context(entity: &Option<Entity>, phase: &str) -> String {
        match entity {
            Some(entity) => format!(" ({}, {})", entity, phase),
            None => format!(" ({})", phase),
        }
    }

    fn detail(message: &Option<String>) -> String {
        message
            .as_ref()
            .map(|m| format!(": {}", m))
            .unwrap_or_default()
    }

    impl Error {
        pub fn new(kind: ErrorKind, phase: &'static str) -> Self {
            Self {
                kind,
                entity: None,
                phase,
                message: None,
                source: None,
            }
        }

        pub fn for_entity(mut self, entity: Entity) -> Self {
            self.entity = Some(entity);
            self
        }

        pub fn with_message(mut self, message: impl Into<String>) -> Self {
            self.message = Some(message.into());
            self
        }

        pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
            self.source = Some(source.into());
            self
        }

        pub fn kind(&self) -> ErrorKind {
            self.kind
        }

        pub fn entity(&self) -> Option<&Entity> {
            self.entity.as_ref()
        }

        /// What the failing operation was doing, e.g. `"bootstrap"`.
        pub fn phase(&self) -> &'static str {
            self.phase
        }

        pub fn message(&self) -> Option<&str> {
            self.message.as_deref()
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_names_entity_and_phase() {
        let table = Name::new("users").unwrap();
        let index = Name::new("email").unwrap();
        let err = Error::new(ErrorKind::EngineOpen, "bootstrap")
            .for_entity(Entity::Index { table, index })
            .with_source(std::io::Error::new(std::io::ErrorKind::Other, "locked"));

        assert_eq!(
            err.to_string(),
            "storage engine failed to open (index \"email\" of table \"users\", bootstrap)"
        );
        assert_eq!(err.source().map(|s| s.to_string()), Some("locked".to_string()));
    }

    #[test]
    fn test_error_without_entity() {
        let err = Error::new(ErrorKind::ConfigMissing, "open").with_message("no config.dat");
        assert_eq!(
            err.to_string(),
            "database configuration missing (open): no config.dat"
        );
        assert!(err.entity().is_none());
    }
}
