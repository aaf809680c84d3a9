//! Create/drop of tables and indexes: durability, failure atomicity and
//! concurrency

use photon_docstore::catalog::CONFIG_FILE;
use photon_docstore::{Database, ErrorKind, Name, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn name(s: &str) -> Name {
    Name::new(s).unwrap()
}

fn tmp_config(root: &Path) -> PathBuf {
    root.join(format!("{}.tmp", CONFIG_FILE))
}

#[test]
fn test_created_table_survives_restart() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path)?;
        db.create_table("t")?.set(b"k", b"v")?;
    }

    let db = Database::open(&path)?;
    assert_eq!(db.tables(), vec![name("t")]);
    assert_eq!(db.table("t").unwrap().get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn test_failed_config_rewrite_leaves_no_trace() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let db = Database::open(&path)?;
    db.create_table("keep")?;

    // The rewrite cannot create its temp file
    fs::create_dir(tmp_config(&path)).unwrap();

    let err = db.create_table("t").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigWrite);
    assert!(db.table("t").is_none());
    assert_eq!(db.tables(), vec![name("keep")]);
    assert!(!path.join(name("t").encode()).exists());

    let err = db.create_index("keep", "i").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigWrite);
    assert!(db.table("keep").unwrap().indexes().is_empty());

    let err = db.drop_table("keep").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigWrite);
    assert!(db.table("keep").is_some());
    drop(db);

    fs::remove_dir(tmp_config(&path)).unwrap();
    let db = Database::open(&path)?;
    assert_eq!(db.tables(), vec![name("keep")]);
    assert!(db.table("keep").unwrap().indexes().is_empty());
    Ok(())
}

#[test]
fn test_crash_before_rewrite_leaves_table_absent() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    drop(Database::open(&path)?);

    // State after a crash between creating the directory and renaming the
    // new record into place
    let orphan = path.join(name("t").encode()).join("data");
    fs::create_dir_all(&orphan).unwrap();
    fs::write(orphan.join("junk"), b"left behind").unwrap();
    fs::write(tmp_config(&path), br#"{"version":1,"tables":[{"na"#).unwrap();

    let db = Database::open(&path)?;
    assert!(db.tables().is_empty());
    assert!(db.table("t").is_none());

    // Creating the same name again starts from a clean directory
    let t = db.create_table("t")?;
    assert!(t.is_empty());
    assert!(!orphan.join("junk").exists());
    drop(t);
    drop(db);

    let db = Database::open(&path)?;
    assert_eq!(db.tables(), vec![name("t")]);
    Ok(())
}

#[test]
fn test_interrupted_drop_is_purged_on_recreate() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = Database::open(&path)?;
        db.create_table("t")?;
        db.create_index("t", "i")?.storage().set(b"stale", b"1").unwrap();
    }

    let index_dir = path.join(name("t").encode()).join(name("i").encode());
    {
        let db = Database::open(&path)?;
        db.drop_index("t", "i")?;
        assert!(!index_dir.exists());
    }

    // Crash after the record was rewritten but before the directory went away
    fs::create_dir_all(index_dir.join("data")).unwrap();
    fs::write(index_dir.join("data").join("junk"), b"x").unwrap();

    let db = Database::open(&path)?;
    assert!(db.table("t").unwrap().indexes().is_empty());
    let index = db.create_index("t", "i")?;
    assert!(index.storage().is_empty());
    Ok(())
}

#[test]
fn test_drop_then_restart() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = Database::open(&path)?;
        db.create_table("a")?;
        db.create_table("b")?;
        db.create_index("b", "x")?;
        db.create_index("b", "y")?;
        db.drop_table("a")?;
        db.drop_index("b", "x")?;
    }

    let db = Database::open(&path)?;
    assert_eq!(db.tables(), vec![name("b")]);
    assert_eq!(db.table("b").unwrap().indexes(), vec![name("y")]);
    assert!(!path.join(name("a").encode()).exists());
    Ok(())
}

#[test]
fn test_concurrent_creates_are_all_durable() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let db = Arc::new(Database::open(&path)?);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<()> {
                let table = format!("t{}", i);
                db.create_table(&table)?;
                db.create_index(&table, "by_id")?;
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }
    assert_eq!(db.tables().len(), 8);
    drop(db);

    let db = Database::open(&path)?;
    let mut tables: Vec<String> = db.tables().into_iter().map(String::from).collect();
    tables.sort();
    let expected: Vec<String> = (0..8).map(|i| format!("t{}", i)).collect();
    assert_eq!(tables, expected);
    for table in &tables {
        assert_eq!(db.table(table).unwrap().indexes(), vec![name("by_id")]);
    }
    Ok(())
}

#[test]
fn test_concurrent_create_of_same_table() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path().join("db"))?);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.create_table("same").map(|_| ()))
        })
        .collect();
    let results: Vec<Result<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert_eq!(err.kind(), ErrorKind::TableExists);
    }
    assert_eq!(db.tables(), vec![name("same")]);
    Ok(())
}

#[test]
fn test_document_access_while_mutating() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path().join("db"))?);
    let docs = db.create_table("docs")?;

    let writer = {
        let docs = Arc::clone(&docs);
        thread::spawn(move || -> Result<()> {
            for i in 0..200u32 {
                docs.set(format!("k{:03}", i).as_bytes(), b"{}")?;
            }
            Ok(())
        })
    };
    for i in 0..10 {
        db.create_table(&format!("other{}", i))?;
    }
    writer.join().unwrap()?;

    assert_eq!(docs.len(), 200);
    assert_eq!(db.tables().len(), 11);
    Ok(())
}

#[test]
fn test_dropped_table_index_loses_back_reference() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("db"))?;
    db.create_table("t")?;
    let index = db.create_index("t", "i")?;
    assert!(index.table().is_some());

    db.drop_table("t")?;
    assert!(index.table().is_none());
    assert_eq!(index.table_name(), &name("t"));
    Ok(())
}
