use pstore_lib::engine::config::DatabaseConfig;
use pstore_lib::engine::database::Database;
use pstore_lib::engine::migrations::{MigrationRunner, LATEST_VERSION};
use pstore_lib::engine::storage::{KvStore, StorageError};
use std::collections::HashSet;
use std::path::Path;
use std::thread;

fn open(path: &Path) -> Result<KvStore, Box<dyn std::error::Error>> {
    let config = DatabaseConfig {
        path: path.to_path_buf(),
        pool_size: 8,
        busy_timeout_ms: 30_000,
        ..DatabaseConfig::default()
    };
    let db = Database::new(path, &config)?;
    MigrationRunner::new(&db).initialize()?;
    Ok(KvStore::new(db))
}

#[test]
fn test_data_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.db");

    {
        let store = open(&path)?;
        store.write("persisted", b"payload")?;
        assert_eq!(store.count_increment("boots")?, 1);
    }

    // Second start runs the migrator again against a store already at the latest version
    let store = open(&path)?;
    assert_eq!(MigrationRunner::new(store.database()).current_version()?, LATEST_VERSION);
    assert_eq!(store.read("persisted")?, b"payload".to_vec());
    assert_eq!(store.count_increment("boots")?, 2);
    Ok(())
}

#[test]
fn test_heavy_write_then_list_all() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = open(&dir.path().join("store.db"))?;

    for i in 0..2_000 {
        store.write(&format!("testing-{}", i), b"hello")?;
    }

    let keys = store.get_keys("")?;
    assert_eq!(keys.len(), 2_000);
    assert_eq!(store.get_keys("testing-19")?.len(), 111);
    Ok(())
}

#[test]
fn test_concurrent_increments_are_distinct() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = open(&dir.path().join("store.db"))?;

    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    // Nobody has touched "race" yet, so the first-time upsert is contended too
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| store.count_increment("race"))
                    .collect::<Result<Vec<i64>, StorageError>>()
            })
        })
        .collect();

    let mut seen = Vec::new();
    for handle in handles {
        let values = handle.join().expect("increment thread panicked")?;
        // Each caller observes its own increments in strictly increasing order
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        seen.extend(values);
    }

    let total = (THREADS * PER_THREAD) as i64;
    seen.sort();
    assert_eq!(seen, (1..=total).collect::<Vec<_>>());
    assert_eq!(store.count_increment("race")?, total + 1);
    Ok(())
}

#[test]
fn test_concurrent_writes_to_independent_keys() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = open(&dir.path().join("store.db"))?;

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || -> Result<(), StorageError> {
                for i in 0..50 {
                    store.write(&format!("t{}/{}", t, i), format!("{}", i).as_bytes())?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let keys: HashSet<String> = store.get_keys("t")?.into_iter().collect();
    assert_eq!(keys.len(), 200);
    assert_eq!(store.get_keys("t3/")?.len(), 50);
    assert_eq!(store.read("t2/49")?, b"49".to_vec());
    Ok(())
}

#[test]
fn test_same_key_writes_leave_one_complete_value() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = open(&dir.path().join("store.db"))?;

    let payloads: Vec<Vec<u8>> = (0..6u8).map(|b| vec![b; 4096]).collect();
    let handles: Vec<_> = payloads
        .iter()
        .cloned()
        .map(|payload| {
            let store = store.clone();
            thread::spawn(move || store.write("contended", &payload))
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let stored = store.read("contended")?;
    assert!(payloads.contains(&stored));
    Ok(())
}
