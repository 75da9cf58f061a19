//! Shared fixtures for handler and scheduler tests: an in-memory object
//! store and a context wired to it.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use pgvault_common::config::{DatabaseConfig, RetentionConfig, StoreConfig};
use pgvault_common::models::instance::{self, Instance};
use pgvault_common::store::{ObjectStore, StoreError};
use pgvault_common::types::SslMode;
use sqlx::PgPool;

use crate::config::Config;
use crate::context::AppContext;

/// In-memory `ObjectStore`. A BTreeMap keeps listings lexicographically
/// ordered, matching S3 semantics.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_owned(), bytes);
    }

    /// Make every delete of `key` fail, for partial-failure tests.
    pub fn fail_deletes_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_owned());
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Operation(format!("failed to read {}: {}", path.display(), e)))?;
        self.insert(key, bytes);
        Ok(())
    }

    async fn get_to_file(&self, key: &str, path: &Path) -> Result<u64, StoreError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| StoreError::Operation(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(bytes.len() as u64)
    }

    async fn head(&self, key: &str) -> Result<i64, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|bytes| bytes.len() as i64)
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Operation(format!("access denied to {}", key)));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_owned(),
        port: 0,
        database: DatabaseConfig {
            host: "127.0.0.1".to_owned(),
            port: 5432,
            dbname: "pgvault".to_owned(),
            user: "postgres".to_owned(),
            password: String::new(),
            ssl_mode: "prefer".to_owned(),
            max_connections: 2,
        },
        store: StoreConfig {
            endpoint: String::new(),
            region: "us-east-1".to_owned(),
            bucket: "pgvault-test".to_owned(),
            access_key_id: "test".to_owned(),
            secret_access_key: "test".to_owned(),
            use_ssl: false,
        },
        retention: RetentionConfig {
            hourly: 4,
            daily: 7,
            weekly: 4,
            monthly: 12,
        },
        worker_count: 2,
        temp_dir: std::env::temp_dir()
            .join("pgvault-tests")
            .to_string_lossy()
            .into_owned(),
        log_level: "debug".to_owned(),
        shutdown_grace_seconds: 1,
    }
}

pub fn context(db: PgPool) -> AppContext {
    context_with_store(db, Arc::new(MemoryStore::default()))
}

pub fn context_with_store(db: PgPool, store: Arc<MemoryStore>) -> AppContext {
    AppContext::for_tests(test_config(), db, store)
}

/// Registers an instance pointing at a port nothing listens on, so any
/// accidental tool invocation fails fast.
pub async fn seed_instance(db: &PgPool, id: &str, enabled: bool, databases: &[&str]) {
    instance::create(
        db,
        &Instance {
            id: id.to_owned(),
            name: id.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 1,
            username: "postgres".to_owned(),
            password: "test".to_owned(),
            databases: databases.iter().map(|d| (*d).to_owned()).collect(),
            enabled,
            ssl_mode: SslMode::Disable,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
    )
    .await
    .expect("failed to seed instance");
}
