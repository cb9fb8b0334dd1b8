// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, ops::Bound, path::Path};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PostgresPointerDb;

/// Error returned by a pointer-store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The connection string carries no `scheme://` prefix.
    #[error("database URL {0:?} carries no scheme prefix")]
    MissingScheme(String),
    /// The connection string names a scheme no backend serves.
    #[error("unsupported database scheme {0:?}")]
    UnsupportedScheme(String),
    /// The backend failed.
    #[error("pointer store error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    /// Wraps a backend-specific error.
    pub fn backend(error: impl Into<anyhow::Error>) -> Self {
        Self::Backend(error.into())
    }
}

/// An opaque byte-keyed KV store holding encoded pointers.
///
/// `put` must be an atomic, total replacement per key.
#[async_trait]
pub trait PointerDb: Send + Sync + 'static {
    /// Looks up the value stored under `key`.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    /// Deletes the value stored under `key`, if any.
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Returns up to `limit` records in key order, starting strictly after `after`,
    /// and whether more records follow.
    async fn list(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, bool), StoreError>;
}

/// Opens the pointer-store backend named by `database_url`.
///
/// Recognized schemes: `mem://` (in-memory, for tests), `bolt://<path>` and
/// `sled://<path>` (embedded B-tree on disk), and `postgres://` /
/// `postgresql://` (relational). Anything else fails with a clear error.
pub async fn open_pointer_db(database_url: &str) -> Result<Box<dyn PointerDb>, StoreError> {
    let (scheme, source) = database_url
        .split_once("://")
        .ok_or_else(|| StoreError::MissingScheme(database_url.to_string()))?;
    tracing::debug!(scheme, "opening pointer store");
    match scheme {
        "mem" => Ok(Box::new(MemPointerDb::default())),
        "bolt" | "sled" => Ok(Box::new(SledPointerDb::open(Path::new(source))?)),
        "postgres" | "postgresql" => Ok(Box::new(PostgresPointerDb::connect(database_url).await?)),
        other => Err(StoreError::UnsupportedScheme(other.to_string())),
    }
}

/// An in-memory [`PointerDb`].
#[derive(Debug, Default)]
pub struct MemPointerDb {
    records: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

#[async_trait]
impl PointerDb for MemPointerDb {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.records.write().await.insert(key.to_vec(), value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, bool), StoreError> {
        let records = self.records.read().await;
        let start = match after {
            Some(after) => Bound::Excluded(after.to_vec()),
            None => Bound::Unbounded,
        };
        let mut range = records.range((start, Bound::Unbounded));

        let mut page = Vec::with_capacity(limit);
        for (key, value) in range.by_ref().take(limit) {
            page.push((key.clone(), value.clone()));
        }
        Ok((page, range.next().is_some()))
    }
}

/// A [`PointerDb`] backed by an embedded on-disk B-tree.
#[derive(Debug)]
pub struct SledPointerDb {
    db: sled::Db,
}

impl SledPointerDb {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(StoreError::backend)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl PointerDb for SledPointerDb {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.db.get(key).map_err(StoreError::backend)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.db.insert(key, value).map_err(StoreError::backend)?;
        self.db
            .flush_async()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key).map_err(StoreError::backend)?;
        self.db
            .flush_async()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, bool), StoreError> {
        let mut iter = match after {
            Some(after) => self
                .db
                .range((Bound::Excluded(after.to_vec()), Bound::<Vec<u8>>::Unbounded)),
            None => self.db.iter(),
        };

        let mut page = Vec::with_capacity(limit);
        for record in iter.by_ref().take(limit) {
            let (key, value) = record.map_err(StoreError::backend)?;
            page.push((key.to_vec(), value.to_vec()));
        }
        let more = iter.next().transpose().map_err(StoreError::backend)?.is_some();
        Ok((page, more))
    }
}
