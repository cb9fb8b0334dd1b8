// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio_postgres::NoTls;

use super::{PointerDb, StoreError};

/// A [`PointerDb`] backed by a PostgreSQL table.
///
/// The table is a plain two-column KV (`fullpath BYTEA PRIMARY KEY, metadata BYTEA`);
/// the upsert gives `put` its atomic-replacement semantics.
pub struct PostgresPointerDb {
    client: tokio_postgres::Client,
}

impl std::fmt::Debug for PostgresPointerDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPointerDb").finish_non_exhaustive()
    }
}

impl PostgresPointerDb {
    /// Connects to the database named by `database_url` and ensures the schema
    /// exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(StoreError::backend)?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(%error, "pointer store connection failed");
            }
        });

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS pointers (
                    fullpath BYTEA PRIMARY KEY,
                    metadata BYTEA NOT NULL
                )",
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PointerDb for PostgresPointerDb {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row = self
            .client
            .query_opt("SELECT metadata FROM pointers WHERE fullpath = $1", &[&key])
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(|row| row.get::<_, Vec<u8>>(0)))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO pointers (fullpath, metadata) VALUES ($1, $2)
                 ON CONFLICT (fullpath) DO UPDATE SET metadata = EXCLUDED.metadata",
                &[&key, &value],
            )
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM pointers WHERE fullpath = $1", &[&key])
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, bool), StoreError> {
        // Fetch one extra row to learn whether more records follow.
        let fetch = (limit as i64) + 1;
        let after = after.unwrap_or_default();
        let rows = self
            .client
            .query(
                "SELECT fullpath, metadata FROM pointers
                 WHERE fullpath > $1 ORDER BY fullpath LIMIT $2",
                &[&after, &fetch],
            )
            .await
            .map_err(StoreError::backend)?;

        let more = rows.len() > limit;
        let page = rows
            .into_iter()
            .take(limit)
            .map(|row| (row.get::<_, Vec<u8>>(0), row.get::<_, Vec<u8>>(1)))
            .collect();
        Ok((page, more))
    }
}
