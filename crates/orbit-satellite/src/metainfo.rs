// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The pointer store: the durable mapping from segment paths to segment pointers.
//!
//! The store itself is an opaque byte-keyed KV behind [`PointerDb`]; this module adds
//! pointer encoding, size-policy validation, and the connection-string dispatch that
//! picks a backend. Writes are atomic, total replacements per path: readers observe
//! either the old or the new pointer, never a mix.

use orbit_core::{pointer::Pointer, SegmentPath};

mod postgres;
mod store;

pub use postgres::PostgresPointerDb;
pub use store::{open_pointer_db, MemPointerDb, PointerDb, SledPointerDb, StoreError};

use crate::config::MetainfoConfig;

/// Errors returned by the metainfo service.
#[derive(Debug, thiserror::Error)]
pub enum MetainfoError {
    /// No pointer exists for the path.
    #[error("segment {0:?} not found")]
    NotFound(SegmentPath),
    /// The pointer violates its structural invariants.
    #[error(transparent)]
    InvalidPointer(#[from] orbit_core::pointer::InvalidPointerError),
    /// The segment is too small to be stored remotely.
    #[error("remote segment of {size} bytes is below the minimum of {minimum}")]
    RemoteTooSmall {
        /// The segment size.
        size: u64,
        /// The configured minimum remote segment size.
        minimum: u64,
    },
    /// The segment is too large to be stored inline.
    #[error("inline segment of {size} bytes exceeds the maximum of {maximum}")]
    InlineTooLarge {
        /// The segment size.
        size: u64,
        /// The configured maximum inline segment size.
        maximum: u64,
    },
    /// A stored pointer could not be decoded.
    #[error("stored pointer for {path:?} is corrupt: {source}")]
    Corrupt {
        /// The path of the corrupt record.
        path: SegmentPath,
        /// The decoding error.
        source: bcs::Error,
    },
    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The metainfo service: validated, typed access to the pointer store.
pub struct Service {
    db: Box<dyn PointerDb>,
    config: MetainfoConfig,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates a service over an already-open backend.
    pub fn new(db: Box<dyn PointerDb>, config: MetainfoConfig) -> Self {
        Self { db, config }
    }

    /// Opens the backend named by the configured connection string.
    pub async fn open(config: MetainfoConfig) -> Result<Self, StoreError> {
        let db = open_pointer_db(&config.database_url).await?;
        Ok(Self::new(db, config))
    }

    /// Looks up the pointer stored under `path`.
    pub async fn get(&self, path: &SegmentPath) -> Result<Pointer, MetainfoError> {
        let value = self
            .db
            .get(path.as_bytes())
            .await?
            .ok_or_else(|| MetainfoError::NotFound(path.clone()))?;
        bcs::from_bytes(&value).map_err(|source| MetainfoError::Corrupt {
            path: path.clone(),
            source,
        })
    }

    /// Stores `pointer` under `path`, replacing any previous pointer atomically.
    ///
    /// The pointer is validated against its structural invariants and the configured
    /// size policy before anything is written.
    pub async fn put(&self, path: &SegmentPath, pointer: &Pointer) -> Result<(), MetainfoError> {
        pointer.validate()?;
        if pointer.is_inline() {
            if pointer.segment_size > self.config.max_inline_segment_size {
                return Err(MetainfoError::InlineTooLarge {
                    size: pointer.segment_size,
                    maximum: self.config.max_inline_segment_size,
                });
            }
        } else if pointer.segment_size < self.config.min_remote_segment_size {
            return Err(MetainfoError::RemoteTooSmall {
                size: pointer.segment_size,
                minimum: self.config.min_remote_segment_size,
            });
        }

        let value = bcs::to_bytes(pointer).expect("bcs encoding a pointer should not fail");
        self.db.put(path.as_bytes(), value).await?;
        Ok(())
    }

    /// Deletes the pointer stored under `path`, if any.
    pub async fn delete(&self, path: &SegmentPath) -> Result<(), MetainfoError> {
        self.db.delete(path.as_bytes()).await?;
        Ok(())
    }

    /// Pages through pointers in key order, starting strictly after `after`.
    ///
    /// Returns the page and whether more records follow.
    pub async fn iterate(
        &self,
        after: Option<&SegmentPath>,
        limit: usize,
    ) -> Result<(Vec<(SegmentPath, Pointer)>, bool), MetainfoError> {
        let (records, more) = self
            .db
            .list(after.map(|path| path.as_bytes()), limit)
            .await?;
        let mut page = Vec::with_capacity(records.len());
        for (key, value) in records {
            let path = String::from_utf8_lossy(&key).into_owned();
            let pointer = bcs::from_bytes(&value).map_err(|source| MetainfoError::Corrupt {
                path: path.clone(),
                source,
            })?;
            page.push((path, pointer));
        }
        Ok((page, more))
    }
}

#[cfg(test)]
mod tests {
    use orbit_core::{
        pointer::{PieceRef, RedundancyScheme},
        NodeId,
    };
    use orbit_test_utils::WithTempDir;

    use super::*;

    fn config(url: &str) -> MetainfoConfig {
        MetainfoConfig {
            database_url: url.to_string(),
            min_remote_segment_size: 1240,
            max_inline_segment_size: 8000,
        }
    }

    fn scheme() -> RedundancyScheme {
        RedundancyScheme {
            required: 2,
            repair_threshold: 3,
            success_threshold: 4,
            total: 6,
            share_size: 256,
        }
    }

    fn remote_pointer(size: u64) -> Pointer {
        let pieces = (0..4)
            .map(|piece_index| PieceRef {
                piece_index,
                node_id: NodeId::new([piece_index as u8 + 1; 32]),
                hash: vec![0xaa],
            })
            .collect();
        Pointer::new_remote(scheme(), pieces, size, None)
    }

    async fn mem_service() -> Service {
        Service::open(config("mem://")).await.expect("opens")
    }

    #[tokio::test]
    async fn put_get_round_trips() {
        let service = mem_service().await;
        let path = "p/s/b/obj".to_string();
        let pointer = remote_pointer(4096);

        service.put(&path, &pointer).await.expect("puts");
        assert_eq!(service.get(&path).await.expect("gets"), pointer);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let service = mem_service().await;
        assert!(matches!(
            service.get(&"missing".to_string()).await,
            Err(MetainfoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_the_pointer() {
        let service = mem_service().await;
        let path = "p/s/b/obj".to_string();
        service
            .put(&path, &remote_pointer(4096))
            .await
            .expect("puts");

        service.delete(&path).await.expect("deletes");
        assert!(matches!(
            service.get(&path).await,
            Err(MetainfoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_replaces_atomically() {
        let service = mem_service().await;
        let path = "p/s/b/obj".to_string();
        service
            .put(&path, &remote_pointer(4096))
            .await
            .expect("puts");

        let replacement = remote_pointer(9000);
        service.put(&path, &replacement).await.expect("replaces");
        assert_eq!(service.get(&path).await.expect("gets"), replacement);
    }

    #[tokio::test]
    async fn small_remote_segments_are_rejected() {
        let service = mem_service().await;
        assert!(matches!(
            service.put(&"p".to_string(), &remote_pointer(100)).await,
            Err(MetainfoError::RemoteTooSmall { size: 100, .. })
        ));
    }

    #[tokio::test]
    async fn large_inline_segments_are_rejected() {
        let service = mem_service().await;
        let pointer = Pointer::new_inline(vec![0u8; 9000], None);
        assert!(matches!(
            service.put(&"p".to_string(), &pointer).await,
            Err(MetainfoError::InlineTooLarge { size: 9000, .. })
        ));
    }

    #[tokio::test]
    async fn iteration_pages_in_key_order() {
        let service = mem_service().await;
        for name in ["a/s/b/1", "b/s/b/2", "c/s/b/3"] {
            service
                .put(&name.to_string(), &remote_pointer(4096))
                .await
                .expect("puts");
        }

        let (page, more) = service.iterate(None, 2).await.expect("iterates");
        assert_eq!(
            page.iter().map(|(path, _)| path.as_str()).collect::<Vec<_>>(),
            vec!["a/s/b/1", "b/s/b/2"]
        );
        assert!(more);

        let after = page.last().map(|(path, _)| path.clone()).expect("has last");
        let (rest, more) = service.iterate(Some(&after), 2).await.expect("iterates");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "c/s/b/3");
        assert!(!more);
    }

    #[tokio::test]
    async fn sled_backend_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let url = format!("bolt://{}", temp_dir.path().join("pointerdb").display());
        let path = "p/s/b/obj".to_string();
        let pointer = remote_pointer(4096);

        {
            let service = Service::open(config(&url)).await.expect("opens");
            service.put(&path, &pointer).await.expect("puts");
        }

        let reopened = WithTempDir {
            inner: Service::open(config(&url)).await.expect("reopens"),
            temp_dir,
        };
        assert_eq!(reopened.inner.get(&path).await.expect("gets"), pointer);
    }

    #[tokio::test]
    async fn unsupported_scheme_fails_clearly() {
        let result = Service::open(config("etcd://cluster")).await;
        let error = result.err().expect("must fail").to_string();
        assert!(error.contains("unsupported"), "unexpected error: {error}");
        assert!(error.contains("etcd"), "unexpected error: {error}");
    }
}
