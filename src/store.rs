//! Model artifact storage.
//!
//! The registry materializes remote models by listing every object under a
//! language's prefix and copying each one into a local staging directory.
//! That protocol is captured by [`ArtifactStore`]; the production
//! implementation wraps the `object_store` crate (feature `remote-models`),
//! and [`MemoryArtifactStore`] backs tests and embedded setups.

use std::collections::BTreeMap;

use crate::error::Result;

/// Read-only, prefix-addressed object storage as consumed by the registry.
///
/// Implementations are synchronous: registry initialization happens once at
/// startup on a thread that is allowed to block.
pub trait ArtifactStore: Send + Sync {
    /// List every object key under `prefix`. An empty result is a valid
    /// answer; the registry decides whether that is an error.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch one object's bytes verbatim.
    fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// In-memory artifact store keyed by full object path.
#[derive(Debug, Default, Clone)]
pub struct MemoryArtifactStore {
    objects: BTreeMap<String, Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object, replacing any previous bytes at `key`.
    pub fn put(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.insert(key.into(), bytes.into());
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects.get(key).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no object at key '{key}'"),
            )
            .into()
        })
    }
}

#[cfg(feature = "remote-models")]
pub use remote::ObjectStoreArtifacts;

#[cfg(feature = "remote-models")]
mod remote {
    use std::io;
    use std::sync::Arc;

    use futures_util::TryStreamExt;
    use object_store::ObjectStore;
    use object_store::path::Path as StorePath;
    use tokio::runtime::Handle;

    use super::ArtifactStore;
    use crate::error::Result;

    /// [`ArtifactStore`] adapter over any `object_store` backend (S3, Azure,
    /// GCS, local filesystem).
    ///
    /// The adapter bridges the async `object_store` API onto the registry's
    /// synchronous startup path via `Handle::block_on`, so it must be driven
    /// from a thread that may block (e.g. inside `spawn_blocking`), never
    /// from an async task directly.
    pub struct ObjectStoreArtifacts {
        inner: Arc<dyn ObjectStore>,
        runtime: Handle,
    }

    impl ObjectStoreArtifacts {
        pub fn new(inner: Arc<dyn ObjectStore>, runtime: Handle) -> Self {
            Self { inner, runtime }
        }
    }

    impl ArtifactStore for ObjectStoreArtifacts {
        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            let store_prefix = StorePath::from(prefix);
            let keys = self.runtime.block_on(async {
                self.inner
                    .list(Some(&store_prefix))
                    .map_ok(|meta| meta.location.to_string())
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(io::Error::from)
            })?;
            Ok(keys)
        }

        fn get(&self, key: &str) -> Result<Vec<u8>> {
            let location = StorePath::from(key);
            let bytes = self.runtime.block_on(async {
                let result = self.inner.get(&location).await.map_err(io::Error::from)?;
                result.bytes().await.map_err(io::Error::from)
            })?;
            Ok(bytes.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn memory_store_lists_by_prefix() -> anyhow::Result<()> {
        let mut store = MemoryArtifactStore::new();
        store.put("models/en/am/final.mdl", b"am".to_vec());
        store.put("models/en/conf/model.conf", b"conf".to_vec());
        store.put("models/pt-br/am/final.mdl", b"am".to_vec());

        let keys = store.list("models/en/")?;
        assert_eq!(
            keys,
            vec![
                "models/en/am/final.mdl".to_owned(),
                "models/en/conf/model.conf".to_owned(),
            ]
        );
        assert!(store.list("models/xx/")?.is_empty());
        Ok(())
    }

    #[test]
    fn memory_store_missing_key_is_io_error() {
        let store = MemoryArtifactStore::new();
        let err = store.get("nope").expect_err("missing key should fail");
        assert!(matches!(err, Error::Io(_)));
    }
}
