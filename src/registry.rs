//! Per-language model registry.
//!
//! Built once at startup under an initialization barrier (plain `&mut`
//! construction before the registry is shared), then immutable for the
//! process's remaining lifetime. `get` is therefore lock-free: sessions only
//! clone an `Arc` to the shared, read-only model.
//!
//! Remote-backed languages are materialized in full — list the prefix, fail
//! if it is empty, recreate the directory tree locally, copy bytes verbatim —
//! before the loader ever sees the directory. There is no partial or
//! streaming load; a language's model either exists completely or not at all.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::info;

use crate::config::{LanguagesConfig, ModelSource};
use crate::error::{Error, Result};
use crate::model::{ModelLoader, SpeechModel};
use crate::store::ArtifactStore;
use crate::temp::TempStore;

/// Immutable-after-init cache of one loaded model per supported language.
pub struct ModelRegistry {
    models: HashMap<String, LoadedModel>,
}

struct LoadedModel {
    model: Arc<dyn SpeechModel>,
    // Keeps a remote language's materialized artifacts on disk until the
    // registry drops at shutdown.
    _staging: Option<TempDir>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry").finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Load every configured language, failing fast on the first language
    /// that cannot be fully loaded.
    ///
    /// `store` is only consulted for `ModelSource::Remote` entries; passing
    /// `None` with remote sources configured is a configuration error.
    pub fn initialize(
        config: &LanguagesConfig,
        loader: &dyn ModelLoader,
        store: Option<&dyn ArtifactStore>,
        temp: &TempStore,
    ) -> Result<Self> {
        if config.is_empty() {
            return Err(Error::Config("no languages configured".into()));
        }
        if config.has_remote_sources() && store.is_none() {
            return Err(Error::Config(
                "remote model sources configured but no artifact store provided".into(),
            ));
        }

        let mut models = HashMap::with_capacity(config.languages.len());
        for (language, source) in &config.languages {
            let started = Instant::now();
            let loaded = match source {
                ModelSource::Local { path } => {
                    if !path.is_dir() {
                        return Err(Error::ModelLoad {
                            language: language.clone(),
                            detail: format!("model directory '{}' not found", path.display()),
                        });
                    }
                    LoadedModel {
                        model: loader.load(language, path)?,
                        _staging: None,
                    }
                }
                ModelSource::Remote { prefix } => {
                    let store = store.ok_or_else(|| {
                        Error::Config(format!(
                            "language '{language}' uses a remote source but no artifact store provided"
                        ))
                    })?;
                    let staging = temp.staging_dir(&format!("model-{language}"))?;
                    let artifacts = materialize_prefix(store, prefix, staging.path())?;
                    info!(language, prefix, artifacts, "materialized remote model");
                    LoadedModel {
                        model: loader.load(language, staging.path())?,
                        _staging: Some(staging),
                    }
                }
            };
            info!(
                language,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "loaded model"
            );
            models.insert(language.clone(), loaded);
        }

        Ok(Self { models })
    }

    /// Fetch the shared model for a language code (case-insensitive).
    pub fn get(&self, language: &str) -> Result<Arc<dyn SpeechModel>> {
        let key = language.trim().to_ascii_lowercase();
        self.models
            .get(&key)
            .map(|loaded| Arc::clone(&loaded.model))
            .ok_or(Error::UnsupportedLanguage { language: key })
    }

    /// The configured language codes, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.models.keys().cloned().collect();
        codes.sort();
        codes
    }
}

/// Copy every object under `prefix` into `dest`, recreating the relative
/// directory structure. Returns the number of artifacts copied.
fn materialize_prefix(store: &dyn ArtifactStore, prefix: &str, dest: &Path) -> Result<usize> {
    let keys = store.list(prefix)?;
    if keys.is_empty() {
        return Err(Error::EmptyModelSource {
            prefix: prefix.to_owned(),
        });
    }

    let mut copied = 0;
    for key in keys {
        let relative = key
            .strip_prefix(prefix)
            .unwrap_or(key.as_str())
            .trim_start_matches('/');
        if relative.is_empty() {
            // Some stores list the prefix itself as a directory marker.
            continue;
        }

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("refusing non-normal artifact path '{key}'"),
            )));
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = store.get(&key)?;
        fs::write(&target, bytes)?;
        copied += 1;
    }

    Ok(copied)
}
