//! Language/model configuration.
//!
//! The registry loads a fixed, enumerated set of languages at startup; this
//! module describes that set. Configuration arrives either as a JSON document
//! or as `code=source` pairs from a CLI, where a source is a local directory
//! path or a `remote:` object-storage prefix.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where one language's model artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSource {
    /// A directory on local disk holding the complete model.
    Local { path: PathBuf },
    /// An object-storage prefix to materialize into a staging directory.
    Remote { prefix: String },
}

/// The enumerated set of supported languages and their model sources.
///
/// Language codes are stored lowercased; lookups elsewhere lowercase too, so
/// `"EN"` and `"en"` name the same model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagesConfig {
    pub languages: BTreeMap<String, ModelSource>,
}

impl LanguagesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language. Codes are lowercased; re-adding a code replaces
    /// its source.
    pub fn add(&mut self, code: impl AsRef<str>, source: ModelSource) -> &mut Self {
        self.languages
            .insert(code.as_ref().to_ascii_lowercase(), source);
        self
    }

    /// Parse CLI-style `code=source` pairs, e.g. `en=./models/en` or
    /// `pt-br=remote:models/pt-br/`.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut config = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (code, source) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!("expected 'code=source', got '{pair}'"))
            })?;
            let code = code.trim();
            let source = source.trim();
            if code.is_empty() || source.is_empty() {
                return Err(Error::Config(format!(
                    "language code and source must be non-empty in '{pair}'"
                )));
            }
            let source = match source.strip_prefix("remote:") {
                Some(prefix) => ModelSource::Remote {
                    prefix: prefix.to_owned(),
                },
                None => ModelSource::Local {
                    path: PathBuf::from(source),
                },
            };
            config.add(code, source);
        }
        Ok(config)
    }

    /// Load a JSON configuration document, e.g.
    /// `{"languages": {"en": {"type": "local", "path": "./models/en"}}}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Whether any configured language needs a remote artifact store.
    pub fn has_remote_sources(&self) -> bool {
        self.languages
            .values()
            .any(|source| matches!(source, ModelSource::Remote { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_and_remote_pairs() -> anyhow::Result<()> {
        let config = LanguagesConfig::from_pairs(&[
            "EN=./models/en",
            "pt-br=remote:models/pt-br/",
        ])?;

        assert_eq!(
            config.languages.get("en"),
            Some(&ModelSource::Local {
                path: PathBuf::from("./models/en")
            })
        );
        assert_eq!(
            config.languages.get("pt-br"),
            Some(&ModelSource::Remote {
                prefix: "models/pt-br/".to_owned()
            })
        );
        assert!(config.has_remote_sources());
        Ok(())
    }

    #[test]
    fn rejects_malformed_pairs() {
        for bad in ["en", "=./models", "en=  "] {
            let err = LanguagesConfig::from_pairs(&[bad]).expect_err("should reject");
            assert!(matches!(err, Error::Config(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn json_round_trip() -> anyhow::Result<()> {
        let mut config = LanguagesConfig::new();
        config.add("en", ModelSource::Remote {
            prefix: "models/en/".to_owned(),
        });

        let json = serde_json::to_string(&config)?;
        let parsed: LanguagesConfig = serde_json::from_str(&json)?;
        assert_eq!(parsed, config);
        Ok(())
    }
}
