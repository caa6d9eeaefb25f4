//! High-level API for running batch recognitions.
//!
//! We expose a single ergonomic entry point (`Transcriber`) that wires up the
//! lower-level pieces: the model registry, temp staging, the external
//! transcoder, and the recognition engine.
//!
//! The intent is:
//! - Load every language's model once (expensive, at construction).
//! - Reuse the shared registry to serve many concurrent recognitions.
//! - Give every request its own session: its own temp files, its own decoder,
//!   released on every exit path.

use std::io::Read;

use tracing::{info, info_span};
use uuid::Uuid;

use crate::config::LanguagesConfig;
use crate::engine::RecognitionEngine;
use crate::error::{Result, Stage};
use crate::model::{ModelLoader, Transcript};
use crate::registry::ModelRegistry;
use crate::store::ArtifactStore;
use crate::temp::{GENERIC_SUFFIX, TempStore};
use crate::transcode::Transcoder;

/// Per-request options supplied by the caller.
#[derive(Debug, Clone)]
pub struct RecognizeOpts {
    /// Language code selecting the model (case-insensitive).
    pub language: String,

    /// Optional container-extension hint for the staged input (e.g. `"ogg"`).
    ///
    /// Missing or unusable hints never abort a recognition; staging falls
    /// back to a generic suffix and the transcoder sniffs the container from
    /// content.
    pub extension_hint: Option<String>,
}

impl RecognizeOpts {
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            extension_hint: None,
        }
    }
}

/// The main transcription entry point.
///
/// Construct once (model loading happens here), then call
/// [`Transcriber::recognize`] from as many threads as needed: the registry is
/// immutable after construction and every call gets an exclusive session.
pub struct Transcriber {
    registry: ModelRegistry,
    transcoder: Transcoder,
    engine: RecognitionEngine,
    temp: TempStore,
}

impl std::fmt::Debug for Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcriber").finish_non_exhaustive()
    }
}

impl Transcriber {
    /// Build a transcriber for local-only model sources with default
    /// transcoder and engine settings.
    pub fn new(config: &LanguagesConfig, loader: &dyn ModelLoader) -> Result<Self> {
        Self::with_parts(
            config,
            loader,
            None,
            Transcoder::new(),
            RecognitionEngine::new(),
            TempStore::new(),
        )
    }

    /// Build a transcriber with every collaborator supplied explicitly.
    ///
    /// `store` is required when the configuration names remote model sources.
    pub fn with_parts(
        config: &LanguagesConfig,
        loader: &dyn ModelLoader,
        store: Option<&dyn ArtifactStore>,
        transcoder: Transcoder,
        engine: RecognitionEngine,
        temp: TempStore,
    ) -> Result<Self> {
        let registry = ModelRegistry::initialize(config, loader, store, &temp)?;
        Ok(Self {
            registry,
            transcoder,
            engine,
            temp,
        })
    }

    /// The configured language codes, sorted.
    pub fn languages(&self) -> Vec<String> {
        self.registry.languages()
    }

    /// Run one full recognition session over an input byte stream.
    ///
    /// Stages: stage raw input to a temp file, transcode it to canonical PCM,
    /// stream the PCM through a fresh decoder, return the final transcript.
    /// A failure in any stage short-circuits the rest and surfaces tagged
    /// with that stage; the session's temp files are released on every path
    /// (explicitly on success, by drop otherwise).
    pub fn recognize<R: Read>(&self, mut input: R, opts: &RecognizeOpts) -> Result<Transcript> {
        let language = opts.language.trim().to_ascii_lowercase();
        let span = info_span!("recognize", session = %Uuid::new_v4(), language = %language);
        let _guard = span.enter();

        // Resolve the model first: an unsupported language must fail before
        // any byte is staged or any transcoder process is spawned.
        let model = self.registry.get(&language)?;

        let suffix = usable_suffix(opts.extension_hint.as_deref());
        let mut raw = self
            .temp
            .stage(suffix, &mut input)
            .map_err(|err| err.at(Stage::Staging))?;

        let mut normalized = self
            .temp
            .create(".wav")
            .map_err(|err| err.at(Stage::Normalizing))?;
        self.transcoder
            .transcode(raw.path(), normalized.path())
            .map_err(|err| err.at(Stage::Normalizing))?;
        raw.release().map_err(|err| err.at(Stage::Normalizing))?;

        let text = self.engine.recognize(model.as_ref(), normalized.path())?;
        normalized
            .release()
            .map_err(|err| err.at(Stage::Finalizing))?;

        info!(chars = text.len(), "recognition finalized");
        Ok(Transcript { language, text })
    }
}

/// Accept a hint only if it looks like a plain extension; anything else gets
/// the generic suffix and we rely on content sniffing downstream.
fn usable_suffix(hint: Option<&str>) -> &str {
    match hint {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => GENERIC_SUFFIX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_hints_are_sanitized() {
        assert_eq!(usable_suffix(Some("ogg")), "ogg");
        assert_eq!(usable_suffix(Some("WAV")), "WAV");
        assert_eq!(usable_suffix(Some("../../etc")), GENERIC_SUFFIX);
        assert_eq!(usable_suffix(Some("")), GENERIC_SUFFIX);
        assert_eq!(usable_suffix(Some("toolongext")), GENERIC_SUFFIX);
        assert_eq!(usable_suffix(None), GENERIC_SUFFIX);
    }
}
