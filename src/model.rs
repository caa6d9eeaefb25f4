//! Model and decoder seams.
//!
//! A `SpeechModel` is an opaque, language-specific resource bundle: loaded
//! once, shared read-only across every concurrent session for its language,
//! and released at process shutdown. A `Decoder` is the opposite: stateful,
//! created per session, fed ordered sample chunks, flushed once, dropped.
//!
//! Keeping both behind traits lets the registry and engine run against fakes
//! in tests and keeps the native backend (see `backends::vosk`) an opt-in
//! link-time dependency.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// Outcome of feeding one chunk of samples to a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeEvent {
    /// Chunk consumed; nothing new to report.
    Accepted,
    /// Chunk consumed and an intermediate hypothesis is available.
    ///
    /// The engine deliberately discards partials; only the end-of-stream
    /// flush contributes to the returned transcript.
    PartialReady,
}

/// An immutable, language-keyed acoustic/language resource bundle.
///
/// Implementations must be safe to share across threads; all mutable decode
/// state lives in the per-session [`Decoder`].
pub trait SpeechModel: Send + Sync {
    /// Create a decoder bound to this model, initialized at `sample_rate` Hz.
    fn new_decoder(&self, sample_rate: u32) -> Result<Box<dyn Decoder>>;
}

impl std::fmt::Debug for dyn SpeechModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn SpeechModel")
    }
}

/// Session-exclusive streaming decoder.
///
/// Chunk boundaries must not influence the final transcript; only the byte
/// order within the stream matters.
pub trait Decoder {
    /// Consume one ordered chunk of 16-bit mono samples.
    fn accept(&mut self, samples: &[i16]) -> Result<DecodeEvent>;

    /// Flush the stream and return the final transcript payload.
    ///
    /// The payload is passed through to the caller losslessly; depending on
    /// the backend it may be plain text or a serialized structure.
    fn finalize(&mut self) -> Result<String>;
}

/// Constructs a [`SpeechModel`] from a fully materialized local directory.
///
/// The registry guarantees every artifact of the language is present under
/// `dir` before calling `load`; no partial or streaming loads happen here.
pub trait ModelLoader: Send + Sync {
    fn load(&self, language: &str, dir: &Path) -> Result<Arc<dyn SpeechModel>>;
}

/// Final result of one recognition session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Transcript {
    /// The (lowercased) language code the session decoded against.
    pub language: String,
    /// The decoder's final output, passed through verbatim.
    pub text: String,
}
