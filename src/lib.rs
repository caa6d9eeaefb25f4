//! `parlance` — an offline batch speech-to-text pipeline with per-language
//! acoustic models.
//!
//! This crate provides:
//! - Per-language model lifecycle management (local or object-storage backed)
//! - Audio normalization via an external transcoder (ffmpeg)
//! - Streaming decode orchestration with guaranteed temp-resource cleanup
//!
//! The library is designed to be used by long-running backend services: load
//! models once, then run many concurrent, file-scoped recognition sessions.
//! Real-time streaming to a caller and language auto-detection are out of
//! scope; the caller always names the language.

// High-level API (most consumers should start here).
pub mod transcriber;

// Language/model configuration and the per-language registry.
pub mod config;
pub mod registry;

// Model artifact storage (local staging of remote prefixes).
pub mod store;

// Model and decoder seams, plus the built-in backends.
pub mod backends;
pub mod model;

// Pipeline stages: temp staging, normalization, decode orchestration.
pub mod engine;
pub mod temp;
pub mod transcode;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use config::{LanguagesConfig, ModelSource};
pub use engine::RecognitionEngine;
pub use error::{Error, Result, Stage};
pub use model::{DecodeEvent, Decoder, ModelLoader, SpeechModel, Transcript};
pub use registry::ModelRegistry;
pub use store::{ArtifactStore, MemoryArtifactStore};
pub use temp::{StagedFile, TempStore};
pub use transcode::{TARGET_SAMPLE_RATE, Transcoder};
pub use transcriber::{RecognizeOpts, Transcriber};

#[cfg(feature = "logging")]
pub use logging::init as init_logging;

#[cfg(feature = "vosk")]
pub use backends::vosk::VoskModelLoader;

#[cfg(feature = "remote-models")]
pub use store::ObjectStoreArtifacts;
