//! Vosk-backed model loader and decoder.
//!
//! Vosk models are directory bundles (acoustic model, graph, conf) loaded
//! once per language; recognizers are cheap per-session objects bound to the
//! shared model. The native library is thread-safe for concurrent
//! recognizers over one model, which matches the pipeline's sharing rules
//! exactly: models shared read-only, recognizers never shared.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use vosk::{DecodingState, LogLevel, Model, Recognizer};

use crate::error::{Error, Result};
use crate::model::{DecodeEvent, Decoder, ModelLoader, SpeechModel};

/// Loads Vosk model directories for the registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoskModelLoader;

impl VoskModelLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for VoskModelLoader {
    fn load(&self, language: &str, dir: &Path) -> Result<Arc<dyn SpeechModel>> {
        quiet_native_logging();

        let model = Model::new(dir.to_string_lossy().into_owned()).ok_or_else(|| {
            Error::ModelLoad {
                language: language.to_owned(),
                detail: format!("vosk could not open model directory '{}'", dir.display()),
            }
        })?;

        Ok(Arc::new(VoskSpeechModel { model }))
    }
}

/// One loaded Vosk model; immutable and shared across sessions.
pub struct VoskSpeechModel {
    model: Model,
}

impl SpeechModel for VoskSpeechModel {
    fn new_decoder(&self, sample_rate: u32) -> Result<Box<dyn Decoder>> {
        let recognizer = Recognizer::new(&self.model, sample_rate as f32).ok_or_else(|| {
            Error::Recognition(format!(
                "failed to create recognizer at {sample_rate} Hz"
            ))
        })?;
        Ok(Box::new(VoskDecoder { recognizer }))
    }
}

/// Session-exclusive recognizer; the native handle is freed on drop.
struct VoskDecoder {
    recognizer: Recognizer,
}

impl Decoder for VoskDecoder {
    fn accept(&mut self, samples: &[i16]) -> Result<DecodeEvent> {
        match self.recognizer.accept_waveform(samples) {
            Ok(DecodingState::Running) => Ok(DecodeEvent::Accepted),
            // An utterance boundary was detected and an intermediate
            // hypothesis is available; the engine discards those.
            Ok(DecodingState::Finalized) => Ok(DecodeEvent::PartialReady),
            Ok(DecodingState::Failed) => {
                Err(Error::Recognition("vosk failed to process waveform".into()))
            }
            Err(err) => Err(Error::Recognition(format!(
                "vosk rejected waveform chunk: {err}"
            ))),
        }
    }

    fn finalize(&mut self) -> Result<String> {
        let text = self
            .recognizer
            .final_result()
            .single()
            .map(|result| result.text.to_owned())
            .unwrap_or_default();
        Ok(text)
    }
}

/// Vosk's native logging is noisy on stderr; keep it at errors only so the
/// process's own logs stay structured. Idempotent.
fn quiet_native_logging() {
    static QUIETED: OnceLock<()> = OnceLock::new();
    QUIETED.get_or_init(|| {
        vosk::set_log_level(LogLevel::Error);
    });
}
