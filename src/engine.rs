//! Streaming decode orchestration.
//!
//! The engine owns the narrow contract between normalized audio and a bound
//! model: exactly one decoder per call, samples fed in order in modest
//! chunks, partial hypotheses discarded, and only the end-of-stream flush
//! returned. Chunk boundaries carry no meaning; feeding the same stream in
//! different chunk sizes must produce an identical transcript.

use std::path::Path;

use tracing::trace;

use crate::error::{Error, Result, Stage};
use crate::model::{DecodeEvent, SpeechModel};
use crate::transcode::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};

/// Default feed chunk size in samples (2048 × 2 bytes = 4 KiB of PCM).
pub const DEFAULT_FEED_CHUNK_SAMPLES: usize = 2048;

/// Drives a session-scoped decoder over a normalized PCM file.
#[derive(Debug, Clone)]
pub struct RecognitionEngine {
    feed_chunk_samples: usize,
}

impl Default for RecognitionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine {
    pub fn new() -> Self {
        Self {
            feed_chunk_samples: DEFAULT_FEED_CHUNK_SAMPLES,
        }
    }

    /// Override the feed chunk size. Affects I/O granularity only, never the
    /// transcript.
    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.feed_chunk_samples = samples.max(1);
        self
    }

    /// Decode one normalized WAV file against `model` and return the final
    /// transcript payload.
    ///
    /// The decoder created here never escapes this call: it is dropped on
    /// success and on every failure path, so decode state cannot leak across
    /// sessions.
    pub fn recognize(&self, model: &dyn SpeechModel, normalized_wav: &Path) -> Result<String> {
        // A file we cannot open or that violates the canonical format is the
        // normalizer's output gone wrong, not a decode failure.
        let mut reader = hound::WavReader::open(normalized_wav)
            .map_err(|err| Error::from(err).at(Stage::Normalizing))?;
        validate_spec(&reader.spec()).map_err(|err| err.at(Stage::Normalizing))?;

        let mut decoder = model
            .new_decoder(TARGET_SAMPLE_RATE)
            .map_err(|err| err.at(Stage::Decoding))?;

        let mut chunk: Vec<i16> = Vec::with_capacity(self.feed_chunk_samples);
        let mut partials_discarded = 0u64;

        for sample in reader.samples::<i16>() {
            let sample = sample.map_err(|err| Error::from(err).at(Stage::Decoding))?;
            chunk.push(sample);
            if chunk.len() == self.feed_chunk_samples {
                if feed(decoder.as_mut(), &chunk)? == DecodeEvent::PartialReady {
                    partials_discarded += 1;
                }
                chunk.clear();
            }
        }
        if !chunk.is_empty() && feed(decoder.as_mut(), &chunk)? == DecodeEvent::PartialReady {
            partials_discarded += 1;
        }

        if partials_discarded > 0 {
            trace!(partials_discarded, "discarded intermediate hypotheses");
        }

        decoder
            .finalize()
            .map_err(|err| err.at(Stage::Finalizing))
    }
}

fn feed(decoder: &mut dyn crate::model::Decoder, chunk: &[i16]) -> Result<DecodeEvent> {
    decoder.accept(chunk).map_err(|err| err.at(Stage::Decoding))
}

/// The normalizer's output contract, re-checked before any sample is fed.
fn validate_spec(spec: &hound::WavSpec) -> Result<()> {
    if spec.channels != TARGET_CHANNELS
        || spec.sample_rate != TARGET_SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(Error::Recognition(format!(
            "normalized audio is not {TARGET_SAMPLE_RATE} Hz mono 16-bit PCM \
             (got {} Hz, {} ch, {}-bit {:?})",
            spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
        )));
    }
    Ok(())
}
