//! Remote model materialization through the full transcriber construction
//! path.

use std::path::Path;
use std::sync::Arc;

use parlance::{
    ArtifactStore, DecodeEvent, Decoder, Error, LanguagesConfig, MemoryArtifactStore, ModelLoader,
    ModelSource, RecognitionEngine, SpeechModel, TempStore, Transcoder, Transcriber,
};

/// Loader that checks the registry handed it a fully materialized directory.
struct VerifyingLoader;

struct EchoModel;

struct EchoDecoder;

impl Decoder for EchoDecoder {
    fn accept(&mut self, _samples: &[i16]) -> parlance::Result<DecodeEvent> {
        Ok(DecodeEvent::Accepted)
    }

    fn finalize(&mut self) -> parlance::Result<String> {
        Ok(String::new())
    }
}

impl SpeechModel for EchoModel {
    fn new_decoder(&self, _sample_rate: u32) -> parlance::Result<Box<dyn Decoder>> {
        Ok(Box::new(EchoDecoder))
    }
}

impl ModelLoader for VerifyingLoader {
    fn load(&self, language: &str, dir: &Path) -> parlance::Result<Arc<dyn SpeechModel>> {
        assert_eq!(language, "pt-br");
        assert_eq!(
            std::fs::read(dir.join("am/final.mdl")).expect("materialized artifact"),
            b"acoustic-model-bytes"
        );
        assert_eq!(
            std::fs::read(dir.join("conf/mfcc.conf")).expect("materialized artifact"),
            b"mfcc-settings"
        );
        Ok(Arc::new(EchoModel))
    }
}

fn remote_config() -> LanguagesConfig {
    let mut config = LanguagesConfig::new();
    config.add("pt-br", ModelSource::Remote {
        prefix: "models/pt-br/".to_owned(),
    });
    config
}

#[test]
fn transcriber_materializes_remote_models_at_startup() -> anyhow::Result<()> {
    let mut store = MemoryArtifactStore::new();
    store.put("models/pt-br/am/final.mdl", b"acoustic-model-bytes".to_vec());
    store.put("models/pt-br/conf/mfcc.conf", b"mfcc-settings".to_vec());
    store.put("models/en/am/final.mdl", b"other-language".to_vec());

    let transcriber = Transcriber::with_parts(
        &remote_config(),
        &VerifyingLoader,
        Some(&store as &dyn ArtifactStore),
        Transcoder::new(),
        RecognitionEngine::new(),
        TempStore::new(),
    )?;

    assert_eq!(transcriber.languages(), vec!["pt-br".to_owned()]);
    Ok(())
}

#[test]
fn empty_remote_prefix_fails_startup_naming_the_prefix() {
    let store = MemoryArtifactStore::new();

    let err = Transcriber::with_parts(
        &remote_config(),
        &VerifyingLoader,
        Some(&store as &dyn ArtifactStore),
        Transcoder::new(),
        RecognitionEngine::new(),
        TempStore::new(),
    )
    .expect_err("empty prefix must abort startup");

    match err {
        Error::EmptyModelSource { prefix } => assert_eq!(prefix, "models/pt-br/"),
        other => panic!("expected EmptyModelSource, got {other:?}"),
    }
}

#[test]
fn remote_sources_without_a_store_are_a_config_error() {
    let err = Transcriber::with_parts(
        &remote_config(),
        &VerifyingLoader,
        None,
        Transcoder::new(),
        RecognitionEngine::new(),
        TempStore::new(),
    )
    .expect_err("remote sources need a store");

    assert!(matches!(err, Error::Config(_)));
}
