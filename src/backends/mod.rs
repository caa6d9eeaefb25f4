/// Built-in acoustic model backends.
///
/// Vosk is the production backend; it links against the native libvosk and is
/// therefore feature-gated so the core pipeline stays buildable and testable
/// against fakes.
#[cfg(feature = "vosk")]
pub mod vosk;
