use thiserror::Error;

/// Errors surfaced through the public lifecycle API.
///
/// Per-frame engine hiccups are absorbed inside the capture loop and never
/// show up here; these variants are the startup/teardown failures and the
/// speech-to-text stream faults collaborators need to see.
#[derive(Debug, Error)]
pub enum Error {
    /// The capture device could not be opened or configured.
    #[error("audio capture device: {0}")]
    Device(String),

    /// The wake-word engine could not be loaded, resolved, or constructed.
    #[error("wake-word engine: {0}")]
    WakeEngine(String),

    /// The configuration is inconsistent with what the engines require.
    #[error("audio configuration: {0}")]
    Config(String),

    /// A speech-to-text stream could not be opened or written.
    #[error("speech-to-text: {0}")]
    Stt(String),
}
