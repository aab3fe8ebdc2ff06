use crate::frame::AudioFrame;
use anyhow::Result;

// Sub-modules
pub mod chunk;
pub mod echo;
pub mod suppress;

// Re-exports
pub use chunk::SampleChunker;
pub use echo::EchoCancelStage;
pub use suppress::NoiseSuppressStage;

/// Trait for all audio processors in the capture chain.
pub trait AudioProcessor: Send {
    /// Process a single audio frame.
    /// Returns the processed frame, or None if the frame was consumed
    /// (reference frames) or more input is needed.
    fn process(&mut self, frame: AudioFrame) -> Result<Option<AudioFrame>>;

    /// Return additional ready frames produced from previously buffered
    /// input. Processors that are strictly 1:1 can keep the default.
    fn drain_ready(&mut self) -> Result<Option<AudioFrame>> {
        Ok(None)
    }

    /// Reset processor state.
    fn reset(&mut self);
}

/// Processor that passes frames through unchanged (for testing/debugging).
pub struct PassthroughProcessor;

impl AudioProcessor for PassthroughProcessor {
    fn process(&mut self, frame: AudioFrame) -> Result<Option<AudioFrame>> {
        Ok(Some(frame))
    }

    fn reset(&mut self) {}
}
