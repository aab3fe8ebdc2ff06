use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use tracing::debug;

use crate::processors::SampleChunker;

/// Sub-frame size the voice activity engine operates on (30 ms at 16 kHz).
pub const VAD_FRAME_LENGTH: usize = 480;

/// Per-frame speech presence classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadClass {
    Silent,
    NotSilent,
}

/// Speech presence classifier driven by the turn state machine.
///
/// Implementations carry whatever adaptive state their engine needs; the
/// state machine treats them as a pure per-frame classifier.
pub trait VoiceActivity: Send {
    fn classify(&mut self, samples: &[i16]) -> VadClass;
    fn reset(&mut self);
}

/// WebRTC-style voice activity detection via `earshot`.
///
/// Pipeline frames are longer than the engine's 480-sample sub-frame, so
/// input is re-cut through a carry buffer; a frame is voiced if any complete
/// sub-frame in it is voiced. An engine error counts the sub-frame silent
/// (a negative classification for that frame only, never an error upward).
pub struct EarshotVad {
    engine: VoiceActivityDetector,
    chunker: SampleChunker,
    chunk_buf: Vec<i16>,
    last: VadClass,
}

impl EarshotVad {
    pub fn new() -> Self {
        Self {
            engine: VoiceActivityDetector::new(VoiceActivityProfile::QUALITY),
            chunker: SampleChunker::new(VAD_FRAME_LENGTH),
            chunk_buf: vec![0; VAD_FRAME_LENGTH],
            last: VadClass::Silent,
        }
    }
}

impl Default for EarshotVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivity for EarshotVad {
    fn classify(&mut self, samples: &[i16]) -> VadClass {
        self.chunker.push(samples);
        let mut classified = false;
        let mut voiced = false;
        while self.chunker.pop_into(&mut self.chunk_buf) {
            classified = true;
            match self.engine.predict_16khz(&self.chunk_buf) {
                Ok(true) => voiced = true,
                Ok(false) => {}
                Err(_) => {
                    debug!("vad engine rejected sub-frame");
                }
            }
        }
        if classified {
            self.last = if voiced {
                VadClass::NotSilent
            } else {
                VadClass::Silent
            };
        }
        // With no complete sub-frame yet, repeat the previous decision.
        self.last
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.chunker.clear();
        self.last = VadClass::Silent;
    }
}
