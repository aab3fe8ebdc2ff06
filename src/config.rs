use std::path::PathBuf;

/// Static configuration for the audio front-end.
///
/// Read once at startup by [`crate::VoiceInput::init`]; there is no
/// hot-reload. Parsing a configuration file into this struct is the
/// embedding application's job.
#[derive(Clone, Debug)]
pub struct AudioConfig {
    /// Capture device name, `None` for the host default input.
    pub input_device: Option<String>,
    /// Capture sample rate in Hz. Must match the wake-word engine's rate.
    pub sample_rate: u32,

    /// Path to the wake-word engine shared library.
    pub wake_library_path: PathBuf,
    /// Path to the engine's acoustic model file.
    pub wake_model_path: PathBuf,
    /// Path to the keyword file the engine scores against.
    pub wake_keyword_path: PathBuf,
    /// Detection sensitivity in 0.0..=1.0; out-of-range values are clamped.
    pub wake_sensitivity: f32,

    /// Voiced audio required after a wake before a turn starts streaming.
    pub vad_min_woke_ms: u32,
    /// Silence budget after a wake before it is called a false wake.
    pub vad_start_speaking_ms: u32,
    /// Trailing silence that ends a spoken turn.
    pub vad_done_speaking_ms: u32,
    /// Hard bound on one utterance; hitting it aborts the turn.
    pub max_utterance_ms: u32,

    /// Frames of pre-wake audio retained for the start of a turn.
    pub preroll_max_frames: usize,
    /// Playback frames retained for echo-reference lookup.
    pub playback_window_frames: usize,
}

impl AudioConfig {
    /// Bounds applied to the VAD millisecond settings before conversion.
    pub const VAD_MIN_MS: u32 = 100;
    pub const VAD_MAX_MS: u32 = 5_000;
    /// Bounds applied to the utterance limit so a garbage value cannot
    /// disable the abort path.
    pub const UTTERANCE_MIN_MS: u32 = 1_000;
    pub const UTTERANCE_MAX_MS: u32 = 30_000;

    /// Convert a millisecond duration to a whole frame count, clamping the
    /// input to `[lo, hi]` first. Never returns zero.
    fn frames_for(&self, frame_length: usize, ms: u32, lo: u32, hi: u32) -> u32 {
        let ms = ms.clamp(lo, hi) as u64;
        let frames = ms * self.sample_rate as u64 / (1_000 * frame_length as u64);
        frames.max(1) as u32
    }

    /// Derive the state-machine thresholds for the pipeline frame length
    /// fixed at startup.
    pub fn turn_thresholds(&self, frame_length: usize) -> TurnThresholds {
        TurnThresholds {
            min_woke_frames: self.frames_for(
                frame_length,
                self.vad_min_woke_ms,
                Self::VAD_MIN_MS,
                Self::VAD_MAX_MS,
            ),
            start_silence_frames: self.frames_for(
                frame_length,
                self.vad_start_speaking_ms,
                Self::VAD_MIN_MS,
                Self::VAD_MAX_MS,
            ),
            done_silence_frames: self.frames_for(
                frame_length,
                self.vad_done_speaking_ms,
                Self::VAD_MIN_MS,
                Self::VAD_MAX_MS,
            ),
            max_utterance_frames: self.frames_for(
                frame_length,
                self.max_utterance_ms,
                Self::UTTERANCE_MIN_MS,
                Self::UTTERANCE_MAX_MS,
            ),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            sample_rate: 16_000,
            wake_library_path: PathBuf::from("assets/libpv_porcupine.so"),
            wake_model_path: PathBuf::from("assets/porcupine_params.pv"),
            wake_keyword_path: PathBuf::from("assets/keyword.ppn"),
            wake_sensitivity: 0.7,
            vad_min_woke_ms: 640,
            vad_start_speaking_ms: 2_000,
            vad_done_speaking_ms: 320,
            max_utterance_ms: 8_000,
            preroll_max_frames: 32,
            playback_window_frames: 1_024,
        }
    }
}

/// Frame-count thresholds derived once at startup from the millisecond
/// configuration. Counters in the state machine compare against these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnThresholds {
    pub min_woke_frames: u32,
    pub start_silence_frames: u32,
    pub done_silence_frames: u32,
    pub max_utterance_frames: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 512;

    fn config_with(ms: u32) -> AudioConfig {
        AudioConfig {
            vad_done_speaking_ms: ms,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn default_thresholds_match_reference_timing() {
        let t = AudioConfig::default().turn_thresholds(FRAME);
        // 16 kHz / 512-sample frames = 31.25 frames per second
        assert_eq!(t.min_woke_frames, 20); // 640 ms
        assert_eq!(t.start_silence_frames, 62); // 2000 ms
        assert_eq!(t.done_silence_frames, 10); // 320 ms
        assert_eq!(t.max_utterance_frames, 250); // 8000 ms
    }

    #[test]
    fn derivation_is_monotonic_in_ms() {
        let mut last = 0;
        for ms in [100, 300, 900, 2_700, 5_000] {
            let t = config_with(ms).turn_thresholds(FRAME);
            assert!(t.done_silence_frames >= last);
            last = t.done_silence_frames;
        }
    }

    #[test]
    fn out_of_range_ms_is_clamped_not_rejected() {
        let low = config_with(1).turn_thresholds(FRAME);
        let high = config_with(60_000).turn_thresholds(FRAME);
        assert_eq!(
            low.done_silence_frames,
            config_with(AudioConfig::VAD_MIN_MS)
                .turn_thresholds(FRAME)
                .done_silence_frames
        );
        assert_eq!(
            high.done_silence_frames,
            config_with(AudioConfig::VAD_MAX_MS)
                .turn_thresholds(FRAME)
                .done_silence_frames
        );
    }

    #[test]
    fn threshold_is_never_zero() {
        // 100 ms at 16 kHz is 1600 samples, less than one 2048-sample frame.
        let t = config_with(100).turn_thresholds(2_048);
        assert_eq!(t.done_silence_frames, 1);
    }

    #[test]
    fn utterance_bound_has_its_own_clamp() {
        let cfg = AudioConfig {
            max_utterance_ms: 0,
            ..AudioConfig::default()
        };
        let clamped = AudioConfig {
            max_utterance_ms: AudioConfig::UTTERANCE_MIN_MS,
            ..AudioConfig::default()
        };
        assert_eq!(
            cfg.turn_thresholds(FRAME).max_utterance_frames,
            clamped.turn_thresholds(FRAME).max_utterance_frames
        );
    }
}
