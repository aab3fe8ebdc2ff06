//! Always-on audio front-end for a voice-assistant appliance.
//!
//! Captures microphone audio on a dedicated thread, cancels the device's own
//! playback from the capture signal, suppresses noise, watches for the wake
//! word, and runs the turn-taking state machine that streams one spoken
//! request (pre-roll included) to a speech-to-text collaborator.
//!
//! The embedding application supplies the collaborators — a [`SttClient`],
//! a [`PlaybackControl`] for audio cues, and a [`StateObserver`] for status
//! indicators and latency tracking — and owns the event loop; this crate
//! owns the capture thread and nothing else.

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod pipeline;
pub mod playback;
pub mod preroll;
pub mod processors;
pub mod state_machine;
pub mod stats;
pub mod stt;
pub mod vad;
pub mod wake;

pub use config::AudioConfig;
pub use error::Error;
pub use events::{NullObserver, StateObserver, TurnOutcome};
pub use frame::{AudioFrame, FrameSource};
pub use playback::{Cue, PlaybackControl, PlaybackWindowHandle};
pub use state_machine::State;
pub use stats::{RuntimeStats, RuntimeStatsHandle};
pub use stt::{SttClient, SttStream};
pub use vad::{EarshotVad, VadClass, VoiceActivity, VAD_FRAME_LENGTH};
pub use wake::{KeywordIndex, PorcupineDetector, WakeWordDetector};

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use tracing::info;

use crate::capture::FrameReader;
use crate::pipeline::CaptureLoop;
use crate::processors::{AudioProcessor, EchoCancelStage, NoiseSuppressStage};
use crate::state_machine::TurnStateMachine;

/// The voice capture engine.
///
/// [`init`](Self::init) opens the capture device, loads the wake-word
/// engine, and starts the capture thread; any failure there is fatal and
/// leaves the engine closed. [`close`](Self::close) stops the thread and
/// releases the device and engine; it is safe to call repeatedly and runs
/// on drop.
pub struct VoiceInput {
    config: AudioConfig,
    stt: Arc<dyn SttClient>,
    playback_control: Arc<dyn PlaybackControl>,
    observer: Arc<dyn StateObserver>,
    playback_window: PlaybackWindowHandle,
    stats: RuntimeStatsHandle,
    thread: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl VoiceInput {
    pub fn new(
        config: AudioConfig,
        stt: Arc<dyn SttClient>,
        playback_control: Arc<dyn PlaybackControl>,
        observer: Arc<dyn StateObserver>,
    ) -> Self {
        let playback_window = PlaybackWindowHandle::new(config.playback_window_frames);
        Self {
            config,
            stt,
            playback_control,
            observer,
            playback_window,
            stats: RuntimeStatsHandle::new(),
            thread: None,
            stop_tx: None,
        }
    }

    /// Open the capture device, load the wake-word engine, and start the
    /// capture thread.
    pub fn init(&mut self) -> Result<(), Error> {
        // Ensure a previous run is fully stopped before starting a new one.
        self.close();
        self.stats.reset();

        let wake = PorcupineDetector::load(
            &self.config.wake_library_path,
            &self.config.wake_model_path,
            &self.config.wake_keyword_path,
            self.config.wake_sensitivity,
        )?;
        if wake.sample_rate() != self.config.sample_rate {
            return Err(Error::Config(format!(
                "wake engine wants {} Hz but capture is configured for {} Hz",
                wake.sample_rate(),
                self.config.sample_rate
            )));
        }

        // One frame length for the whole pipeline: the largest any consumer
        // needs; smaller consumers re-chunk internally.
        let frame_length = wake.frame_length().max(VAD_FRAME_LENGTH);
        let thresholds = self.config.turn_thresholds(frame_length);

        let (stop_tx, stop_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), Error>>(1);

        let config = self.config.clone();
        let stt = Arc::clone(&self.stt);
        let playback_control = Arc::clone(&self.playback_control);
        let observer = Arc::clone(&self.observer);
        let window = self.playback_window.clone();
        let stats = self.stats.clone();
        let wake: Box<dyn WakeWordDetector> = Box::new(wake);

        let thread = std::thread::Builder::new()
            .name("wakeloop-capture".into())
            .spawn(move || {
                // The cpal stream must live on the thread that services it,
                // so the device opens here and init() waits on the result.
                let stream = match capture::open(&config) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let reader =
                    FrameReader::new(stream.samples(), frame_length, config.sample_rate);
                let processors: Vec<Box<dyn AudioProcessor>> = vec![
                    Box::new(EchoCancelStage::new(config.sample_rate, frame_length)),
                    Box::new(NoiseSuppressStage::new(config.sample_rate, frame_length)),
                ];
                let machine = TurnStateMachine::new(
                    thresholds,
                    config.preroll_max_frames,
                    wake,
                    Box::new(EarshotVad::new()),
                    stt,
                    playback_control,
                    observer,
                    stats.clone(),
                );
                let mut capture_loop = CaptureLoop::new(
                    config,
                    stream,
                    reader,
                    processors,
                    machine,
                    window,
                    stop_rx,
                    stats,
                    frame_length,
                );
                capture_loop.run();
            })
            .map_err(|e| Error::Device(format!("spawning capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                self.stop_tx = Some(stop_tx);
                info!(frame_length, "voice input initialized");
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Device(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Stop the capture thread and release the device and engine.
    pub fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Snapshot of the pipeline's counters and stage timings.
    pub fn stats(&self) -> RuntimeStats {
        self.stats.snapshot()
    }

    /// Handle the playback subsystem writes its emitted frames into; the
    /// capture thread reads it for echo-reference lookup.
    pub fn playback_window(&self) -> PlaybackWindowHandle {
        self.playback_window.clone()
    }
}

impl Drop for VoiceInput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct NoStt;

    impl SttClient for NoStt {
        fn open_stream(&self) -> Result<Box<dyn SttStream>, Error> {
            Err(Error::Stt("unavailable".into()))
        }
    }

    struct NoPlayback;

    impl PlaybackControl for NoPlayback {
        fn enqueue_cue(&self, _cue: Cue) {}
        fn stop(&self) {}
        fn resume(&self) {}
    }

    fn engine() -> VoiceInput {
        VoiceInput::new(
            AudioConfig {
                wake_library_path: PathBuf::from("/nonexistent/libwake.so"),
                ..AudioConfig::default()
            },
            Arc::new(NoStt),
            Arc::new(NoPlayback),
            Arc::new(NullObserver),
        )
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let mut input = engine();
        input.close();
        input.close();
        assert!(!input.is_running());
    }

    #[test]
    fn init_without_the_wake_engine_is_fatal() {
        let mut input = engine();
        match input.init() {
            Err(Error::WakeEngine(_)) => {}
            other => panic!("expected a wake-engine error, got {other:?}"),
        }
        assert!(!input.is_running());
        // A failed init leaves the engine safely closeable.
        input.close();
    }

    #[test]
    fn playback_window_handle_is_shared() {
        let input = engine();
        let writer = input.playback_window();
        writer.push(AudioFrame::playback(vec![1; 4], 16_000, 10));
        assert!(!input.playback_window().is_empty());
    }
}
