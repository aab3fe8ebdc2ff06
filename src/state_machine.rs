use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TurnThresholds;
use crate::events::{StateObserver, TurnOutcome};
use crate::frame::AudioFrame;
use crate::playback::{Cue, PlaybackControl};
use crate::preroll::PreRollBuffer;
use crate::processors::SampleChunker;
use crate::stats::RuntimeStatsHandle;
use crate::stt::{SttClient, SttStream};
use crate::vad::{VadClass, VoiceActivity};
use crate::wake::WakeWordDetector;

/// Turn-taking state. Mutated only by the state machine itself, never from
/// outside the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Idle listening: scoring every clean frame for the wake word.
    Waiting,
    /// Wake confirmed: waiting for enough voiced audio to call it a turn.
    Woke,
    /// A turn is open and streaming to speech-to-text.
    Listening,
}

/// Decides when a spoken turn begins and ends.
///
/// Driven frame-by-frame by the capture loop with post-suppression audio;
/// every counter here belongs to the capture thread alone. Collaborators
/// (speech-to-text, playback cues, the observer) are reached through their
/// traits so tests can script them.
pub struct TurnStateMachine {
    state: State,
    thresholds: TurnThresholds,

    wake: Box<dyn WakeWordDetector>,
    wake_chunker: SampleChunker,
    wake_buf: Vec<i16>,
    vad: Box<dyn VoiceActivity>,
    preroll: PreRollBuffer,

    stt: Arc<dyn SttClient>,
    stream: Option<Box<dyn SttStream>>,
    playback: Arc<dyn PlaybackControl>,
    observer: Arc<dyn StateObserver>,
    stats: RuntimeStatsHandle,

    woke_voiced_frames: u32,
    woke_silent_frames: u32,
    trailing_silence_frames: u32,
    listened_frames: u32,
}

impl TurnStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thresholds: TurnThresholds,
        preroll_capacity: usize,
        wake: Box<dyn WakeWordDetector>,
        vad: Box<dyn VoiceActivity>,
        stt: Arc<dyn SttClient>,
        playback: Arc<dyn PlaybackControl>,
        observer: Arc<dyn StateObserver>,
        stats: RuntimeStatsHandle,
    ) -> Self {
        let wake_frame = wake.frame_length();
        Self {
            state: State::Waiting,
            thresholds,
            wake,
            wake_chunker: SampleChunker::new(wake_frame),
            wake_buf: vec![0; wake_frame],
            vad,
            preroll: PreRollBuffer::new(preroll_capacity),
            stt,
            stream: None,
            playback,
            observer,
            stats,
            woke_voiced_frames: 0,
            woke_silent_frames: 0,
            trailing_silence_frames: 0,
            listened_frames: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Advance one clean frame. Frames must arrive in capture order.
    pub fn handle_frame(&mut self, frame: AudioFrame) {
        match self.state {
            State::Waiting => self.waiting_frame(frame),
            State::Woke => self.woke_frame(frame),
            State::Listening => self.listening_frame(frame),
        }
    }

    fn waiting_frame(&mut self, frame: AudioFrame) {
        self.wake_chunker.push(&frame.samples);
        let mut matched = None;
        while self.wake_chunker.pop_into(&mut self.wake_buf) {
            if let Some(keyword) = self.wake.process(&self.wake_buf) {
                matched.get_or_insert(keyword);
            }
        }
        self.preroll.push(frame);

        if let Some(keyword) = matched {
            info!(keyword, "wake word detected");
            self.stats.update(|s| s.wake_detections += 1);
            self.playback.enqueue_cue(Cue::Wake);
            self.observer.on_turn_started();
            self.transition(State::Woke);
        }
    }

    fn woke_frame(&mut self, frame: AudioFrame) {
        let class = self.vad.classify(&frame.samples);
        self.preroll.push(frame);
        match class {
            VadClass::NotSilent => self.woke_voiced_frames += 1,
            VadClass::Silent => self.woke_silent_frames += 1,
        }

        if self.woke_voiced_frames >= self.thresholds.min_woke_frames {
            self.begin_listening();
        } else if self.woke_silent_frames >= self.thresholds.start_silence_frames {
            debug!("no speech after wake");
            self.stats.update(|s| s.false_wakes += 1);
            self.playback.enqueue_cue(Cue::NoInput);
            self.observer.on_turn_finished(TurnOutcome::NoInput);
            self.transition(State::Waiting);
        }
    }

    fn begin_listening(&mut self) {
        match self.stt.open_stream() {
            Ok(mut stream) => {
                // Pre-wake audio first, oldest frame first, then live frames.
                for frame in self.preroll.drain() {
                    self.push_frame(&mut stream, &frame);
                }
                self.stream = Some(stream);
                self.transition(State::Listening);
            }
            Err(err) => {
                warn!(error = %err, "could not open speech-to-text stream");
                self.stats.update(|s| s.stt_open_failures += 1);
                self.playback.enqueue_cue(Cue::SttError);
                self.observer.on_turn_finished(TurnOutcome::SttUnavailable);
                self.transition(State::Waiting);
            }
        }
    }

    fn listening_frame(&mut self, frame: AudioFrame) {
        let class = self.vad.classify(&frame.samples);
        if let Some(mut stream) = self.stream.take() {
            self.push_frame(&mut stream, &frame);
            self.stream = Some(stream);
        }
        self.listened_frames += 1;
        match class {
            VadClass::Silent => self.trailing_silence_frames += 1,
            VadClass::NotSilent => self.trailing_silence_frames = 0,
        }

        if self.trailing_silence_frames >= self.thresholds.done_silence_frames {
            info!(frames = self.listened_frames, "end of speech");
            if let Some(mut stream) = self.stream.take() {
                stream.commit();
            }
            self.stats.update(|s| s.turns_committed += 1);
            self.observer.on_turn_finished(TurnOutcome::Committed);
            self.transition(State::Waiting);
        } else if self.listened_frames >= self.thresholds.max_utterance_frames {
            warn!(
                frames = self.listened_frames,
                "utterance exceeded the configured maximum"
            );
            if let Some(mut stream) = self.stream.take() {
                stream.abort();
            }
            self.stats.update(|s| s.turns_aborted += 1);
            self.playback.enqueue_cue(Cue::TooMuchInput);
            self.observer.on_turn_finished(TurnOutcome::TooMuchInput);
            self.transition(State::Waiting);
        }
    }

    fn push_frame(&self, stream: &mut Box<dyn SttStream>, frame: &AudioFrame) {
        if let Err(err) = stream.push(frame) {
            // The turn keeps going; the stream's own ending decides its fate.
            warn!(error = %err, "speech-to-text push failed");
            self.stats.update(|s| s.stt_push_failures += 1);
        }
    }

    /// Abort any open turn, e.g. on shutdown. Calling this twice is a no-op.
    pub fn abort_turn(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        stream.abort();
        self.stats.update(|s| s.turns_aborted += 1);
        self.observer.on_turn_finished(TurnOutcome::Interrupted);
        self.transition(State::Waiting);
    }

    fn transition(&mut self, to: State) {
        debug!(from = ?self.state, to = ?to, "state change");
        self.state = to;
        match to {
            State::Waiting => {
                // The pre-roll keeps rolling so the next wake has its lead-in.
                self.woke_voiced_frames = 0;
                self.woke_silent_frames = 0;
                self.trailing_silence_frames = 0;
                self.playback.resume();
            }
            State::Woke => {
                self.woke_voiced_frames = 0;
                self.woke_silent_frames = 0;
                // Program audio pauses for the turn; echo cancellation alone
                // is not enough once the user is actually speaking to us.
                self.playback.stop();
            }
            State::Listening => {
                self.trailing_silence_frames = 0;
                self.listened_frames = 0;
            }
        }
        self.observer.on_state_changed(to);
    }
}
