use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::frame::AudioFrame;

/// Short status sounds the front-end asks the playback subsystem to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Wake word confirmed, the device is listening.
    Wake,
    /// Wake fired but no speech followed.
    NoInput,
    /// The utterance hit the configured maximum and was cut off.
    TooMuchInput,
    /// The speech-to-text service could not take the turn.
    SttError,
}

/// The slice of the playback subsystem this crate drives: audio cues and
/// pausing/resuming program audio around a spoken turn.
pub trait PlaybackControl: Send + Sync {
    /// Queue a short status sound. Cues play even while program audio is
    /// stopped.
    fn enqueue_cue(&self, cue: Cue);
    /// Pause program audio (music, news) for the duration of a turn.
    fn stop(&self);
    /// Resume program audio after a turn. May be called without a matching
    /// `stop`; implementations treat that as a no-op.
    fn resume(&self);
}

/// Bounded history of recently played frames, for echo-reference lookup.
///
/// Written by the playback subsystem's thread, read by the capture thread.
/// Readers tolerate an empty or stale window; a momentary miss degrades
/// echo cancellation to pass-through instead of blocking either side.
struct PlaybackFrameWindow {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PlaybackFrameWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    fn nearest(&self, timestamp: u64) -> Option<AudioFrame> {
        self.frames
            .iter()
            .min_by_key(|f| f.timestamp.abs_diff(timestamp))
            .cloned()
    }
}

/// Cloneable handle over the playback-frame window.
///
/// The playback subsystem keeps one clone and pushes each frame it emits;
/// the capture loop keeps another and looks up the nearest reference per
/// captured frame. The capture and playback clocks are not assumed to be
/// in lockstep, hence nearest-timestamp pairing rather than indexing.
#[derive(Clone)]
pub struct PlaybackWindowHandle {
    inner: Arc<Mutex<PlaybackFrameWindow>>,
}

impl PlaybackWindowHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackFrameWindow::new(capacity))),
        }
    }

    /// Record one emitted playback frame.
    pub fn push(&self, frame: AudioFrame) {
        if let Ok(mut window) = self.inner.lock() {
            window.push(frame);
        }
    }

    /// Closest-timestamp frame, or None while nothing is playing.
    pub fn nearest(&self, timestamp: u64) -> Option<AudioFrame> {
        match self.inner.lock() {
            Ok(window) => window.nearest(timestamp),
            Err(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|w| w.frames.is_empty()).unwrap_or(true)
    }

    pub fn clear(&self) {
        if let Ok(mut window) = self.inner.lock() {
            window.frames.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSource;

    fn frame(timestamp: u64) -> AudioFrame {
        AudioFrame::playback(vec![timestamp as i16; 4], 16_000, timestamp)
    }

    #[test]
    fn empty_window_returns_none() {
        let handle = PlaybackWindowHandle::new(8);
        assert!(handle.nearest(1_000).is_none());
        assert!(handle.is_empty());
    }

    #[test]
    fn nearest_picks_the_closer_frame() {
        let handle = PlaybackWindowHandle::new(8);
        handle.push(frame(1_000));
        handle.push(frame(2_000));
        assert_eq!(handle.nearest(1_400).unwrap().timestamp, 1_000);
        assert_eq!(handle.nearest(1_600).unwrap().timestamp, 2_000);
        // Exact hits and far-off lookups both resolve.
        assert_eq!(handle.nearest(2_000).unwrap().timestamp, 2_000);
        assert_eq!(handle.nearest(9_999).unwrap().timestamp, 2_000);
    }

    #[test]
    fn window_is_bounded_and_evicts_oldest() {
        let handle = PlaybackWindowHandle::new(2);
        handle.push(frame(10));
        handle.push(frame(20));
        handle.push(frame(30));
        assert_eq!(handle.nearest(0).unwrap().timestamp, 20);
    }

    #[test]
    fn pushed_frames_keep_their_source_tag() {
        let handle = PlaybackWindowHandle::new(2);
        handle.push(frame(10));
        assert_eq!(handle.nearest(10).unwrap().source, FrameSource::Playback);
    }
}
