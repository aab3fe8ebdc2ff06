use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use crate::capture::{self, CaptureStream, FrameReader, ReadOutcome};
use crate::config::AudioConfig;
use crate::frame::{AudioFrame, FrameSource};
use crate::playback::PlaybackWindowHandle;
use crate::processors::AudioProcessor;
use crate::state_machine::TurnStateMachine;
use crate::stats::RuntimeStatsHandle;

const MAX_REOPEN_ATTEMPTS: u32 = 5;
const REOPEN_BACKOFF: Duration = Duration::from_millis(200);

/// The dedicated capture thread's frame loop.
///
/// Owns the device, the processor chain, and the turn state machine; nothing
/// here is touched from any other thread. Each iteration blocks on exactly
/// one frame, pairs it with the nearest playback reference, runs echo
/// cancellation and noise suppression, and hands the clean frame to the
/// state machine. Every other stage is synchronous and bounded per frame so
/// the device is serviced at a fixed cadence.
pub struct CaptureLoop {
    config: AudioConfig,
    // Held to keep the device callback alive; only the reader consumes it.
    #[allow(dead_code)]
    stream: CaptureStream,
    reader: FrameReader,
    processors: Vec<Box<dyn AudioProcessor>>,
    machine: TurnStateMachine,
    playback: PlaybackWindowHandle,
    stop_rx: Receiver<()>,
    stats: RuntimeStatsHandle,
    frame_length: usize,
}

impl CaptureLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AudioConfig,
        stream: CaptureStream,
        reader: FrameReader,
        processors: Vec<Box<dyn AudioProcessor>>,
        machine: TurnStateMachine,
        playback: PlaybackWindowHandle,
        stop_rx: Receiver<()>,
        stats: RuntimeStatsHandle,
        frame_length: usize,
    ) -> Self {
        Self {
            config,
            stream,
            reader,
            processors,
            machine,
            playback,
            stop_rx,
            stats,
            frame_length,
        }
    }

    fn stage_key(index: usize) -> Option<&'static str> {
        match index {
            0 => Some("echo"),
            1 => Some("suppress"),
            _ => None,
        }
    }

    pub fn run(&mut self) {
        info!("capture loop started");
        loop {
            let frame = match self.reader.next_frame(&self.stop_rx) {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Stopped => break,
                ReadOutcome::Failed => {
                    if self.reopen_device() {
                        continue;
                    }
                    break;
                }
            };
            self.stats.update(|s| s.frames_captured += 1);

            let step_start = Instant::now();
            self.feed_reference(frame.timestamp);
            let clean = Self::run_chain(&mut self.processors, frame, &self.stats);
            let Some(clean) = clean else { continue };
            self.machine.handle_frame(clean);

            let step_ns = step_start.elapsed().as_nanos() as u64;
            self.stats.update(|s| {
                s.frame_step.record(step_ns);
                s.frames_processed += 1;
            });
        }
        // A turn left open on the way out is aborted, never half-committed.
        self.machine.abort_turn();
        info!("capture loop stopped");
    }

    /// Push the echo reference for this capture instant into the chain. The
    /// echo stage consumes it; silence stands in while nothing is playing.
    fn feed_reference(&mut self, timestamp: u64) {
        let mut reference = self.playback.nearest(timestamp).unwrap_or_else(|| {
            AudioFrame::silence(
                FrameSource::Playback,
                self.frame_length,
                self.config.sample_rate,
                timestamp,
            )
        });
        // The echo stage pairs reference and capture sample-for-sample, so
        // the reference must carry exactly one pipeline frame.
        reference.samples.resize(self.frame_length, 0);
        reference.source = FrameSource::Playback;
        let _ = Self::run_chain(&mut self.processors, reference, &self.stats);
    }

    fn run_chain(
        processors: &mut [Box<dyn AudioProcessor>],
        frame: AudioFrame,
        stats: &RuntimeStatsHandle,
    ) -> Option<AudioFrame> {
        let mut current = frame;
        for (index, processor) in processors.iter_mut().enumerate() {
            let start = Instant::now();
            let result = processor.process(current);
            let elapsed = start.elapsed().as_nanos() as u64;
            if let Some(stage) = Self::stage_key(index) {
                stats.update(|s| match stage {
                    "echo" => s.echo_stage.record(elapsed),
                    "suppress" => s.suppress_stage.record(elapsed),
                    _ => {}
                });
            }
            match result {
                Ok(Some(processed)) => current = processed,
                Ok(None) => return None,
                Err(err) => {
                    stats.update(|s| s.processor_errors += 1);
                    warn!(stage = index, error = %err, "processor error, frame dropped");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Bounded reopen-with-backoff after a read failure. Returns false when
    /// the loop should give up (stop requested or retries exhausted).
    fn reopen_device(&mut self) -> bool {
        self.stats.update(|s| s.read_errors += 1);
        warn!("capture read failed, attempting to reopen the device");

        for attempt in 1..=MAX_REOPEN_ATTEMPTS {
            match self.stop_rx.recv_timeout(REOPEN_BACKOFF * attempt) {
                Ok(()) => return false,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
            match capture::open(&self.config) {
                Ok(stream) => {
                    self.reader = FrameReader::new(
                        stream.samples(),
                        self.frame_length,
                        self.config.sample_rate,
                    );
                    self.stream = stream;
                    for processor in &mut self.processors {
                        processor.reset();
                    }
                    self.stats.update(|s| s.device_reopens += 1);
                    info!(attempt, "capture device reopened");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "device reopen failed");
                }
            }
        }
        error!(
            attempts = MAX_REOPEN_ATTEMPTS,
            "giving up on the capture device"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::PassthroughProcessor;
    use anyhow::anyhow;

    struct DropProcessor;

    impl AudioProcessor for DropProcessor {
        fn process(&mut self, _frame: AudioFrame) -> anyhow::Result<Option<AudioFrame>> {
            Ok(None)
        }
        fn reset(&mut self) {}
    }

    struct FailProcessor;

    impl AudioProcessor for FailProcessor {
        fn process(&mut self, _frame: AudioFrame) -> anyhow::Result<Option<AudioFrame>> {
            Err(anyhow!("engine fault"))
        }
        fn reset(&mut self) {}
    }

    fn frame() -> AudioFrame {
        AudioFrame::capture(vec![1; 8], 16_000, 0)
    }

    #[test]
    fn stage_mapping_is_fixed() {
        assert_eq!(CaptureLoop::stage_key(0), Some("echo"));
        assert_eq!(CaptureLoop::stage_key(1), Some("suppress"));
        assert_eq!(CaptureLoop::stage_key(2), None);
    }

    #[test]
    fn chain_stops_when_a_frame_is_consumed() {
        let mut processors: Vec<Box<dyn AudioProcessor>> = vec![Box::new(DropProcessor)];
        let stats = RuntimeStatsHandle::new();
        assert!(CaptureLoop::run_chain(&mut processors, frame(), &stats).is_none());
    }

    #[test]
    fn chain_absorbs_processor_errors() {
        let mut processors: Vec<Box<dyn AudioProcessor>> =
            vec![Box::new(FailProcessor), Box::new(PassthroughProcessor)];
        let stats = RuntimeStatsHandle::new();
        assert!(CaptureLoop::run_chain(&mut processors, frame(), &stats).is_none());
        assert_eq!(stats.snapshot().processor_errors, 1);
    }

    #[test]
    fn chain_passes_frames_through_in_order() {
        let mut processors: Vec<Box<dyn AudioProcessor>> =
            vec![Box::new(PassthroughProcessor), Box::new(PassthroughProcessor)];
        let stats = RuntimeStatsHandle::new();
        let out = CaptureLoop::run_chain(&mut processors, frame(), &stats).unwrap();
        assert_eq!(out.samples, vec![1; 8]);
        let snap = stats.snapshot();
        assert_eq!(snap.echo_stage.samples, 1);
        assert_eq!(snap.suppress_stage.samples, 1);
    }
}
