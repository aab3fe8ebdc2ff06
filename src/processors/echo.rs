use std::collections::VecDeque;

use anyhow::Result;
use tracing::warn;
use webrtc_audio_processing::config::{EchoCanceller, HighPassFilter};
use webrtc_audio_processing::{Config, Processor};

use super::{AudioProcessor, SampleChunker};
use crate::frame::{AudioFrame, FrameSource};

/// Acoustic echo cancellation stage.
///
/// Playback-tagged frames are the render reference and are consumed;
/// capture-tagged frames come out filtered, one output frame per input
/// frame. Both paths are re-cut internally to the processor's 10 ms block
/// size; the capture path is primed with one silent block so the first
/// frame already yields a full output (a fixed 10 ms lead-in, not a drop).
///
/// When the playback window is idle the loop feeds zero references, which
/// degrades cancellation to pass-through rather than blocking.
pub struct EchoCancelStage {
    apm: Option<Processor>,
    frame_length: usize,
    chunk: usize,
    capture_in: SampleChunker,
    reference_in: SampleChunker,
    processed: VecDeque<i16>,
    chunk_buf: Vec<i16>,
    ref_buf: Vec<i16>,
    capture_scratch: Vec<f32>,
    render_scratch: Vec<f32>,
}

impl EchoCancelStage {
    pub fn new(sample_rate: u32, frame_length: usize) -> Self {
        let apm = match Processor::new(sample_rate as _) {
            Ok(apm) => {
                apm.set_config(Self::build_apm_config());
                Some(apm)
            }
            Err(err) => {
                warn!(error = %err, "echo canceller unavailable, capture passes through unfiltered");
                None
            }
        };
        let chunk = apm
            .as_ref()
            .map(|apm| apm.num_samples_per_frame())
            .unwrap_or(frame_length);

        let mut stage = Self {
            apm,
            frame_length,
            chunk,
            capture_in: SampleChunker::new(chunk),
            reference_in: SampleChunker::new(chunk),
            processed: VecDeque::with_capacity(frame_length * 2),
            chunk_buf: vec![0; chunk],
            ref_buf: vec![0; chunk],
            capture_scratch: Vec::with_capacity(chunk),
            render_scratch: Vec::with_capacity(chunk),
        };
        stage.prime();
        stage
    }

    fn build_apm_config() -> Config {
        let mut apm_config = Config::default();
        apm_config.high_pass_filter = Some(HighPassFilter::default());
        apm_config.echo_canceller = Some(EchoCanceller::Full {
            stream_delay_ms: None,
        });
        apm_config.noise_suppression = None;
        apm_config.gain_controller = None;
        apm_config
    }

    /// One silent block on both paths keeps output frames 1:1 with input
    /// frames when the frame length is not a block multiple.
    fn prime(&mut self) {
        if self.apm.is_some() && self.frame_length % self.chunk != 0 {
            let silence = vec![0i16; self.chunk];
            self.capture_in.push(&silence);
            self.reference_in.push(&silence);
        }
    }

    fn run_blocks(&mut self) {
        let Some(apm) = self.apm.as_mut() else {
            return;
        };
        while self.capture_in.pop_into(&mut self.chunk_buf) {
            // Matching reference block; silence when playback is idle.
            if !self.reference_in.pop_into(&mut self.ref_buf) {
                self.ref_buf.fill(0);
            }

            to_float(&self.ref_buf, &mut self.render_scratch);
            if let Err(err) = apm.process_render_frame([self.render_scratch.as_mut_slice()]) {
                warn!(error = %err, "echo render block rejected");
            }

            to_float(&self.chunk_buf, &mut self.capture_scratch);
            match apm.process_capture_frame([self.capture_scratch.as_mut_slice()]) {
                Ok(()) => from_float(&self.capture_scratch, &mut self.chunk_buf),
                Err(err) => {
                    // chunk_buf still holds the raw samples
                    warn!(error = %err, "echo capture block rejected, passing unfiltered");
                }
            }
            self.processed.extend(self.chunk_buf.iter().copied());
        }
    }
}

impl AudioProcessor for EchoCancelStage {
    fn process(&mut self, mut frame: AudioFrame) -> Result<Option<AudioFrame>> {
        if self.apm.is_none() {
            return Ok(match frame.source {
                FrameSource::Playback => None,
                FrameSource::Capture => Some(frame),
            });
        }

        match frame.source {
            FrameSource::Playback => {
                self.reference_in.push(&frame.samples);
                Ok(None)
            }
            FrameSource::Capture => {
                let wanted = frame.samples.len();
                self.capture_in.push(&frame.samples);
                self.run_blocks();
                if self.processed.len() < wanted {
                    // Only reachable before priming has filled the path.
                    return Ok(None);
                }
                frame.samples.clear();
                frame.samples.extend(self.processed.drain(..wanted));
                Ok(Some(frame))
            }
        }
    }

    fn reset(&mut self) {
        self.capture_in.clear();
        self.reference_in.clear();
        self.processed.clear();
        self.prime();
    }
}

fn to_float(src: &[i16], dst: &mut Vec<f32>) {
    dst.clear();
    dst.extend(src.iter().map(|&s| f32::from(s) / 32_768.0));
}

fn from_float(src: &[f32], dst: &mut [i16]) {
    for (slot, &s) in dst.iter_mut().zip(src) {
        *slot = (s * 32_768.0).clamp(-32_768.0, 32_767.0) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const FRAME: usize = 512;

    fn sine_frame(source: FrameSource, index: usize) -> AudioFrame {
        let samples: Vec<i16> = (0..FRAME)
            .map(|i| {
                let t = (index * FRAME + i) as f32 / RATE as f32;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16
            })
            .collect();
        let timestamp = (index * FRAME) as u64 * 1_000_000_000 / RATE as u64;
        AudioFrame {
            source,
            samples,
            sample_rate: RATE,
            timestamp,
        }
    }

    fn energy(samples: &[i16]) -> f64 {
        samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum()
    }

    #[test]
    fn playback_frames_are_consumed() {
        let mut stage = EchoCancelStage::new(RATE, FRAME);
        let out = stage.process(sine_frame(FrameSource::Playback, 0)).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn capture_frames_stay_one_to_one() {
        let mut stage = EchoCancelStage::new(RATE, FRAME);
        for index in 0..20 {
            let input = sine_frame(FrameSource::Capture, index);
            let expected_ts = input.timestamp;
            let out = stage.process(input).unwrap().expect("one frame out per frame in");
            assert_eq!(out.samples.len(), FRAME);
            assert_eq!(out.timestamp, expected_ts);
            assert_eq!(out.source, FrameSource::Capture);
        }
    }

    #[test]
    fn self_echo_is_attenuated() {
        let mut stage = EchoCancelStage::new(RATE, FRAME);
        if stage.apm.is_none() {
            return;
        }
        let mut last_in = 0.0;
        let mut last_out = 0.0;
        // Simulated self-echo: the capture signal IS the playback signal.
        for index in 0..300 {
            let reference = sine_frame(FrameSource::Playback, index);
            let capture = sine_frame(FrameSource::Capture, index);
            last_in = energy(&capture.samples);
            let _ = stage.process(reference).unwrap();
            if let Some(out) = stage.process(capture).unwrap() {
                last_out = energy(&out.samples);
            }
        }
        assert!(
            last_out < last_in * 0.5,
            "echo energy not attenuated: in={last_in} out={last_out}"
        );
    }

    #[test]
    fn reset_reprimes_the_path() {
        let mut stage = EchoCancelStage::new(RATE, FRAME);
        for index in 0..3 {
            let _ = stage.process(sine_frame(FrameSource::Capture, index)).unwrap();
        }
        stage.reset();
        let out = stage.process(sine_frame(FrameSource::Capture, 0)).unwrap();
        if stage.apm.is_some() {
            assert!(out.is_some());
            assert_eq!(out.unwrap().samples.len(), FRAME);
        }
    }
}
