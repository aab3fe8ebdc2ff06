use std::collections::VecDeque;

use anyhow::Result;
use tracing::warn;
use webrtc_audio_processing::config::{HighPassFilter, NoiseSuppression, NoiseSuppressionLevel};
use webrtc_audio_processing::{Config, Processor};

use super::{AudioProcessor, SampleChunker};
use crate::frame::AudioFrame;

/// Noise suppression and gain normalization stage.
///
/// Runs after echo cancellation so wake-word and VAD decisions see the
/// cleanest signal. Uses its own processor instance configured for noise
/// suppression only, re-cut to 10 ms blocks like the echo stage. Block
/// errors pass the audio through unfiltered rather than dropping it.
pub struct NoiseSuppressStage {
    apm: Option<Processor>,
    frame_length: usize,
    chunk: usize,
    input: SampleChunker,
    processed: VecDeque<i16>,
    chunk_buf: Vec<i16>,
    scratch: Vec<f32>,
}

impl NoiseSuppressStage {
    pub fn new(sample_rate: u32, frame_length: usize) -> Self {
        let apm = match Processor::new(sample_rate as _) {
            Ok(apm) => {
                apm.set_config(Self::build_apm_config());
                Some(apm)
            }
            Err(err) => {
                warn!(error = %err, "noise suppressor unavailable, capture passes through unfiltered");
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
            input: SampleChunker::new(chunk),
            processed: VecDeque::with_capacity(frame_length * 2),
            chunk_buf: vec![0; chunk],
            scratch: Vec::with_capacity(chunk),
        };
        stage.prime();
        stage
    }

    fn build_apm_config() -> Config {
        let mut apm_config = Config::default();
        apm_config.high_pass_filter = Some(HighPassFilter::default());
        apm_config.noise_suppression = Some(NoiseSuppression {
            level: NoiseSuppressionLevel::High,
            analyze_linear_aec_output: false,
        });
        apm_config.echo_canceller = None;
        apm_config.gain_controller = None;
        apm_config
    }

    fn prime(&mut self) {
        if self.apm.is_some() && self.frame_length % self.chunk != 0 {
            let silence = vec![0i16; self.chunk];
            self.input.push(&silence);
        }
    }
}

impl AudioProcessor for NoiseSuppressStage {
    fn process(&mut self, mut frame: AudioFrame) -> Result<Option<AudioFrame>> {
        let Some(apm) = self.apm.as_mut() else {
            return Ok(Some(frame));
        };

        let wanted = frame.samples.len();
        self.input.push(&frame.samples);
        while self.input.pop_into(&mut self.chunk_buf) {
            self.scratch.clear();
            self.scratch
                .extend(self.chunk_buf.iter().map(|&s| f32::from(s) / 32_768.0));
            match apm.process_capture_frame([self.scratch.as_mut_slice()]) {
                Ok(()) => {
                    for (slot, &s) in self.chunk_buf.iter_mut().zip(&self.scratch) {
                        *slot = (s * 32_768.0).clamp(-32_768.0, 32_767.0) as i16;
                    }
                }
                Err(err) => {
                    // chunk_buf still holds the raw samples
                    warn!(error = %err, "noise suppression block rejected, passing unfiltered");
                }
            }
            self.processed.extend(self.chunk_buf.iter().copied());
        }

        if self.processed.len() < wanted {
            // Only reachable before priming has filled the path.
            return Ok(None);
        }
        frame.samples.clear();
        frame.samples.extend(self.processed.drain(..wanted));
        Ok(Some(frame))
    }

    fn reset(&mut self) {
        self.input.clear();
        self.processed.clear();
        self.prime();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const FRAME: usize = 512;

    fn frame(index: usize) -> AudioFrame {
        AudioFrame::capture(
            vec![100; FRAME],
            RATE,
            (index * FRAME) as u64 * 1_000_000_000 / RATE as u64,
        )
    }

    #[test]
    fn output_stays_one_to_one_with_input() {
        let mut stage = NoiseSuppressStage::new(RATE, FRAME);
        for index in 0..10 {
            let input = frame(index);
            let expected_ts = input.timestamp;
            let out = stage.process(input).unwrap().expect("one frame out per frame in");
            assert_eq!(out.samples.len(), FRAME);
            assert_eq!(out.timestamp, expected_ts);
        }
    }

    #[test]
    fn silence_stays_quiet() {
        let mut stage = NoiseSuppressStage::new(RATE, FRAME);
        let mut out_energy = 0.0f64;
        for index in 0..10 {
            let mut input = frame(index);
            input.samples.fill(0);
            if let Some(out) = stage.process(input).unwrap() {
                out_energy = out
                    .samples
                    .iter()
                    .map(|&s| f64::from(s) * f64::from(s))
                    .sum();
            }
        }
        assert!(out_energy < 1.0e3, "suppressor added energy to silence");
    }

    #[test]
    fn reset_reprimes_the_path() {
        let mut stage = NoiseSuppressStage::new(RATE, FRAME);
        for index in 0..3 {
            let _ = stage.process(frame(index)).unwrap();
        }
        stage.reset();
        let out = stage.process(frame(0)).unwrap();
        assert!(out.is_some());
        assert_eq!(out.unwrap().samples.len(), FRAME);
    }
}
