use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;

use crate::config::AudioConfig;
use crate::error::Error;
use crate::frame::AudioFrame;

/// A capture read is declared failed if the device produces nothing for
/// this long; frames normally arrive every few tens of milliseconds.
const READ_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Open input stream delivering raw i16 mono sample runs into a channel.
///
/// The device callback only forwards into the unbounded channel, so the
/// capture device itself is never blocked by the pipeline; asynchronous
/// device errors surface as a stalled channel and go through the reader's
/// failure path.
pub struct CaptureStream {
    _stream: Stream,
    rx: Receiver<Vec<i16>>,
}

impl CaptureStream {
    pub fn samples(&self) -> Receiver<Vec<i16>> {
        self.rx.clone()
    }
}

fn find_device(config: &AudioConfig) -> Result<(Device, StreamConfig), Error> {
    let host = cpal::default_host();

    let device = match &config.input_device {
        Some(name) => host
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| Error::Device(format!("input device {name} not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?,
    };

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::I16
                && c.min_sample_rate() <= SampleRate(config.sample_rate)
                && c.max_sample_rate() >= SampleRate(config.sample_rate)
        })
        .ok_or_else(|| {
            // The rate is fixed by the engines; a device that cannot deliver
            // it is a configuration error, not something to resample around.
            Error::Device(format!(
                "device does not support {} Hz mono 16-bit capture",
                config.sample_rate
            ))
        })?;

    let stream_config = supported
        .with_sample_rate(SampleRate(config.sample_rate))
        .config();
    Ok((device, stream_config))
}

/// Open the configured capture device and start it.
pub fn open(config: &AudioConfig) -> Result<CaptureStream, Error> {
    let (device, stream_config) = find_device(config)?;
    let (tx, rx) = unbounded();

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.to_vec());
            },
            |err| {
                tracing::error!(error = %err, "capture stream error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;
    stream.play().map_err(|e| Error::Device(e.to_string()))?;

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        "capture device opened"
    );

    Ok(CaptureStream {
        _stream: stream,
        rx,
    })
}

/// What one blocking read produced.
pub enum ReadOutcome {
    Frame(AudioFrame),
    /// The stop channel fired.
    Stopped,
    /// The device stalled or went away; the caller decides about reopening.
    Failed,
}

/// Assembles exact fixed-length frames from the capture sample channel.
///
/// Frame timestamps come from a running sample counter against a wall-clock
/// epoch taken at open, so they are comparable with the playback window's
/// timestamps without assuming the two paths tick in lockstep.
pub struct FrameReader {
    rx: Receiver<Vec<i16>>,
    carry: VecDeque<i16>,
    frame_length: usize,
    sample_rate: u32,
    epoch_ns: u64,
    samples_read: u64,
}

impl FrameReader {
    pub fn new(rx: Receiver<Vec<i16>>, frame_length: usize, sample_rate: u32) -> Self {
        Self {
            rx,
            carry: VecDeque::with_capacity(frame_length * 4),
            frame_length,
            sample_rate,
            epoch_ns: now_ns(),
            samples_read: 0,
        }
    }

    /// Block until one full frame is available, the stop channel fires, or
    /// the device stalls.
    pub fn next_frame(&mut self, stop_rx: &Receiver<()>) -> ReadOutcome {
        loop {
            if self.carry.len() >= self.frame_length {
                return ReadOutcome::Frame(self.take_frame());
            }
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => return ReadOutcome::Stopped,
                recv(self.rx) -> msg => match msg {
                    Ok(samples) => self.carry.extend(samples),
                    Err(_) => return ReadOutcome::Failed,
                },
                default(READ_STALL_TIMEOUT) => return ReadOutcome::Failed,
            }
        }
    }

    fn take_frame(&mut self) -> AudioFrame {
        let samples: Vec<i16> = self.carry.drain(..self.frame_length).collect();
        let timestamp =
            self.epoch_ns + self.samples_read * 1_000_000_000 / self.sample_rate as u64;
        self.samples_read += self.frame_length as u64;
        AudioFrame::capture(samples, self.sample_rate, timestamp)
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn reader(frame_length: usize) -> (crossbeam_channel::Sender<Vec<i16>>, FrameReader) {
        let (tx, rx) = unbounded();
        (tx, FrameReader::new(rx, frame_length, 16_000))
    }

    #[test]
    fn assembles_exact_frames_across_runs() {
        let (tx, mut reader) = reader(4);
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4, 5, 6, 7, 8]).unwrap();

        let first = match reader.next_frame(&stop_rx) {
            ReadOutcome::Frame(f) => f,
            _ => panic!("expected a frame"),
        };
        let second = match reader.next_frame(&stop_rx) {
            ReadOutcome::Frame(f) => f,
            _ => panic!("expected a frame"),
        };
        assert_eq!(first.samples, vec![1, 2, 3, 4]);
        assert_eq!(second.samples, vec![5, 6, 7, 8]);
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn timestamps_advance_by_frame_duration() {
        let (tx, mut reader) = reader(8);
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        tx.send(vec![0; 16]).unwrap();

        let first = match reader.next_frame(&stop_rx) {
            ReadOutcome::Frame(f) => f,
            _ => panic!("expected a frame"),
        };
        let second = match reader.next_frame(&stop_rx) {
            ReadOutcome::Frame(f) => f,
            _ => panic!("expected a frame"),
        };
        // 8 samples at 16 kHz is 500 microseconds.
        assert_eq!(second.timestamp - first.timestamp, 500_000);
    }

    #[test]
    fn stop_channel_wins_over_waiting() {
        let (_tx, mut reader) = reader(4);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        stop_tx.send(()).unwrap();
        assert!(matches!(reader.next_frame(&stop_rx), ReadOutcome::Stopped));
    }

    #[test]
    fn dropped_device_channel_reports_failure() {
        let (tx, mut reader) = reader(4);
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        drop(tx);
        assert!(matches!(reader.next_frame(&stop_rx), ReadOutcome::Failed));
    }
}
