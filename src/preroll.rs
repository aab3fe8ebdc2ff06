use std::collections::VecDeque;

use crate::frame::AudioFrame;

/// Bounded ring of the most recent clean frames.
///
/// Wake-word detection lags the start of speech, so the loop keeps buffering
/// here while WAITING and WOKE; when a turn reaches LISTENING the whole
/// buffer is drained, oldest first, ahead of the live frames. Overflow
/// evicts the oldest frame and never blocks.
pub struct PreRollBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PreRollBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Take every buffered frame in capture order, leaving the ring empty.
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(marker: i16) -> AudioFrame {
        AudioFrame::capture(vec![marker; 4], 16_000, marker as u64)
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut buf = PreRollBuffer::new(3);
        for marker in 0..5 {
            buf.push(frame(marker));
        }
        assert_eq!(buf.len(), 3);
        let markers: Vec<i16> = buf.drain().iter().map(|f| f.samples[0]).collect();
        assert_eq!(markers, vec![2, 3, 4]);
    }

    #[test]
    fn drain_preserves_order_and_empties() {
        let mut buf = PreRollBuffer::new(8);
        for marker in 0..4 {
            buf.push(frame(marker));
        }
        let markers: Vec<i16> = buf.drain().iter().map(|f| f.samples[0]).collect();
        assert_eq!(markers, vec![0, 1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let mut buf = PreRollBuffer::new(0);
        buf.push(frame(1));
        buf.push(frame(2));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.drain()[0].samples[0], 2);
    }
}
