use std::collections::VecDeque;

/// Carry buffer that re-cuts arbitrary sample runs into fixed quanta.
///
/// The pipeline's frame length is the max of what its consumers want, so
/// every consumer with a smaller hard frame size (the echo canceller's 10 ms
/// blocks, the VAD's 480-sample sub-frames, the wake engine's own frame)
/// owns one of these and pulls exact quanta out of it.
pub struct SampleChunker {
    buf: VecDeque<i16>,
    quantum: usize,
}

impl SampleChunker {
    pub fn new(quantum: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(quantum * 4),
            quantum,
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Samples buffered but not yet emitted.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.buf.extend(samples.iter().copied());
    }

    /// Fill `out` (exactly one quantum long) with the next quantum, in push
    /// order. Returns false when a full quantum is not available yet.
    pub fn pop_into(&mut self, out: &mut [i16]) -> bool {
        debug_assert_eq!(out.len(), self.quantum);
        if self.buf.len() < self.quantum {
            return false;
        }
        for slot in out.iter_mut() {
            *slot = self.buf.pop_front().unwrap_or(0);
        }
        true
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_exact_quanta_in_order() {
        let mut c = SampleChunker::new(4);
        c.push(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0i16; 4];
        assert!(c.pop_into(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(!c.pop_into(&mut out));
        assert_eq!(c.pending(), 2);
    }

    #[test]
    fn carry_spans_pushes() {
        let mut c = SampleChunker::new(4);
        c.push(&[1, 2, 3]);
        let mut out = [0i16; 4];
        assert!(!c.pop_into(&mut out));
        c.push(&[4, 5]);
        assert!(c.pop_into(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(c.pending(), 1);
    }

    #[test]
    fn clear_drops_pending_samples() {
        let mut c = SampleChunker::new(2);
        c.push(&[7, 8, 9]);
        c.clear();
        assert_eq!(c.pending(), 0);
    }
}
