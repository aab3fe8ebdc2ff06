use crate::error::Error;
use crate::frame::AudioFrame;

/// One open speech-to-text turn.
///
/// Frames arrive strictly in capture order: the drained pre-roll first, then
/// every live frame, with no duplication at the seam. A stream ends exactly
/// once, through `commit` (normal end of speech) or `abort` (timeout or
/// shutdown) — downstream consumers rely on telling the two apart. Both are
/// idempotent; ending an already-ended stream is a no-op.
pub trait SttStream: Send {
    fn push(&mut self, frame: &AudioFrame) -> Result<(), Error>;
    fn commit(&mut self);
    fn abort(&mut self);
}

/// Handle to the remote speech-to-text service.
///
/// Opening a stream can fail transiently (network, auth); the caller treats
/// that as a lost turn, not a fatal condition. The transport takes frames as
/// 16-bit little-endian PCM — see [`AudioFrame::as_bytes`].
pub trait SttClient: Send + Sync {
    fn open_stream(&self) -> Result<Box<dyn SttStream>, Error>;
}
