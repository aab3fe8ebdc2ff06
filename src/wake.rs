use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::ptr;

use libloading::Library;
use tracing::{debug, info};

use crate::error::Error;

/// Index of the matched keyword within the engine's keyword set.
pub type KeywordIndex = u32;

/// Wake-word scoring capability.
///
/// `process` takes exactly `frame_length()` samples at `sample_rate()` and
/// must never block; the capture loop calls it on every clean frame while
/// WAITING. Engine hiccups are a non-detection, never an error upward.
pub trait WakeWordDetector: Send {
    fn process(&mut self, frame: &[i16]) -> Option<KeywordIndex>;
    fn frame_length(&self) -> usize;
    fn sample_rate(&self) -> u32;
}

type PvStatus = i32;
const PV_STATUS_SUCCESS: PvStatus = 0;

type PvInitFn = unsafe extern "C" fn(
    *const c_char,
    i32,
    *const *const c_char,
    *const f32,
    *mut *mut c_void,
) -> PvStatus;
type PvProcessFn = unsafe extern "C" fn(*mut c_void, *const i16, *mut i32) -> PvStatus;
type PvDeleteFn = unsafe extern "C" fn(*mut c_void);
type PvStatusToStringFn = unsafe extern "C" fn(PvStatus) -> *const c_char;
type PvFrameLengthFn = unsafe extern "C" fn() -> i32;
type PvSampleRateFn = unsafe extern "C" fn() -> i32;

/// Porcupine-style wake-word engine loaded from a shared library at startup.
///
/// The engine is a vendor blob: the library is opened from the configured
/// path and the scoring, release, and status-string capabilities are
/// resolved by symbol. Any load, resolution, or construction failure is a
/// fatal startup error; the appliance cannot run without wake detection.
#[derive(Debug)]
pub struct PorcupineDetector {
    // Dropped last; the resolved fn pointers point into this mapping.
    _library: Library,
    handle: *mut c_void,
    process_fn: PvProcessFn,
    delete_fn: PvDeleteFn,
    status_to_string_fn: PvStatusToStringFn,
    frame_length: usize,
    sample_rate: u32,
}

// The engine handle is only ever touched by the thread that owns the
// detector; it is created on the init thread and moved to the capture
// thread before any scoring happens.
unsafe impl Send for PorcupineDetector {}

impl PorcupineDetector {
    pub fn load(
        library_path: &Path,
        model_path: &Path,
        keyword_path: &Path,
        sensitivity: f32,
    ) -> Result<Self, Error> {
        let library = unsafe { Library::new(library_path) }.map_err(|err| {
            Error::WakeEngine(format!("loading {}: {err}", library_path.display()))
        })?;

        let init_fn: PvInitFn = resolve(&library, b"pv_porcupine_init\0")?;
        let process_fn: PvProcessFn = resolve(&library, b"pv_porcupine_process\0")?;
        let delete_fn: PvDeleteFn = resolve(&library, b"pv_porcupine_delete\0")?;
        let status_to_string_fn: PvStatusToStringFn = resolve(&library, b"pv_status_to_string\0")?;
        let frame_length_fn: PvFrameLengthFn = resolve(&library, b"pv_porcupine_frame_length\0")?;
        let sample_rate_fn: PvSampleRateFn = resolve(&library, b"pv_sample_rate\0")?;

        let frame_length = unsafe { frame_length_fn() };
        let sample_rate = unsafe { sample_rate_fn() };
        if frame_length <= 0 || sample_rate <= 0 {
            return Err(Error::WakeEngine(format!(
                "engine reports nonsensical geometry: {frame_length} samples at {sample_rate} Hz"
            )));
        }

        let model = path_cstring(model_path)?;
        let keyword = path_cstring(keyword_path)?;
        let keyword_ptr = keyword.as_ptr();
        let sensitivity = sensitivity.clamp(0.0, 1.0);

        let mut handle: *mut c_void = ptr::null_mut();
        let status = unsafe { init_fn(model.as_ptr(), 1, &keyword_ptr, &sensitivity, &mut handle) };
        if status != PV_STATUS_SUCCESS || handle.is_null() {
            return Err(Error::WakeEngine(format!(
                "engine init failed: {}",
                status_string(status_to_string_fn, status)
            )));
        }

        info!(
            library = %library_path.display(),
            frame_length,
            sample_rate,
            sensitivity,
            "wake-word engine loaded"
        );

        Ok(Self {
            _library: library,
            handle,
            process_fn,
            delete_fn,
            status_to_string_fn,
            frame_length: frame_length as usize,
            sample_rate: sample_rate as u32,
        })
    }
}

impl WakeWordDetector for PorcupineDetector {
    fn process(&mut self, frame: &[i16]) -> Option<KeywordIndex> {
        if frame.len() != self.frame_length {
            debug!(
                got = frame.len(),
                want = self.frame_length,
                "wake frame length mismatch"
            );
            return None;
        }
        let mut index: i32 = -1;
        let status = unsafe { (self.process_fn)(self.handle, frame.as_ptr(), &mut index) };
        if status != PV_STATUS_SUCCESS {
            debug!(
                status = %status_string(self.status_to_string_fn, status),
                "wake engine process error"
            );
            return None;
        }
        (index >= 0).then_some(index as KeywordIndex)
    }

    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for PorcupineDetector {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.delete_fn)(self.handle) };
            self.handle = ptr::null_mut();
        }
    }
}

fn resolve<T: Copy>(library: &Library, symbol: &[u8]) -> Result<T, Error> {
    unsafe {
        library
            .get::<T>(symbol)
            .map(|sym| *sym)
            .map_err(|err| {
                Error::WakeEngine(format!(
                    "resolving {}: {err}",
                    String::from_utf8_lossy(&symbol[..symbol.len() - 1])
                ))
            })
    }
}

fn path_cstring(path: &Path) -> Result<CString, Error> {
    let s = path
        .to_str()
        .ok_or_else(|| Error::WakeEngine(format!("non-UTF-8 path: {}", path.display())))?;
    CString::new(s).map_err(|_| Error::WakeEngine(format!("path contains NUL: {}", path.display())))
}

fn status_string(status_to_string_fn: PvStatusToStringFn, status: PvStatus) -> String {
    let ptr = unsafe { status_to_string_fn(status) };
    if ptr.is_null() {
        return format!("status {status}");
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_library_is_a_fatal_load_error() {
        let missing = PathBuf::from("/nonexistent/libwake.so");
        let result = PorcupineDetector::load(
            &missing,
            Path::new("/nonexistent/model.pv"),
            Path::new("/nonexistent/keyword.ppn"),
            0.7,
        );
        match result {
            Err(Error::WakeEngine(msg)) => assert!(msg.contains("/nonexistent/libwake.so")),
            other => panic!("expected a wake-engine error, got {other:?}"),
        }
    }
}
