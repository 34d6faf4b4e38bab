use std::fs::File;
use std::io;
use std::os::windows::io::{FromRawHandle, RawHandle};
use std::thread;
use std::time::Duration;

use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, ERROR_PIPE_CONNECTED, ERROR_PIPE_LISTENING, HANDLE};
use windows::Win32::Storage::FileSystem::PIPE_ACCESS_OUTBOUND;
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, SetNamedPipeHandleState, NAMED_PIPE_MODE, PIPE_NOWAIT,
    PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_BYTE, PIPE_WAIT,
};

use crate::models::error::CaptureError;
use crate::traits::pipe_source::StreamRole;

const CONNECT_POLL: Duration = Duration::from_millis(10);
const OUT_BUFFER_SIZE: u32 = 1 << 20;

/// Outbound named pipe (`\\.\pipe\media-capture-<role>-<uuid>`) that the
/// encoder opens as a file.
pub struct InputPipe {
    name: String,
    handle: Option<HANDLE>,
}

// The handle is only touched through `&mut self` or on drop.
unsafe impl Send for InputPipe {}

impl InputPipe {
    pub fn create(role: StreamRole) -> Result<Self, CaptureError> {
        let name = format!(r"\\.\pipe\media-capture-{}-{}", role, uuid::Uuid::new_v4());
        // Created non-blocking so connect can poll for the encoder and give up.
        let handle = unsafe {
            CreateNamedPipeW(
                &HSTRING::from(name.as_str()),
                PIPE_ACCESS_OUTBOUND,
                PIPE_TYPE_BYTE | PIPE_NOWAIT | PIPE_REJECT_REMOTE_CLIENTS,
                1,
                OUT_BUFFER_SIZE,
                0,
                0,
                None,
            )
        };
        if handle.is_invalid() {
            return Err(CaptureError::Pipe(format!(
                "CreateNamedPipeW {} failed: {}",
                name,
                io::Error::last_os_error()
            )));
        }
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> String {
        self.name.clone()
    }

    /// Waits for the encoder to open the pipe and returns it as a blocking
    /// writer. `Ok(None)` when `abort` turns true first.
    ///
    /// Non-blocking byte pipes report a full buffer as a zero-length write,
    /// so the handle goes back to `PIPE_WAIT`. A write into a pipe the
    /// encoder stopped reading returns only once it reads again or exits.
    pub fn connect(&mut self, abort: &dyn Fn() -> bool) -> Result<Option<File>, CaptureError> {
        let handle = self
            .handle
            .ok_or_else(|| CaptureError::UseAfterDispose(format!("pipe {}", self.name)))?;

        loop {
            match unsafe { ConnectNamedPipe(handle, None) } {
                Ok(()) => break,
                Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => break,
                Err(e) if e.code() == ERROR_PIPE_LISTENING.to_hresult() => {
                    if abort() {
                        return Ok(None);
                    }
                    thread::sleep(CONNECT_POLL);
                }
                Err(e) => {
                    return Err(CaptureError::Pipe(format!("ConnectNamedPipe {} failed: {}", self.name, e)));
                }
            }
        }

        let mode: NAMED_PIPE_MODE = PIPE_WAIT;
        unsafe { SetNamedPipeHandleState(handle, Some(&mode as *const NAMED_PIPE_MODE), None, None) }
            .map_err(|e| CaptureError::Pipe(format!("cannot make {} blocking: {}", self.name, e)))?;

        // Ownership moves to the File, which closes the handle.
        self.handle = None;
        Ok(Some(unsafe { File::from_raw_handle(handle.0 as RawHandle) }))
    }
}

impl Drop for InputPipe {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }
}
