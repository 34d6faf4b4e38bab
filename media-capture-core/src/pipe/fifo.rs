use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::traits::pipe_source::StreamRole;

const CONNECT_POLL: Duration = Duration::from_millis(10);

/// Named FIFO in a private temporary directory, written by us and read by
/// the encoder. The directory is removed on drop.
pub struct InputPipe {
    dir: PathBuf,
    path: PathBuf,
}

impl InputPipe {
    pub fn create(role: StreamRole) -> Result<Self, CaptureError> {
        let dir = std::env::temp_dir().join(format!("media-capture-{}", uuid::Uuid::new_v4()));
        fs::create_dir(&dir)
            .map_err(|e| CaptureError::Pipe(format!("cannot create {}: {}", dir.display(), e)))?;

        let path = dir.join(format!("{}.fifo", role));
        if let Err(e) = make_fifo(&path) {
            let _ = fs::remove_dir(&dir);
            return Err(CaptureError::Pipe(format!("mkfifo {} failed: {}", path.display(), e)));
        }
        Ok(Self { dir, path })
    }

    /// Location the encoder opens as its input.
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Waits for the encoder to open the read end and returns the write end.
    ///
    /// The write end stays non-blocking: a full pipe reports `WouldBlock`
    /// instead of parking the writer, so a stalled encoder cannot hold it
    /// past cancellation.
    ///
    /// Returns `Ok(None)` if `abort` turns true first, e.g. because the
    /// encoder exited without ever reading this input.
    pub fn connect(&mut self, abort: &dyn Fn() -> bool) -> Result<Option<File>, CaptureError> {
        loop {
            // Non-blocking open fails with ENXIO until a reader is present.
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)
            {
                Ok(file) => return Ok(Some(file)),
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                    if abort() {
                        return Ok(None);
                    }
                    thread::sleep(CONNECT_POLL);
                }
                Err(e) => {
                    return Err(CaptureError::Pipe(format!("cannot open {}: {}", self.path.display(), e)));
                }
            }
        }
    }
}

impl Drop for InputPipe {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = fs::remove_dir(&self.dir);
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
