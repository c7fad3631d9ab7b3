//! Child-process frame source.
//!
//! Spawns a capture pipeline (GStreamer, ffmpeg, ...) that writes raw RGB24
//! frames to stdout and reads them one frame at a time. Killing the child
//! unblocks a pending read, which is what the teardown hook does.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, info, warn};

use lumo_core::{CapturedImage, PixelFormat};

use super::lock;
use super::source::{CaptureError, FrameSource, TeardownHook};

pub struct PipeSource {
    command: String,
    args: Vec<String>,
    width: u32,
    height: u32,
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
}

impl PipeSource {
    pub fn new(command: impl Into<String>, args: Vec<String>, width: u32, height: u32) -> Self {
        Self {
            command: command.into(),
            args,
            width,
            height,
            child: Arc::new(Mutex::new(None)),
            stdout: None,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

fn kill_child(slot: &Mutex<Option<Child>>) {
    if let Some(mut child) = lock(slot).take() {
        if let Err(e) = child.kill() {
            debug!(error = %e, "Capture pipeline already exited");
        }
        let _ = child.wait();
    }
}

impl FrameSource for PipeSource {
    fn name(&self) -> &str {
        &self.command
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        self.close();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.command)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CaptureError::Unavailable("capture pipeline has no stdout".to_string())
        })?;

        info!(
            command = %self.command,
            pid = child.id(),
            width = self.width,
            height = self.height,
            "Capture pipeline started"
        );

        *lock(&self.child) = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn acquire_next_frame(&mut self) -> Result<CapturedImage, CaptureError> {
        let len = self.frame_len();
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| CaptureError::Unavailable("pipeline not running".to_string()))?;

        let mut data = vec![0u8; len];
        if let Err(e) = stdout.read_exact(&mut data) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                warn!(command = %self.command, "Capture pipeline closed its output");
                return Err(CaptureError::Acquire("pipeline exited".to_string()));
            }
            return Err(CaptureError::Io(e));
        }

        Ok(CapturedImage::new(
            self.width,
            self.height,
            PixelFormat::Rgb8,
            Bytes::from(data),
        )?)
    }

    fn close(&mut self) {
        self.stdout = None;
        kill_child(&self.child);
    }

    fn teardown_hook(&self) -> Option<TeardownHook> {
        let child = Arc::clone(&self.child);
        Some(Box::new(move || kill_child(&child)))
    }
}

impl Drop for PipeSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> PipeSource {
        PipeSource::new("sh", vec!["-c".to_string(), script.to_string()], 2, 2)
    }

    #[test]
    fn test_reads_exact_frames() {
        // two 2x2 RGB frames
        let mut source = sh("head -c 24 /dev/zero");
        source.open().unwrap();
        assert_eq!(source.acquire_next_frame().unwrap().data.len(), 12);
        assert_eq!(source.acquire_next_frame().unwrap().data.len(), 12);
        assert!(matches!(
            source.acquire_next_frame(),
            Err(CaptureError::Acquire(_))
        ));
        source.close();
    }

    #[test]
    fn test_missing_command_is_unavailable() {
        let mut source = PipeSource::new("/nonexistent/capture", Vec::new(), 2, 2);
        assert!(matches!(source.open(), Err(CaptureError::Unavailable(_))));
    }

    #[test]
    fn test_teardown_unblocks_read() {
        let mut source = sh("exec sleep 30");
        source.open().unwrap();
        let hook = source.teardown_hook().unwrap();

        let reader = std::thread::spawn(move || source.acquire_next_frame().is_err());
        std::thread::sleep(std::time::Duration::from_millis(100));
        hook();
        assert!(reader.join().unwrap());
    }
}
