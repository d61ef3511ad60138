use std::{path::Path, thread};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, info, warn};
use vision::{CaptureSettings, PixelBuffer};

#[cfg(feature = "opencv")]
pub mod camera;
pub mod dir;
pub mod types;

#[cfg(feature = "opencv")]
pub use camera::CameraSource;
pub use dir::ImageDirSource;
pub use types::{CaptureError, Frame, bgr_to_rgb};

/// Anything that yields frames on demand.
pub trait FrameSource {
    /// Device or path, for logs and errors.
    fn describe(&self) -> String;

    /// Block until the next frame is available.
    fn poll(&mut self) -> Result<PixelBuffer, CaptureError>;

    fn release(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn poll(&mut self) -> Result<PixelBuffer, CaptureError> {
        (**self).poll()
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        (**self).release()
    }
}

/// Open the source named by `settings.device`: a directory replays its
/// images, anything else is treated as a camera.
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn FrameSource + Send>, CaptureError> {
    let path = Path::new(&settings.device);
    if path.is_dir() {
        let source = ImageDirSource::open(path)?.mirrored(settings.flip);
        return Ok(Box::new(source));
    }
    open_camera(settings)
}

#[cfg(feature = "opencv")]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource + Send>, CaptureError> {
    Ok(Box::new(CameraSource::open(settings)?))
}

#[cfg(not(feature = "opencv"))]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource + Send>, CaptureError> {
    Err(CaptureError::Other(anyhow::anyhow!(
        "cannot open camera {:?}: built without the `opencv` feature",
        settings.device
    )))
}

/// Spawns a background thread that polls `source` until it ends, fails, or
/// the returned [`Receiver`] is dropped.
///
/// The channel holds two frames, so a slow consumer stalls the reader rather
/// than piling up frames. A read error is forwarded and ends the stream. The
/// source is released when the thread exits.
pub fn spawn_reader<S>(mut source: S) -> Result<Receiver<Result<Frame, CaptureError>>>
where
    S: FrameSource + Send + 'static,
{
    let (tx, rx) = bounded(2);
    thread::Builder::new()
        .name("frame-reader".to_string())
        .spawn(move || {
            if let Err(err) = read_loop(&mut source, &tx) {
                let _ = tx.send(Err(err));
            }
            if let Err(err) = source.release() {
                warn!(source = %source.describe(), error = %err, "failed to release frame source");
            }
        })?;
    Ok(rx)
}

fn read_loop<S: FrameSource>(
    source: &mut S,
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let mut sequence = 0u64;
    loop {
        let buffer = match source.poll() {
            Ok(buffer) => buffer,
            Err(CaptureError::EndOfStream { uri }) => {
                info!(source = %uri, frames = sequence, "frame source exhausted");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let frame = Frame {
            buffer,
            timestamp_ms: Utc::now().timestamp_millis(),
            sequence,
        };
        if tx.send(Ok(frame)).is_err() {
            debug!(frames = sequence, "frame receiver dropped; stopping reader");
            return Ok(());
        }
        sequence += 1;
    }
}

/// Parse `0` or `/dev/video0` style device names into a zero-based index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}
