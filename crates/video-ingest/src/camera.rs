//! OpenCV-backed camera capture.

use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{info, warn};
use vision::{CaptureSettings, PixelBuffer};

use crate::{
    FrameSource, parse_device_index,
    types::{CaptureError, bgr_to_rgb},
};

/// Camera opened by device index. Frames are resized to the requested size
/// and delivered as 8-bit RGB.
pub struct CameraSource {
    uri: String,
    cap: Option<VideoCapture>,
    size: (i32, i32),
    flip: bool,
    frame: Mat,
    scratch: Mat,
}

impl CameraSource {
    pub fn open(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let uri = settings.device.clone();
        let size = (settings.width as i32, settings.height as i32);
        let mut cap = open_video_capture(&uri)?;
        configure_camera(&mut cap, size, 30.0);
        info!(device = %uri, width = size.0, height = size.1, "camera opened");
        Ok(Self {
            uri,
            cap: Some(cap),
            size,
            flip: settings.flip,
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }

    /// Hand the device back. Safe to call more than once.
    pub fn release(&mut self) -> Result<(), CaptureError> {
        if let Some(mut cap) = self.cap.take() {
            cap.release().map_err(|err| CaptureError::Release {
                uri: self.uri.clone(),
                reason: err.to_string(),
            })?;
            info!(device = %self.uri, "camera released");
        }
        Ok(())
    }

    fn read_error(&self, reason: impl ToString) -> CaptureError {
        CaptureError::Read {
            uri: self.uri.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        self.uri.clone()
    }

    fn poll(&mut self) -> Result<PixelBuffer, CaptureError> {
        let Some(cap) = self.cap.as_mut() else {
            return Err(self.read_error("camera already released"));
        };
        let grabbed = cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            return Err(self.read_error("camera returned an empty frame"));
        }

        let (target_w, target_h) = self.size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let mut data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();
        bgr_to_rgb(&mut data);

        let mut buffer = PixelBuffer::from_raw(target_w as u32, target_h as u32, 3, data)
            .map_err(|err| self.read_error(err))?;
        if self.flip {
            buffer.flip_horizontal();
        }
        Ok(buffer)
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        CameraSource::release(self)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(err) = CameraSource::release(self) {
            warn!(device = %self.uri, error = %err, "camera release failed during drop");
        }
    }
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    let Some(index) = parse_device_index(uri) else {
        return Err(CaptureError::Open {
            uri: uri.to_string(),
        });
    };
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!(index, backend, error = %err, "failed to open camera with backend");
            }
        }
    }
    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply resolution and frame rate; the driver may ignore either.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
