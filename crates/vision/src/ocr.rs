//! Text extraction through an external recognizer process.
//!
//! One extraction walks `Idle -> Saved -> Invoked` and ends in a recovered
//! text, an empty result, or an error:
//! - the frame is written losslessly to `image_path`;
//! - the recognizer runs as `<binary> [-l <lang>] -psm <mode> <image> <outbase>`
//!   and is expected to leave its text in `<outbase>.txt`;
//! - that file is read back.
//!
//! Both files belong to the caller; nothing here picks unique names or
//! deletes them afterwards.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use crossbeam_channel::{Receiver, bounded};
use tracing::{debug, info, warn};

use crate::{
    buffer::PixelBuffer,
    config::RecognizerConfig,
    error::{Result, VisionError},
};

/// Progress of one extraction, reported in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrState {
    Idle,
    Saved,
    Invoked,
}

impl OcrState {
    pub fn label(self) -> &'static str {
        match self {
            OcrState::Idle => "idle",
            OcrState::Saved => "saved",
            OcrState::Invoked => "invoked",
        }
    }
}

/// Outcome of a successful recognizer run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recognition {
    /// Full contents of the result file.
    Recovered(String),
    /// The recognizer ran but found no text.
    Empty,
}

impl Recognition {
    pub fn text(&self) -> Option<&str> {
        match self {
            Recognition::Recovered(text) => Some(text),
            Recognition::Empty => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcrRequest {
    pub page_segmentation_mode: u32,
    pub language: Option<String>,
    pub image_path: PathBuf,
    pub output_base_path: PathBuf,
}

impl OcrRequest {
    /// Request using the recognizer's default mode and language.
    pub fn new(
        recognizer: &RecognizerConfig,
        image_path: impl Into<PathBuf>,
        output_base_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            page_segmentation_mode: recognizer.default_page_segmentation_mode,
            language: recognizer.default_language.clone(),
            image_path: image_path.into(),
            output_base_path: output_base_path.into(),
        }
    }

    pub fn with_page_segmentation_mode(mut self, mode: u32) -> Self {
        self.page_segmentation_mode = mode;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Where the recognizer writes its result: `output_base_path` + `.txt`.
    pub fn output_text_path(&self) -> PathBuf {
        let mut path = OsString::from(self.output_base_path.as_os_str());
        path.push(".txt");
        PathBuf::from(path)
    }
}

/// Runs the save / recognize / read-back hand-off against one recognizer.
#[derive(Clone, Debug)]
pub struct OcrExtractor {
    recognizer: RecognizerConfig,
}

impl OcrExtractor {
    pub fn new(recognizer: RecognizerConfig) -> Self {
        Self { recognizer }
    }

    pub fn recognizer(&self) -> &RecognizerConfig {
        &self.recognizer
    }

    /// Request pre-filled with this extractor's defaults.
    pub fn request(
        &self,
        image_path: impl Into<PathBuf>,
        output_base_path: impl Into<PathBuf>,
    ) -> OcrRequest {
        OcrRequest::new(&self.recognizer, image_path, output_base_path)
    }

    /// Arguments passed to the recognizer binary for `request`.
    pub fn recognizer_args(&self, request: &OcrRequest) -> Vec<OsString> {
        let mut args = Vec::with_capacity(6);
        match (&self.recognizer.language_flag, &request.language) {
            (Some(flag), Some(lang)) => {
                args.push(OsString::from(flag));
                args.push(OsString::from(lang));
            }
            (None, Some(lang)) => {
                debug!(language = %lang, "recognizer has no language flag; language dropped");
            }
            (_, None) => {}
        }
        args.push(OsString::from(&self.recognizer.psm_flag));
        args.push(OsString::from(request.page_segmentation_mode.to_string()));
        args.push(request.image_path.clone().into_os_string());
        args.push(request.output_base_path.clone().into_os_string());
        args
    }

    /// Blocking extraction. Callers on a cooperative scheduler should use
    /// [`OcrExtractor::spawn_extraction`] instead.
    pub fn extract(&self, buffer: &PixelBuffer, request: &OcrRequest) -> Result<Recognition> {
        let mut state = OcrState::Idle;
        debug!(state = state.label(), image = %request.image_path.display(), "starting extraction");

        save_frame(buffer, &request.image_path)?;
        state = OcrState::Saved;
        debug!(state = state.label(), "frame persisted");

        self.invoke(request)?;
        state = OcrState::Invoked;
        debug!(state = state.label(), "recognizer finished");

        read_result(&request.output_text_path())
    }

    /// Run [`OcrExtractor::extract`] on a dedicated thread. The returned
    /// channel yields exactly one result.
    pub fn spawn_extraction(
        &self,
        buffer: PixelBuffer,
        request: OcrRequest,
    ) -> Result<Receiver<Result<Recognition>>> {
        let (tx, rx) = bounded(1);
        let extractor = self.clone();
        thread::Builder::new()
            .name("ocr-extract".to_string())
            .spawn(move || {
                let _ = tx.send(extractor.extract(&buffer, &request));
            })?;
        Ok(rx)
    }

    fn invoke(&self, request: &OcrRequest) -> Result<()> {
        let binary = &self.recognizer.binary;
        let output = Command::new(binary)
            .args(self.recognizer_args(request))
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    VisionError::RecognitionUnavailable {
                        binary: binary.clone(),
                        source: err,
                    }
                }
                _ => VisionError::Io(err),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() || !stderr.trim().is_empty() {
            debug!(stdout = %stdout.trim(), stderr = %stderr.trim(), "recognizer output");
        }

        if !output.status.success() {
            warn!(status = %output.status, "recognizer exited unsuccessfully");
            return Err(VisionError::RecognitionFailed(format!(
                "{} exited with {}: {}",
                binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn save_frame(buffer: &PixelBuffer, path: &Path) -> Result<()> {
    buffer.save_png(path)?;
    if !path.is_file() {
        return Err(VisionError::EncodingFailure {
            path: path.to_path_buf(),
            reason: "no file present after write".to_string(),
        });
    }
    Ok(())
}

fn read_result(path: &Path) -> Result<Recognition> {
    if !path.is_file() {
        return Err(VisionError::RecognitionFailed(format!(
            "recognizer produced no output at {}",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        info!(path = %path.display(), "recognizer found no text");
        return Ok(Recognition::Empty);
    }
    Ok(Recognition::Recovered(text))
}
