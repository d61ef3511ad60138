//! Process-wide settings, built once at start-up and passed by reference to
//! every component that needs them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CASCADE_DIR: &str = "/usr/share/opencv4/haarcascades";
pub const DEFAULT_CASCADE: &str = "haarcascade_frontalface_alt.xml";
pub const DEFAULT_CAPTURE_DEVICE: &str = "0";
pub const DEFAULT_CAPTURE_WIDTH: u32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
pub const DEFAULT_RECOGNIZER: &str = "tesseract";
pub const DEFAULT_LANGUAGE: &str = "eng";
/// Fully automatic page segmentation.
pub const DEFAULT_PAGE_SEGMENTATION_MODE: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Camera acquisition settings handed to the capture collaborator.
pub struct CaptureSettings {
    /// Device index (`0`, `/dev/video0`) or a directory of frames.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Mirror every polled frame horizontally.
    pub flip: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAPTURE_DEVICE.to_string(),
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            flip: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// How to invoke the external text recognizer.
pub struct RecognizerConfig {
    pub binary: PathBuf,
    /// Flag preceding the page segmentation mode (`-psm` for 3.x, `--psm` for 4.x).
    pub psm_flag: String,
    /// Flag preceding the language code; `None` when the recognizer has no
    /// language option, in which case languages are dropped.
    pub language_flag: Option<String>,
    pub default_language: Option<String>,
    pub default_page_segmentation_mode: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_RECOGNIZER),
            psm_flag: "-psm".to_string(),
            language_flag: Some("-l".to_string()),
            default_language: Some(DEFAULT_LANGUAGE.to_string()),
            default_page_segmentation_mode: DEFAULT_PAGE_SEGMENTATION_MODE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Directory bare cascade names are resolved against.
    pub cascade_dir: PathBuf,
    pub default_cascade: String,
    pub capture: CaptureSettings,
    pub recognizer: RecognizerConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            cascade_dir: PathBuf::from(DEFAULT_CASCADE_DIR),
            default_cascade: DEFAULT_CASCADE.to_string(),
            capture: CaptureSettings::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

impl VisionConfig {
    /// Map a cascade name to a path. Bare file names live in `cascade_dir`;
    /// anything carrying a directory component is used as given.
    pub fn resolve_cascade(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        let has_dir = candidate
            .parent()
            .is_some_and(|parent| !parent.as_os_str().is_empty());
        if has_dir || candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.cascade_dir.join(candidate)
        }
    }

    pub fn default_cascade_path(&self) -> PathBuf {
        self.resolve_cascade(&self.default_cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_resolve_into_cascade_dir() {
        let config = VisionConfig {
            cascade_dir: PathBuf::from("/opt/cascades"),
            ..VisionConfig::default()
        };
        assert_eq!(
            config.resolve_cascade("eyes.xml"),
            PathBuf::from("/opt/cascades/eyes.xml")
        );
        assert_eq!(
            config.resolve_cascade("./local/eyes.xml"),
            PathBuf::from("./local/eyes.xml")
        );
        assert_eq!(
            config.resolve_cascade("/abs/eyes.xml"),
            PathBuf::from("/abs/eyes.xml")
        );
        assert_eq!(
            config.default_cascade_path(),
            PathBuf::from("/opt/cascades").join(DEFAULT_CASCADE)
        );
    }

    #[test]
    fn defaults_match_capture_and_recognizer_conventions() {
        let config = VisionConfig::default();
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.recognizer.default_page_segmentation_mode, 3);
        assert_eq!(config.recognizer.psm_flag, "-psm");
    }
}
