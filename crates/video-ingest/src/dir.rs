//! Replays still images from a directory as if they came from a camera.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::{debug, info};
use vision::PixelBuffer;

use crate::{FrameSource, types::CaptureError};

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "bmp", "pgm", "ppm", "tif", "tiff"];

/// Frame source over the image files of one directory, in file-name order.
#[derive(Debug)]
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    flip: bool,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("listing frames in {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.context("reading directory entry")?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(CaptureError::Open {
                uri: dir.display().to_string(),
            });
        }
        info!(dir = %dir.display(), frames = files.len(), "image directory opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
            looping: false,
            flip: false,
        })
    }

    /// Start over from the first file instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn mirrored(mut self, flip: bool) -> Self {
        self.flip = flip;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn poll(&mut self) -> Result<PixelBuffer, CaptureError> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(CaptureError::EndOfStream {
                    uri: self.describe(),
                });
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;
        debug!(path = %path.display(), "replaying frame");

        let mut buffer = PixelBuffer::open(path).map_err(|err| CaptureError::Read {
            uri: path.display().to_string(),
            reason: err.to_string(),
        })?;
        if self.flip {
            buffer.flip_horizontal();
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn write_frame(dir: &Path, name: &str, value: u8) {
        let mut image = GrayImage::from_pixel(4, 2, Luma([value]));
        image.put_pixel(0, 0, Luma([255]));
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn frames_replay_in_name_order_then_end() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "b.png", 20);
        write_frame(dir.path(), "a.png", 10);
        write_frame(dir.path(), "c.png", 30);
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 3);
        let values: Vec<_> = (0..3)
            .map(|_| source.poll().unwrap().sample(1, 0, 0).unwrap())
            .collect();
        assert_eq!(values, [10, 20, 30]);
        assert!(matches!(
            source.poll(),
            Err(CaptureError::EndOfStream { .. })
        ));
    }

    #[test]
    fn looping_restarts_and_mirroring_flips() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "only.png", 10);
        let mut source = ImageDirSource::open(dir.path())
            .unwrap()
            .looping(true)
            .mirrored(true);
        for _ in 0..3 {
            let frame = source.poll().unwrap();
            assert_eq!(frame.sample(3, 0, 0), Some(255));
            assert_eq!(frame.sample(0, 0, 0), Some(10));
        }
    }

    #[test]
    fn empty_or_missing_directories_fail_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageDirSource::open(dir.path()),
            Err(CaptureError::Open { .. })
        ));
        assert!(matches!(
            ImageDirSource::open(dir.path().join("missing")),
            Err(CaptureError::Other(_))
        ));
    }

    #[test]
    fn undecodable_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"not png").unwrap();
        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert!(matches!(source.poll(), Err(CaptureError::Read { .. })));
    }
}
