#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use image::{GrayImage, Luma};
use vision::{
    OcrExtractor, PixelBuffer, Recognition, RecognizerConfig, VisionError,
};

/// Write an executable stand-in for the recognizer. `$last` is the output base.
fn fake_recognizer(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\nfor last; do :; done\n{body}\n");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn extractor(binary: PathBuf) -> OcrExtractor {
    OcrExtractor::new(RecognizerConfig {
        binary,
        ..RecognizerConfig::default()
    })
}

// Scripts are created up front and everything runs in one test so no other
// test thread forks while a script is still open for writing.
#[test]
fn recognizer_outcomes_map_to_results() {
    let dir = tempfile::tempdir().unwrap();
    let hello = fake_recognizer(dir.path(), "hello.sh", "printf 'HELLO' > \"$last.txt\"");
    let blank = fake_recognizer(dir.path(), "blank.sh", "printf '  \\n\\n' > \"$last.txt\"");
    let silent = fake_recognizer(dir.path(), "silent.sh", "exit 0");
    let crash = fake_recognizer(dir.path(), "crash.sh", "echo boom >&2; exit 3");
    let frame = PixelBuffer::from_gray8(GrayImage::from_pixel(32, 16, Luma([200]))).unwrap();

    let ocr = extractor(hello);
    let request = ocr.request(dir.path().join("hello.png"), dir.path().join("hello-out"));
    assert_eq!(
        ocr.extract(&frame, &request).unwrap(),
        Recognition::Recovered("HELLO".to_string())
    );
    let saved = PixelBuffer::open(&request.image_path).unwrap();
    assert_eq!(saved, frame);

    let ocr = extractor(blank);
    let request = ocr.request(dir.path().join("blank.png"), dir.path().join("blank-out"));
    assert_eq!(ocr.extract(&frame, &request).unwrap(), Recognition::Empty);

    let ocr = extractor(silent);
    let request = ocr.request(dir.path().join("silent.png"), dir.path().join("silent-out"));
    assert!(matches!(
        ocr.extract(&frame, &request),
        Err(VisionError::RecognitionFailed(_))
    ));

    let ocr = extractor(crash);
    let request = ocr.request(dir.path().join("crash.png"), dir.path().join("crash-out"));
    let err = ocr.extract(&frame, &request).unwrap_err();
    assert!(err.to_string().contains("boom"), "{err}");

    let ocr = extractor(dir.path().join("hello.sh"));
    let request = ocr.request(dir.path().join("async.png"), dir.path().join("async-out"));
    let rx = ocr.spawn_extraction(frame.clone(), request).unwrap();
    let result = rx.recv().unwrap().unwrap();
    assert_eq!(result.text(), Some("HELLO"));
}
