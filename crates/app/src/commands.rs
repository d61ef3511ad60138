use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use ml_core::{Cascade, DetectedRegion, DetectionParams, RegionDetector};
use tracing::{debug, info, warn};
use video_ingest::{open_source, spawn_reader};
use vision::{
    HistogramOptions, OcrExtractor, PixelBuffer, Recognition, TextOptions, VisionConfig,
    apply_brightness_contrast, draw_text, draw_text_mut, histogram::Histogram,
};

use crate::cli::{Command, DetectionArgs, TextArgs};

pub(crate) fn dispatch(command: Command, config: &VisionConfig) -> Result<()> {
    match command {
        Command::Adjust {
            input,
            output,
            contrast,
            brightness,
        } => adjust(&input, &output, contrast, brightness),
        Command::Histogram {
            input,
            output,
            bins,
            range_min,
            range_max,
            size,
            print_bins,
        } => {
            let options = HistogramOptions {
                range: (range_min, range_max),
                bin_count: bins,
                chart_size: size,
            };
            let bins = histogram(&input, &output, &options)?;
            if print_bins {
                println!("{}", serde_json::to_string(&bins)?);
            }
            Ok(())
        }
        Command::Detect {
            input,
            detection,
            annotate,
        } => {
            let regions = detect(config, &input, &detection, annotate.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&regions)?);
            Ok(())
        }
        Command::Overlay {
            input,
            output,
            text,
            text_args,
        } => overlay(&input, &output, &text, &text_args),
        Command::Ocr {
            input,
            image_path,
            output_base,
            psm,
            lang,
        } => {
            let extractor = OcrExtractor::new(config.recognizer.clone());
            let mut request = extractor.request(image_path, output_base);
            if let Some(mode) = psm {
                request = request.with_page_segmentation_mode(mode);
            }
            if lang.is_some() {
                request = request.with_language(lang);
            }
            let frame = open_frame(&input)?;
            match extractor.extract(&frame, &request)? {
                Recognition::Recovered(text) => print!("{text}"),
                Recognition::Empty => info!("no text found"),
            }
            Ok(())
        }
        Command::Stream {
            out_dir,
            frames,
            contrast,
            brightness,
            detect,
            caption,
        } => stream(
            config,
            &StreamOptions {
                out_dir: &out_dir,
                frames,
                contrast,
                brightness,
                detect,
                caption: caption.as_deref(),
            },
        ),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
    }
}

fn open_frame(path: &Path) -> Result<PixelBuffer> {
    PixelBuffer::open(path).with_context(|| format!("reading {}", path.display()))
}

fn save_frame(buffer: &PixelBuffer, path: &Path) -> Result<()> {
    buffer
        .save_png(path)
        .with_context(|| format!("writing {}", path.display()))
}

pub(crate) fn adjust(input: &Path, output: &Path, contrast: i32, brightness: i32) -> Result<()> {
    let mut frame = open_frame(input)?;
    apply_brightness_contrast(&mut frame, contrast, brightness);
    save_frame(&frame, output)?;
    info!(output = %output.display(), contrast, brightness, "adjusted frame written");
    Ok(())
}

/// Write the chart for `input` to `output` and return the bin counts.
pub(crate) fn histogram(
    input: &Path,
    output: &Path,
    options: &HistogramOptions,
) -> Result<Vec<u64>> {
    let frame = open_frame(input)?;
    let histogram = Histogram::compute(&frame, options)?;
    let (width, height) = options.chart_size.unwrap_or(frame.dimensions());
    let chart = histogram.render(width, height)?;
    save_frame(&chart, output)?;
    info!(output = %output.display(), bins = options.bin_count, "histogram written");
    Ok(histogram.bins().to_vec())
}

pub(crate) fn detect(
    config: &VisionConfig,
    input: &Path,
    args: &DetectionArgs,
    annotate: Option<&Path>,
) -> Result<Vec<DetectedRegion>> {
    let detector = load_detector(config, args.cascade.as_deref(), args.params())?;
    let frame = open_frame(input)?;
    let regions = detector.detect(&frame)?;
    info!(regions = regions.len(), "detection complete");
    if let Some(path) = annotate {
        let outlined = outline_regions(&frame, &regions)?;
        save_frame(&outlined, path)?;
    }
    Ok(regions)
}

fn load_detector(
    config: &VisionConfig,
    cascade: Option<&str>,
    params: DetectionParams,
) -> Result<RegionDetector> {
    let path = match cascade {
        Some(name) => config.resolve_cascade(name),
        None => config.default_cascade_path(),
    };
    let cascade = Cascade::load(&path)?;
    Ok(RegionDetector::new(Arc::new(cascade), params))
}

/// RGB copy of `frame` with a red outline around every region.
pub(crate) fn outline_regions(frame: &PixelBuffer, regions: &[DetectedRegion]) -> Result<PixelBuffer> {
    let mut canvas: RgbImage = frame.to_dynamic().to_rgb8();
    let (width, height) = canvas.dimensions();
    let red = Rgb([255, 0, 0]);
    for region in regions {
        let x0 = region.x.min(width.saturating_sub(1));
        let y0 = region.y.min(height.saturating_sub(1));
        let x1 = (region.x + region.width).min(width).saturating_sub(1);
        let y1 = (region.y + region.height).min(height).saturating_sub(1);
        for x in x0..=x1 {
            canvas.put_pixel(x, y0, red);
            canvas.put_pixel(x, y1, red);
        }
        for y in y0..=y1 {
            canvas.put_pixel(x0, y, red);
            canvas.put_pixel(x1, y, red);
        }
    }
    Ok(PixelBuffer::from_rgb8(canvas)?)
}

pub(crate) fn overlay(input: &Path, output: &Path, text: &str, args: &TextArgs) -> Result<()> {
    let frame = open_frame(input)?;
    let text = text.replace("\\n", "\n");
    let rendered = draw_text(&frame, &text, &args.options());
    save_frame(&rendered, output)
}

pub(crate) struct StreamOptions<'a> {
    pub out_dir: &'a Path,
    pub frames: Option<u64>,
    pub contrast: i32,
    pub brightness: i32,
    pub detect: bool,
    pub caption: Option<&'a str>,
}

/// Capture, adjust, optionally detect and caption, then persist each frame.
pub(crate) fn stream(config: &VisionConfig, options: &StreamOptions<'_>) -> Result<()> {
    fs::create_dir_all(options.out_dir)
        .with_context(|| format!("creating {}", options.out_dir.display()))?;
    let detector = if options.detect {
        Some(load_detector(config, None, DetectionParams::default())?)
    } else {
        None
    };

    let source = open_source(&config.capture)?;
    info!(device = %config.capture.device, "stream started");
    let rx = spawn_reader(source)?;

    let mut written = 0u64;
    for result in rx.iter() {
        if options.frames.is_some_and(|limit| written >= limit) {
            break;
        }
        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "capture failed; stopping stream");
                return Err(err.into());
            }
        };
        let mut buffer = frame.buffer;
        apply_brightness_contrast(&mut buffer, options.contrast, options.brightness);

        if let Some(detector) = &detector {
            let regions = detector.detect(&buffer)?;
            debug!(sequence = frame.sequence, regions = regions.len(), "frame scanned");
            if !regions.is_empty() {
                buffer = outline_regions(&buffer, &regions)?;
            }
        }
        if let Some(caption) = options.caption {
            let text_options = TextOptions {
                x: 4,
                y: 14,
                ..TextOptions::default()
            };
            draw_text_mut(&mut buffer, caption, &text_options);
        }

        let path = options
            .out_dir
            .join(format!("frame-{:05}.png", frame.sequence));
        save_frame(&buffer, &path)?;
        written += 1;
    }

    info!(frames = written, out_dir = %options.out_dir.display(), "stream finished");
    Ok(())
}
