//! Command line surface. Global flags describe the environment (cascade
//! directory, capture device, recognizer) and become one `VisionConfig`;
//! subcommands describe the work.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use vision::{CaptureSettings, RecognizerConfig, VisionConfig, config};

#[derive(Debug, Parser)]
#[command(name = "ocv")]
#[command(version, about = "Frame processing: adjust, histogram, detect, overlay, OCR")]
pub struct Cli {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags folded into [`VisionConfig`].
#[derive(Clone, Debug, Args)]
pub struct SettingsArgs {
    /// Directory bare cascade names are resolved against.
    #[arg(long, global = true, value_name = "DIR", default_value = config::DEFAULT_CASCADE_DIR)]
    pub cascade_dir: PathBuf,
    /// Cascade used when a command does not name one.
    #[arg(long, global = true, value_name = "NAME", default_value = config::DEFAULT_CASCADE)]
    pub default_cascade: String,

    /// Camera index, /dev/videoN, or a directory of frames.
    #[arg(long, global = true, value_name = "DEVICE", default_value = config::DEFAULT_CAPTURE_DEVICE)]
    pub device: String,
    /// Capture width in pixels.
    #[arg(long, global = true, value_name = "PX", default_value_t = config::DEFAULT_CAPTURE_WIDTH)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long, global = true, value_name = "PX", default_value_t = config::DEFAULT_CAPTURE_HEIGHT)]
    pub height: u32,
    /// Mirror captured frames horizontally.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub flip: bool,

    /// Text recognizer executable.
    #[arg(long, global = true, value_name = "PATH", default_value = config::DEFAULT_RECOGNIZER)]
    pub recognizer: PathBuf,
    /// Flag that precedes the page segmentation mode.
    #[arg(long, global = true, value_name = "FLAG", default_value = "-psm", allow_hyphen_values = true)]
    pub psm_flag: String,
    /// Flag that precedes the language code.
    #[arg(long, global = true, value_name = "FLAG", default_value = "-l", allow_hyphen_values = true)]
    pub language_flag: String,
    /// The recognizer takes no language option; languages are dropped.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue, conflicts_with = "language_flag")]
    pub no_language_flag: bool,
    /// Default recognition language.
    #[arg(long, global = true, value_name = "LANG", default_value = config::DEFAULT_LANGUAGE)]
    pub language: String,
    /// Page segmentation mode used when a request names none.
    #[arg(long, global = true, value_name = "MODE", default_value_t = config::DEFAULT_PAGE_SEGMENTATION_MODE)]
    pub default_psm: u32,
}

impl TryFrom<SettingsArgs> for VisionConfig {
    type Error = anyhow::Error;

    fn try_from(args: SettingsArgs) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.default_cascade.trim().is_empty() {
            bail!("--default-cascade must name a cascade file");
        }
        if args.psm_flag.trim().is_empty() {
            bail!("--psm-flag must not be empty");
        }
        if args.default_psm > 13 {
            bail!("--default-psm must be a page segmentation mode between 0 and 13");
        }

        let language_flag = (!args.no_language_flag).then_some(args.language_flag);
        let default_language = Some(args.language).filter(|lang| !lang.trim().is_empty());

        Ok(Self {
            cascade_dir: args.cascade_dir,
            default_cascade: args.default_cascade,
            capture: CaptureSettings {
                device: args.device,
                width: args.width,
                height: args.height,
                flip: args.flip,
            },
            recognizer: RecognizerConfig {
                binary: args.recognizer,
                psm_flag: args.psm_flag,
                language_flag,
                default_language,
                default_page_segmentation_mode: args.default_psm,
            },
        })
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a brightness/contrast remap and write the result.
    Adjust {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
        /// Contrast in [0, 200]; 0 applies brightness only.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        contrast: i32,
        /// Brightness in [0, 200], added to every sample when contrast is 0.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        brightness: i32,
    },
    /// Render an intensity histogram as a bar chart.
    Histogram {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
        #[arg(long, default_value_t = vision::histogram::DEFAULT_BIN_COUNT)]
        bins: usize,
        /// Lower bound of the counted range (inclusive).
        #[arg(long, default_value_t = vision::histogram::DEFAULT_RANGE.0)]
        range_min: f64,
        /// Upper bound of the counted range (exclusive).
        #[arg(long, default_value_t = vision::histogram::DEFAULT_RANGE.1)]
        range_max: f64,
        /// Chart size as WxH; defaults to the input size.
        #[arg(long, value_name = "WxH", value_parser = parse_size)]
        size: Option<(u32, u32)>,
        /// Also print the bin counts as JSON.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        print_bins: bool,
    },
    /// Find cascade regions and print them as JSON.
    Detect {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[command(flatten)]
        detection: DetectionArgs,
        /// Write a copy of the input with region outlines.
        #[arg(long, value_name = "PATH")]
        annotate: Option<PathBuf>,
    },
    /// Draw multi-line text onto an image.
    Overlay {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
        /// Text to draw; `\n` separates lines.
        #[arg(long)]
        text: String,
        #[command(flatten)]
        text_args: TextArgs,
    },
    /// Extract printed text through the external recognizer.
    Ocr {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Where the frame handed to the recognizer is written.
        #[arg(long, value_name = "PATH", default_value = "ocr-input.png")]
        image_path: PathBuf,
        /// Recognizer output base; text is read from `<BASE>.txt`.
        #[arg(long, value_name = "BASE", default_value = "ocr-output")]
        output_base: PathBuf,
        /// Page segmentation mode for this request.
        #[arg(long)]
        psm: Option<u32>,
        /// Language for this request.
        #[arg(long = "lang", value_name = "LANG")]
        lang: Option<String>,
    },
    /// Pull frames from the capture device, process them, write PNGs.
    Stream {
        /// Directory receiving `frame-NNNNN.png`.
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
        /// Stop after this many frames.
        #[arg(long, value_name = "N")]
        frames: Option<u64>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        contrast: i32,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        brightness: i32,
        /// Run the default cascade on every frame and log the regions.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        detect: bool,
        /// Caption drawn on every frame.
        #[arg(long)]
        caption: Option<String>,
    },
    /// Print the resolved configuration as JSON.
    Config,
}

#[derive(Clone, Debug, Args)]
pub struct DetectionArgs {
    /// Cascade name or path; defaults to the configured cascade.
    #[arg(long, value_name = "NAME")]
    pub cascade: Option<String>,
    #[arg(long, default_value_t = 1.2)]
    pub scale_factor: f64,
    #[arg(long, default_value_t = 2)]
    pub min_neighbors: u32,
    /// Smallest window as WxH.
    #[arg(long, value_name = "WxH", default_value = "20x20", value_parser = parse_size)]
    pub min_size: (u32, u32),
    /// Largest window as WxH.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub max_size: Option<(u32, u32)>,
}

impl DetectionArgs {
    pub fn params(&self) -> ml_core::DetectionParams {
        ml_core::DetectionParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_size,
            max_size: self.max_size,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct TextArgs {
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub x: i32,
    /// Baseline of the first line.
    #[arg(long, default_value_t = 15, allow_hyphen_values = true)]
    pub y: i32,
    #[arg(long, default_value_t = vision::overlay::DEFAULT_LINE_STEP)]
    pub line_step: i32,
    #[arg(long, default_value_t = 1)]
    pub scale: u32,
    #[arg(long, default_value_t = 255)]
    pub intensity: u8,
    /// Blank the image before drawing.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub clear: bool,
}

impl TextArgs {
    pub fn options(&self) -> vision::TextOptions {
        vision::TextOptions {
            x: self.x,
            y: self.y,
            line_step: self.line_step,
            font: vision::Font {
                scale: self.scale,
                intensity: self.intensity,
            },
            clear: self.clear,
        }
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {value:?}"))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("bad width in {value:?}"))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("bad height in {value:?}"))?;
    if w == 0 || h == 0 {
        return Err(format!("size {value:?} must be non-zero"));
    }
    Ok((w, h))
}
