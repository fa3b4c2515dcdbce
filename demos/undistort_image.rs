//! Image Undistortion Example
//!
//! Removes the lens distortion of a frame and optionally renders the
//! distortion grid of the model.
//!
//! Usage:
//! ```bash
//! cargo run --example undistort_image -- \
//!   --image frame.png \
//!   --distortion camchain.yaml --format kalibr \
//!   --output frame_undistorted.png --grid grid.png
//! ```

use clap::{Parser, ValueEnum};
use image::{Rgb, Rgba};
use log::info;
use std::path::PathBuf;
use video_calibration::io::{load_image, DistortionFile, KalibrFile, NativeDistortionFile};
use video_calibration::{CalibrationConfig, DistortionModel, Resolution};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InputFormat {
    Native,
    Kalibr,
}

/// Lens undistortion of a single image
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Distorted input image
    #[arg(short = 'i', long)]
    image: PathBuf,

    /// Distortion parameter file
    #[arg(short = 'd', long)]
    distortion: PathBuf,

    /// Format of the distortion file
    #[arg(short = 'f', long, value_enum, default_value_t = InputFormat::Native)]
    format: InputFormat,

    /// Where to write the undistorted image
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Optional output for the distortion grid
    #[arg(long)]
    grid: Option<PathBuf>,

    /// Grid divisions per axis
    #[arg(long, default_value_t = 10)]
    steps: u32,

    /// Optional YAML configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CalibrationConfig::load_from_yaml(path)?,
        None => CalibrationConfig::default(),
    };

    let source = load_image(&cli.image)?;
    let size = Resolution::new(source.width(), source.height());

    let parameters = match cli.format {
        InputFormat::Native => NativeDistortionFile.import(&cli.distortion, size),
        InputFormat::Kalibr => KalibrFile.import(&cli.distortion, size),
    }
    .ok_or("distortion file could not be imported for this image size")?;

    let model = DistortionModel::initialize(parameters, size)?.with_settings(config.undistort);
    println!("🔧 Distortion model: {model:?}");
    if !model.is_monotonic() {
        println!(
            "⚠️  Radial distortion folds back past normalized radius {:?}",
            model.radius_limit()
        );
    }

    let undistorted = model.undistorted_image(&source, Some(Rgb([0, 0, 0])))?;
    undistorted.save(&cli.output)?;
    info!("Undistorted image written to {:?}", cli.output);
    println!("✅ Undistorted image saved to {:?}", cli.output);

    if let Some(path) = &cli.grid {
        let grid = model.distortion_grid(Rgba([0, 0, 0, 0]), Rgba([255, 64, 0, 255]), cli.steps);
        grid.save(path)?;
        println!("✅ Distortion grid saved to {path:?}");
    }
    Ok(())
}
