//! Camera Calibration Example
//!
//! Estimates the lens distortion of a camera from pattern correspondences and
//! writes the result as a distortion file.
//!
//! Usage:
//! ```bash
//! cargo run --example calibrate_camera -- \
//!   --correspondences views.csv \
//!   --width 1920 --height 1080 \
//!   --output distortion.yaml
//! ```

use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;
use video_calibration::io::{
    load_correspondences, AgisoftLensFile, DistortionFile, KalibrFile, NativeDistortionFile,
};
use video_calibration::{CalibrationConfig, CameraCalibrator, Resolution};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Native,
    Kalibr,
    Agisoft,
}

/// Lens calibration from planar pattern correspondences
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV file with `view,object_x,object_y,image_x,image_y` rows
    #[arg(short = 'c', long)]
    correspondences: PathBuf,

    /// Image width in pixels
    #[arg(long)]
    width: u32,

    /// Image height in pixels
    #[arg(long)]
    height: u32,

    /// Where to write the distortion parameters
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Format of the output file
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Native)]
    format: OutputFormat,

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

    let views = load_correspondences(&cli.correspondences)?;
    let resolution = Resolution::new(cli.width, cli.height);
    println!("📷 Camera calibration");
    println!("=====================");
    println!("Views: {}", views.len());
    println!("Image size: {}x{}", resolution.width, resolution.height);

    let calibrator = CameraCalibrator::new(views, resolution).with_settings(config.calibrator);
    if !calibrator.is_valid() {
        warn!("Not enough usable views, the identity model will be written");
    }

    let outcome = calibrator.calibrate();
    println!("\n📐 Result");
    println!("{:?}", outcome.parameters);
    match &outcome.reprojection {
        Some(error) => println!("{error:?}"),
        None => println!("No reprojection error available"),
    }
    if !outcome.converged {
        warn!("Refinement did not converge, the result may improve with more iterations");
    }
    if outcome.is_poor(config.calibrator.poor_rms_threshold) {
        warn!(
            "Calibration is poor (threshold {:.2} px)",
            config.calibrator.poor_rms_threshold
        );
    }

    match cli.format {
        OutputFormat::Native => NativeDistortionFile.export(&outcome.parameters, &cli.output)?,
        OutputFormat::Kalibr => KalibrFile.export(&outcome.parameters, &cli.output)?,
        OutputFormat::Agisoft => AgisoftLensFile.export(&outcome.parameters, &cli.output)?,
    }
    info!("Distortion parameters written to {:?}", cli.output);
    println!("\n✅ Saved to {:?}", cli.output);
    Ok(())
}
