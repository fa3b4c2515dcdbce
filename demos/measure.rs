//! Measurement Example
//!
//! Calibrates a video frame with a line or a plane and converts image points
//! to world coordinates.
//!
//! Usage:
//! ```bash
//! cargo run --example measure -- \
//!   --width 1920 --height 1080 \
//!   --plane 620,410,1310,420,1540,900,380,880 --size 5.0,3.0 --unit m \
//!   --point 900,600 --point 1200,700
//! ```

use clap::Parser;
use nalgebra::Point2;
use std::path::PathBuf;
use video_calibration::io::{DistortionFile, NativeDistortionFile};
use video_calibration::{
    CalibrationAxis, CalibrationCoordinator, CalibrationConfig, CalibratorType, LengthUnit,
    PlaneSize, Quadrilateral, Resolution,
};

/// Line or plane calibration of a video frame
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image width in pixels
    #[arg(long)]
    width: u32,

    /// Image height in pixels
    #[arg(long)]
    height: u32,

    /// Native distortion file
    #[arg(short = 'd', long)]
    distortion: Option<PathBuf>,

    /// Segment `x1,y1,x2,y2` of known length
    #[arg(long, value_delimiter = ',', num_args = 4, conflicts_with = "plane")]
    line: Option<Vec<f64>>,

    /// Real length of the segment
    #[arg(long, requires = "line")]
    length: Option<f64>,

    /// World axes of the line calibration: image, horizontal, vertical
    #[arg(long, default_value = "image", requires = "line")]
    axis: String,

    /// Rectangle corners `ax,ay,bx,by,cx,cy,dx,dy`, top-left first, clockwise
    #[arg(long, value_delimiter = ',', num_args = 8)]
    plane: Option<Vec<f64>>,

    /// Real size `width,height` of the rectangle
    #[arg(long, value_delimiter = ',', num_args = 2, requires = "plane")]
    size: Option<Vec<f64>>,

    /// Length unit: mm, cm, m, in, ft, yd
    #[arg(short = 'u', long, default_value = "cm")]
    unit: String,

    /// Image points `x,y` to convert
    #[arg(short = 'p', long = "point", value_delimiter = ',', num_args = 2)]
    points: Vec<f64>,

    /// Where to save the calibration as JSON
    #[arg(short = 's', long)]
    save: Option<PathBuf>,

    /// Optional YAML configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_unit(unit: &str) -> Result<LengthUnit, String> {
    match unit {
        "mm" => Ok(LengthUnit::Millimeters),
        "cm" => Ok(LengthUnit::Centimeters),
        "m" => Ok(LengthUnit::Meters),
        "in" => Ok(LengthUnit::Inches),
        "ft" => Ok(LengthUnit::Feet),
        "yd" => Ok(LengthUnit::Yards),
        "px" => Ok(LengthUnit::Pixels),
        _ => Err(format!("unknown length unit '{unit}'")),
    }
}

fn parse_axis(axis: &str) -> Result<CalibrationAxis, String> {
    match axis {
        "image" => Ok(CalibrationAxis::ImageAxes),
        "horizontal" => Ok(CalibrationAxis::LineHorizontal),
        "vertical" => Ok(CalibrationAxis::LineVertical),
        _ => Err(format!("unknown calibration axis '{axis}'")),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CalibrationConfig::load_from_yaml(path)?,
        None => CalibrationConfig::default(),
    };
    let size = Resolution::new(cli.width, cli.height);
    let mut coordinator = CalibrationCoordinator::with_config(size, &config);

    if let Some(path) = &cli.distortion {
        let parameters = NativeDistortionFile
            .import(path, size)
            .ok_or("distortion file could not be imported for this image size")?;
        coordinator.set_distortion(parameters)?;
    }

    if let Some(line) = &cli.line {
        let length = cli.length.ok_or("--length is required with --line")?;
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        coordinator.initialize_line(
            Point2::new(line[0], line[1]),
            Point2::new(line[2], line[3]),
            length,
            parse_axis(&cli.axis)?,
        )?;
    } else if let Some(corners) = &cli.plane {
        let real = cli.size.as_deref().ok_or("--size is required with --plane")?;
        let quad = Quadrilateral::new(
            Point2::new(corners[0], corners[1]),
            Point2::new(corners[2], corners[3]),
            Point2::new(corners[4], corners[5]),
            Point2::new(corners[6], corners[7]),
        );
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        coordinator.initialize_plane(quad, PlaneSize::new(real[0], real[1]))?;
    }
    coordinator.set_length_unit(parse_unit(&cli.unit)?);

    println!("📏 Calibration: {:?}", coordinator.calibrator_type());
    let pixel_size = coordinator.pixel_size_text(&config.registry);
    if !pixel_size.is_empty() {
        println!("Pixel size: ~{pixel_size}");
    }
    if let Ok(position) = coordinator.camera_position() {
        println!(
            "Camera position: ({:.2}, {:.2}, {:.2})",
            position.x, position.y, position.z
        );
    }

    let points: Vec<Point2<f64>> = cli
        .points
        .chunks_exact(2)
        .map(|xy| Point2::new(xy[0], xy[1]))
        .collect();
    for p in &points {
        println!(
            "({:.1}, {:.1}) -> {}",
            p.x,
            p.y,
            coordinator.point_text(p, true, &config.registry)?
        );
    }
    for pair in points.windows(2) {
        println!(
            "|({:.1}, {:.1}) - ({:.1}, {:.1})| = {}",
            pair[0].x,
            pair[0].y,
            pair[1].x,
            pair[1].y,
            coordinator.length_text(&pair[0], &pair[1], true, &config.registry)?
        );
    }

    if let Some(path) = &cli.save {
        coordinator.save_to_json(path)?;
        println!("✅ Calibration saved to {path:?}");
    }
    Ok(())
}
