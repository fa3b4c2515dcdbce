//! Reading and writing distortion parameters and calibration inputs.
//!
//! - [`native`]: the crate's own YAML distortion file.
//! - [`kalibr`]: Kalibr camchain files (pinhole camera, radtan distortion).
//! - [`agisoft`]: Agisoft Lens XML calibration files (frame camera).
//! - [`correspondences`]: CSV pattern correspondences for the camera calibrator.

use crate::camera::{CalibrationError, DistortionParameters, Resolution};
use image::RgbImage;
use log::{info, warn};
use std::path::Path;

pub mod agisoft;
pub mod correspondences;
pub mod kalibr;
pub mod native;

pub use agisoft::AgisoftLensFile;
pub use correspondences::{load_correspondences, save_correspondences};
pub use kalibr::KalibrFile;
pub use native::NativeDistortionFile;

/// A file format carrying one distortion parameter set.
pub trait DistortionFile {
    /// Format name used in log messages.
    fn name(&self) -> &'static str;

    /// Parses `path` into the parameter set recorded in it.
    fn read(&self, path: &Path) -> Result<DistortionParameters, CalibrationError>;

    /// Writes `parameters` to `path`, replacing any existing file.
    fn export(&self, parameters: &DistortionParameters, path: &Path) -> Result<(), CalibrationError>;

    /// Reads `path` and fits the result to `expected_size`.
    ///
    /// A file recorded at another size with the same aspect ratio is rescaled.
    /// Returns `None`, after logging a warning, for unreadable or malformed
    /// files and for incompatible image sizes.
    fn import(&self, path: &Path, expected_size: Resolution) -> Option<DistortionParameters> {
        let parameters = match self.read(path) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(
                    "Could not import {} distortion file {}: {}",
                    self.name(),
                    path.display(),
                    e
                );
                return None;
            }
        };

        match fit_to_size(parameters, expected_size) {
            Ok(parameters) => {
                info!("Imported {} distortion file {}", self.name(), path.display());
                Some(parameters)
            }
            Err(e) => {
                warn!("Ignoring distortion file {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Rescales `parameters` to `size` when both have the same aspect ratio.
pub fn fit_to_size(
    parameters: DistortionParameters,
    size: Resolution,
) -> Result<DistortionParameters, CalibrationError> {
    if parameters.resolution == size {
        return Ok(parameters);
    }

    if !parameters.resolution.same_aspect_ratio(&size) {
        return Err(CalibrationError::InvalidCalibration(format!(
            "recorded for {}x{}, incompatible with {}x{}",
            parameters.resolution.width, parameters.resolution.height, size.width, size.height
        )));
    }
    parameters.rescaled(size)
}

/// Loads an image as 8-bit RGB.
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage, CalibrationError> {
    let img = image::open(path.as_ref())?;
    Ok(img.to_rgb8())
}
