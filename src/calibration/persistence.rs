//! Saving and restoring the calibration of a video.
//!
//! The document stores the raw (distorted) calibration input rather than the
//! derived scale or homography, so a document loaded on a differently sized
//! video, or with another distortion model, is recomputed from the clicks.

use crate::calibration::coordinator::{ActiveCalibrator, CalibrationSnapshot};
use crate::calibration::{CalibrationCoordinator, CalibratorType, LineInput, PlaneInput};
use crate::camera::{CalibrationError, DistortionModel, DistortionParameters, Resolution};
use crate::units::DisplayUnits;
use log::{info, warn};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub const DOCUMENT_VERSION: u32 = 1;

fn default_frames_per_second() -> f64 {
    super::coordinator::DEFAULT_FRAMES_PER_SECOND
}

/// Serializable form of a [`CalibrationCoordinator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDocument {
    pub version: u32,
    /// Image size the points below were clicked on.
    pub image_size: Resolution,
    pub calibrator_type: CalibratorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<LineInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plane: Option<PlaneInput>,
    pub distortion: DistortionParameters,
    #[serde(default)]
    pub units: DisplayUnits,
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Point2<f64>>,
    #[serde(default = "Vector2::zeros")]
    pub offset: Vector2<f64>,
}

fn scale_point(p: &Point2<f64>, sx: f64, sy: f64) -> Point2<f64> {
    Point2::new(p.x * sx, p.y * sy)
}

impl CalibrationDocument {
    /// Same document with every image point moved to `to`, a non-empty size.
    fn rescaled(&self, to: Resolution) -> Self {
        if to == self.image_size {
            return self.clone();
        }
        let sx = to.width as f64 / self.image_size.width as f64;
        let sy = to.height as f64 / self.image_size.height as f64;
        info!(
            "Rescaling calibration from {}x{} to {}x{}",
            self.image_size.width, self.image_size.height, to.width, to.height
        );
        Self {
            image_size: to,
            line: self.line.map(|line| LineInput {
                a: scale_point(&line.a, sx, sy),
                b: scale_point(&line.b, sx, sy),
                ..line
            }),
            plane: self.plane.map(|plane| PlaneInput {
                quad: plane.quad.map(|p| scale_point(p, sx, sy)),
                size: plane.size,
            }),
            origin: self.origin.map(|p| scale_point(&p, sx, sy)),
            ..self.clone()
        }
    }
}

impl CalibrationCoordinator {
    pub fn to_document(&self) -> CalibrationDocument {
        let state = self.state();
        CalibrationDocument {
            version: DOCUMENT_VERSION,
            image_size: self.image_size(),
            calibrator_type: state.calibrator_type,
            line: self.line_input(),
            plane: self.plane_input(),
            distortion: state.distortion.parameters().clone(),
            units: state.units,
            frames_per_second: state.frames_per_second,
            origin: state.origin,
            offset: state.offset,
        }
    }

    /// Restores a saved calibration on a video of `image_size`.
    ///
    /// Image points are rescaled when the document was saved for another size
    /// with the same aspect ratio. The whole state is replaced at once; on
    /// error `self` is unchanged.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] for an unsupported version, a
    ///   document saved for another aspect ratio, a distortion model that cannot
    ///   be rescaled, or a non-positive frame rate.
    /// * [`CalibrationError::DegenerateInput`] if the stored input no longer
    ///   yields a valid calibrator.
    pub fn apply_document(&mut self, document: &CalibrationDocument) -> Result<(), CalibrationError> {
        if document.version > DOCUMENT_VERSION {
            return Err(CalibrationError::InvalidCalibration(format!(
                "unsupported calibration document version {}",
                document.version
            )));
        }
        if !(document.frames_per_second.is_finite() && document.frames_per_second > 0.0) {
            return Err(CalibrationError::InvalidCalibration(format!(
                "invalid frame rate {}",
                document.frames_per_second
            )));
        }

        let image_size = self.image_size();
        if document.image_size != image_size && !document.image_size.same_aspect_ratio(&image_size) {
            return Err(CalibrationError::InvalidCalibration(format!(
                "calibration saved for {}x{} does not fit a {}x{} video",
                document.image_size.width,
                document.image_size.height,
                image_size.width,
                image_size.height
            )));
        }
        let document = document.rescaled(image_size);
        let model = DistortionModel::initialize_rescaled(document.distortion.clone(), image_size)?
            .with_settings(self.undistort_settings());

        let calibrator = match (document.calibrator_type, document.line, document.plane) {
            (CalibratorType::Line, Some(line), _) => ActiveCalibrator::line(&model, line)?,
            (CalibratorType::Plane, _, Some(plane)) => ActiveCalibrator::plane(&model, plane)?,
            (CalibratorType::Uncalibrated, _, _) => ActiveCalibrator::None,
            (calibrator_type, _, _) => {
                warn!(
                    "Calibration document selects {:?} but carries no input for it",
                    calibrator_type
                );
                ActiveCalibrator::None
            }
        };

        self.restore(CalibrationSnapshot {
            calibrator_type: document.calibrator_type,
            calibrator,
            distortion: Arc::new(model),
            units: document.units,
            frames_per_second: document.frames_per_second,
            origin: document.origin,
            offset: document.offset,
        })
    }

    /// Builds a coordinator for a video of `image_size` from a saved document.
    pub fn from_document(
        document: &CalibrationDocument,
        image_size: Resolution,
    ) -> Result<Self, CalibrationError> {
        let mut coordinator = Self::new(image_size);
        coordinator.apply_document(document)?;
        Ok(coordinator)
    }

    pub fn save_to_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(&self.to_document())?;
        fs::write(path.as_ref(), json)?;
        info!("Calibration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::JsonError`] if it is not a calibration document.
    /// * Any error of [`Self::from_document`].
    pub fn load_from_json(
        path: impl AsRef<Path>,
        image_size: Resolution,
    ) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let document: CalibrationDocument = serde_json::from_str(&contents)?;
        let coordinator = Self::from_document(&document, image_size)?;
        info!("Calibration loaded from {}", path.as_ref().display());
        Ok(coordinator)
    }
}
