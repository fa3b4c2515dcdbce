//! The calibration state machine and single entry point for measurements.
//!
//! A [`CalibrationCoordinator`] owns the lens [`DistortionModel`] of the video
//! and at most one metric calibrator. Every query takes raw image coordinates
//! (as recorded by the camera), removes the lens distortion and hands the
//! result to the active calibrator:
//!
//! ```text
//! raw point --undistort--> ideal pixel --line/plane--> world point --origin--> value
//! ```
//!
//! The raw calibration input is kept, so replacing the distortion model
//! recomputes the calibrator from the user clicks.

use crate::calibration::{
    CalibrationAxis, CalibratorType, LineCalibrator, PlaneCalibrator, PlaneSize,
};
use crate::camera::{
    CalibrationError, DistortionModel, DistortionParameters, Resolution, UndistortSettings,
};
use crate::config::CalibrationConfig;
use crate::geometry::{distance, Ellipse, Homography, Quadrilateral};
use crate::units::{
    self, AccelerationUnit, AngleUnit, AngularAccelerationUnit, AngularVelocityUnit,
    DisplayUnits, LengthUnit, SpeedUnit, UnitRegistry,
};
use log::{debug, info};
use nalgebra::{Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_FRAMES_PER_SECOND: f64 = 25.0;

/// Raw (distorted) input of a line calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineInput {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
    pub length: f64,
    #[serde(default)]
    pub axis: CalibrationAxis,
}

/// Raw (distorted) input of a plane calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneInput {
    pub quad: Quadrilateral,
    pub size: PlaneSize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum ActiveCalibrator {
    None,
    Line {
        input: LineInput,
        /// Undistorted start of the segment, the default world origin.
        start: Point2<f64>,
        calibrator: LineCalibrator,
    },
    Plane {
        input: PlaneInput,
        calibrator: PlaneCalibrator,
    },
    /// A line taken as one edge of a square world plane.
    AlignedLine {
        input: LineInput,
        calibrator: PlaneCalibrator,
    },
}

fn beyond_horizon() -> CalibrationError {
    CalibrationError::DegenerateInput(
        "point lies on the vanishing line of the calibration plane".to_string(),
    )
}

impl ActiveCalibrator {
    pub(super) fn line(model: &DistortionModel, input: LineInput) -> Result<Self, CalibrationError> {
        let start = model.undistort(&input.a);
        let end = model.undistort(&input.b);
        let quad = match input.axis {
            CalibrationAxis::ImageAxes => {
                let calibrator = LineCalibrator::from_points(&start, &end, input.length)?;
                debug!("Line calibration ratio: {}", calibrator.ratio());
                return Ok(ActiveCalibrator::Line {
                    input,
                    start,
                    calibrator,
                });
            }
            CalibrationAxis::LineHorizontal => Quadrilateral::square_from_bottom_edge(&start, &end),
            CalibrationAxis::LineVertical => Quadrilateral::square_from_left_edge(&start, &end),
        };
        let calibrator = PlaneCalibrator::new(quad, PlaneSize::new(input.length, input.length))?;
        debug!(
            "Line calibration along {:?}, homography: {:?}",
            input.axis,
            calibrator.homography()
        );
        Ok(ActiveCalibrator::AlignedLine { input, calibrator })
    }

    pub(super) fn plane(model: &DistortionModel, input: PlaneInput) -> Result<Self, CalibrationError> {
        let quad = model.undistort_quad(&input.quad);
        let calibrator = PlaneCalibrator::new(quad, input.size)?;
        debug!("Plane calibration homography: {:?}", calibrator.homography());
        Ok(ActiveCalibrator::Plane { input, calibrator })
    }

    /// Same raw input, undistorted with `model`.
    fn rebuild(&self, model: &DistortionModel) -> Result<Self, CalibrationError> {
        match self {
            ActiveCalibrator::None => Ok(ActiveCalibrator::None),
            ActiveCalibrator::Line { input, .. } | ActiveCalibrator::AlignedLine { input, .. } => {
                Self::line(model, *input)
            }
            ActiveCalibrator::Plane { input, .. } => Self::plane(model, *input),
        }
    }

    fn to_real(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        match self {
            ActiveCalibrator::None => Some(*p),
            ActiveCalibrator::Line { calibrator, .. } => Some(calibrator.to_real(p)),
            ActiveCalibrator::Plane { calibrator, .. }
            | ActiveCalibrator::AlignedLine { calibrator, .. } => calibrator.to_real(p),
        }
    }

    fn to_pixel(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        match self {
            ActiveCalibrator::None => Some(*p),
            ActiveCalibrator::Line { calibrator, .. } => Some(calibrator.to_pixel(p)),
            ActiveCalibrator::Plane { calibrator, .. }
            | ActiveCalibrator::AlignedLine { calibrator, .. } => calibrator.to_pixel(p),
        }
    }

    fn measure(&self, a: &Point2<f64>, b: &Point2<f64>) -> Option<f64> {
        match self {
            ActiveCalibrator::None => Some(distance(a, b)),
            ActiveCalibrator::Line { calibrator, .. } => Some(calibrator.measure(a, b)),
            ActiveCalibrator::Plane { calibrator, .. }
            | ActiveCalibrator::AlignedLine { calibrator, .. } => calibrator.measure(a, b),
        }
    }
}

/// The complete calibration state at one point in time.
///
/// A snapshot is an immutable value: the distortion model is shared, never
/// copied, and restoring a snapshot swaps the whole state back at once.
#[derive(Debug, Clone)]
pub struct CalibrationSnapshot {
    pub(super) calibrator_type: CalibratorType,
    pub(super) calibrator: ActiveCalibrator,
    pub(super) distortion: Arc<DistortionModel>,
    pub(super) units: DisplayUnits,
    pub(super) frames_per_second: f64,
    /// Raw image point chosen as the world origin.
    pub(super) origin: Option<Point2<f64>>,
    /// World-space offset added on top of the calibrated coordinates.
    pub(super) offset: Vector2<f64>,
}

impl CalibrationSnapshot {
    fn new(image_size: Resolution, settings: UndistortSettings, units: DisplayUnits) -> Self {
        Self {
            calibrator_type: CalibratorType::Uncalibrated,
            calibrator: ActiveCalibrator::None,
            distortion: Arc::new(DistortionModel::identity(image_size).with_settings(settings)),
            units,
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            origin: None,
            offset: Vector2::zeros(),
        }
    }

    pub fn calibrator_type(&self) -> CalibratorType {
        self.calibrator_type
    }

    pub fn distortion(&self) -> &DistortionModel {
        &self.distortion
    }

    pub fn units(&self) -> DisplayUnits {
        self.units
    }
}

/// Single entry point for calibrated measurements on one video.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point2;
/// use video_calibration::calibration::{CalibrationAxis, CalibrationCoordinator, CalibratorType};
/// use video_calibration::camera::Resolution;
/// use video_calibration::units::LengthUnit;
///
/// let mut coordinator = CalibrationCoordinator::new(Resolution::new(1280, 720));
/// coordinator.set_calibrator_from_type(CalibratorType::Line);
/// coordinator
///     .initialize_line(
///         Point2::new(100.0, 400.0),
///         Point2::new(300.0, 400.0),
///         50.0,
///         CalibrationAxis::ImageAxes,
///     )
///     .unwrap();
/// coordinator.set_length_unit(LengthUnit::Centimeters);
///
/// let length = coordinator
///     .measure(&Point2::new(0.0, 0.0), &Point2::new(400.0, 0.0))
///     .unwrap();
/// assert!((length - 100.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct CalibrationCoordinator {
    image_size: Resolution,
    undistort_settings: UndistortSettings,
    state: CalibrationSnapshot,
}

impl CalibrationCoordinator {
    /// Uncalibrated coordinator with the identity distortion model.
    pub fn new(image_size: Resolution) -> Self {
        Self::with_config(image_size, &CalibrationConfig::default())
    }

    pub fn with_config(image_size: Resolution, config: &CalibrationConfig) -> Self {
        Self {
            image_size,
            undistort_settings: config.undistort,
            state: CalibrationSnapshot::new(image_size, config.undistort, config.units),
        }
    }

    pub fn image_size(&self) -> Resolution {
        self.image_size
    }

    pub fn calibrator_type(&self) -> CalibratorType {
        self.state.calibrator_type
    }

    /// True once a line or plane calibration has been initialized.
    pub fn is_calibrated(&self) -> bool {
        !matches!(self.state.calibrator, ActiveCalibrator::None)
    }

    /// The scale calibrator of a line along the image axes.
    pub fn line_calibrator(&self) -> Option<&LineCalibrator> {
        match &self.state.calibrator {
            ActiveCalibrator::Line { calibrator, .. } => Some(calibrator),
            _ => None,
        }
    }

    /// The plane homography, for a plane or for a line along its own axis.
    pub fn plane_calibrator(&self) -> Option<&PlaneCalibrator> {
        match &self.state.calibrator {
            ActiveCalibrator::Plane { calibrator, .. }
            | ActiveCalibrator::AlignedLine { calibrator, .. } => Some(calibrator),
            _ => None,
        }
    }

    pub fn line_input(&self) -> Option<LineInput> {
        match self.state.calibrator {
            ActiveCalibrator::Line { input, .. } | ActiveCalibrator::AlignedLine { input, .. } => {
                Some(input)
            }
            _ => None,
        }
    }

    /// Axis of the line calibration, `None` for other methods.
    pub fn calibration_axis(&self) -> Option<CalibrationAxis> {
        self.line_input().map(|input| input.axis)
    }

    pub fn plane_input(&self) -> Option<PlaneInput> {
        match self.state.calibrator {
            ActiveCalibrator::Plane { input, .. } => Some(input),
            _ => None,
        }
    }

    /// Switches the calibration method. The previous calibrator and the world
    /// origin are discarded; the new calibrator stays empty until initialized.
    pub fn set_calibrator_from_type(&mut self, calibrator_type: CalibratorType) {
        info!("Calibration method set to {:?}", calibrator_type);
        self.state.calibrator_type = calibrator_type;
        self.state.calibrator = ActiveCalibrator::None;
        self.state.origin = None;
        self.state.offset = Vector2::zeros();
    }

    fn expect_type(&self, expected: CalibratorType) -> Result<(), CalibrationError> {
        if self.state.calibrator_type != expected {
            return Err(CalibrationError::InvalidCalibration(format!(
                "active calibration method is {:?}, not {:?}",
                self.state.calibrator_type, expected
            )));
        }
        Ok(())
    }

    /// Calibrates from the raw segment `a`-`b` measuring `length` units.
    ///
    /// With [`CalibrationAxis::ImageAxes`] the world axes follow the image
    /// axes and only the scale is calibrated. With the line axes the segment
    /// becomes the x ([`CalibrationAxis::LineHorizontal`]) or y
    /// ([`CalibrationAxis::LineVertical`]) axis of a square world plane built
    /// on it, starting at `a`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if the active method is not
    ///   [`CalibratorType::Line`].
    /// * [`CalibrationError::DegenerateInput`] for coincident points or a
    ///   non-positive length.
    pub fn initialize_line(
        &mut self,
        a: Point2<f64>,
        b: Point2<f64>,
        length: f64,
        axis: CalibrationAxis,
    ) -> Result<(), CalibrationError> {
        self.expect_type(CalibratorType::Line)?;
        let input = LineInput { a, b, length, axis };
        self.state.calibrator = ActiveCalibrator::line(&self.state.distortion, input)?;
        Ok(())
    }

    /// Moves the calibration segment, keeping its real length and axis.
    pub fn update_line(&mut self, a: Point2<f64>, b: Point2<f64>) -> Result<(), CalibrationError> {
        let input = self.line_input().ok_or_else(|| {
            CalibrationError::InvalidCalibration("no line calibration to update".to_string())
        })?;
        self.initialize_line(a, b, input.length, input.axis)
    }

    /// Calibrates from the raw image of a `size` rectangle.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if the active method is not
    ///   [`CalibratorType::Plane`].
    /// * [`CalibrationError::DegenerateInput`] if the undistorted quadrilateral
    ///   cannot be the image of a rectangle.
    pub fn initialize_plane(
        &mut self,
        quad: Quadrilateral,
        size: PlaneSize,
    ) -> Result<(), CalibrationError> {
        self.expect_type(CalibratorType::Plane)?;
        let input = PlaneInput { quad, size };
        self.state.calibrator = ActiveCalibrator::plane(&self.state.distortion, input)?;
        Ok(())
    }

    /// Moves the calibration quadrilateral, keeping its real size.
    pub fn update_plane(&mut self, quad: Quadrilateral) -> Result<(), CalibrationError> {
        let size = self
            .plane_input()
            .ok_or_else(|| {
                CalibrationError::InvalidCalibration("no plane calibration to update".to_string())
            })?
            .size;
        self.initialize_plane(quad, size)
    }

    /// Undistorted corners of the calibration plane, in pixels.
    pub fn undistorted_quad(&self) -> Option<Quadrilateral> {
        self.plane_calibrator().map(|calibrator| *calibrator.quad())
    }

    // Distortion

    /// The active model. Holding the `Arc` keeps a consistent snapshot even if
    /// the coordinator swaps in a new model.
    pub fn distortion(&self) -> Arc<DistortionModel> {
        Arc::clone(&self.state.distortion)
    }

    pub fn distortion_parameters(&self) -> &DistortionParameters {
        self.state.distortion.parameters()
    }

    /// Replaces the lens distortion and recomputes the calibrator.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if the parameters do not fit
    ///   the image size.
    /// * [`CalibrationError::DegenerateInput`] if the calibration input is
    ///   degenerate once undistorted with the new model. The previous model and
    ///   calibrator are kept in that case.
    pub fn set_distortion(
        &mut self,
        parameters: DistortionParameters,
    ) -> Result<(), CalibrationError> {
        let model = DistortionModel::initialize(parameters, self.image_size)?
            .with_settings(self.undistort_settings);
        self.set_distortion_model(model)
    }

    /// Replaces the lens distortion with a model built elsewhere.
    pub fn set_distortion_model(&mut self, model: DistortionModel) -> Result<(), CalibrationError> {
        if model.resolution() != self.image_size {
            return Err(CalibrationError::InvalidCalibration(format!(
                "distortion model is for {}x{} but the video is {}x{}",
                model.resolution().width,
                model.resolution().height,
                self.image_size.width,
                self.image_size.height
            )));
        }
        let calibrator = self.state.calibrator.rebuild(&model)?;
        self.state.distortion = Arc::new(model);
        self.state.calibrator = calibrator;
        info!("Distortion model updated: {:?}", self.state.distortion);
        Ok(())
    }

    /// Back to the identity model.
    pub fn reset_distortion(&mut self) -> Result<(), CalibrationError> {
        self.set_distortion_model(
            DistortionModel::identity(self.image_size).with_settings(self.undistort_settings),
        )
    }

    /// Recomputes the calibrator from its raw input with the active model.
    ///
    /// On failure the previous calibrator stays in place.
    pub fn on_distortion_updated(&mut self) -> Result<(), CalibrationError> {
        self.state.calibrator = self.state.calibrator.rebuild(&self.state.distortion)?;
        Ok(())
    }

    // World origin

    /// Uses the raw image point `p` as the world origin.
    pub fn set_origin(&mut self, p: Point2<f64>) {
        self.state.origin = Some(p);
    }

    /// Back to the origin defined by the calibration object.
    pub fn reset_origin(&mut self) {
        self.state.origin = None;
    }

    /// Raw image position of the world origin.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] if the origin is not visible.
    pub fn origin(&self) -> Result<Point2<f64>, CalibrationError> {
        self.to_pixel_point(&Point2::new(self.state.offset.x, self.state.offset.y))
    }

    /// World-space offset added to every calibrated point.
    pub fn set_offset(&mut self, offset: Vector2<f64>) {
        self.state.offset = offset;
    }

    pub fn offset(&self) -> Vector2<f64> {
        self.state.offset
    }

    fn calibrated(&self, undistorted: &Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        self.state
            .calibrator
            .to_real(undistorted)
            .ok_or_else(beyond_horizon)
    }

    /// Calibrated coordinates of the world origin, before the offset.
    fn origin_world(&self) -> Result<Vector2<f64>, CalibrationError> {
        match (self.state.origin, &self.state.calibrator) {
            (_, ActiveCalibrator::None) => Ok(Vector2::zeros()),
            (Some(raw), _) => Ok(self.calibrated(&self.state.distortion.undistort(&raw))?.coords),
            (None, ActiveCalibrator::Line { start, .. }) => Ok(self.calibrated(start)?.coords),
            // The first corner of the plane is the world zero.
            (None, _) => Ok(Vector2::zeros()),
        }
    }

    // Measurements

    /// Real distance between two raw image points, or the undistorted pixel
    /// distance when no metric calibration is active.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for points on the vanishing line
    ///   of the calibrated plane.
    pub fn measure(&self, a: &Point2<f64>, b: &Point2<f64>) -> Result<f64, CalibrationError> {
        let model = &self.state.distortion;
        let (a, b) = (model.undistort(a), model.undistort(b));
        self.state
            .calibrator
            .measure(&a, &b)
            .ok_or_else(beyond_horizon)
    }

    /// Like [`Self::measure`] but refuses to answer in pixels.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] when no metric calibration is
    ///   active.
    /// * Any error of [`Self::measure`].
    pub fn measure_strict(&self, a: &Point2<f64>, b: &Point2<f64>) -> Result<f64, CalibrationError> {
        if !self.is_calibrated() {
            return Err(CalibrationError::InvalidCalibration(
                "no metric calibration is active".to_string(),
            ));
        }
        self.measure(a, b)
    }

    /// World coordinates of a raw image point. Without a metric calibration the
    /// undistorted pixel coordinates are returned.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for points on the vanishing line
    ///   of the calibrated plane.
    pub fn to_real_point(&self, p: &Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        let undistorted = self.state.distortion.undistort(p);
        if !self.is_calibrated() {
            return Ok(undistorted);
        }
        let world = self.calibrated(&undistorted)?;
        Ok(world - self.origin_world()? + self.state.offset)
    }

    /// Raw image position of a world point, the inverse of [`Self::to_real_point`].
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for world points the camera sees
    ///   at infinity.
    pub fn to_pixel_point(&self, p: &Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        if !self.is_calibrated() {
            return Ok(self.state.distortion.distort(p));
        }
        let calibrated = p - self.state.offset + self.origin_world()?;
        let undistorted = self.state.calibrator.to_pixel(&calibrated).ok_or_else(|| {
            CalibrationError::DegenerateInput("world point is at infinity in the image".to_string())
        })?;
        Ok(self.state.distortion.distort(&undistorted))
    }

    /// Length in raw image pixels of the world segment `a`-`b`.
    pub fn image_length(&self, a: &Point2<f64>, b: &Point2<f64>) -> Result<f64, CalibrationError> {
        Ok(distance(&self.to_pixel_point(a)?, &self.to_pixel_point(b)?))
    }

    /// Real length of a horizontal pixel offset from the image origin. Not
    /// suitable for geometry.
    pub fn scalar(&self, v: f64) -> Result<f64, CalibrationError> {
        let a = self.to_real_point(&Point2::origin())?;
        let b = self.to_real_point(&Point2::new(v, 0.0))?;
        Ok(distance(&a, &b).copysign(v))
    }

    /// Pixel length of a horizontal world offset from the world origin.
    pub fn image_scalar(&self, v: f64) -> Result<f64, CalibrationError> {
        let a = self.to_pixel_point(&Point2::origin())?;
        let b = self.to_pixel_point(&Point2::new(v, 0.0))?;
        Ok(distance(&a, &b).copysign(v))
    }

    /// Raw image outline of the world circle of `radius` around `center`.
    ///
    /// The outline is exact without lens distortion. With distortion it is the
    /// ellipse through the distorted corners of the square enclosing the circle.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] for a non-positive radius or a
    ///   circle reaching the vanishing line of the calibrated plane.
    pub fn ellipse_from_circle(
        &self,
        center: &Point2<f64>,
        radius: f64,
    ) -> Result<Ellipse, CalibrationError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(CalibrationError::DegenerateInput(format!(
                "circle radius must be positive, got {radius}"
            )));
        }
        let corner = |dx: f64, dy: f64| {
            self.to_pixel_point(&Point2::new(center.x + dx * radius, center.y + dy * radius))
        };
        let square = Quadrilateral::new(
            corner(-1.0, 1.0)?,
            corner(1.0, 1.0)?,
            corner(1.0, -1.0)?,
            corner(-1.0, -1.0)?,
        );
        Homography::rect_to_quad(2.0, 2.0, &square)?.map_circle(&Point2::new(1.0, 1.0), 1.0)
    }

    /// Position of the camera in world coordinates, z being the height above
    /// the calibrated plane, in length units.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] without a plane calibration or
    ///   without calibrated lens intrinsics.
    /// * [`CalibrationError::NumericalError`] if the plane and the intrinsics
    ///   are inconsistent.
    pub fn camera_position(&self) -> Result<Vector3<f64>, CalibrationError> {
        let calibrator = self.plane_calibrator().ok_or_else(|| {
            CalibrationError::InvalidCalibration(
                "the camera position needs a plane calibration".to_string(),
            )
        })?;
        let parameters = self.state.distortion.parameters();
        if *parameters == DistortionParameters::identity(self.image_size) {
            return Err(CalibrationError::InvalidCalibration(
                "the lens intrinsics are not calibrated".to_string(),
            ));
        }
        let position = calibrator.camera_position(&parameters.intrinsics)?;
        let shift = self.state.offset - self.origin_world()?;
        Ok(Vector3::new(position.x + shift.x, position.y + shift.y, position.z))
    }

    // Units

    pub fn display_units(&self) -> DisplayUnits {
        self.state.units
    }

    pub fn set_display_units(&mut self, units: DisplayUnits) {
        self.state.units = units;
    }

    /// Unit of calibrated lengths, pixels while uncalibrated.
    pub fn length_unit(&self) -> LengthUnit {
        if self.is_calibrated() {
            self.state.units.length
        } else {
            LengthUnit::Pixels
        }
    }

    pub fn set_length_unit(&mut self, unit: LengthUnit) {
        self.state.units.length = unit;
    }

    /// Unit speeds are displayed in, pixels per second while uncalibrated.
    pub fn speed_unit(&self) -> SpeedUnit {
        if self.is_calibrated() {
            self.state.units.speed
        } else {
            SpeedUnit::PixelsPerSecond
        }
    }

    pub fn set_speed_unit(&mut self, unit: SpeedUnit) {
        self.state.units.speed = unit;
    }

    pub fn acceleration_unit(&self) -> AccelerationUnit {
        if self.is_calibrated() {
            self.state.units.acceleration
        } else {
            AccelerationUnit::PixelsPerSecondSquared
        }
    }

    pub fn set_acceleration_unit(&mut self, unit: AccelerationUnit) {
        self.state.units.acceleration = unit;
    }

    pub fn angle_unit(&self) -> AngleUnit {
        self.state.units.angle
    }

    pub fn set_angle_unit(&mut self, unit: AngleUnit) {
        self.state.units.angle = unit;
    }

    pub fn angular_velocity_unit(&self) -> AngularVelocityUnit {
        self.state.units.angular_velocity
    }

    pub fn set_angular_velocity_unit(&mut self, unit: AngularVelocityUnit) {
        self.state.units.angular_velocity = unit;
    }

    pub fn angular_acceleration_unit(&self) -> AngularAccelerationUnit {
        self.state.units.angular_acceleration
    }

    pub fn set_angular_acceleration_unit(&mut self, unit: AngularAccelerationUnit) {
        self.state.units.angular_acceleration = unit;
    }

    pub fn frames_per_second(&self) -> f64 {
        self.state.frames_per_second
    }

    /// # Errors
    ///
    /// * [`CalibrationError::DegenerateInput`] unless `fps` is finite and positive.
    pub fn set_frames_per_second(&mut self, fps: f64) -> Result<(), CalibrationError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CalibrationError::DegenerateInput(format!(
                "frame rate must be positive, got {fps}"
            )));
        }
        self.state.frames_per_second = fps;
        Ok(())
    }

    /// Duration of `frames` frames, in seconds.
    pub fn time(&self, frames: i64) -> f64 {
        frames as f64 / self.state.frames_per_second
    }

    /// Speed in length units per second to the speed unit.
    pub fn convert_speed(&self, v: f64) -> f64 {
        units::convert_speed(v, self.length_unit(), self.speed_unit())
    }

    /// Acceleration in length units per second squared to the acceleration unit.
    pub fn convert_acceleration(&self, a: f64) -> f64 {
        units::convert_acceleration(a, self.length_unit(), self.acceleration_unit())
    }

    /// Acceleration expressed with the speed unit's length (for example km/h
    /// per second) to the acceleration unit.
    pub fn convert_acceleration_from_speed(&self, a: f64) -> f64 {
        let length = units::speed_to_length(a, self.speed_unit(), self.length_unit());
        self.convert_acceleration(length)
    }

    pub fn convert_angle(&self, radians: f64) -> f64 {
        units::convert_angle(radians, self.angle_unit())
    }

    pub fn convert_angular_velocity(&self, radians_per_second: f64) -> f64 {
        units::convert_angular_velocity(radians_per_second, self.angular_velocity_unit())
    }

    pub fn convert_angular_acceleration(&self, radians_per_second_squared: f64) -> f64 {
        units::convert_angular_acceleration(
            radians_per_second_squared,
            self.angular_acceleration_unit(),
        )
    }

    // Text

    fn format_value(value: f64, precise: bool) -> String {
        if precise {
            format!("{value:.2}")
        } else {
            format!("{value:.0}")
        }
    }

    /// Length of the raw segment `a`-`b` with its unit abbreviation.
    pub fn length_text(
        &self,
        a: &Point2<f64>,
        b: &Point2<f64>,
        precise: bool,
        registry: &UnitRegistry,
    ) -> Result<String, CalibrationError> {
        Ok(format!(
            "{} {}",
            Self::format_value(self.measure(a, b)?, precise),
            registry.length_abbreviation(self.length_unit())
        ))
    }

    /// Circumference of the circle centered on `center` passing through `rim`.
    pub fn circumference_text(
        &self,
        center: &Point2<f64>,
        rim: &Point2<f64>,
        precise: bool,
        registry: &UnitRegistry,
    ) -> Result<String, CalibrationError> {
        let radius = self.measure(center, rim)?;
        Ok(format!(
            "{} {}",
            Self::format_value(2.0 * std::f64::consts::PI * radius, precise),
            registry.length_abbreviation(self.length_unit())
        ))
    }

    /// World coordinates of a raw image point, as `x ; y unit`.
    pub fn point_text(
        &self,
        p: &Point2<f64>,
        precise: bool,
        registry: &UnitRegistry,
    ) -> Result<String, CalibrationError> {
        let world = self.to_real_point(p)?;
        Ok(format!(
            "{} ; {} {}",
            Self::format_value(world.x, precise),
            Self::format_value(world.y, precise),
            registry.length_abbreviation(self.length_unit())
        ))
    }

    /// Approximate world size of one pixel, empty while uncalibrated.
    pub fn pixel_size_text(&self, registry: &UnitRegistry) -> String {
        match &self.state.calibrator {
            ActiveCalibrator::None => String::new(),
            ActiveCalibrator::Line { calibrator, .. } => {
                units::pixel_size_text(calibrator.ratio(), 1.0, self.length_unit(), registry)
            }
            ActiveCalibrator::Plane { calibrator, .. }
            | ActiveCalibrator::AlignedLine { calibrator, .. } => {
                let quad = calibrator.quad();
                units::pixel_size_text(
                    calibrator.size().width,
                    distance(&quad.d, &quad.c),
                    self.length_unit(),
                    registry,
                )
            }
        }
    }

    // Snapshots

    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.state.clone()
    }

    /// Swaps the whole calibration state for `snapshot`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if the snapshot was taken for
    ///   another image size.
    pub fn restore(&mut self, snapshot: CalibrationSnapshot) -> Result<(), CalibrationError> {
        if snapshot.distortion.resolution() != self.image_size {
            return Err(CalibrationError::InvalidCalibration(
                "snapshot belongs to another image size".to_string(),
            ));
        }
        self.state = snapshot;
        Ok(())
    }

    pub(super) fn state(&self) -> &CalibrationSnapshot {
        &self.state
    }

    pub(super) fn undistort_settings(&self) -> UndistortSettings {
        self.undistort_settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use approx::assert_relative_eq;

    const SIZE: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    fn barrel_parameters() -> DistortionParameters {
        DistortionParameters::new(
            Intrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            },
            [-0.25, 0.05, 0.0, 0.0, 0.0],
            SIZE,
        )
    }

    fn raw_quad() -> Quadrilateral {
        Quadrilateral::new(
            Point2::new(210.0, 120.0),
            Point2::new(430.0, 130.0),
            Point2::new(520.0, 400.0),
            Point2::new(110.0, 380.0),
        )
    }

    fn line_coordinator() -> CalibrationCoordinator {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        coordinator
            .initialize_line(
                Point2::new(100.0, 200.0),
                Point2::new(200.0, 200.0),
                50.0,
                CalibrationAxis::ImageAxes,
            )
            .unwrap();
        coordinator
    }

    fn plane_coordinator() -> CalibrationCoordinator {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        coordinator
            .initialize_plane(raw_quad(), PlaneSize::new(4.0, 3.0))
            .unwrap();
        coordinator
    }

    #[test]
    fn test_initial_state() {
        let coordinator = CalibrationCoordinator::new(SIZE);
        assert_eq!(coordinator.calibrator_type(), CalibratorType::Uncalibrated);
        assert!(!coordinator.is_calibrated());
        assert!(coordinator.distortion().is_identity());
        assert_eq!(coordinator.length_unit(), LengthUnit::Pixels);

        let a = Point2::new(10.0, 10.0);
        let b = Point2::new(40.0, 50.0);
        assert_relative_eq!(coordinator.measure(&a, &b).unwrap(), 50.0);
        assert!(matches!(
            coordinator.measure_strict(&a, &b),
            Err(CalibrationError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_line_measurement() {
        let coordinator = line_coordinator();
        assert!(coordinator.is_calibrated());
        let a = Point2::new(0.0, 0.0);
        assert_relative_eq!(coordinator.measure(&a, &Point2::new(100.0, 0.0)).unwrap(), 50.0);
        assert_relative_eq!(coordinator.measure(&a, &Point2::new(200.0, 0.0)).unwrap(), 100.0);
        assert_relative_eq!(
            coordinator.measure_strict(&a, &Point2::new(0.0, 200.0)).unwrap(),
            100.0
        );
    }

    #[test]
    fn test_initialize_requires_matching_type() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        assert!(matches!(
            coordinator.initialize_line(
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                1.0,
                CalibrationAxis::ImageAxes
            ),
            Err(CalibrationError::InvalidCalibration(_))
        ));
        assert!(!coordinator.is_calibrated());
    }

    #[test]
    fn test_degenerate_plane_keeps_state_empty() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        let collinear = Quadrilateral::new(
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(30.0, 30.0),
        );
        assert!(matches!(
            coordinator.initialize_plane(collinear, PlaneSize::new(1.0, 1.0)),
            Err(CalibrationError::DegenerateInput(_))
        ));
        assert!(coordinator.plane_calibrator().is_none());
    }

    #[test]
    fn test_switching_type_discards_calibration_and_origin() {
        let mut coordinator = line_coordinator();
        coordinator.set_origin(Point2::new(300.0, 300.0));
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        assert!(!coordinator.is_calibrated());
        assert!(coordinator.line_input().is_none());
        assert!(coordinator.state().origin.is_none());
    }

    #[test]
    fn test_line_world_coordinates() {
        let coordinator = line_coordinator();
        // Default origin is the segment start, y points up.
        let world = coordinator.to_real_point(&Point2::new(100.0, 200.0)).unwrap();
        assert_relative_eq!(world.x, 0.0);
        assert_relative_eq!(world.y, 0.0);
        let world = coordinator.to_real_point(&Point2::new(300.0, 100.0)).unwrap();
        assert_relative_eq!(world.x, 100.0);
        assert_relative_eq!(world.y, 50.0);

        let back = coordinator.to_pixel_point(&world).unwrap();
        assert_relative_eq!(back.x, 300.0, epsilon = 1e-9);
        assert_relative_eq!(back.y, 100.0, epsilon = 1e-9);
        assert_relative_eq!(
            coordinator.image_length(&Point2::origin(), &world).unwrap(),
            223.60679774997897,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_plane_world_coordinates() {
        let coordinator = plane_coordinator();
        let quad = raw_quad();
        let world = coordinator.to_real_point(&quad.b).unwrap();
        assert_relative_eq!(world.x, 4.0, epsilon = 1e-9);
        assert_relative_eq!(world.y, 3.0, epsilon = 1e-9);
        assert_relative_eq!(coordinator.measure(&quad.d, &quad.c).unwrap(), 4.0, epsilon = 1e-9);

        let origin = coordinator.origin().unwrap();
        assert_relative_eq!(origin.x, quad.d.x, epsilon = 1e-9);
        assert_relative_eq!(origin.y, quad.d.y, epsilon = 1e-9);
    }

    #[test]
    fn test_custom_origin_and_offset() {
        let mut coordinator = plane_coordinator();
        let p = Point2::new(300.0, 250.0);
        coordinator.set_origin(p);
        let world = coordinator.to_real_point(&p).unwrap();
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(world.y, 0.0, epsilon = 1e-9);

        coordinator.set_offset(Vector2::new(10.0, -5.0));
        let world = coordinator.to_real_point(&p).unwrap();
        assert_relative_eq!(world.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(world.y, -5.0, epsilon = 1e-9);
        let origin = coordinator.origin().unwrap();
        assert_relative_eq!(origin.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(origin.y, p.y, epsilon = 1e-6);

        coordinator.reset_origin();
        coordinator.set_offset(Vector2::zeros());
        let world = coordinator.to_real_point(&raw_quad().d).unwrap();
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(world.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_measure_undistorts_first() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_distortion(barrel_parameters()).unwrap();
        let model = coordinator.distortion();
        let a = Point2::new(20.0, 30.0);
        let b = Point2::new(600.0, 450.0);
        let expected = distance(&model.undistort(&a), &model.undistort(&b));
        assert_relative_eq!(coordinator.measure(&a, &b).unwrap(), expected, epsilon = 1e-12);
        assert!(expected > distance(&a, &b));
    }

    #[test]
    fn test_distortion_change_recomputes_plane() {
        let mut coordinator = plane_coordinator();
        let before = coordinator.undistorted_quad().unwrap();
        assert_eq!(before, raw_quad());

        coordinator.set_distortion(barrel_parameters()).unwrap();
        let model = coordinator.distortion();
        let after = coordinator.undistorted_quad().unwrap();
        assert_eq!(after, model.undistort_quad(&raw_quad()));
        assert_ne!(after, before);

        // The raw corners still land exactly on the rectangle corners.
        let quad = raw_quad();
        let expected = [
            (quad.a, Point2::new(0.0, 3.0)),
            (quad.b, Point2::new(4.0, 3.0)),
            (quad.c, Point2::new(4.0, 0.0)),
            (quad.d, Point2::new(0.0, 0.0)),
        ];
        for (raw, world) in expected.iter() {
            let mapped = coordinator.to_real_point(raw).unwrap();
            assert_relative_eq!(mapped.x, world.x, epsilon = 1e-6);
            assert_relative_eq!(mapped.y, world.y, epsilon = 1e-6);
        }

        let p = Point2::new(333.0, 222.0);
        let back = coordinator.to_pixel_point(&coordinator.to_real_point(&p).unwrap()).unwrap();
        assert_relative_eq!(back.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-6);
    }

    #[test]
    fn test_distortion_change_rederives_line() {
        let mut coordinator = line_coordinator();
        assert_relative_eq!(coordinator.line_calibrator().unwrap().ratio(), 0.5);
        coordinator.set_distortion(barrel_parameters()).unwrap();

        let model = coordinator.distortion();
        let pixels = distance(
            &model.undistort(&Point2::new(100.0, 200.0)),
            &model.undistort(&Point2::new(200.0, 200.0)),
        );
        assert_relative_eq!(
            coordinator.line_calibrator().unwrap().ratio(),
            50.0 / pixels,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            coordinator.measure(&Point2::new(100.0, 200.0), &Point2::new(200.0, 200.0)).unwrap(),
            50.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_distortion_size_mismatch_is_rejected() {
        let mut coordinator = plane_coordinator();
        let mut parameters = barrel_parameters();
        parameters.resolution = Resolution::new(1280, 720);
        assert!(matches!(
            coordinator.set_distortion(parameters),
            Err(CalibrationError::InvalidCalibration(_))
        ));
        assert!(coordinator.distortion().is_identity());
        assert!(coordinator.plane_calibrator().is_some());
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut coordinator = plane_coordinator();
        let snapshot = coordinator.snapshot();
        let quad = raw_quad();
        let before = coordinator.measure(&quad.a, &quad.c).unwrap();

        coordinator.set_distortion(barrel_parameters()).unwrap();
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        coordinator
            .initialize_line(
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                1.0,
                CalibrationAxis::ImageAxes,
            )
            .unwrap();

        coordinator.restore(snapshot.clone()).unwrap();
        assert_eq!(coordinator.calibrator_type(), CalibratorType::Plane);
        assert!(coordinator.distortion().is_identity());
        assert_relative_eq!(coordinator.measure(&quad.a, &quad.c).unwrap(), before);
        assert!(Arc::ptr_eq(&coordinator.distortion(), &snapshot.distortion));
    }

    #[test]
    fn test_units_follow_calibration_state() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_length_unit(LengthUnit::Centimeters);
        coordinator.set_speed_unit(SpeedUnit::MetersPerSecond);
        assert_eq!(coordinator.length_unit(), LengthUnit::Pixels);
        assert_eq!(coordinator.speed_unit(), SpeedUnit::PixelsPerSecond);
        assert_eq!(coordinator.convert_speed(100.0), 100.0);

        coordinator.set_calibrator_from_type(CalibratorType::Line);
        coordinator
            .initialize_line(
                Point2::new(100.0, 200.0),
                Point2::new(200.0, 200.0),
                50.0,
                CalibrationAxis::ImageAxes,
            )
            .unwrap();
        assert_eq!(coordinator.length_unit(), LengthUnit::Centimeters);
        assert_relative_eq!(coordinator.convert_speed(100.0), 1.0, epsilon = 1e-12);

        coordinator.set_acceleration_unit(AccelerationUnit::MetersPerSecondSquared);
        assert_relative_eq!(coordinator.convert_acceleration(981.0), 9.81, epsilon = 1e-12);
        // 3.6 km/h per second is 1 m/s².
        coordinator.set_speed_unit(SpeedUnit::KilometersPerHour);
        assert_relative_eq!(
            coordinator.convert_acceleration_from_speed(3.6),
            1.0,
            epsilon = 1e-12
        );

        coordinator.set_angle_unit(AngleUnit::Degree);
        assert_relative_eq!(coordinator.convert_angle(std::f64::consts::PI), 180.0);
        coordinator.set_angular_velocity_unit(AngularVelocityUnit::RevolutionsPerMinute);
        assert_relative_eq!(
            coordinator.convert_angular_velocity(2.0 * std::f64::consts::PI),
            60.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_time() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        assert_relative_eq!(coordinator.time(50), 2.0);
        coordinator.set_frames_per_second(100.0).unwrap();
        assert_relative_eq!(coordinator.time(50), 0.5);
        assert!(coordinator.set_frames_per_second(0.0).is_err());
        assert_relative_eq!(coordinator.frames_per_second(), 100.0);
    }

    #[test]
    fn test_text_output() {
        let mut coordinator = line_coordinator();
        coordinator.set_length_unit(LengthUnit::Centimeters);
        let registry = UnitRegistry::default();
        let a = Point2::new(100.0, 200.0);
        let b = Point2::new(200.0, 200.0);
        assert_eq!(coordinator.length_text(&a, &b, true, &registry).unwrap(), "50.00 cm");
        assert_eq!(coordinator.length_text(&a, &b, false, &registry).unwrap(), "50 cm");
        assert_eq!(coordinator.point_text(&b, true, &registry).unwrap(), "50.00 ; 0.00 cm");
        assert_eq!(coordinator.pixel_size_text(&registry), "5 mm");
        assert_eq!(
            coordinator.circumference_text(&a, &b, false, &registry).unwrap(),
            "314 cm"
        );
    }

    #[test]
    fn test_scalar() {
        let coordinator = line_coordinator();
        assert_relative_eq!(coordinator.scalar(40.0).unwrap(), 20.0);
        assert_relative_eq!(coordinator.scalar(-40.0).unwrap(), -20.0);
        assert_relative_eq!(coordinator.image_scalar(20.0).unwrap(), 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_update_keeps_real_size() {
        let mut coordinator = line_coordinator();
        coordinator
            .update_line(Point2::new(0.0, 0.0), Point2::new(0.0, 25.0))
            .unwrap();
        assert_relative_eq!(coordinator.line_calibrator().unwrap().ratio(), 2.0);

        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        assert!(coordinator.update_plane(raw_quad()).is_err());
    }

    #[test]
    fn test_vanishing_line_is_an_error() {
        let coordinator = plane_coordinator();
        let to_world = coordinator.plane_calibrator().unwrap().homography().inverse().unwrap();
        let m = to_world.matrix;
        let on_horizon = Point2::new(0.0, -m[(2, 2)] / m[(2, 1)]);
        let quad = raw_quad();

        assert!(matches!(
            coordinator.measure(&quad.d, &on_horizon),
            Err(CalibrationError::DegenerateInput(_))
        ));
        assert!(matches!(
            coordinator.measure_strict(&on_horizon, &quad.d),
            Err(CalibrationError::DegenerateInput(_))
        ));
        assert!(coordinator.to_real_point(&on_horizon).is_err());
        assert!(coordinator
            .point_text(&on_horizon, true, &UnitRegistry::default())
            .is_err());
        assert!(coordinator.measure(&quad.d, &quad.c).is_ok());
    }

    #[test]
    fn test_horizontal_line_axis() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        // A segment rising to the right at 45 degrees on screen.
        let a = Point2::new(100.0, 300.0);
        let b = Point2::new(200.0, 200.0);
        coordinator
            .initialize_line(a, b, 2.0, CalibrationAxis::LineHorizontal)
            .unwrap();
        assert!(coordinator.line_calibrator().is_none());
        assert!(coordinator.plane_calibrator().is_some());
        assert_eq!(coordinator.calibration_axis(), Some(CalibrationAxis::LineHorizontal));

        let start = coordinator.to_real_point(&a).unwrap();
        assert_relative_eq!(start.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(start.y, 0.0, epsilon = 1e-9);
        let end = coordinator.to_real_point(&b).unwrap();
        assert_relative_eq!(end.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(end.y, 0.0, epsilon = 1e-9);
        // Half a length below the start, perpendicular to the segment.
        let below = coordinator.to_real_point(&Point2::new(150.0, 350.0)).unwrap();
        assert_relative_eq!(below.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(below.y, -1.0, epsilon = 1e-9);

        let length = coordinator.measure(&a, &b).unwrap();
        assert_relative_eq!(length, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_vertical_line_axis() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        let a = Point2::new(300.0, 400.0);
        let b = Point2::new(300.0, 100.0);
        coordinator
            .initialize_line(a, b, 1.5, CalibrationAxis::LineVertical)
            .unwrap();

        let end = coordinator.to_real_point(&b).unwrap();
        assert_relative_eq!(end.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(end.y, 1.5, epsilon = 1e-9);
        let right = coordinator.to_real_point(&Point2::new(400.0, 400.0)).unwrap();
        assert_relative_eq!(right.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(right.y, 0.0, epsilon = 1e-9);

        // Moving the segment keeps the axis.
        coordinator
            .update_line(Point2::new(300.0, 400.0), Point2::new(300.0, 250.0))
            .unwrap();
        assert_eq!(coordinator.calibration_axis(), Some(CalibrationAxis::LineVertical));
        let moved = coordinator.to_real_point(&Point2::new(300.0, 250.0)).unwrap();
        assert_relative_eq!(moved.y, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_line_axis_follows_distortion() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        let a = Point2::new(120.0, 380.0);
        let b = Point2::new(480.0, 330.0);
        coordinator
            .initialize_line(a, b, 10.0, CalibrationAxis::LineHorizontal)
            .unwrap();
        coordinator.set_distortion(barrel_parameters()).unwrap();

        let end = coordinator.to_real_point(&b).unwrap();
        assert_relative_eq!(end.x, 10.0, epsilon = 1e-6);
        assert_relative_eq!(end.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_line_axis_is_rejected() {
        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_calibrator_from_type(CalibratorType::Line);
        let p = Point2::new(100.0, 100.0);
        assert!(matches!(
            coordinator.initialize_line(p, p, 1.0, CalibrationAxis::LineVertical),
            Err(CalibrationError::DegenerateInput(_))
        ));
        assert!(coordinator
            .initialize_line(p, Point2::new(200.0, 100.0), 0.0, CalibrationAxis::LineHorizontal)
            .is_err());
        assert!(!coordinator.is_calibrated());
    }

    #[test]
    fn test_ellipse_from_circle() {
        let coordinator = plane_coordinator();
        let center = Point2::new(2.0, 1.5);
        let ellipse = coordinator.ellipse_from_circle(&center, 1.0).unwrap();
        let expected = coordinator
            .plane_calibrator()
            .unwrap()
            .circle_to_image(&center, 1.0)
            .unwrap();
        assert_relative_eq!(ellipse.center.x, expected.center.x, epsilon = 1e-6);
        assert_relative_eq!(ellipse.center.y, expected.center.y, epsilon = 1e-6);
        assert_relative_eq!(ellipse.semi_major, expected.semi_major, epsilon = 1e-6);
        assert_relative_eq!(ellipse.semi_minor, expected.semi_minor, epsilon = 1e-6);
        assert_relative_eq!(ellipse.rotation, expected.rotation, epsilon = 1e-6);

        let line = line_coordinator();
        let circle = line.ellipse_from_circle(&Point2::new(10.0, 0.0), 5.0).unwrap();
        assert_relative_eq!(circle.center.x, 120.0, epsilon = 1e-9);
        assert_relative_eq!(circle.center.y, 200.0, epsilon = 1e-9);
        assert_relative_eq!(circle.semi_major, 10.0, epsilon = 1e-9);
        assert_relative_eq!(circle.semi_minor, 10.0, epsilon = 1e-9);

        assert!(line.ellipse_from_circle(&Point2::origin(), -1.0).is_err());
    }

    #[test]
    fn test_camera_position_needs_plane_and_lens() {
        let coordinator = line_coordinator();
        assert!(matches!(
            coordinator.camera_position(),
            Err(CalibrationError::InvalidCalibration(_))
        ));
        let coordinator = plane_coordinator();
        assert!(matches!(
            coordinator.camera_position(),
            Err(CalibrationError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_camera_position() {
        let intrinsics = Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        let lens = DistortionParameters::new(intrinsics, [0.0; 5], SIZE);
        let eye = Vector3::new(3.0, -8.0, 5.0);
        let forward = (Vector3::new(2.0, 1.5, 0.0) - eye).normalize();
        let right = forward.cross(&Vector3::z()).normalize();
        let down = forward.cross(&right);
        let project = |x: f64, y: f64| {
            let p = Vector3::new(x, y, 0.0) - eye;
            let (u, v, w) = (right.dot(&p), down.dot(&p), forward.dot(&p));
            Point2::new(500.0 * u / w + 320.0, 500.0 * v / w + 240.0)
        };

        let mut coordinator = CalibrationCoordinator::new(SIZE);
        coordinator.set_distortion(lens).unwrap();
        coordinator.set_calibrator_from_type(CalibratorType::Plane);
        coordinator
            .initialize_plane(
                Quadrilateral::new(
                    project(0.0, 3.0),
                    project(4.0, 3.0),
                    project(4.0, 0.0),
                    project(0.0, 0.0),
                ),
                PlaneSize::new(4.0, 3.0),
            )
            .unwrap();

        let position = coordinator.camera_position().unwrap();
        assert_relative_eq!(position.x, eye.x, epsilon = 1e-6);
        assert_relative_eq!(position.y, eye.y, epsilon = 1e-6);
        assert_relative_eq!(position.z, eye.z, epsilon = 1e-6);

        // The position follows the user's world frame.
        coordinator.set_offset(Vector2::new(10.0, 20.0));
        let shifted = coordinator.camera_position().unwrap();
        assert_relative_eq!(shifted.x, eye.x + 10.0, epsilon = 1e-6);
        assert_relative_eq!(shifted.y, eye.y + 20.0, epsilon = 1e-6);
        assert_relative_eq!(shifted.z, eye.z, epsilon = 1e-6);
    }
}
