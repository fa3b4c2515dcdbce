//! Measurement units, their abbreviations and the conversions between them.
//!
//! Lengths are converted through meters. Speeds and accelerations are computed
//! upstream in "calibrated length unit per second" (or per second squared) and
//! converted here to the display unit the user picked. Angles are computed in
//! radians.

use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const MILLIMETER_TO_METERS: f64 = 0.001;
const CENTIMETER_TO_METERS: f64 = 0.01;
const INCH_TO_METERS: f64 = 0.0254;
const FOOT_TO_METERS: f64 = 0.3048;
const YARD_TO_METERS: f64 = 0.9144;
const KILOMETER_TO_METERS: f64 = 1000.0;
const MILE_TO_METERS: f64 = 1609.344;
const NAUTICAL_MILE_TO_METERS: f64 = 1852.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LengthUnit {
    Millimeters,
    Centimeters,
    Meters,
    Inches,
    Feet,
    Yards,
    /// Relative unit defined by the user, for example percent of a body segment.
    Percentage,
    #[default]
    Pixels,
}

impl LengthUnit {
    /// Length of one unit in meters, `None` for units without a physical size.
    pub fn meters(&self) -> Option<f64> {
        match self {
            LengthUnit::Millimeters => Some(MILLIMETER_TO_METERS),
            LengthUnit::Centimeters => Some(CENTIMETER_TO_METERS),
            LengthUnit::Meters => Some(1.0),
            LengthUnit::Inches => Some(INCH_TO_METERS),
            LengthUnit::Feet => Some(FOOT_TO_METERS),
            LengthUnit::Yards => Some(YARD_TO_METERS),
            LengthUnit::Percentage | LengthUnit::Pixels => None,
        }
    }

    pub fn is_physical(&self) -> bool {
        self.meters().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpeedUnit {
    FeetPerSecond,
    MetersPerSecond,
    KilometersPerHour,
    MilesPerHour,
    Knots,
    #[default]
    PixelsPerSecond,
}

impl SpeedUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            SpeedUnit::FeetPerSecond => "ft/s",
            SpeedUnit::MetersPerSecond => "m/s",
            SpeedUnit::KilometersPerHour => "km/h",
            SpeedUnit::MilesPerHour => "mph",
            SpeedUnit::Knots => "kn",
            SpeedUnit::PixelsPerSecond => "px/s",
        }
    }

    /// One unit of this speed expressed in meters per second.
    fn meters_per_second(&self) -> Option<f64> {
        match self {
            SpeedUnit::FeetPerSecond => Some(FOOT_TO_METERS),
            SpeedUnit::MetersPerSecond => Some(1.0),
            SpeedUnit::KilometersPerHour => Some(KILOMETER_TO_METERS / SECONDS_PER_HOUR),
            SpeedUnit::MilesPerHour => Some(MILE_TO_METERS / SECONDS_PER_HOUR),
            SpeedUnit::Knots => Some(NAUTICAL_MILE_TO_METERS / SECONDS_PER_HOUR),
            SpeedUnit::PixelsPerSecond => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccelerationUnit {
    FeetPerSecondSquared,
    MetersPerSecondSquared,
    #[default]
    PixelsPerSecondSquared,
}

impl AccelerationUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            AccelerationUnit::FeetPerSecondSquared => "ft/s²",
            AccelerationUnit::MetersPerSecondSquared => "m/s²",
            AccelerationUnit::PixelsPerSecondSquared => "px/s²",
        }
    }

    fn meters_per_second_squared(&self) -> Option<f64> {
        match self {
            AccelerationUnit::FeetPerSecondSquared => Some(FOOT_TO_METERS),
            AccelerationUnit::MetersPerSecondSquared => Some(1.0),
            AccelerationUnit::PixelsPerSecondSquared => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AngleUnit {
    #[default]
    Degree,
    Radian,
}

impl AngleUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            AngleUnit::Degree => "°",
            AngleUnit::Radian => "rad",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AngularVelocityUnit {
    #[default]
    DegreesPerSecond,
    RadiansPerSecond,
    RevolutionsPerMinute,
}

impl AngularVelocityUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            AngularVelocityUnit::DegreesPerSecond => "deg/s",
            AngularVelocityUnit::RadiansPerSecond => "rad/s",
            AngularVelocityUnit::RevolutionsPerMinute => "rpm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AngularAccelerationUnit {
    #[default]
    DegreesPerSecondSquared,
    RadiansPerSecondSquared,
}

impl AngularAccelerationUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            AngularAccelerationUnit::DegreesPerSecondSquared => "deg/s²",
            AngularAccelerationUnit::RadiansPerSecondSquared => "rad/s²",
        }
    }
}

/// The units measurements are displayed in, one per quantity.
///
/// The length unit is the one the active calibration is expressed in; the
/// others are pure display choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayUnits {
    pub length: LengthUnit,
    pub speed: SpeedUnit,
    pub acceleration: AccelerationUnit,
    pub angle: AngleUnit,
    pub angular_velocity: AngularVelocityUnit,
    pub angular_acceleration: AngularAccelerationUnit,
}

/// Display settings for unit abbreviations.
///
/// Passed explicitly to the formatting functions instead of being looked up
/// from process-wide preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitRegistry {
    /// Abbreviation shown for [`LengthUnit::Percentage`]. Empty means `%`.
    pub custom_length_abbreviation: Option<String>,
}

impl UnitRegistry {
    pub fn with_custom_length_abbreviation(abbreviation: impl Into<String>) -> Self {
        Self {
            custom_length_abbreviation: Some(abbreviation.into()),
        }
    }

    pub fn length_abbreviation(&self, unit: LengthUnit) -> String {
        let abbreviation = match unit {
            LengthUnit::Millimeters => "mm",
            LengthUnit::Centimeters => "cm",
            LengthUnit::Meters => "m",
            LengthUnit::Inches => "in",
            LengthUnit::Feet => "ft",
            LengthUnit::Yards => "yd",
            LengthUnit::Percentage => match self.custom_length_abbreviation.as_deref() {
                Some(custom) if !custom.is_empty() => custom,
                _ => "%",
            },
            LengthUnit::Pixels => "px",
        };
        abbreviation.to_string()
    }
}

/// Converts a length between two units. Relative units only convert to themselves.
pub fn convert_length(value: f64, from: LengthUnit, to: LengthUnit) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    Some(value * from.meters()? / to.meters()?)
}

/// Converts a speed in `length_unit` per second to `unit`.
///
/// Pixel and relative lengths have no physical size and are returned unchanged,
/// as is any length when the pixel speed unit is requested.
pub fn convert_speed(value: f64, length_unit: LengthUnit, unit: SpeedUnit) -> f64 {
    match (length_unit.meters(), unit.meters_per_second()) {
        (Some(meters), Some(target)) => value * meters / target,
        _ => value,
    }
}

/// Converts a speed expressed in `unit` back to `length_unit` per second.
pub fn speed_to_length(value: f64, unit: SpeedUnit, length_unit: LengthUnit) -> f64 {
    match (unit.meters_per_second(), length_unit.meters()) {
        (Some(source), Some(meters)) => value * source / meters,
        _ => value,
    }
}

/// Converts an acceleration in `length_unit` per second squared to `unit`.
pub fn convert_acceleration(value: f64, length_unit: LengthUnit, unit: AccelerationUnit) -> f64 {
    match (length_unit.meters(), unit.meters_per_second_squared()) {
        (Some(meters), Some(target)) => value * meters / target,
        _ => value,
    }
}

/// Converts an angle in radians to `unit`.
pub fn convert_angle(radians: f64, unit: AngleUnit) -> f64 {
    match unit {
        AngleUnit::Degree => radians.to_degrees(),
        AngleUnit::Radian => radians,
    }
}

/// Converts an angular velocity in radians per second to `unit`.
pub fn convert_angular_velocity(radians_per_second: f64, unit: AngularVelocityUnit) -> f64 {
    match unit {
        AngularVelocityUnit::DegreesPerSecond => radians_per_second.to_degrees(),
        AngularVelocityUnit::RadiansPerSecond => radians_per_second,
        AngularVelocityUnit::RevolutionsPerMinute => radians_per_second / (2.0 * PI) * 60.0,
    }
}

/// Converts an angular acceleration in radians per second squared to `unit`.
pub fn convert_angular_acceleration(
    radians_per_second_squared: f64,
    unit: AngularAccelerationUnit,
) -> f64 {
    match unit {
        AngularAccelerationUnit::DegreesPerSecondSquared => radians_per_second_squared.to_degrees(),
        AngularAccelerationUnit::RadiansPerSecondSquared => radians_per_second_squared,
    }
}

/// Informational precision of a calibration: the world size of one pixel.
///
/// Metric units step down (m to cm or mm, cm to mm) when the value is below one
/// unit, and the result keeps a single significant digit below 1, one decimal
/// below 10 and none above. Returns an empty string for pixel units or when the
/// ratio is not a positive finite number.
pub fn pixel_size_text(
    world_value: f64,
    pixel_value: f64,
    unit: LengthUnit,
    registry: &UnitRegistry,
) -> String {
    if unit == LengthUnit::Pixels {
        return String::new();
    }

    let mut units_per_pixel = world_value / pixel_value;
    if !(units_per_pixel.is_finite() && units_per_pixel > 0.0) {
        return String::new();
    }

    let magnitude = units_per_pixel.log10();
    debug!(
        "Calibration precision. Raw: {} {:?}/pixel. Magnitude: {}.",
        units_per_pixel, unit, magnitude
    );

    let mut unit = unit;
    match unit {
        LengthUnit::Meters if magnitude < -2.0 => {
            units_per_pixel *= 1000.0;
            unit = LengthUnit::Millimeters;
        }
        LengthUnit::Meters if magnitude < 0.0 => {
            units_per_pixel *= 100.0;
            unit = LengthUnit::Centimeters;
        }
        LengthUnit::Centimeters if magnitude < 0.0 => {
            units_per_pixel *= 10.0;
            unit = LengthUnit::Millimeters;
        }
        _ => {}
    }

    let magnitude = units_per_pixel.log10().floor();
    let rounded = if magnitude >= 1.0 {
        units_per_pixel.round()
    } else if magnitude >= 0.0 {
        (units_per_pixel * 10.0).round() / 10.0
    } else {
        let inverse = 10f64.powi(-magnitude as i32);
        (units_per_pixel * inverse).round() / inverse
    };

    format!("{} {}", rounded, registry.length_abbreviation(unit))
}
