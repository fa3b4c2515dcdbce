//! Numeric budgets and display defaults, loaded from a YAML file.
//!
//! ```yaml
//! undistort:
//!   max_iterations: 20
//!   tolerance: 1.0e-10
//! calibrator:
//!   max_iterations: 30
//!   poor_rms_threshold: 1.0
//! units:
//!   length: Centimeters
//!   speed: KilometersPerHour
//! ```
//!
//! Every section and field is optional and falls back to its default.

use crate::camera::{CalibrationError, UndistortSettings};
use crate::optimization::CalibratorSettings;
use crate::units::{DisplayUnits, UnitRegistry};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub undistort: UndistortSettings,
    pub calibrator: CalibratorSettings,
    pub units: DisplayUnits,
    pub registry: UnitRegistry,
}

impl CalibrationConfig {
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] if it is not a valid configuration.
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: CalibrationConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let yaml_string = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path.as_ref())?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        if self.undistort.max_iterations == 0 {
            return Err(CalibrationError::YamlError(
                "undistort.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.undistort.tolerance > 0.0) {
            return Err(CalibrationError::YamlError(
                "undistort.tolerance must be positive".to_string(),
            ));
        }
        if !(self.calibrator.poor_rms_threshold > 0.0) {
            return Err(CalibrationError::YamlError(
                "calibrator.poor_rms_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{LengthUnit, SpeedUnit};

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "undistort:\n  max_iterations: 50\nunits:\n  length: Centimeters\n";
        let config: CalibrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.undistort.max_iterations, 50);
        assert_eq!(config.undistort.tolerance, 1e-10);
        assert_eq!(config.calibrator, CalibratorSettings::default());
        assert_eq!(config.units.length, LengthUnit::Centimeters);
        assert_eq!(config.units.speed, SpeedUnit::PixelsPerSecond);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join("video_calibration_config_test.yaml");
        let mut config = CalibrationConfig::default();
        config.calibrator.max_iterations = 12;
        config.units.speed = SpeedUnit::KilometersPerHour;
        config.registry = UnitRegistry::with_custom_length_abbreviation("BL");

        config.save_to_yaml(&path).unwrap();
        let loaded = CalibrationConfig::load_from_yaml(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let path = std::env::temp_dir().join("video_calibration_config_invalid.yaml");
        std::fs::write(&path, "undistort:\n  tolerance: -1.0\n").unwrap();
        assert!(matches!(
            CalibrationConfig::load_from_yaml(&path),
            Err(CalibrationError::YamlError(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            CalibrationConfig::load_from_yaml("/nonexistent/video_calibration.yaml"),
            Err(CalibrationError::IOError(_))
        ));
    }
}
