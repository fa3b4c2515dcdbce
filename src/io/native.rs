use super::DistortionFile;
use crate::camera::{CalibrationError, DistortionParameters};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const FORMAT: &str = "video-calibration/distortion";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct NativeDocument {
    format: String,
    version: u32,
    parameters: DistortionParameters,
}

/// The crate's own distortion file: a YAML document tagged with a format name
/// and version.
///
/// ```yaml
/// format: video-calibration/distortion
/// version: 1
/// parameters:
///   intrinsics: { fx: 800.0, fy: 800.0, cx: 640.0, cy: 360.0 }
///   distortions: [-0.1, 0.02, 0.0, 0.0, 0.0]
///   resolution: { width: 1280, height: 720 }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDistortionFile;

impl DistortionFile for NativeDistortionFile {
    fn name(&self) -> &'static str {
        "native"
    }

    fn read(&self, path: &Path) -> Result<DistortionParameters, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let document: NativeDocument = serde_yaml::from_str(&contents)
            .map_err(|e| CalibrationError::ImportParseFailure(e.to_string()))?;

        if document.format != FORMAT {
            return Err(CalibrationError::ImportParseFailure(format!(
                "unknown format '{}'",
                document.format
            )));
        }
        if document.version > VERSION {
            return Err(CalibrationError::ImportParseFailure(format!(
                "unsupported version {}",
                document.version
            )));
        }

        document.parameters.validate_params()?;
        Ok(document.parameters)
    }

    fn export(&self, parameters: &DistortionParameters, path: &Path) -> Result<(), CalibrationError> {
        let document = NativeDocument {
            format: FORMAT.to_string(),
            version: VERSION,
            parameters: parameters.clone(),
        };
        fs::write(path, serde_yaml::to_string(&document)?)?;
        Ok(())
    }
}
