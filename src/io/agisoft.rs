use super::DistortionFile;
use crate::camera::{CalibrationError, DistortionParameters, Intrinsics, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const FRAME_PROJECTION: &str = "frame";
const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "calibration")]
struct LensCalibration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    projection: Option<String>,
    width: u32,
    height: u32,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    #[serde(default)]
    skew: f64,
    #[serde(default)]
    k1: f64,
    #[serde(default)]
    k2: f64,
    #[serde(default)]
    k3: f64,
    #[serde(default)]
    p1: f64,
    #[serde(default)]
    p2: f64,
}

/// Calibration file written by Agisoft Lens for a frame camera.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <calibration>
///   <projection>frame</projection>
///   <width>4000</width>
///   <height>3000</height>
///   <fx>3126.1</fx>
///   <fy>3126.1</fy>
///   <cx>1987.4</cx>
///   <cy>1512.9</cy>
///   <skew>0</skew>
///   <k1>-0.12</k1>
///   <k2>0.09</k2>
///   <k3>-0.02</k3>
///   <p1>0.0004</p1>
///   <p2>-0.0002</p2>
/// </calibration>
/// ```
///
/// The principal point is in pixels from the top-left corner. Missing
/// coefficients read as zero and the skew is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgisoftLensFile;

fn parse_error(message: impl Into<String>) -> CalibrationError {
    CalibrationError::ImportParseFailure(message.into())
}

impl DistortionFile for AgisoftLensFile {
    fn name(&self) -> &'static str {
        "Agisoft Lens"
    }

    fn read(&self, path: &Path) -> Result<DistortionParameters, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let calibration: LensCalibration =
            quick_xml::de::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

        if let Some(projection) = calibration.projection.as_deref() {
            if projection != FRAME_PROJECTION {
                return Err(parse_error(format!("unsupported projection '{projection}'")));
            }
        }
        if calibration.width == 0 || calibration.height == 0 {
            return Err(parse_error("image size must be positive"));
        }

        let parameters = DistortionParameters::new(
            Intrinsics {
                fx: calibration.fx,
                fy: calibration.fy,
                cx: calibration.cx,
                cy: calibration.cy,
            },
            [
                calibration.k1,
                calibration.k2,
                calibration.p1,
                calibration.p2,
                calibration.k3,
            ],
            Resolution::new(calibration.width, calibration.height),
        );
        parameters.validate_params()?;
        Ok(parameters)
    }

    fn export(&self, parameters: &DistortionParameters, path: &Path) -> Result<(), CalibrationError> {
        let intrinsics = &parameters.intrinsics;
        let calibration = LensCalibration {
            projection: Some(FRAME_PROJECTION.to_string()),
            width: parameters.resolution.width,
            height: parameters.resolution.height,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            skew: 0.0,
            k1: parameters.k1(),
            k2: parameters.k2(),
            k3: parameters.k3(),
            p1: parameters.p1(),
            p2: parameters.p2(),
        };
        let xml = quick_xml::se::to_string(&calibration)
            .map_err(|e| CalibrationError::IOError(e.to_string()))?;
        fs::write(path, format!("{XML_DECLARATION}{xml}\n"))?;
        Ok(())
    }
}
