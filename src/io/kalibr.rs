use super::DistortionFile;
use crate::camera::{CalibrationError, DistortionParameters, Intrinsics, Resolution};
use std::fs;
use std::path::Path;
use yaml_rust::{Yaml, YamlLoader};

/// Kalibr camchain file for a pinhole camera with radtan distortion.
///
/// ```yaml
/// cam0:
///   camera_model: pinhole
///   distortion_model: radtan
///   intrinsics: [fx, fy, cx, cy]
///   distortion_coeffs: [k1, k2, p1, p2]
///   resolution: [width, height]
/// ```
///
/// A `distortion` list with the five coefficients `k1, k2, p1, p2, k3` is also
/// accepted. Only the first camera of the chain is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct KalibrFile;

fn parse_error(message: impl Into<String>) -> CalibrationError {
    CalibrationError::ImportParseFailure(message.into())
}

fn read_floats(node: &Yaml, key: &str) -> Result<Vec<f64>, CalibrationError> {
    node.as_vec()
        .ok_or_else(|| parse_error(format!("missing or invalid {key}")))?
        .iter()
        .map(|value| {
            value
                .as_f64()
                .or_else(|| value.as_i64().map(|v| v as f64))
                .ok_or_else(|| parse_error(format!("invalid {key}: not a number")))
        })
        .collect()
}

impl DistortionFile for KalibrFile {
    fn name(&self) -> &'static str {
        "Kalibr"
    }

    fn read(&self, path: &Path) -> Result<DistortionParameters, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs.first().ok_or_else(|| parse_error("empty document"))?;
        let cam = &doc["cam0"];
        if cam.is_badvalue() {
            return Err(parse_error("no cam0 entry"));
        }

        if let Some(model) = cam["camera_model"].as_str() {
            if model != "pinhole" {
                return Err(parse_error(format!("unsupported camera model '{model}'")));
            }
        }
        if let Some(model) = cam["distortion_model"].as_str() {
            if model != "radtan" {
                return Err(parse_error(format!("unsupported distortion model '{model}'")));
            }
        }

        let intrinsics = read_floats(&cam["intrinsics"], "intrinsics")?;
        if intrinsics.len() != 4 {
            return Err(parse_error("intrinsics must have 4 values"));
        }

        let mut distortions = [0.0; 5];
        if !cam["distortion_coeffs"].is_badvalue() {
            let coeffs = read_floats(&cam["distortion_coeffs"], "distortion_coeffs")?;
            if coeffs.len() != 4 {
                return Err(parse_error("distortion_coeffs must have 4 values"));
            }
            distortions[..4].copy_from_slice(&coeffs);
        } else {
            let coeffs = read_floats(&cam["distortion"], "distortion")?;
            if coeffs.len() != 5 {
                return Err(parse_error("distortion must have 5 values"));
            }
            distortions.copy_from_slice(&coeffs);
        }

        let resolution = cam["resolution"]
            .as_vec()
            .ok_or_else(|| parse_error("missing or invalid resolution"))?;
        let dimension = |i: usize| -> Result<u32, CalibrationError> {
            resolution
                .get(i)
                .and_then(Yaml::as_i64)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| parse_error("invalid resolution: not a positive integer"))
        };

        let parameters = DistortionParameters::new(
            Intrinsics {
                fx: intrinsics[0],
                fy: intrinsics[1],
                cx: intrinsics[2],
                cy: intrinsics[3],
            },
            distortions,
            Resolution::new(dimension(0)?, dimension(1)?),
        );
        parameters.validate_params()?;
        Ok(parameters)
    }

    fn export(&self, parameters: &DistortionParameters, path: &Path) -> Result<(), CalibrationError> {
        let key = |k: &str| serde_yaml::Value::String(k.to_string());
        let intrinsics = &parameters.intrinsics;

        let mut cam = serde_yaml::Mapping::new();
        cam.insert(key("camera_model"), key("pinhole"));
        cam.insert(key("distortion_model"), key("radtan"));
        cam.insert(
            key("intrinsics"),
            serde_yaml::to_value(vec![intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy])?,
        );
        if parameters.k3() == 0.0 {
            cam.insert(
                key("distortion_coeffs"),
                serde_yaml::to_value(&parameters.distortions[..4])?,
            );
        } else {
            cam.insert(
                key("distortion"),
                serde_yaml::to_value(&parameters.distortions[..])?,
            );
        }
        cam.insert(
            key("resolution"),
            serde_yaml::to_value(vec![parameters.resolution.width, parameters.resolution.height])?,
        );

        let mut root = serde_yaml::Mapping::new();
        root.insert(key("cam0"), serde_yaml::Value::Mapping(cam));
        fs::write(path, serde_yaml::to_string(&root)?)?;
        Ok(())
    }
}
