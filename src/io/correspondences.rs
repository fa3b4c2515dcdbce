//! CSV files of pattern correspondences, one row per point:
//!
//! ```text
//! view,object_x,object_y,image_x,image_y
//! 0,0.0,0.0,312.4,208.9
//! ```

use crate::camera::CalibrationError;
use crate::optimization::PatternView;
use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct CorrespondenceRecord {
    view: usize,
    object_x: f64,
    object_y: f64,
    image_x: f64,
    image_y: f64,
}

/// Reads the views of a correspondence file, ordered by view index.
pub fn load_correspondences(path: impl AsRef<Path>) -> Result<Vec<PatternView>, CalibrationError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut views: BTreeMap<usize, PatternView> = BTreeMap::new();
    for record in reader.deserialize() {
        let record: CorrespondenceRecord = record?;
        let view = views
            .entry(record.view)
            .or_insert_with(|| PatternView::new(vec![], vec![]));
        view.object_points
            .push(Point2::new(record.object_x, record.object_y));
        view.image_points
            .push(Point2::new(record.image_x, record.image_y));
    }

    info!(
        "Loaded {} views from {}",
        views.len(),
        path.as_ref().display()
    );
    Ok(views.into_values().collect())
}

pub fn save_correspondences(
    views: &[PatternView],
    path: impl AsRef<Path>,
) -> Result<(), CalibrationError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for (index, view) in views.iter().enumerate() {
        for (object, image) in view.object_points.iter().zip(view.image_points.iter()) {
            writer.serialize(CorrespondenceRecord {
                view: index,
                object_x: object.x,
                object_y: object.y,
                image_x: image.x,
                image_y: image.y,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}
