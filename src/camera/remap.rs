//! Bulk image operations on top of [`DistortionModel`]: undistorting a whole
//! frame and rendering the diagnostic distortion grid.

use crate::camera::{CalibrationError, DistortionModel};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use log::debug;
use nalgebra::Point2;

/// For every pixel of the rectified image, the location to sample in the
/// distorted source image.
#[derive(Debug, Clone)]
pub(crate) struct RemapTable {
    width: u32,
    height: u32,
    sources: Vec<[f32; 2]>,
}

impl RemapTable {
    pub(crate) fn build(model: &DistortionModel) -> Self {
        let resolution = model.resolution();
        debug!(
            "Building remap table for {}x{}",
            resolution.width, resolution.height
        );

        let mut sources = Vec::with_capacity(resolution.width as usize * resolution.height as usize);
        for row in 0..resolution.height {
            for col in 0..resolution.width {
                let source = model.distort(&Point2::new(col as f64, row as f64));
                sources.push([source.x as f32, source.y as f32]);
            }
        }

        Self {
            width: resolution.width,
            height: resolution.height,
            sources,
        }
    }

    fn source(&self, col: u32, row: u32) -> [f32; 2] {
        self.sources[(row * self.width + col) as usize]
    }
}

impl DistortionModel {
    /// Produces the rectified version of a distorted frame.
    ///
    /// Every destination pixel is pushed through the forward model to find where
    /// the lens imaged it, and the source is sampled bilinearly there. Samples that
    /// land outside the source are clamped to its border when `background` is
    /// `None`, or painted with `background` otherwise.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidCalibration`] if `source` does not have the
    ///   size this model was built for.
    pub fn undistorted_image(
        &self,
        source: &RgbImage,
        background: Option<Rgb<u8>>,
    ) -> Result<RgbImage, CalibrationError> {
        let resolution = self.resolution();
        if source.width() != resolution.width || source.height() != resolution.height {
            return Err(CalibrationError::InvalidCalibration(format!(
                "image is {}x{} but the distortion model expects {}x{}",
                source.width(),
                source.height(),
                resolution.width,
                resolution.height
            )));
        }

        if self.is_identity() || resolution.width == 0 || resolution.height == 0 {
            return Ok(source.clone());
        }

        let table = self.remap_table();
        let mut output = RgbImage::new(table.width, table.height);
        for row in 0..table.height {
            for col in 0..table.width {
                let [x, y] = table.source(col, row);
                let pixel = sample_bilinear(source, x as f64, y as f64, background);
                output.put_pixel(col, row, pixel);
            }
        }
        Ok(output)
    }

    /// Renders `step_count` divisions per axis of a rectilinear grid, as the lens
    /// would image it. Under the identity model the grid is exactly rectilinear.
    pub fn distortion_grid(
        &self,
        background: Rgba<u8>,
        foreground: Rgba<u8>,
        step_count: u32,
    ) -> RgbaImage {
        let resolution = self.resolution();
        let (width, height) = (resolution.width, resolution.height);
        let mut image = RgbaImage::from_pixel(width, height, background);
        if step_count == 0 || width == 0 || height == 0 {
            return image;
        }

        let step_width = width as f64 / step_count as f64;
        let step_height = height as f64 / step_count as f64;
        let max_x = (width - 1) as f64;
        let max_y = (height - 1) as f64;

        // Verticals
        for i in 0..=step_count {
            let col = (i as f64 * step_width).round().min(max_x);
            let samples = (0..=(2 * (height - 1)))
                .map(|t| Point2::new(col, t as f64 * 0.5))
                .collect::<Vec<_>>();
            self.draw_distorted_polyline(&mut image, &samples, foreground);
        }

        // Horizontals
        for i in 0..=step_count {
            let row = (i as f64 * step_height).round().min(max_y);
            let samples = (0..=(2 * (width - 1)))
                .map(|t| Point2::new(t as f64 * 0.5, row))
                .collect::<Vec<_>>();
            self.draw_distorted_polyline(&mut image, &samples, foreground);
        }

        image
    }

    fn draw_distorted_polyline(
        &self,
        image: &mut RgbaImage,
        ideal_points: &[Point2<f64>],
        color: Rgba<u8>,
    ) {
        let mut previous: Option<Point2<f64>> = None;
        for ideal in ideal_points {
            let current = self.distort(ideal);
            match previous {
                Some(prev) => draw_segment(image, &prev, &current, color),
                None => plot(image, &current, color),
            }
            previous = Some(current);
        }
    }
}

fn plot(image: &mut RgbaImage, point: &Point2<f64>, color: Rgba<u8>) {
    let x = point.x.round();
    let y = point.y.round();
    if x >= 0.0 && y >= 0.0 && x < image.width() as f64 && y < image.height() as f64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_segment(image: &mut RgbaImage, from: &Point2<f64>, to: &Point2<f64>, color: Rgba<u8>) {
    let delta = to - from;
    let steps = delta.x.abs().max(delta.y.abs()).ceil().max(1.0) as usize;
    // Long jumps happen only far outside the frame where the model is clamped.
    if steps > 4096 {
        plot(image, to, color);
        return;
    }
    for s in 1..=steps {
        let t = s as f64 / steps as f64;
        plot(image, &(from + delta * t), color);
    }
}

fn sample_bilinear(source: &RgbImage, x: f64, y: f64, background: Option<Rgb<u8>>) -> Rgb<u8> {
    let max_x = (source.width() - 1) as f64;
    let max_y = (source.height() - 1) as f64;

    let inside = x.is_finite() && y.is_finite() && x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y;
    let (x, y) = match (inside, background) {
        (true, _) => (x, y),
        (false, Some(color)) => return color,
        (false, None) => {
            let x = if x.is_finite() { x.clamp(0.0, max_x) } else { 0.0 };
            let y = if y.is_finite() { y.clamp(0.0, max_y) } else { 0.0 };
            (x, y)
        }
    };

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(source.width() - 1);
    let y1 = (y0 + 1).min(source.height() - 1);

    let p00 = source.get_pixel(x0, y0);
    let p10 = source.get_pixel(x1, y0);
    let p01 = source.get_pixel(x0, y1);
    let p11 = source.get_pixel(x1, y1);

    let mut channels = [0u8; 3];
    for (c, channel) in channels.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        let value = top * (1.0 - fy) + bottom * fy;
        *channel = value.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(channels)
}
