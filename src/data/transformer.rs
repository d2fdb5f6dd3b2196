use crate::data::{AlignmentParameters, CropBorders, ProjectionImage};
use crate::error::{AlignError, AlignResult};
use ndarray::{s, Array2};

/// Applies the shift / rotate / crop sequence that brings a raw projection
/// into comparison position.
pub struct GeometricTransformer;

/// The two projections after transformation. Both always share dimensions.
#[derive(Debug, Clone)]
pub struct TransformedPair {
    pub first: ProjectionImage,
    pub last: ProjectionImage,
}

impl TransformedPair {
    pub fn dimensions(&self) -> (usize, usize) {
        self.first.dimensions()
    }
}

impl GeometricTransformer {
    /// Transform one raw projection.
    ///
    /// The non-mirrored variant translates by `+axis_shift` and rotates by
    /// `-detector_angle`. The mirrored variant (the projection taken from the
    /// opposite side) is flipped horizontally first, then translated by
    /// `-axis_shift` and rotated by `+detector_angle`. Both are then cropped.
    pub fn transform(
        image: &ProjectionImage,
        params: &AlignmentParameters,
        crop: &CropBorders,
        mirrored: bool,
    ) -> AlignResult<ProjectionImage> {
        let (width, height) = image.dimensions();
        Self::check_crop(width, height, crop)?;

        let shift = params.axis_shift(width);
        let moved = if mirrored {
            let flipped = Self::flip_horizontal(image);
            let translated = Self::translate(&flipped, -shift, 0.0);
            Self::rotate(&translated, params.detector_angle)
        } else {
            let translated = Self::translate(image, shift, 0.0);
            Self::rotate(&translated, -params.detector_angle)
        };

        Self::crop(&moved, crop)
    }

    /// Transform the first (direct) and last (mirrored) projections together.
    pub fn transform_pair(
        first: &ProjectionImage,
        last: &ProjectionImage,
        params: &AlignmentParameters,
        crop: &CropBorders,
    ) -> AlignResult<TransformedPair> {
        if first.dimensions() != last.dimensions() {
            return Err(AlignError::ShapeMismatch {
                left: first.dimensions(),
                right: last.dimensions(),
            });
        }
        Ok(TransformedPair {
            first: Self::transform(first, params, crop, false)?,
            last: Self::transform(last, params, crop, true)?,
        })
    }

    /// Mirror columns: output column `x` takes input column `width - 1 - x`.
    pub fn flip_horizontal(image: &ProjectionImage) -> ProjectionImage {
        ProjectionImage::from_array(image.view().slice(s![.., ..;-1]).to_owned())
    }

    /// Translate by a (possibly fractional) offset. Uncovered pixels become 0.
    pub fn translate(image: &ProjectionImage, dx: f64, dy: f64) -> ProjectionImage {
        if dx == 0.0 && dy == 0.0 {
            return image.clone();
        }
        let (width, height) = image.dimensions();
        ProjectionImage::from_array(Array2::from_shape_fn((height, width), |(y, x)| {
            Self::bilinear_interpolate(image, x as f64 - dx, y as f64 - dy)
        }))
    }

    /// Rotate about `((width - 1) / 2, (height - 1) / 2)`.
    ///
    /// Positive angles turn the content clockwise as displayed (y pointing
    /// down). Uncovered pixels become 0.
    pub fn rotate(image: &ProjectionImage, angle_degrees: f64) -> ProjectionImage {
        if angle_degrees == 0.0 {
            return image.clone();
        }
        let (width, height) = image.dimensions();
        let center_x = 0.5 * (width as f64 - 1.0);
        let center_y = 0.5 * (height as f64 - 1.0);

        // Inverse mapping: destination pixel -> source position.
        let angle_rad = -angle_degrees.to_radians();
        let (sin_a, cos_a) = angle_rad.sin_cos();

        ProjectionImage::from_fn(width, height, |x, y| {
            let dx = x as f64 - center_x;
            let dy = y as f64 - center_y;
            let src_x = center_x + dx * cos_a - dy * sin_a;
            let src_y = center_y + dx * sin_a + dy * cos_a;
            Self::bilinear_interpolate(image, src_x, src_y)
        })
    }

    /// Remove `horizontal` columns from each side and `top`/`bottom` rows.
    pub fn crop(image: &ProjectionImage, crop: &CropBorders) -> AlignResult<ProjectionImage> {
        let (width, height) = image.dimensions();
        Self::check_crop(width, height, crop)?;
        if *crop == CropBorders::default() {
            return Ok(image.clone());
        }

        let left = crop.horizontal as usize;
        let right = width - crop.horizontal as usize;
        let top = crop.top as usize;
        let bottom = height - crop.bottom as usize;
        let view = image.view();
        Ok(ProjectionImage::from_array(
            view.slice(s![top..bottom, left..right]).to_owned(),
        ))
    }

    fn check_crop(width: usize, height: usize, crop: &CropBorders) -> AlignResult<()> {
        let (out_width, out_height) = crop.cropped_size(width, height);
        if out_width <= 0 || out_height <= 0 {
            return Err(AlignError::InvalidCrop {
                horizontal: crop.horizontal,
                top: crop.top,
                bottom: crop.bottom,
                width: out_width,
                height: out_height,
            });
        }
        Ok(())
    }

    /// Bilinear interpolation; positions outside the sample grid read as 0.
    fn bilinear_interpolate(image: &ProjectionImage, x: f64, y: f64) -> f64 {
        let (width, height) = image.dimensions();
        let max_x = (width - 1) as f64;
        let max_y = (height - 1) as f64;

        if !(x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y) {
            return 0.0;
        }

        let x1 = x.floor() as usize;
        let y1 = y.floor() as usize;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);

        let fx = x - x1 as f64;
        let fy = y - y1 as f64;

        let p11 = image.get(x1, y1);
        let p12 = image.get(x1, y2);
        let p21 = image.get(x2, y1);
        let p22 = image.get(x2, y2);

        let top = p11 + fx * (p21 - p11);
        let bottom = p12 + fx * (p22 - p12);
        top + fy * (bottom - top)
    }
}
