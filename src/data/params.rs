use serde::{Deserialize, Serialize};

/// The two degrees of freedom being calibrated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentParameters {
    /// Column (sub-pixel) where the rotation axis projects onto the detector.
    pub center_pixel: f64,
    /// Detector tilt in degrees.
    pub detector_angle: f64,
}

impl AlignmentParameters {
    pub fn new(center_pixel: f64, detector_angle: f64) -> Self {
        Self {
            center_pixel,
            detector_angle,
        }
    }

    /// Axis through the middle of a detector `width` pixels wide, no tilt.
    pub fn nominal(width: usize) -> Self {
        Self::new(nominal_center(width), 0.0)
    }

    /// Horizontal shift that moves `center_pixel` onto the image centre.
    pub fn axis_shift(&self, width: usize) -> f64 {
        nominal_center(width) - self.center_pixel
    }
}

/// `(width - 1) / 2`, the centre column of a detector.
pub fn nominal_center(width: usize) -> f64 {
    0.5 * (width as f64 - 1.0)
}

/// Rows and columns trimmed from the transformed projections before scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBorders {
    /// Columns removed from both the left and the right edge.
    pub horizontal: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropBorders {
    pub fn new(horizontal: u32, top: u32, bottom: u32) -> Self {
        Self {
            horizontal,
            top,
            bottom,
        }
    }

    /// Output size for a `width` x `height` input. Either value may be
    /// non-positive, in which case the borders are unusable.
    pub fn cropped_size(&self, width: usize, height: usize) -> (i64, i64) {
        (
            width as i64 - 2 * self.horizontal as i64,
            height as i64 - self.top as i64 - self.bottom as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_center() {
        assert_eq!(AlignmentParameters::nominal(101).center_pixel, 50.0);
        assert_eq!(AlignmentParameters::nominal(100).center_pixel, 49.5);
    }

    #[test]
    fn test_axis_shift_sign() {
        let params = AlignmentParameters::new(52.5, 0.0);
        assert_eq!(params.axis_shift(101), -2.5);
    }

    #[test]
    fn test_cropped_size() {
        let crop = CropBorders::new(10, 5, 5);
        assert_eq!(crop.cropped_size(101, 50), (81, 40));
        assert_eq!(CropBorders::new(51, 0, 0).cropped_size(101, 50), (-1, 50));
    }
}
