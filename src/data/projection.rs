use crate::error::{AlignError, AlignResult};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};

/// A single projection: a 2D grid of floating-point intensities.
///
/// Samples are stored row-major as `(height, width)`, so `data[[y, x]]`
/// addresses column `x` of row `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionImage {
    data: Array2<f64>,
}

impl ProjectionImage {
    /// Wrap an existing sample grid. Empty grids are rejected.
    pub fn new(data: Array2<f64>) -> AlignResult<Self> {
        let (height, width) = data.dim();
        if width == 0 || height == 0 {
            return Err(AlignError::InvalidInput(format!(
                "projection must not be empty, got {}x{}",
                width, height
            )));
        }
        Ok(Self { data })
    }

    /// Wrap a grid produced by a transform of a non-empty image.
    pub(crate) fn from_array(data: Array2<f64>) -> Self {
        debug_assert!(!data.is_empty());
        Self { data }
    }

    /// Build an image from row-major samples.
    pub fn from_raw(width: usize, height: usize, samples: Vec<f64>) -> AlignResult<Self> {
        if samples.len() != width * height {
            return Err(AlignError::InvalidInput(format!(
                "expected {} samples for a {}x{} projection, got {}",
                width * height,
                width,
                height,
                samples.len()
            )));
        }
        let data = Array2::from_shape_vec((height, width), samples)
            .map_err(|e| AlignError::InvalidInput(e.to_string()))?;
        Self::new(data)
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64,
    {
        Self {
            data: Array2::from_shape_fn((height, width), |(y, x)| f(x, y)),
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[[y, x]]
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    /// Smallest and largest sample.
    pub fn min_max(&self) -> (f64, f64) {
        self.data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Samples in row-major order.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }
}

impl From<&ImageBuffer<Luma<f32>, Vec<f32>>> for ProjectionImage {
    fn from(buffer: &ImageBuffer<Luma<f32>, Vec<f32>>) -> Self {
        let (width, height) = buffer.dimensions();
        Self::from_fn(width as usize, height as usize, |x, y| {
            buffer.get_pixel(x as u32, y as u32)[0] as f64
        })
    }
}
