use crate::algorithms::SimilarityMetric;
use crate::data::ProjectionImage;
use crate::error::{AlignError, AlignResult};

/// Pearson (zero-mean, unit-variance) correlation of two images.
///
/// `cc = Σ(a - mean_a)(b - mean_b) / (N · std_a · std_b)` with population
/// standard deviations. Lies in `[-1, 1]`; 1 means identical up to an affine
/// intensity change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedCrossCorrelation;

/// Mean and population standard deviation of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStatistics {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl ImageStatistics {
    pub fn of(image: &ProjectionImage) -> Self {
        let count = image.len();
        let n = count as f64;
        let mean = image.samples().sum::<f64>() / n;
        let variance = image.samples().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self {
            count,
            mean,
            std_dev: variance.sqrt(),
        }
    }

    /// True when the spread is at rounding level for the mean, which is
    /// what a constant image yields once its value is not exactly
    /// representable.
    pub fn is_flat(&self) -> bool {
        self.std_dev <= f64::EPSILON * self.mean.abs()
    }
}

impl NormalizedCrossCorrelation {
    pub fn compute(a: &ProjectionImage, b: &ProjectionImage) -> AlignResult<f64> {
        if a.dimensions() != b.dimensions() {
            return Err(AlignError::ShapeMismatch {
                left: a.dimensions(),
                right: b.dimensions(),
            });
        }

        let stats_a = ImageStatistics::of(a);
        let stats_b = ImageStatistics::of(b);
        for (label, stats) in [("first", &stats_a), ("last", &stats_b)] {
            if !stats.mean.is_finite() || !stats.std_dev.is_finite() {
                return Err(AlignError::Numeric(format!(
                    "{} image contains non-finite samples",
                    label
                )));
            }
            if stats.is_flat() {
                return Err(AlignError::Numeric(format!(
                    "{} image has zero variance",
                    label
                )));
            }
        }

        let covariance_sum: f64 = a
            .samples()
            .zip(b.samples())
            .map(|(va, vb)| (va - stats_a.mean) * (vb - stats_b.mean))
            .sum();
        let cc = covariance_sum / (stats_a.count as f64 * (stats_a.std_dev * stats_b.std_dev));

        if !cc.is_finite() {
            return Err(AlignError::Numeric(format!(
                "cross-correlation evaluated to {}",
                cc
            )));
        }
        Ok(cc)
    }
}

impl SimilarityMetric for NormalizedCrossCorrelation {
    fn name(&self) -> &str {
        "NCC"
    }

    fn score(&self, a: &ProjectionImage, b: &ProjectionImage) -> AlignResult<f64> {
        Self::compute(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics() {
        let img = ProjectionImage::from_raw(2, 2, vec![1.0, 3.0, 1.0, 3.0]).unwrap();
        let stats = ImageStatistics::of(&img);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std_dev, 1.0);
    }

    #[test]
    fn test_inexact_constant_is_flat() {
        let flat = ProjectionImage::from_fn(7, 3, |_, _| 0.1);
        assert!(ImageStatistics::of(&flat).is_flat());
        let zero = ProjectionImage::from_fn(7, 3, |_, _| 0.0);
        assert!(ImageStatistics::of(&zero).is_flat());
        let faint = ProjectionImage::from_raw(2, 1, vec![0.1, 0.1 + 1e-9]).unwrap();
        assert!(!ImageStatistics::of(&faint).is_flat());
    }

    #[test]
    fn test_anticorrelated() {
        let a = ProjectionImage::from_fn(8, 4, |x, y| (x * y) as f64);
        let b = ProjectionImage::from_fn(8, 4, |x, y| 10.0 - 2.0 * (x * y) as f64);
        let cc = NormalizedCrossCorrelation::compute(&a, &b).unwrap();
        assert!((cc + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_sample() {
        let mut samples = vec![1.0, 2.0, 3.0, 4.0];
        samples[2] = f64::NAN;
        let a = ProjectionImage::from_raw(2, 2, samples).unwrap();
        let b = ProjectionImage::from_raw(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(matches!(
            NormalizedCrossCorrelation::compute(&a, &b),
            Err(AlignError::Numeric(_))
        ));
    }
}
