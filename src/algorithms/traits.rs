use crate::data::ProjectionImage;
use crate::error::AlignResult;
use ndarray::Array1;

/// Similarity score between two equally sized images; higher is better.
pub trait SimilarityMetric: Send + Sync {
    /// Returns the name of the metric
    fn name(&self) -> &str;

    /// Score two images of identical dimensions.
    fn score(&self, a: &ProjectionImage, b: &ProjectionImage) -> AlignResult<f64>;
}

/// A scalar function of a parameter vector, to be maximized.
///
/// Evaluation may fail; the optimizer stops at the first failure and
/// propagates it.
pub trait Objective {
    fn value(&mut self, point: &Array1<f64>) -> AlignResult<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&Array1<f64>) -> AlignResult<f64>,
{
    fn value(&mut self, point: &Array1<f64>) -> AlignResult<f64> {
        self(point)
    }
}
