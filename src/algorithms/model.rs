use crate::algorithms::{NormalizedCrossCorrelation, SimilarityMetric};
use crate::data::{
    AlignmentParameters, CropBorders, GeometricTransformer, ProjectionImage, ProjectionStack,
    TransformedPair,
};
use crate::error::{AlignError, AlignResult};
use serde::{Deserialize, Serialize};

/// A similarity score and the parameters that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub parameters: AlignmentParameters,
    pub score: f64,
}

/// The objective: similarity of the transformed first and last projections
/// as a function of the alignment parameters.
///
/// Holds only immutable inputs, so evaluation has no side effects.
#[derive(Debug, Clone)]
pub struct AlignmentModel<M: SimilarityMetric = NormalizedCrossCorrelation> {
    first: ProjectionImage,
    last: ProjectionImage,
    crop: CropBorders,
    metric: M,
}

impl AlignmentModel {
    pub fn new(first: ProjectionImage, last: ProjectionImage, crop: CropBorders) -> AlignResult<Self> {
        Self::with_metric(first, last, crop, NormalizedCrossCorrelation)
    }

    /// Use the first and last slices of `stack`.
    pub fn from_stack(stack: &ProjectionStack, crop: CropBorders) -> AlignResult<Self> {
        Self::new(stack.first().clone(), stack.last().clone(), crop)
    }
}

impl<M: SimilarityMetric> AlignmentModel<M> {
    pub fn with_metric(
        first: ProjectionImage,
        last: ProjectionImage,
        crop: CropBorders,
        metric: M,
    ) -> AlignResult<Self> {
        if first.dimensions() != last.dimensions() {
            return Err(AlignError::ShapeMismatch {
                left: first.dimensions(),
                right: last.dimensions(),
            });
        }
        Ok(Self {
            first,
            last,
            crop,
            metric,
        })
    }

    pub fn width(&self) -> usize {
        self.first.width()
    }

    pub fn height(&self) -> usize {
        self.first.height()
    }

    pub fn crop(&self) -> CropBorders {
        self.crop
    }

    pub fn metric_name(&self) -> &str {
        self.metric.name()
    }

    pub fn transform(&self, params: &AlignmentParameters) -> AlignResult<TransformedPair> {
        GeometricTransformer::transform_pair(&self.first, &self.last, params, &self.crop)
    }

    pub fn evaluate(&self, params: &AlignmentParameters) -> AlignResult<ScoreResult> {
        self.evaluate_with_pair(params).map(|(result, _)| result)
    }

    /// Evaluate and also hand back the transformed images, for previews.
    pub fn evaluate_with_pair(
        &self,
        params: &AlignmentParameters,
    ) -> AlignResult<(ScoreResult, TransformedPair)> {
        let pair = self.transform(params)?;
        let score = self.metric.score(&pair.first, &pair.last)?;
        Ok((
            ScoreResult {
                parameters: *params,
                score,
            },
            pair,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mismatched_pair() {
        let a = ProjectionImage::from_fn(10, 10, |x, _| x as f64);
        let b = ProjectionImage::from_fn(11, 10, |x, _| x as f64);
        assert!(matches!(
            AlignmentModel::new(a, b, CropBorders::default()),
            Err(AlignError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_crop_surfaces_on_evaluate() {
        let a = ProjectionImage::from_fn(10, 10, |x, y| (x * y) as f64);
        let model = AlignmentModel::new(a.clone(), a, CropBorders::new(5, 0, 0)).unwrap();
        let err = model.evaluate(&AlignmentParameters::nominal(10)).unwrap_err();
        assert!(matches!(err, AlignError::InvalidCrop { .. }));
    }

    #[test]
    fn test_metric_name() {
        let a = ProjectionImage::from_fn(4, 4, |x, _| x as f64);
        let model = AlignmentModel::new(a.clone(), a, CropBorders::default()).unwrap();
        assert_eq!(model.metric_name(), "NCC");
    }
}
