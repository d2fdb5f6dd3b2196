use crate::data::ProjectionImage;
use crate::error::{AlignError, AlignResult};
use serde::{Deserialize, Serialize};

/// Physical size of one voxel: pixel width, pixel height and slice spacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementSpacing {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for ElementSpacing {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

impl From<[f64; 3]> for ElementSpacing {
    fn from(v: [f64; 3]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            z: v[2],
        }
    }
}

/// An ordered sequence of equally sized projections.
#[derive(Debug, Clone)]
pub struct ProjectionStack {
    slices: Vec<ProjectionImage>,
    spacing: ElementSpacing,
}

impl ProjectionStack {
    /// Requires at least two slices, all of the same size.
    pub fn new(slices: Vec<ProjectionImage>, spacing: ElementSpacing) -> AlignResult<Self> {
        if slices.len() < 2 {
            return Err(AlignError::InvalidInput(format!(
                "stack must contain at least 2 slices, got {}",
                slices.len()
            )));
        }
        let dims = slices[0].dimensions();
        if let Some((index, odd)) = slices
            .iter()
            .enumerate()
            .find(|(_, s)| s.dimensions() != dims)
        {
            return Err(AlignError::InvalidInput(format!(
                "slice {} is {:?}, expected {:?}",
                index,
                odd.dimensions(),
                dims
            )));
        }
        Ok(Self { slices, spacing })
    }

    pub fn width(&self) -> usize {
        self.slices[0].width()
    }

    pub fn height(&self) -> usize {
        self.slices[0].height()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn spacing(&self) -> ElementSpacing {
        self.spacing
    }

    pub fn slices(&self) -> &[ProjectionImage] {
        &self.slices
    }

    pub fn first(&self) -> &ProjectionImage {
        &self.slices[0]
    }

    pub fn last(&self) -> &ProjectionImage {
        &self.slices[self.slices.len() - 1]
    }
}
