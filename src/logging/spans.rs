//! Structured spans for optimization runs

use crate::data::AlignmentParameters;
use instant::Instant;
use tracing::{span, Level, Span};
use uuid::Uuid;

/// Span covering one optimization run, tagged with its run id.
pub struct OptimizationSpan {
    span: Span,
    start_time: Instant,
    run_id: Uuid,
}

impl OptimizationSpan {
    pub fn new(run_id: Uuid, width: usize, height: usize, start: &AlignmentParameters) -> Self {
        let span = span!(
            Level::INFO,
            "optimization",
            run_id = %run_id,
            width = width,
            height = height,
            start_center = start.center_pixel,
            start_angle = start.detector_angle,
        );
        Self {
            span,
            start_time: Instant::now(),
            run_id,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Record the end of one Powell phase.
    pub fn record_phase(
        &self,
        phase: &str,
        termination: &str,
        iterations: usize,
        evaluations: usize,
        score: f64,
    ) {
        tracing::debug!(
            parent: &self.span,
            phase = phase,
            termination = termination,
            iterations = iterations,
            evaluations = evaluations,
            score = score,
            "Phase finished"
        );
    }

    pub fn record_result(&self, status: &str, params: &AlignmentParameters, score: f64) {
        tracing::info!(
            parent: &self.span,
            status = status,
            center_pixel = params.center_pixel,
            detector_angle = params.detector_angle,
            score = score,
            execution_time_ms = self.elapsed_ms(),
            "Optimization finished"
        );
    }

    pub fn record_failure(&self, error: &dyn std::error::Error) {
        tracing::warn!(
            parent: &self.span,
            error = %error,
            execution_time_ms = self.elapsed_ms(),
            "Optimization aborted"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_keeps_run_id() {
        let id = Uuid::new_v4();
        let span = OptimizationSpan::new(id, 64, 32, &AlignmentParameters::nominal(64));
        assert_eq!(span.run_id(), id);
        let _entered = span.enter();
        span.record_phase("coarse", "converged", 3, 40, 0.9);
    }
}
