use crate::algorithms::{
    AlignmentModel, CancellationToken, PowellMaximizer, SimilarityMetric, Termination,
};
use crate::config::{OptimizerConfig, PhaseConfig};
use crate::data::AlignmentParameters;
use crate::error::AlignResult;
use crate::logging::OptimizationSpan;
use chrono::{DateTime, Utc};
use ndarray::{array, Array1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{info, warn};
use uuid::Uuid;

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The fine phase met its convergence test.
    Converged,
    /// Stopped on request; the best point so far is reported.
    Cancelled,
    /// An evaluation or iteration cap ran out first.
    Diverged,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Converged => "converged",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Diverged => "diverged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Coarse,
    Fine,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Coarse => "coarse",
            Phase::Fine => "fine",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub termination: Termination,
    pub iterations: usize,
    pub evaluations: usize,
    pub parameters: AlignmentParameters,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub status: RunStatus,
    pub parameters: AlignmentParameters,
    pub score: f64,
    pub phases: Vec<PhaseSummary>,
}

impl OptimizationReport {
    pub fn total_evaluations(&self) -> usize {
        self.phases.iter().map(|p| p.evaluations).sum()
    }
}

/// Sent to the observer after every objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationEvent {
    /// 1-based count of evaluations in this run, across both phases.
    pub index: usize,
    pub parameters: AlignmentParameters,
    pub score: f64,
}

/// Two-phase driver: a coarse Powell pass, then a fine pass started from
/// its result unless the coarse pass was cancelled. The run status follows
/// the last pass that ran.
///
/// The search runs in scaled coordinates so that one unit of either
/// parameter moves image content by about one pixel: the centre pixel is
/// used as is and the angle is multiplied by `(pi / 180) * width / 2`.
#[derive(Debug, Clone, Default)]
pub struct ProjectionOptimizer {
    config: OptimizerConfig,
}

impl ProjectionOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn parameter_weights(width: usize) -> [f64; 2] {
        [1.0, (PI / 180.0) * width as f64 / 2.0]
    }

    fn to_scaled(params: &AlignmentParameters, weights: &[f64; 2]) -> Array1<f64> {
        array![
            params.center_pixel * weights[0],
            params.detector_angle * weights[1]
        ]
    }

    fn from_scaled(point: &Array1<f64>, weights: &[f64; 2]) -> AlignmentParameters {
        AlignmentParameters::new(point[0] / weights[0], point[1] / weights[1])
    }

    /// Maximize the model's score starting from `start`.
    ///
    /// Returns `Err` only when an evaluation fails; the caller should then
    /// keep its pre-run parameters. Cancellation and exhausted caps come
    /// back as a report carrying the best point found.
    pub fn run<M: SimilarityMetric>(
        &self,
        model: &AlignmentModel<M>,
        start: &AlignmentParameters,
        cancel: &CancellationToken,
        observer: &mut dyn FnMut(&EvaluationEvent),
    ) -> AlignResult<OptimizationReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = OptimizationSpan::new(run_id, model.width(), model.height(), start);
        let _entered = span.enter();

        let weights = Self::parameter_weights(model.width());
        let mut index = 0usize;
        let mut objective = |point: &Array1<f64>| -> AlignResult<f64> {
            let parameters = Self::from_scaled(point, &weights);
            let result = model.evaluate(&parameters)?;
            index += 1;
            observer(&EvaluationEvent {
                index,
                parameters,
                score: result.score,
            });
            Ok(result.score)
        };

        let start_point = Self::to_scaled(start, &weights);
        let (coarse, coarse_point) = Self::run_phase(
            Phase::Coarse,
            &self.config.coarse,
            &mut objective,
            &start_point,
            &weights,
            cancel,
            &span,
        )?;
        let mut last = coarse.clone();
        let mut phases = vec![coarse];

        if last.termination != Termination::Cancelled {
            let (fine, _) = Self::run_phase(
                Phase::Fine,
                &self.config.fine,
                &mut objective,
                &coarse_point,
                &weights,
                cancel,
                &span,
            )?;
            last = fine.clone();
            phases.push(fine);
        }

        let status = match last.termination {
            Termination::Converged => RunStatus::Converged,
            Termination::Cancelled => {
                info!(phase = last.phase.as_str(), "Optimization cancelled");
                RunStatus::Cancelled
            }
            Termination::EvaluationLimit | Termination::IterationLimit => {
                warn!(
                    phase = last.phase.as_str(),
                    termination = last.termination.as_str(),
                    "Optimization stopped at its cap without converging"
                );
                RunStatus::Diverged
            }
        };

        span.record_result(status.as_str(), &last.parameters, last.score);
        Ok(OptimizationReport {
            run_id,
            started_at,
            elapsed_ms: span.elapsed_ms(),
            status,
            parameters: last.parameters,
            score: last.score,
            phases,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phase<F>(
        phase: Phase,
        config: &PhaseConfig,
        objective: &mut F,
        start: &Array1<f64>,
        weights: &[f64; 2],
        cancel: &CancellationToken,
        span: &OptimizationSpan,
    ) -> AlignResult<(PhaseSummary, Array1<f64>)>
    where
        F: FnMut(&Array1<f64>) -> AlignResult<f64>,
    {
        let outcome = PowellMaximizer::new(config)
            .maximize(objective, start, cancel)
            .map_err(|err| {
                span.record_failure(&err);
                err
            })?;
        span.record_phase(
            phase.as_str(),
            outcome.termination.as_str(),
            outcome.iterations,
            outcome.evaluations,
            outcome.value,
        );
        let summary = PhaseSummary {
            phase,
            termination: outcome.termination,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            parameters: Self::from_scaled(&outcome.point, weights),
            score: outcome.value,
        };
        Ok((summary, outcome.point))
    }
}
