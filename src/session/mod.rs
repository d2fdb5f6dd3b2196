//! Controller that owns the parameters and derived images of one alignment
//! session.
//!
//! Only one action may run against a session at a time. An optimization run
//! holds the lock on its background thread until it finishes, so `update`,
//! `reset`, `apply` and `preview` fail with [`AlignError::Busy`] meanwhile.

use crate::algorithms::{
    AlignmentModel, CancellationToken, EvaluationEvent, OptimizationReport, ProjectionOptimizer,
    ScoreResult,
};
use crate::config::{Config, OptimizerConfig};
use crate::data::{AlignmentParameters, CropBorders, ProjectionStack, TransformedPair};
use crate::error::{AlignError, AlignResult};
use crate::io::{self, ExportSummary};
use crate::visualization::compose_overlay;
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

#[derive(Debug)]
struct SessionState {
    params: AlignmentParameters,
    crop: CropBorders,
    last_score: Option<ScoreResult>,
    last_pair: Option<TransformedPair>,
}

/// Held while an action owns the session; releases on drop.
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> AlignResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AlignError::Busy)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct AlignmentSession {
    stack: Arc<ProjectionStack>,
    optimizer: ProjectionOptimizer,
    state: Arc<Mutex<SessionState>>,
    busy: Arc<AtomicBool>,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AlignmentSession {
    pub fn new(stack: ProjectionStack, params: AlignmentParameters, crop: CropBorders) -> Self {
        Self {
            stack: Arc::new(stack),
            optimizer: ProjectionOptimizer::default(),
            state: Arc::new(Mutex::new(SessionState {
                params,
                crop,
                last_score: None,
                last_pair: None,
            })),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start from the configured parameters, borders and optimizer settings.
    pub fn from_config(stack: ProjectionStack, config: &Config) -> Self {
        let params = config.alignment.parameters(stack.width());
        let crop = config.alignment.crop();
        Self::new(stack, params, crop).with_optimizer_config(config.optimizer.clone())
    }

    pub fn with_optimizer_config(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = ProjectionOptimizer::new(config);
        self
    }

    pub fn stack(&self) -> &ProjectionStack {
        &self.stack
    }

    pub fn parameters(&self) -> AlignmentParameters {
        lock(&self.state).params
    }

    pub fn crop(&self) -> CropBorders {
        lock(&self.state).crop
    }

    pub fn last_score(&self) -> Option<ScoreResult> {
        lock(&self.state).last_score
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn model(&self, crop: CropBorders) -> AlignResult<AlignmentModel> {
        AlignmentModel::from_stack(&self.stack, crop)
    }

    /// Evaluate once at `params` and keep the result for display.
    ///
    /// On failure the stored parameters and images are left untouched.
    pub fn update(&self, params: AlignmentParameters, crop: CropBorders) -> AlignResult<ScoreResult> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let (result, pair) = self.model(crop)?.evaluate_with_pair(&params)?;

        let mut state = lock(&self.state);
        state.params = params;
        state.crop = crop;
        state.last_score = Some(result);
        state.last_pair = Some(pair);
        debug!(
            center_pixel = params.center_pixel,
            detector_angle = params.detector_angle,
            score = result.score,
            "Updated alignment"
        );
        Ok(result)
    }

    /// Put the centre pixel back on the detector centre and drop derived
    /// images. The angle and borders are kept.
    pub fn reset(&self) -> AlignResult<()> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let mut state = lock(&self.state);
        state.params.center_pixel = AlignmentParameters::nominal(self.stack.width()).center_pixel;
        state.last_score = None;
        state.last_pair = None;
        Ok(())
    }

    /// Run the two-phase search on a background thread.
    ///
    /// `observer` is called after every evaluation, on the worker thread.
    /// The session stays busy until the run ends; on success the found
    /// parameters are stored, on an evaluation error the pre-run ones stay.
    pub fn start_optimization<F>(&self, observer: Option<F>) -> AlignResult<OptimizationHandle>
    where
        F: FnMut(&EvaluationEvent) + Send + 'static,
    {
        let guard = BusyGuard::acquire(&self.busy)?;
        let (start, crop) = {
            let state = lock(&self.state);
            (state.params, state.crop)
        };
        let model = self.model(crop)?;
        let optimizer = self.optimizer.clone();
        let state = Arc::clone(&self.state);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let thread = thread::Builder::new()
            .name("alignment-optimizer".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut observer = observer;
                let mut notify = |event: &EvaluationEvent| {
                    if let Some(observer) = observer.as_mut() {
                        observer(event);
                    }
                };

                match optimizer.run(&model, &start, &token, &mut notify) {
                    Ok(report) => {
                        let preview = model.evaluate_with_pair(&report.parameters).ok();
                        let mut state = lock(&state);
                        state.params = report.parameters;
                        state.last_score = Some(ScoreResult {
                            parameters: report.parameters,
                            score: report.score,
                        });
                        state.last_pair = preview.map(|(_, pair)| pair);
                        RunOutcome::Finished(report)
                    }
                    Err(err) => {
                        info!(error = %err, "Optimization aborted; parameters left at pre-run values");
                        RunOutcome::Aborted(err)
                    }
                }
            })
            .map_err(|e| AlignError::InvalidInput(format!("failed to start optimizer thread: {}", e)))?;

        Ok(OptimizationHandle { cancel, thread })
    }

    /// Transform every slice with the current parameters and write the
    /// aligned volume to `header_path` (which must end in `.mhd`).
    pub fn apply(&self, header_path: &Path) -> crate::Result<ExportSummary> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let (params, crop) = {
            let state = lock(&self.state);
            (state.params, state.crop)
        };
        io::apply_to_stack(&self.stack, &params, &crop, header_path)
    }

    /// Overlay of the most recent transformed pair, if any.
    pub fn preview(&self) -> AlignResult<Option<RgbImage>> {
        if self.is_busy() {
            return Err(AlignError::Busy);
        }
        Ok(lock(&self.state).last_pair.as_ref().map(compose_overlay))
    }
}

/// Result of a background run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Converged, cancelled or stopped at a cap; see the report's status.
    Finished(OptimizationReport),
    /// An evaluation failed; the session kept its pre-run parameters.
    Aborted(AlignError),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&OptimizationReport> {
        match self {
            RunOutcome::Finished(report) => Some(report),
            RunOutcome::Aborted(_) => None,
        }
    }
}

pub struct OptimizationHandle {
    cancel: CancellationToken,
    thread: JoinHandle<RunOutcome>,
}

impl OptimizationHandle {
    /// Ask the run to stop at the next iteration boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> RunOutcome {
        self.thread.join().unwrap_or_else(|_| {
            RunOutcome::Aborted(AlignError::Numeric(
                "optimizer thread panicked".to_string(),
            ))
        })
    }
}
