use ndarray::Array1;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A point of the search together with its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub point: Array1<f64>,
    pub value: f64,
}

impl ScoredPoint {
    pub fn new(point: Array1<f64>, value: f64) -> Self {
        Self { point, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Running,
    Converged,
}

/// Stop rule on successive objective values, with manual cancel.
///
/// A negative threshold disables that half of the test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceChecker {
    relative_threshold: f64,
    absolute_threshold: f64,
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        Self::new(
            ConvergenceChecker::DEFAULT_RELATIVE_THRESHOLD,
            ConvergenceChecker::DEFAULT_ABSOLUTE_THRESHOLD,
        )
    }
}

impl ConvergenceChecker {
    pub const DEFAULT_RELATIVE_THRESHOLD: f64 = 100.0 * f64::EPSILON;
    pub const DEFAULT_ABSOLUTE_THRESHOLD: f64 = 100.0 * f64::MIN_POSITIVE;

    pub fn new(relative_threshold: f64, absolute_threshold: f64) -> Self {
        Self {
            relative_threshold,
            absolute_threshold,
        }
    }

    pub fn relative_threshold(&self) -> f64 {
        self.relative_threshold
    }

    pub fn absolute_threshold(&self) -> f64 {
        self.absolute_threshold
    }

    /// Decide whether the iteration that moved from `previous` to `current`
    /// ends the run. A raised cancel flag also reports `Converged`; callers
    /// tell the two apart by checking the token.
    pub fn check(
        &self,
        previous: &ScoredPoint,
        current: &ScoredPoint,
        cancel: &CancellationToken,
    ) -> ConvergenceState {
        if cancel.is_cancelled() {
            return ConvergenceState::Converged;
        }
        let p = previous.value;
        let c = current.value;
        let difference = (p - c).abs();
        let size = p.abs().max(c.abs());
        if difference <= size * self.relative_threshold || difference <= self.absolute_threshold {
            ConvergenceState::Converged
        } else {
            ConvergenceState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn point(value: f64) -> ScoredPoint {
        ScoredPoint::new(array![0.0, 0.0], value)
    }

    #[test]
    fn test_relative_threshold() {
        let checker = ConvergenceChecker::new(1e-4, -1.0);
        let token = CancellationToken::new();
        assert_eq!(
            checker.check(&point(0.9), &point(0.90005), &token),
            ConvergenceState::Converged
        );
        assert_eq!(
            checker.check(&point(0.9), &point(0.9002), &token),
            ConvergenceState::Running
        );
    }

    #[test]
    fn test_absolute_threshold() {
        let checker = ConvergenceChecker::new(-1.0, 1e-3);
        let token = CancellationToken::new();
        assert_eq!(
            checker.check(&point(1e-6), &point(5e-4), &token),
            ConvergenceState::Converged
        );
        assert_eq!(
            checker.check(&point(0.0), &point(0.01), &token),
            ConvergenceState::Running
        );
    }

    #[test]
    fn test_cancel_stops_regardless_of_progress() {
        let checker = ConvergenceChecker::default();
        let token = CancellationToken::new();
        token.clone().cancel();
        assert!(token.is_cancelled());
        assert_eq!(
            checker.check(&point(0.1), &point(0.9), &token),
            ConvergenceState::Converged
        );
    }

    #[test]
    fn test_nan_keeps_running() {
        let checker = ConvergenceChecker::default();
        let token = CancellationToken::new();
        assert_eq!(
            checker.check(&point(f64::NAN), &point(0.5), &token),
            ConvergenceState::Running
        );
    }
}
