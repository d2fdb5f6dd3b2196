use approx::assert_abs_diff_eq;
use projection_alignment::*;
use std::sync::mpsc;
use tempfile::TempDir;

fn session_with(truth_center: f64, crop: CropBorders) -> AlignmentSession {
    let stack = SyntheticScan::new(41, 24)
        .with_truth(truth_center, 0.0)
        .with_blob_count(6)
        .render_stack()
        .unwrap();
    AlignmentSession::new(stack, AlignmentParameters::new(20.0, 0.0), crop)
}

/// Observer that parks on its first call until the test releases it.
fn gated_observer() -> (mpsc::Sender<()>, impl FnMut(&EvaluationEvent) + Send + 'static) {
    let (tx, rx) = mpsc::channel::<()>();
    let observer = move |event: &EvaluationEvent| {
        if event.index == 1 {
            let _ = rx.recv();
        }
    };
    (tx, observer)
}

#[test]
fn test_optimization_updates_parameters() {
    let session = session_with(21.0, CropBorders::new(4, 3, 3));
    let handle = session
        .start_optimization(None::<fn(&EvaluationEvent)>)
        .unwrap();
    let outcome = handle.join();

    let report = outcome.report().expect("run should finish").clone();
    assert_eq!(report.status, RunStatus::Converged);
    assert_abs_diff_eq!(report.parameters.center_pixel, 21.0, epsilon = 1e-3);
    assert_eq!(session.parameters(), report.parameters);
    assert_eq!(session.last_score().map(|s| s.score), Some(report.score));
    assert!(!session.is_busy());
    assert!(session.preview().unwrap().is_some());
}

#[test]
fn test_other_actions_are_locked_out_during_run() {
    let session = session_with(21.0, CropBorders::new(4, 3, 3));
    let (release, observer) = gated_observer();
    let handle = session.start_optimization(Some(observer)).unwrap();

    assert!(session.is_busy());
    assert!(!handle.is_finished());
    assert!(matches!(
        session.update(AlignmentParameters::nominal(41), CropBorders::default()),
        Err(AlignError::Busy)
    ));
    assert!(matches!(session.reset(), Err(AlignError::Busy)));
    assert!(matches!(session.preview(), Err(AlignError::Busy)));
    assert!(matches!(
        session.start_optimization(None::<fn(&EvaluationEvent)>),
        Err(AlignError::Busy)
    ));
    let dir = TempDir::new().unwrap();
    let err = session.apply(&dir.path().join("out.mhd")).unwrap_err();
    assert!(matches!(err.downcast_ref::<AlignError>(), Some(AlignError::Busy)));

    release.send(()).unwrap();
    assert!(matches!(handle.join(), RunOutcome::Finished(_)));
    assert!(!session.is_busy());
    assert!(session.reset().is_ok());
}

#[test]
fn test_cancel_through_handle() {
    let session = session_with(21.0, CropBorders::new(4, 3, 3));
    let (release, observer) = gated_observer();
    let handle = session.start_optimization(Some(observer)).unwrap();

    handle.cancel();
    release.send(()).unwrap();

    match handle.join() {
        RunOutcome::Finished(report) => {
            assert_eq!(report.status, RunStatus::Cancelled);
            assert_eq!(report.phases.len(), 1);
            assert_eq!(report.parameters, AlignmentParameters::new(20.0, 0.0));
        }
        RunOutcome::Aborted(err) => panic!("unexpected abort: {}", err),
    }
}

#[test]
fn test_aborted_run_keeps_pre_run_parameters() {
    let session = session_with(21.0, CropBorders::new(21, 0, 0));
    let before = session.parameters();
    let handle = session
        .start_optimization(None::<fn(&EvaluationEvent)>)
        .unwrap();

    match handle.join() {
        RunOutcome::Aborted(err) => assert!(matches!(err, AlignError::InvalidCrop { .. })),
        RunOutcome::Finished(report) => panic!("unexpected report: {:?}", report.status),
    }
    assert_eq!(session.parameters(), before);
    assert!(session.last_score().is_none());
    assert!(!session.is_busy());
}

#[test]
fn test_update_then_reset() {
    let session = session_with(21.0, CropBorders::new(4, 3, 3));
    let result = session
        .update(AlignmentParameters::new(21.0, 0.4), CropBorders::new(5, 3, 3))
        .unwrap();
    assert!(result.score > 0.9);
    assert_eq!(session.crop(), CropBorders::new(5, 3, 3));

    session.reset().unwrap();
    assert_eq!(session.parameters(), AlignmentParameters::new(20.0, 0.4));
    assert_eq!(session.crop(), CropBorders::new(5, 3, 3));
    assert!(session.preview().unwrap().is_none());
}

#[test]
fn test_session_from_config() {
    let stack = SyntheticScan::new(41, 24).render_stack().unwrap();
    let mut config = config::Config::default();
    config.alignment.horizontal_border = 3;
    config.alignment.detector_angle = 0.1;
    let session = AlignmentSession::from_config(stack, &config);
    assert_eq!(session.parameters(), AlignmentParameters::new(20.0, 0.1));
    assert_eq!(session.crop(), CropBorders::new(3, 0, 0));
}
