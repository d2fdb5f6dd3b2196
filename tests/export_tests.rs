use approx::assert_abs_diff_eq;
use image::{GrayImage, Luma};
use projection_alignment::io::{apply_to_stack, read_stack, write_stack};
use projection_alignment::*;
use std::fs;
use tempfile::TempDir;

fn three_slice_stack() -> ProjectionStack {
    let slices = (0..3)
        .map(|k| ProjectionImage::from_fn(30, 20, move |x, y| (x + 2 * y + 5 * k) as f64 * 0.5))
        .collect();
    ProjectionStack::new(slices, ElementSpacing { x: 0.1, y: 0.2, z: 1.5 }).unwrap()
}

#[test]
fn test_apply_writes_header_and_raw() {
    let dir = TempDir::new().unwrap();
    let header = dir.path().join("aligned.mhd");
    let stack = three_slice_stack();
    let params = AlignmentParameters::new(16.0, 0.0);
    let crop = CropBorders::new(3, 2, 1);

    let summary = apply_to_stack(&stack, &params, &crop, &header).unwrap();
    assert_eq!((summary.width, summary.height, summary.slices), (24, 17, 3));
    assert_eq!(summary.data_path, dir.path().join("aligned.raw"));

    let text = fs::read_to_string(&header).unwrap();
    assert!(text.contains("NDims = 3"));
    assert!(text.contains("DimSize = 24 17 3"));
    assert!(text.contains("ElementType = MET_FLOAT"));
    assert!(text.contains("BinaryDataByteOrderMSB = False"));
    assert!(text.contains("ElementSpacing = 0.1 0.2 1.5"));
    assert!(text.contains("ElementDataFile = aligned.raw"));
    assert_eq!(fs::metadata(&summary.data_path).unwrap().len(), 24 * 17 * 3 * 4);
}

#[test]
fn test_applied_slices_match_direct_transform() {
    let dir = TempDir::new().unwrap();
    let header = dir.path().join("aligned.mhd");
    let stack = three_slice_stack();
    let params = AlignmentParameters::new(13.25, 0.7);
    let crop = CropBorders::new(2, 1, 1);

    apply_to_stack(&stack, &params, &crop, &header).unwrap();
    let written = read_stack(&header, ElementSpacing::default()).unwrap();

    assert_eq!(written.len(), 3);
    assert_eq!(written.spacing(), stack.spacing());
    for (k, slice) in stack.slices().iter().enumerate() {
        let expected = GeometricTransformer::transform(slice, &params, &crop, false).unwrap();
        for (a, b) in written.slices()[k].samples().zip(expected.samples()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }
}

#[test]
fn test_header_name_must_end_in_mhd() {
    let dir = TempDir::new().unwrap();
    let stack = three_slice_stack();
    for name in ["aligned.raw", "aligned", ".mhd"] {
        let err = apply_to_stack(
            &stack,
            &AlignmentParameters::nominal(30),
            &CropBorders::default(),
            &dir.path().join(name),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::InvalidInput(_))
        ));
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_apply_rejects_bad_crop() {
    let dir = TempDir::new().unwrap();
    let err = apply_to_stack(
        &three_slice_stack(),
        &AlignmentParameters::nominal(30),
        &CropBorders::new(15, 0, 0),
        &dir.path().join("aligned.mhd"),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AlignError>(),
        Some(AlignError::InvalidCrop { .. })
    ));
}

#[test]
fn test_synthetic_stack_round_trip() {
    let dir = TempDir::new().unwrap();
    let header = dir.path().join("synthetic.mhd");
    let stack = SyntheticScan::new(33, 21).with_truth(17.5, 0.2).render_stack().unwrap();
    write_stack(stack.slices(), stack.spacing(), &header).unwrap();

    let loaded = load_stack(&header, ElementSpacing::default()).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!((loaded.width(), loaded.height()), (33, 21));
    for (a, b) in loaded.last().samples().zip(stack.last().samples()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
}

#[test]
fn test_load_image_directory_in_name_order() {
    let dir = TempDir::new().unwrap();
    for (name, value) in [("p_002.png", 200u8), ("p_000.png", 10), ("p_001.png", 100)] {
        let img = GrayImage::from_fn(12, 8, |x, _| Luma([value.saturating_add(x as u8)]));
        img.save(dir.path().join(name)).unwrap();
    }
    fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let stack = load_stack(dir.path(), ElementSpacing::from([0.5, 0.5, 2.0])).unwrap();
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.spacing(), ElementSpacing::from([0.5, 0.5, 2.0]));
    assert_abs_diff_eq!(stack.first().get(0, 0), 10.0 / 255.0, epsilon = 1e-6);
    assert_abs_diff_eq!(stack.last().get(0, 0), 200.0 / 255.0, epsilon = 1e-6);
}

#[test]
fn test_single_image_directory_is_rejected() {
    let dir = TempDir::new().unwrap();
    GrayImage::from_fn(8, 8, |x, y| Luma([(x + y) as u8]))
        .save(dir.path().join("only.png"))
        .unwrap();
    let err = load_stack(dir.path(), ElementSpacing::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AlignError>(),
        Some(AlignError::InvalidInput(_))
    ));
}

#[test]
fn test_tiny_projections_are_rejected() {
    let dir = TempDir::new().unwrap();
    for name in ["p_000.png", "p_001.png"] {
        GrayImage::from_fn(1, 6, |_, y| Luma([y as u8]))
            .save(dir.path().join(name))
            .unwrap();
    }
    let err = load_stack(dir.path(), ElementSpacing::default()).unwrap_err();
    assert!(err.to_string().contains("too small"));
}
