//! End-to-end tests of the compute context against the mock platform.

use std::sync::Arc;

use darkroom_compute::testing::{MockMode, MockPlatform};
use darkroom_compute::{
    Backend, ComputeContext, ComputeError, ContextConfig, HeadlessPlatform, LiveHistogram, Limits,
    OpId, ServiceState,
};
use darkroom_ops::{
    apply_adjustments, apply_lut, apply_masks, compute_histogram, rotate, Adjustments, CurvePoint,
    LinearMask, MaskStack, RadialMask, ToneCurveLut,
};

fn mock_context(platform: &MockPlatform) -> ComputeContext {
    ComputeContext::builder()
        .platform(Arc::new(platform.clone()))
        .build()
}

fn gradient(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let v = (i * 255 / (width * height).max(2).saturating_sub(1)) as u8;
            [v, v / 2, 255 - v]
        })
        .collect()
}

fn warm() -> Adjustments {
    Adjustments { exposure: 0.5, temperature: 0.3, saturation: 0.2, ..Default::default() }
}

fn s_curve() -> Vec<CurvePoint> {
    vec![
        CurvePoint::new(0.0, 0.0),
        CurvePoint::new(0.25, 0.18),
        CurvePoint::new(0.75, 0.82),
        CurvePoint::new(1.0, 1.0),
    ]
}

#[test]
fn test_ready_context_uses_accelerator() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    assert!(ctx.capabilities().available);
    assert_eq!(ctx.capability_service().state(), ServiceState::Ready);

    let rgb = gradient(16, 8);
    let out = ctx.adjustments().apply(&rgb, 16, 8, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
    assert_eq!(out.data, apply_adjustments(&rgb, 16, 8, &warm()).unwrap());

    let device = platform.last_accelerator().unwrap();
    assert_eq!(device.calls(OpId::Adjustments), 1);
}

#[test]
fn test_headless_context_runs_on_cpu() {
    let ctx = ComputeContext::builder()
        .platform(Arc::new(HeadlessPlatform))
        .build();
    assert!(!ctx.capabilities().available);

    let rgb = gradient(8, 8);
    let lut = ToneCurveLut::from_points(&s_curve());
    let out = ctx.tone_curve().apply(&rgb, 8, 8, &s_curve()).unwrap();
    assert_eq!(out.backend, Backend::Fallback);
    assert_eq!(out.data, apply_lut(&rgb, 8, 8, &lut).unwrap());
}

#[test]
fn test_fast_paths_return_fresh_copies() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let rgb = gradient(6, 4);

    let results = [
        ctx.adjustments().apply(&rgb, 6, 4, &Adjustments::default()).unwrap(),
        ctx.tone_curve().apply(&rgb, 6, 4, &[]).unwrap(),
        ctx.tone_curve()
            .apply(&rgb, 6, 4, &[CurvePoint::new(0.0, 0.0), CurvePoint::new(1.0, 1.0)])
            .unwrap(),
        ctx.uber().apply(&rgb, 6, 4, &Adjustments::default(), &[]).unwrap(),
        ctx.masks().apply(&rgb, 6, 4, &MaskStack::default()).unwrap(),
        ctx.rotation().apply(&rgb, 6, 4, 0.0).unwrap(),
    ];

    for out in &results {
        assert_eq!(out.data, rgb);
        assert_ne!(out.data.as_ptr(), rgb.as_ptr());
        assert_eq!(out.backend, Backend::Fallback);
    }
    assert_eq!(platform.last_accelerator().unwrap().total_calls(), 0);
}

#[test]
fn test_tiny_rotation_never_dispatches() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let rgb = gradient(10, 10);

    let out = ctx.rotation().apply(&rgb, 10, 10, 0.0001).unwrap();
    assert_eq!(out.data, rgb);
    let device = platform.last_accelerator().unwrap();
    assert_eq!(device.calls(OpId::Rotation), 0);

    let out = ctx.rotation().apply(&rgb, 10, 10, 45.0).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
    assert_eq!(out.data.len(), rgb.len());
    assert_eq!(out.data, rotate(&rgb, 10, 10, 45.0).unwrap());
    assert_eq!(device.calls(OpId::Rotation), 1);
}

#[test]
fn test_uber_matches_sequential_stages() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let rgb = gradient(12, 6);

    let fused = ctx.uber().apply(&rgb, 12, 6, &warm(), &s_curve()).unwrap();
    let adjusted = apply_adjustments(&rgb, 12, 6, &warm()).unwrap();
    let expected = apply_lut(&adjusted, 12, 6, &ToneCurveLut::from_points(&s_curve())).unwrap();
    assert_eq!(fused.data, expected);
    assert_eq!(fused.backend, Backend::Accelerated);
}

#[test]
fn test_histogram_clipping() {
    let ctx = mock_context(&MockPlatform::new());

    let black = vec![0u8; 8 * 8 * 3];
    let hist = ctx.histogram().compute(&black, 8, 8).unwrap().data;
    assert_eq!(hist.pixel_count(), 64);
    assert!(hist.shadow_clipping.r && hist.shadow_clipping.g && hist.shadow_clipping.b);
    assert!(!hist.highlight_clipping.any());

    let white = vec![255u8; 8 * 8 * 3];
    let hist = ctx.histogram().compute(&white, 8, 8).unwrap().data;
    assert!(hist.highlight_clipping.r && hist.highlight_clipping.g && hist.highlight_clipping.b);
    assert!(!hist.shadow_clipping.any());
    assert_eq!(ctx.histogram().latest(), Some(hist));
}

#[test]
fn test_live_histogram_lands_in_latest() {
    let ctx = mock_context(&MockPlatform::new());
    let rgb = gradient(16, 16);

    let out = ctx.histogram().submit_live(&rgb, 16, 16).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
    match out.data {
        LiveHistogram::Submitted(ticket) => ticket.wait().unwrap(),
        other => panic!("expected a submitted readback, got {other:?}"),
    }
    assert_eq!(ctx.histogram().latest(), Some(compute_histogram(&rgb, 16, 16).unwrap()));
}

#[test]
fn test_live_histogram_without_device_computes_inline() {
    let ctx = ComputeContext::builder()
        .platform(Arc::new(HeadlessPlatform))
        .build();
    let rgb = gradient(4, 4);

    let out = ctx.histogram().submit_live(&rgb, 4, 4).unwrap();
    assert!(matches!(out.data, LiveHistogram::Computed));
    assert_eq!(ctx.histogram().latest().unwrap().pixel_count(), 16);
}

#[test]
fn test_accelerator_failure_falls_back_once() {
    let platform = MockPlatform::new();
    platform.set_mode(MockMode::Fail(ComputeError::OutOfMemory("texture".into())));
    let ctx = mock_context(&platform);
    let rgb = gradient(8, 8);

    let out = ctx.adjustments().apply(&rgb, 8, 8, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Fallback);
    assert_eq!(out.data, apply_adjustments(&rgb, 8, 8, &warm()).unwrap());

    let device = platform.last_accelerator().unwrap();
    assert_eq!(device.calls(OpId::Adjustments), 1);
    let stats = ctx.processor().stats(OpId::Adjustments);
    assert_eq!(stats.accelerated_failures, 1);
    assert_eq!(stats.fallback, 1);
}

#[test]
fn test_accelerator_panic_falls_back() {
    let platform = MockPlatform::new();
    platform.set_mode(MockMode::Panic);
    let ctx = mock_context(&platform);
    let rgb = gradient(8, 8);

    let out = ctx.rotation().apply(&rgb, 8, 8, 30.0).unwrap();
    assert_eq!(out.backend, Backend::Fallback);
    assert_eq!(out.data, rotate(&rgb, 8, 8, 30.0).unwrap());
}

#[test]
fn test_oversized_image_runs_on_cpu() {
    let platform = MockPlatform::new().with_limits(Limits { max_texture_size: 4, ..Default::default() });
    let ctx = mock_context(&platform);
    let rgb = gradient(8, 2);

    let out = ctx.adjustments().apply(&rgb, 8, 2, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Fallback);
    assert_eq!(out.data, apply_adjustments(&rgb, 8, 2, &warm()).unwrap());
}

#[test]
fn test_masks() {
    let ctx = mock_context(&MockPlatform::new());
    let rgb = gradient(20, 10);
    let stack = MaskStack::new(
        vec![LinearMask { adjustments: warm(), ..Default::default() }],
        vec![RadialMask { adjustments: Adjustments { exposure: -1.0, ..Default::default() }, ..Default::default() }],
    )
    .unwrap();

    let out = ctx.masks().apply(&rgb, 20, 10, &stack).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
    assert_eq!(out.data, apply_masks(&rgb, 20, 10, &stack).unwrap());
}

#[test]
fn test_disabled_masks_are_a_copy() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let rgb = gradient(5, 5);
    let stack = MaskStack {
        linear: vec![LinearMask { enabled: false, adjustments: warm(), ..Default::default() }],
        radial: vec![RadialMask { enabled: false, ..Default::default() }],
    };

    let out = ctx.masks().apply(&rgb, 5, 5, &stack).unwrap();
    assert_eq!(out.data, rgb);
    assert_ne!(out.data.as_ptr(), rgb.as_ptr());
    assert_eq!(platform.last_accelerator().unwrap().calls(OpId::Mask), 0);
}

#[test]
fn test_too_many_masks_is_a_validation_error() {
    let ctx = mock_context(&MockPlatform::new());
    let rgb = gradient(4, 4);
    let stack = MaskStack { linear: vec![LinearMask::default(); 9], radial: Vec::new() };

    let err = ctx.masks().apply(&rgb, 4, 4, &stack).unwrap_err();
    assert!(matches!(err, ComputeError::ValidationError(_)));
}

#[test]
fn test_wrong_buffer_size_is_rejected() {
    let ctx = mock_context(&MockPlatform::new());
    let err = ctx.adjustments().apply(&[0u8; 10], 2, 2, &warm()).unwrap_err();
    assert_eq!(err, ComputeError::BufferSizeMismatch { expected: 12, actual: 10 });
}

#[test]
fn test_device_loss_recovers_transparently() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let first = platform.last_accelerator().unwrap();

    platform.lose_device("driver reset");

    assert!(first.is_destroyed());
    assert!(ctx.capabilities().available);
    let rgb = gradient(8, 8);
    let out = ctx.adjustments().apply(&rgb, 8, 8, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
    assert_eq!(first.calls(OpId::Adjustments), 0);
    assert_eq!(platform.last_accelerator().unwrap().calls(OpId::Adjustments), 1);
}

#[test]
fn test_small_images_skip_accelerator() {
    let platform = MockPlatform::new();
    let ctx = ComputeContext::builder()
        .config(ContextConfig { min_accelerated_pixels: 100, ..Default::default() })
        .platform(Arc::new(platform.clone()))
        .build();

    let out = ctx.adjustments().apply(&gradient(4, 4), 4, 4, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Fallback);
    assert_eq!(platform.last_accelerator().unwrap().total_calls(), 0);
}

#[test]
fn test_reset_replaces_device() {
    let platform = MockPlatform::new();
    let mut ctx = mock_context(&platform);
    let first = platform.last_accelerator().unwrap();

    ctx.reset();

    assert!(first.is_destroyed());
    assert!(ctx.capabilities().available);
    assert_eq!(platform.accelerators().len(), 2);
}

#[test]
fn test_drop_destroys_device() {
    let platform = MockPlatform::new();
    let ctx = mock_context(&platform);
    let device = platform.last_accelerator().unwrap();
    drop(ctx);
    assert!(device.is_destroyed());
}

#[test]
fn test_deferred_initialization() {
    let platform = MockPlatform::new();
    let ctx = ComputeContext::builder()
        .platform(Arc::new(platform.clone()))
        .defer_initialization()
        .build();
    assert_eq!(ctx.capability_service().state(), ServiceState::Uninitialized);

    let rgb = gradient(4, 4);
    let out = ctx.adjustments().apply(&rgb, 4, 4, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Fallback);

    let caps = ctx.initialize_background().unwrap().join().unwrap();
    assert!(caps.available);
    let out = ctx.adjustments().apply(&rgb, 4, 4, &warm()).unwrap();
    assert_eq!(out.backend, Backend::Accelerated);
}
