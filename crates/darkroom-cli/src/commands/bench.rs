//! Edit-recipe benchmark on a synthetic image.
//!
//! A recipe lists the edit steps of one photo. Every step present runs
//! `--iterations` times through the compute context; the table reports which
//! backend answered and the mean time per call.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use darkroom_compute::{Backend, ComputeContext, ComputeResult, ProcessingResult};
use darkroom_ops::{Adjustments, CurvePoint, LinearMask, MaskStack, RadialMask};
use serde::Deserialize;

use crate::BenchArgs;

/// Edit steps of one photo, applied in field order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Recipe {
    pub adjustments: Adjustments,
    pub curve: Vec<CurvePoint>,
    pub masks: MaskStack,
    /// Degrees.
    pub rotation: f32,
    /// Run adjustments and curve as one fused pass.
    pub fused: bool,
}

impl Recipe {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let recipe: Self = serde_yaml::from_str(text)?;
        recipe.masks.validate()?;
        Ok(recipe)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid recipe: {}", path.display()))
    }

    /// A typical landscape edit touching every operation.
    pub fn representative() -> Self {
        Self {
            adjustments: Adjustments {
                exposure: 0.3,
                contrast: 0.15,
                highlights: -0.4,
                shadows: 0.3,
                vibrance: 0.2,
                ..Default::default()
            },
            curve: vec![
                CurvePoint::new(0.0, 0.0),
                CurvePoint::new(0.25, 0.2),
                CurvePoint::new(0.75, 0.8),
                CurvePoint::new(1.0, 1.0),
            ],
            masks: MaskStack {
                linear: vec![LinearMask {
                    start: [0.5, 0.0],
                    end: [0.5, 0.45],
                    adjustments: Adjustments { exposure: -0.7, ..Default::default() },
                    ..Default::default()
                }],
                radial: vec![RadialMask {
                    adjustments: Adjustments { brightness: 0.1, ..Default::default() },
                    ..Default::default()
                }],
            },
            rotation: 1.5,
            fused: false,
        }
    }
}

/// Horizontal RGB ramp with a vertical blue ramp.
pub fn synthetic_image(width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        let b = (y * 255 / height.saturating_sub(1).max(1)) as u8;
        for x in 0..width {
            let v = (x * 255 / width.saturating_sub(1).max(1)) as u8;
            rgb.extend_from_slice(&[v, 255 - v, b]);
        }
    }
    rgb
}

struct StepTiming {
    name: &'static str,
    backend: Backend,
    avg_ms: f64,
}

fn time_step<T>(
    name: &'static str,
    iterations: u32,
    mut f: impl FnMut() -> ComputeResult<ProcessingResult<T>>,
) -> Result<(StepTiming, T)> {
    let mut total = 0.0;
    let mut last = None;
    for _ in 0..iterations.max(1) {
        let out = f().with_context(|| format!("{name} failed"))?;
        total += out.timing_ms;
        last = Some(out);
    }
    let out = last.context("no iterations ran")?;
    let timing = StepTiming { name, backend: out.backend, avg_ms: total / iterations.max(1) as f64 };
    Ok((timing, out.data))
}

pub fn run(args: BenchArgs, verbose: bool) -> Result<()> {
    let recipe = match &args.recipe {
        Some(path) => Recipe::load(path)?,
        None => Recipe::representative(),
    };
    let (w, h) = (args.width, args.height);
    let ctx = super::build_context(args.cpu);
    let caps = ctx.capabilities();

    println!("Benchmark {}x{}, {} iterations, backend {}", w, h, args.iterations, caps.backend);
    if let Some(adapter) = &caps.adapter_info {
        println!("  Adapter: {} ({})", adapter.name, adapter.api);
    }

    let (timings, image) = run_recipe(&ctx, &recipe, synthetic_image(w, h), w, h, args.iterations)?;

    println!();
    println!("  {:<12} {:<12} {:>10}", "step", "backend", "avg ms");
    for t in &timings {
        println!("  {:<12} {:<12} {:>10.3}", t.name, t.backend, t.avg_ms);
    }

    let hist = ctx.histogram().compute(&image, w, h).context("histogram failed")?;
    let d = hist.data;
    println!();
    println!("  Histogram ({}, {:.3} ms)", hist.backend, hist.timing_ms);
    println!("    Shadow clipping:    r={} g={} b={}", d.shadow_clipping.r, d.shadow_clipping.g, d.shadow_clipping.b);
    println!(
        "    Highlight clipping: r={} g={} b={}",
        d.highlight_clipping.r, d.highlight_clipping.g, d.highlight_clipping.b
    );

    if verbose {
        println!();
        for op in darkroom_compute::OpId::ALL {
            let s = ctx.processor().stats(op);
            if s.calls > 0 {
                println!(
                    "  {:<12} calls={} accelerated={} fallback={} failures={} fast={}",
                    op.name(),
                    s.calls,
                    s.accelerated,
                    s.fallback,
                    s.accelerated_failures,
                    s.fast_path
                );
            }
        }
    }
    Ok(())
}

fn run_recipe(
    ctx: &ComputeContext,
    recipe: &Recipe,
    mut image: Vec<u8>,
    w: u32,
    h: u32,
    iterations: u32,
) -> Result<(Vec<StepTiming>, Vec<u8>)> {
    let mut timings = Vec::new();

    if recipe.fused {
        let (t, out) = time_step("uber", iterations, || {
            ctx.uber().apply(&image, w, h, &recipe.adjustments, &recipe.curve)
        })?;
        timings.push(t);
        image = out;
    } else {
        let (t, out) = time_step("adjustments", iterations, || {
            ctx.adjustments().apply(&image, w, h, &recipe.adjustments)
        })?;
        timings.push(t);
        image = out;

        let (t, out) = time_step("tone_curve", iterations, || ctx.tone_curve().apply(&image, w, h, &recipe.curve))?;
        timings.push(t);
        image = out;
    }

    let (t, out) = time_step("masks", iterations, || ctx.masks().apply(&image, w, h, &recipe.masks))?;
    timings.push(t);
    image = out;

    let (t, out) = time_step("rotation", iterations, || ctx.rotation().apply(&image, w, h, recipe.rotation))?;
    timings.push(t);

    Ok((timings, out))
}
