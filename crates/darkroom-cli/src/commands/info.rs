//! Accelerator capability report.

use anyhow::Result;
use darkroom_compute::{Capabilities, ComputeContext};
use serde::Serialize;

use crate::InfoArgs;

#[derive(Serialize)]
struct Report {
    state: String,
    available: bool,
    backend: String,
    platform: &'static str,
    generation: u64,
    adapter: Option<AdapterReport>,
    is_fallback_adapter: bool,
    limits: LimitsReport,
    features: FeaturesReport,
}

#[derive(Serialize)]
struct AdapterReport {
    name: String,
    vendor: u32,
    device_type: &'static str,
    api: String,
}

#[derive(Serialize)]
struct LimitsReport {
    max_texture_size: u32,
    max_buffer_size: u64,
    max_workgroup_size: u32,
    max_workgroups_per_dim: u32,
}

#[derive(Serialize)]
struct FeaturesReport {
    f16: bool,
    subgroups: bool,
    float32_filter: bool,
    timestamp_query: bool,
}

impl Report {
    fn new(ctx: &ComputeContext) -> Self {
        let svc = ctx.capability_service();
        let Capabilities { available, backend, limits, features, adapter_info, is_fallback_adapter } =
            ctx.capabilities();
        Self {
            state: svc.state().to_string(),
            available,
            backend: backend.to_string(),
            platform: svc.platform_name(),
            generation: svc.generation(),
            adapter: adapter_info.map(|a| AdapterReport {
                name: a.name,
                vendor: a.vendor,
                device_type: a.device_type.name(),
                api: a.api,
            }),
            is_fallback_adapter,
            limits: LimitsReport {
                max_texture_size: limits.max_texture_size,
                max_buffer_size: limits.max_buffer_size,
                max_workgroup_size: limits.max_workgroup_size,
                max_workgroups_per_dim: limits.max_workgroups_per_dim,
            },
            features: FeaturesReport {
                f16: features.f16,
                subgroups: features.subgroups,
                float32_filter: features.float32_filter,
                timestamp_query: features.timestamp_query,
            },
        }
    }
}

/// Probes the accelerator and prints what it offers.
pub fn run(args: InfoArgs, verbose: bool) -> Result<()> {
    let ctx = super::build_context(args.cpu);
    let report = Report::new(&ctx);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report, verbose);
    }
    Ok(())
}

fn print_text(report: &Report, verbose: bool) {
    println!("Compute backend: {}", report.backend);
    println!("  State:      {}", report.state);
    println!("  Platform:   {}", report.platform);
    match &report.adapter {
        Some(adapter) => {
            println!("  Adapter:    {} ({}, {})", adapter.name, adapter.device_type, adapter.api);
            if report.is_fallback_adapter {
                println!("              software adapter, rejected");
            }
        }
        None => println!("  Adapter:    none"),
    }

    if !report.available {
        return;
    }

    let l = &report.limits;
    println!("  Max texture: {}px", l.max_texture_size);
    println!("  Max buffer:  {} MB", l.max_buffer_size >> 20);

    let f = &report.features;
    let enabled: Vec<&str> = [
        (f.f16, "f16"),
        (f.subgroups, "subgroups"),
        (f.float32_filter, "float32-filter"),
        (f.timestamp_query, "timestamps"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    println!("  Features:   {}", if enabled.is_empty() { "none".to_string() } else { enabled.join(", ") });

    if verbose {
        println!("  Workgroup:  {} invocations, {} per dim", l.max_workgroup_size, l.max_workgroups_per_dim);
        if let Some(adapter) = &report.adapter {
            println!("  Vendor:     {:#06x}", adapter.vendor);
        }
        println!("  Generation: {}", report.generation);
    }
}
