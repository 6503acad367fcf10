//! WGSL sources for the compute pipelines.
//!
//! Each pipeline module assembles its kernel from a variant preamble
//! (see [`crate::pipeline::preamble`]), [`COMMON`] and its own body. The
//! formulas mirror `darkroom-ops` step for step; host-side values such as
//! the exposure gain and mask sin/cos are computed once on the CPU and
//! uploaded so both backends start from identical numbers.

/// Shared helpers. Expects `real` to be aliased to `f32` or `f16`.
pub const COMMON: &str = r#"
struct Adjust {
    a: vec4<f32>, // gain, brightness, contrast, highlights
    b: vec4<f32>, // shadows, temperature, tint, saturation
    c: vec4<f32>, // vibrance
}

const LUMA: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);
const WHITE_BALANCE_SCALE: f32 = 0.1;
const TONE_RANGE_SCALE: f32 = 0.25;
const MIN_STRENGTH: f32 = 1e-4;
const EDGE_EPSILON: f32 = 1.1920929e-7;

fn luma(c: vec3<real>) -> real {
    return real(LUMA.x) * c.x + real(LUMA.y) * c.y + real(LUMA.z) * c.z;
}

fn smootherstep(e0: real, e1: real, x: real) -> real {
    if (e1 - e0 <= real(EDGE_EPSILON)) {
        return select(real(1.0), real(0.0), x < e0);
    }
    let t = clamp((x - e0) / (e1 - e0), real(0.0), real(1.0));
    return t * t * t * (t * (t * real(6.0) - real(15.0)) + real(10.0));
}

// Round-half-up to the nearest byte level.
fn quantize(c: vec3<f32>) -> vec3<f32> {
    return floor(clamp(c, vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0 + 0.5) / 255.0;
}

fn level(v: f32) -> u32 {
    return u32(clamp(floor(v * 255.0 + 0.5), 0.0, 255.0));
}

fn adjust(rgb: vec3<f32>, p: Adjust) -> vec3<f32> {
    var c = vec3<real>(rgb) * real(p.a.x) + vec3<real>(real(p.a.y * 0.5));

    let warm = real(p.b.y * WHITE_BALANCE_SCALE);
    let tint = real(p.b.z * WHITE_BALANCE_SCALE);
    c.x = c.x + warm;
    c.z = c.z - warm;
    c.y = c.y - tint;

    c = (c - vec3<real>(real(0.5))) * real(1.0 + p.a.z) + vec3<real>(real(0.5));

    let l = luma(c);
    let lift = real(p.b.x) * (real(1.0) - smootherstep(real(0.0), real(0.5), l)) * real(TONE_RANGE_SCALE)
        + real(p.a.w) * smootherstep(real(0.5), real(1.0), l) * real(TONE_RANGE_SCALE);
    c = c + vec3<real>(lift);

    let grey = luma(c);
    c = vec3<real>(grey) + (c - vec3<real>(grey)) * real(1.0 + p.b.w);

    let hi = max(max(c.x, c.y), c.z);
    let lo = min(min(c.x, c.y), c.z);
    let amount = real(p.c.x) * (real(1.0) - clamp(hi - lo, real(0.0), real(1.0)));
    let grey2 = luma(c);
    c = vec3<real>(grey2) + (c - vec3<real>(grey2)) * (real(1.0) + amount);
    return vec3<f32>(c);
}
"#;

/// Global adjustments.
pub const ADJUSTMENTS: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: Adjust;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(src);
    if (id.x >= dims.x || id.y >= dims.y) { return; }
    let coord = vec2<i32>(id.xy);
    let texel = textureLoad(src, coord, 0);
    textureStore(dst, coord, vec4<f32>(quantize(adjust(texel.rgb, params)), 1.0));
}
"#;

/// 256-entry tone curve.
pub const TONE_CURVE: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<storage, read> lut: array<u32, 256>;

fn tone(c: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(f32(lut[level(c.x)]), f32(lut[level(c.y)]), f32(lut[level(c.z)])) / 255.0;
}

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(src);
    if (id.x >= dims.x || id.y >= dims.y) { return; }
    let coord = vec2<i32>(id.xy);
    let texel = textureLoad(src, coord, 0);
    textureStore(dst, coord, vec4<f32>(tone(texel.rgb), 1.0));
}
"#;

/// Adjustments followed by the tone curve in one pass. Stage switches
/// (`APPLY_ADJUSTMENTS`, `APPLY_TONE_CURVE`) come from the preamble.
pub const UBER: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: Adjust;
@group(0) @binding(3) var<storage, read> lut: array<u32, 256>;

fn tone(c: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(f32(lut[level(c.x)]), f32(lut[level(c.y)]), f32(lut[level(c.z)])) / 255.0;
}

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(src);
    if (id.x >= dims.x || id.y >= dims.y) { return; }
    let coord = vec2<i32>(id.xy);
    var c = textureLoad(src, coord, 0).rgb;
    if (APPLY_ADJUSTMENTS) {
        c = quantize(adjust(c, params));
    }
    if (APPLY_TONE_CURVE) {
        c = tone(c);
    }
    textureStore(dst, coord, vec4<f32>(quantize(c), 1.0));
}
"#;

/// Linear and radial masks blended in order.
pub const MASK: &str = r#"
struct MaskParams {
    counts: vec4<u32>, // linear, radial
}

struct LinearMask {
    mid_dir: vec4<f32>, // mid.xy, dir.xy
    shape: vec4<f32>,   // length, half width, invert
    adjust: Adjust,
}

struct RadialMask {
    center_radius: vec4<f32>, // center.xy, radius.xy
    shape: vec4<f32>,         // sin, cos, feather, invert
    adjust: Adjust,
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: MaskParams;
@group(0) @binding(3) var<storage, read> linear_masks: array<LinearMask>;
@group(0) @binding(4) var<storage, read> radial_masks: array<RadialMask>;

fn linear_strength(m: LinearMask, p: vec2<f32>) -> f32 {
    let len = m.shape.x;
    if (len < 1e-6) { return 0.0; }
    let q = p - m.mid_dir.xy;
    let t = (q.x * m.mid_dir.z + q.y * m.mid_dir.w) / len;
    let hw = m.shape.y;
    let s = 1.0 - smootherstep(-hw, hw, t);
    return select(s, 1.0 - s, m.shape.z > 0.5);
}

fn radial_strength(m: RadialMask, p: vec2<f32>) -> f32 {
    let r = m.center_radius.zw;
    if (r.x < 1e-6 || r.y < 1e-6) { return 0.0; }
    let q = p - m.center_radius.xy;
    let sn = m.shape.x;
    let cs = m.shape.y;
    let uv = vec2<f32>(q.x * cs + q.y * sn, q.y * cs - q.x * sn) / r;
    let dist = sqrt(uv.x * uv.x + uv.y * uv.y);
    let s = 1.0 - smootherstep(1.0 - m.shape.z, 1.0, dist);
    return select(s, 1.0 - s, m.shape.w > 0.5);
}

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(src);
    if (id.x >= dims.x || id.y >= dims.y) { return; }
    let coord = vec2<i32>(id.xy);
    let p = vec2<f32>(f32(id.x) + 0.5, f32(id.y) + 0.5);
    var c = textureLoad(src, coord, 0).rgb;

    for (var i = 0u; i < params.counts.x; i = i + 1u) {
        let m = linear_masks[i];
        let s = linear_strength(m, p);
        if (s >= MIN_STRENGTH) {
            c = c * (1.0 - s) + adjust(c, m.adjust) * s;
        }
    }
    for (var i = 0u; i < params.counts.y; i = i + 1u) {
        let m = radial_masks[i];
        let s = radial_strength(m, p);
        if (s >= MIN_STRENGTH) {
            c = c * (1.0 - s) + adjust(c, m.adjust) * s;
        }
    }
    textureStore(dst, coord, vec4<f32>(quantize(c), 1.0));
}
"#;

/// Same-size rotation with bilinear sampling; outside samples are black.
pub const ROTATION: &str = r#"
struct RotateParams {
    center: vec2<f32>,
    sin_cos: vec2<f32>,
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: RotateParams;

fn fetch(x: i32, y: i32, dims: vec2<i32>) -> vec3<f32> {
    if (x < 0 || y < 0 || x >= dims.x || y >= dims.y) {
        return vec3<f32>(0.0);
    }
    return textureLoad(src, vec2<i32>(x, y), 0).rgb;
}

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let udims = textureDimensions(src);
    if (id.x >= udims.x || id.y >= udims.y) { return; }
    let dims = vec2<i32>(udims);

    let p = vec2<f32>(f32(id.x) + 0.5, f32(id.y) + 0.5);
    let q = p - params.center;
    let sn = params.sin_cos.x;
    let cs = params.sin_cos.y;
    let pos = params.center + vec2<f32>(q.x * cs + q.y * sn, q.y * cs - q.x * sn);

    let sp = pos - vec2<f32>(0.5);
    let x0 = floor(sp.x);
    let y0 = floor(sp.y);
    let fx = sp.x - x0;
    let fy = sp.y - y0;
    let ix = i32(x0);
    let iy = i32(y0);

    let c00 = fetch(ix, iy, dims);
    let c10 = fetch(ix + 1, iy, dims);
    let c01 = fetch(ix, iy + 1, dims);
    let c11 = fetch(ix + 1, iy + 1, dims);
    let top = c00 + (c10 - c00) * fx;
    let bottom = c01 + (c11 - c01) * fx;
    let c = top + (bottom - top) * fy;

    textureStore(dst, vec2<i32>(id.xy), vec4<f32>(quantize(c), 1.0));
}
"#;

/// Histogram bins and the workgroup-local accumulation shared by both
/// histogram variants. Bins: R 0..256, G 256..512, B 512..768, luma 768..1024.
pub const HISTOGRAM_HEAD: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var<storage, read_write> bins: array<atomic<u32>, 1024>;

var<workgroup> local_bins: array<atomic<u32>, 1024>;
"#;

/// Plain atomics into workgroup-private bins.
pub const HISTOGRAM_TALLY_ATOMIC: &str = r#"
fn tally(base: u32, idx: u32, valid: bool) {
    if (valid) {
        atomicAdd(&local_bins[base + idx], 1u);
    }
}
"#;

/// Lanes agreeing with the first lane are summed with one atomic.
pub const HISTOGRAM_TALLY_SUBGROUP: &str = r#"
fn tally(base: u32, idx: u32, valid: bool) {
    let first = subgroupBroadcastFirst(idx);
    let same = valid && idx == first;
    let n = subgroupAdd(select(0u, 1u, same));
    if (subgroupElect() && n > 0u) {
        atomicAdd(&local_bins[base + first], n);
    }
    if (valid && !same) {
        atomicAdd(&local_bins[base + idx], 1u);
    }
}
"#;

pub const HISTOGRAM_MAIN: &str = r#"
@compute @workgroup_size(16, 16)
fn main(
    @builtin(global_invocation_id) id: vec3<u32>,
    @builtin(local_invocation_index) li: u32,
) {
    for (var k = 0u; k < 4u; k = k + 1u) {
        atomicStore(&local_bins[li + k * 256u], 0u);
    }
    workgroupBarrier();

    let dims = textureDimensions(src);
    let valid = id.x < dims.x && id.y < dims.y;
    let coord = vec2<i32>(min(id.xy, dims - vec2<u32>(1u)));
    let c = textureLoad(src, coord, 0).rgb;
    tally(0u, level(c.r), valid);
    tally(256u, level(c.g), valid);
    tally(512u, level(c.b), valid);
    tally(768u, level(luma(c)), valid);
    workgroupBarrier();

    for (var k = 0u; k < 4u; k = k + 1u) {
        let i = li + k * 256u;
        let n = atomicLoad(&local_bins[i]);
        if (n > 0u) {
            atomicAdd(&bins[i], n);
        }
    }
}
"#;
