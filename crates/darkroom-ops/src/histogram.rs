//! RGB + luminance histograms with clipping detection.

use rayon::prelude::*;

use crate::error::check_len;
use crate::pixel::{luma, to_unit};
use crate::OpsResult;

/// Number of bins per channel.
pub const HISTOGRAM_BINS: usize = 256;

/// Fraction of pixels in an end bin above which a channel counts as clipped.
pub const CLIP_FRACTION: f64 = 0.001;

/// Rows per parallel work item.
const ROWS_PER_CHUNK: usize = 64;

/// Per-channel boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelFlags {
    /// Red.
    pub r: bool,
    /// Green.
    pub g: bool,
    /// Blue.
    pub b: bool,
}

impl ChannelFlags {
    /// True if any channel is flagged.
    pub fn any(&self) -> bool {
        self.r || self.g || self.b
    }
}

/// Four 256-bin histograms and derived clipping flags.
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram {
    /// Red channel counts.
    pub red: [u32; HISTOGRAM_BINS],
    /// Green channel counts.
    pub green: [u32; HISTOGRAM_BINS],
    /// Blue channel counts.
    pub blue: [u32; HISTOGRAM_BINS],
    /// BT.709 luminance counts.
    pub luminance: [u32; HISTOGRAM_BINS],
    /// Channels whose bin 0 exceeds [`CLIP_FRACTION`] of the pixels.
    pub shadow_clipping: ChannelFlags,
    /// Channels whose bin 255 exceeds [`CLIP_FRACTION`] of the pixels.
    pub highlight_clipping: ChannelFlags,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::from_counts(
            [0; HISTOGRAM_BINS],
            [0; HISTOGRAM_BINS],
            [0; HISTOGRAM_BINS],
            [0; HISTOGRAM_BINS],
        )
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("pixels", &self.pixel_count())
            .field("shadow_clipping", &self.shadow_clipping)
            .field("highlight_clipping", &self.highlight_clipping)
            .finish_non_exhaustive()
    }
}

impl Histogram {
    /// Builds a histogram from raw counts, deriving the clipping flags.
    ///
    /// The pixel count is taken from the luminance channel, which receives
    /// exactly one sample per pixel.
    pub fn from_counts(
        red: [u32; HISTOGRAM_BINS],
        green: [u32; HISTOGRAM_BINS],
        blue: [u32; HISTOGRAM_BINS],
        luminance: [u32; HISTOGRAM_BINS],
    ) -> Self {
        let total: u64 = luminance.iter().map(|&c| c as u64).sum();
        let clipped = |count: u32| total > 0 && count as f64 > total as f64 * CLIP_FRACTION;
        let shadow_clipping = ChannelFlags {
            r: clipped(red[0]),
            g: clipped(green[0]),
            b: clipped(blue[0]),
        };
        let last = HISTOGRAM_BINS - 1;
        let highlight_clipping = ChannelFlags {
            r: clipped(red[last]),
            g: clipped(green[last]),
            b: clipped(blue[last]),
        };
        Self { red, green, blue, luminance, shadow_clipping, highlight_clipping }
    }

    /// Number of pixels counted.
    pub fn pixel_count(&self) -> u64 {
        self.luminance.iter().map(|&c| c as u64).sum()
    }
}

/// Bin index of a unit value: `clamp(floor(v * 255 + 0.5), 0, 255)`.
#[inline]
pub fn bin_index(v: f32) -> usize {
    let b = (v * 255.0 + 0.5).floor();
    if b.is_nan() || b < 0.0 {
        0
    } else if b > 255.0 {
        HISTOGRAM_BINS - 1
    } else {
        b as usize
    }
}

type Counts = [[u32; HISTOGRAM_BINS]; 4];

fn count_rows(rows: &[u8]) -> Box<Counts> {
    let mut counts = Box::new([[0u32; HISTOGRAM_BINS]; 4]);
    for px in rows.chunks_exact(3) {
        let c = [to_unit(px[0]), to_unit(px[1]), to_unit(px[2])];
        counts[0][bin_index(c[0])] += 1;
        counts[1][bin_index(c[1])] += 1;
        counts[2][bin_index(c[2])] += 1;
        counts[3][bin_index(luma(c))] += 1;
    }
    counts
}

/// Computes the histogram of an RGB buffer.
pub fn compute_histogram(rgb: &[u8], width: u32, height: u32) -> OpsResult<Histogram> {
    check_len(rgb, width, height, 3)?;
    let chunk = (width as usize * 3 * ROWS_PER_CHUNK).max(3);

    let counts = rgb.par_chunks(chunk)
        .map(count_rows)
        .reduce(
            || Box::new([[0u32; HISTOGRAM_BINS]; 4]),
            |mut a, b| {
                for (ca, cb) in a.iter_mut().zip(b.iter()) {
                    for (x, y) in ca.iter_mut().zip(cb.iter()) {
                        *x += y;
                    }
                }
                a
            },
        );

    let [red, green, blue, luminance] = *counts;
    Ok(Histogram::from_counts(red, green, blue, luminance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        rgb.repeat((w * h) as usize)
    }

    #[test]
    fn test_bin_rounds_half_up() {
        assert_eq!(bin_index(0.0), 0);
        assert_eq!(bin_index(1.0), 255);
        assert_eq!(bin_index(0.6 / 255.0), 1);
        assert_eq!(bin_index(0.4 / 255.0), 0);
        assert_eq!(bin_index(-3.0), 0);
        assert_eq!(bin_index(7.0), 255);
        assert_eq!(bin_index(f32::NAN), 0);
    }

    #[test]
    fn test_byte_levels_land_in_own_bin() {
        for v in 0..=255u8 {
            assert_eq!(bin_index(to_unit(v)), v as usize);
        }
    }

    #[test]
    fn test_black_image_clips_shadows() {
        let h = compute_histogram(&solid(8, 8, [0, 0, 0]), 8, 8).unwrap();
        assert_eq!(h.red[0], 64);
        assert_eq!(h.luminance[0], 64);
        assert_eq!(h.shadow_clipping, ChannelFlags { r: true, g: true, b: true });
        assert_eq!(h.highlight_clipping, ChannelFlags::default());
    }

    #[test]
    fn test_white_image_clips_highlights() {
        let h = compute_histogram(&solid(8, 8, [255, 255, 255]), 8, 8).unwrap();
        assert_eq!(h.blue[255], 64);
        assert_eq!(h.luminance[255], 64);
        assert_eq!(h.shadow_clipping, ChannelFlags::default());
        assert_eq!(h.highlight_clipping, ChannelFlags { r: true, g: true, b: true });
    }

    #[test]
    fn test_clip_threshold_is_strict() {
        // 1 of 1000 pixels is exactly the threshold, not above it.
        let mut red = [0u32; HISTOGRAM_BINS];
        red[0] = 1;
        red[128] = 999;
        let mut lum = [0u32; HISTOGRAM_BINS];
        lum[128] = 1000;
        let h = Histogram::from_counts(red, [0; 256], [0; 256], lum);
        assert!(!h.shadow_clipping.r);

        red[0] = 2;
        let h = Histogram::from_counts(red, [0; 256], [0; 256], lum);
        assert!(h.shadow_clipping.r);
    }

    #[test]
    fn test_counts_span_chunks() {
        let w = 7;
        let h = ROWS_PER_CHUNK as u32 * 2 + 5;
        let hist = compute_histogram(&solid(w, h, [10, 20, 30]), w, h).unwrap();
        assert_eq!(hist.pixel_count(), (w * h) as u64);
        assert_eq!(hist.green[20], w * h);
    }

    #[test]
    fn test_empty_image() {
        let h = compute_histogram(&[], 0, 0).unwrap();
        assert_eq!(h.pixel_count(), 0);
        assert!(!h.shadow_clipping.any());
    }
}
