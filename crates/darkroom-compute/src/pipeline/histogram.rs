//! Histogram kernel.
//!
//! Workgroups accumulate into private bins and merge them with one atomic
//! per non-empty bin. With subgroup support, lanes landing in the same bin
//! are summed first. Both variants produce identical counts.

use darkroom_ops::{Histogram, HISTOGRAM_BINS};

use super::{preamble, BindingKind, VariantFlags};
use crate::{shaders, ComputeError, ComputeResult};

pub const BINDINGS: &[BindingKind] = &[BindingKind::InputTexture, BindingKind::StorageReadWrite];

/// Total bins across R, G, B and luminance.
pub const TOTAL_BINS: usize = HISTOGRAM_BINS * 4;

/// Size of the bins buffer in bytes.
pub const BINS_BYTES: u64 = (TOTAL_BINS * 4) as u64;

/// Kernel source for a variant.
pub fn source(flags: VariantFlags) -> String {
    let tally = if flags.contains(VariantFlags::SUBGROUPS) {
        shaders::HISTOGRAM_TALLY_SUBGROUP
    } else {
        shaders::HISTOGRAM_TALLY_ATOMIC
    };
    format!(
        "{}{}{}{}{}",
        preamble(VariantFlags::empty()),
        shaders::COMMON,
        shaders::HISTOGRAM_HEAD,
        tally,
        shaders::HISTOGRAM_MAIN,
    )
}

/// Decodes a read-back bins buffer.
pub fn parse_bins(bytes: &[u8]) -> ComputeResult<Histogram> {
    if bytes.len() < BINS_BYTES as usize {
        return Err(ComputeError::BufferSizeMismatch {
            expected: BINS_BYTES as usize,
            actual: bytes.len(),
        });
    }
    let mut channels = [[0u32; HISTOGRAM_BINS]; 4];
    for (i, word) in bytes[..BINS_BYTES as usize].chunks_exact(4).enumerate() {
        channels[i / HISTOGRAM_BINS][i % HISTOGRAM_BINS] =
            u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let [red, green, blue, luminance] = channels;
    Ok(Histogram::from_counts(red, green, blue, luminance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bins() {
        let mut words = vec![0u32; TOTAL_BINS];
        words[0] = 5; // red 0
        words[256 + 255] = 7; // green 255
        words[768 + 10] = 12; // luma 10
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let h = parse_bins(&bytes).unwrap();
        assert_eq!(h.red[0], 5);
        assert_eq!(h.green[255], 7);
        assert_eq!(h.luminance[10], 12);
        assert_eq!(h.pixel_count(), 12);
    }

    #[test]
    fn test_parse_short_buffer() {
        assert!(matches!(
            parse_bins(&[0u8; 16]),
            Err(ComputeError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_variants_differ_only_in_tally() {
        let base = source(VariantFlags::empty());
        let sub = source(VariantFlags::SUBGROUPS);
        assert!(!base.contains("subgroupAdd"));
        assert!(sub.contains("subgroupAdd"));
        assert!(base.contains("var<workgroup> local_bins"));
    }
}
