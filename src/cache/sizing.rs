//! Context-window sizing for new caches.
//!
//! llama.cpp allocates context memory in fixed-size pages, so every window
//! handed to the create script is a multiple of [`CONTEXT_QUANTUM`].

use crate::error::{CagError, Result};

/// Headroom added on top of the document estimate for the prompt scaffolding
/// and the generated answer.
pub const CONTEXT_PADDING: u64 = 1000;

/// Smallest window worth building a cache for.
pub const MIN_CONTEXT: usize = 2048;

/// Allocation granularity of the inference engine, in tokens.
pub const CONTEXT_QUANTUM: usize = 256;

/// Compute the context window for a document of `estimated_tokens` tokens.
///
/// The padded estimate is clamped into `[MIN_CONTEXT, max_context]` and rounded
/// up to the next multiple of [`CONTEXT_QUANTUM`]. An unaligned `max_context` is
/// first rounded down so the result never exceeds it.
pub fn compute_context_size(estimated_tokens: i64, max_context: usize) -> Result<usize> {
    if estimated_tokens < 0 {
        return Err(CagError::InvalidSize(format!(
            "estimated tokens must be non-negative, got {estimated_tokens}"
        )));
    }
    if max_context < MIN_CONTEXT {
        return Err(CagError::InvalidSize(format!(
            "max context must be at least {MIN_CONTEXT}, got {max_context}"
        )));
    }

    let ceiling = align_down(max_context) as u64;
    let padded = (estimated_tokens as u64).saturating_add(CONTEXT_PADDING);
    let clamped = padded.clamp(MIN_CONTEXT as u64, ceiling) as usize;

    Ok(align_up(clamped))
}

fn align_up(tokens: usize) -> usize {
    tokens.div_ceil(CONTEXT_QUANTUM) * CONTEXT_QUANTUM
}

fn align_down(tokens: usize) -> usize {
    tokens / CONTEXT_QUANTUM * CONTEXT_QUANTUM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(compute_context_size(0, 128_000).unwrap(), 2048);
        // 5000 + 1000 = 6000 -> 6144
        assert_eq!(compute_context_size(5000, 128_000).unwrap(), 6144);
        assert_eq!(compute_context_size(200_000, 128_000).unwrap(), 128_000);
    }

    #[test]
    fn test_exact_multiple_is_not_bumped() {
        // 3096 + 1000 = 4096
        assert_eq!(compute_context_size(3096, 128_000).unwrap(), 4096);
    }

    #[test]
    fn test_unaligned_ceiling() {
        assert_eq!(compute_context_size(10_000, 10_100).unwrap(), 9984);
        assert_eq!(compute_context_size(0, 2100).unwrap(), 2048);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(
            compute_context_size(-1, 128_000),
            Err(CagError::InvalidSize(_))
        ));
        assert!(matches!(
            compute_context_size(100, 2047),
            Err(CagError::InvalidSize(_))
        ));
    }

    #[test]
    fn test_huge_estimate_saturates() {
        assert_eq!(compute_context_size(i64::MAX, 8192).unwrap(), 8192);
    }

    #[test]
    fn test_sizing_properties() {
        let ceilings = [2048usize, 2049, 4000, 8192, 32_768, 100_001, 128_000];
        for &max_context in &ceilings {
            for estimated in (0..140_000i64).step_by(97) {
                let size = compute_context_size(estimated, max_context).unwrap();
                assert_eq!(size % CONTEXT_QUANTUM, 0, "{estimated}/{max_context}");
                assert!(size >= MIN_CONTEXT);
                assert!(size <= max_context);

                let wanted = align_up(estimated as usize + CONTEXT_PADDING as usize);
                assert!(size >= wanted.min(align_down(max_context)));

                // Deterministic.
                assert_eq!(size, compute_context_size(estimated, max_context).unwrap());
            }
        }
    }
}
