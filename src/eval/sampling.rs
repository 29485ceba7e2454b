//! Random selection of evaluation questions.

use crate::error::{RagEvalError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pick `sample_size` distinct indices from `0..total`, uniformly at random.
///
/// Requires `1 <= sample_size <= total`.
pub fn sample_indices<R: Rng + ?Sized>(
    total: usize,
    sample_size: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if sample_size == 0 || sample_size > total {
        return Err(RagEvalError::InvalidArgument(format!(
            "sample size must be between 1 and {}, got {}",
            total, sample_size
        )));
    }
    Ok(rand::seq::index::sample(rng, total, sample_size).into_vec())
}

/// Seeded generator when a seed is given, OS entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
