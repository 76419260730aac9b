use rand::Rng;

use super::types::{IdKind, RelayError};

/// Upper bound on draws before an allocation gives up
pub const MAX_ID_ATTEMPTS: usize = 100;

/// Draw a random id that `is_taken` rejects, retrying up to
/// [`MAX_ID_ATTEMPTS`] times.
///
/// `is_taken` must test membership in the pool the id is being allocated
/// into; participant and room ids are independent pools.
pub fn allocate<I, R, F>(rng: &mut R, kind: IdKind, mut is_taken: F) -> Result<I, RelayError>
where
    I: From<u32>,
    R: Rng + ?Sized,
    F: FnMut(&I) -> bool,
{
    for _ in 0..MAX_ID_ATTEMPTS {
        let candidate = I::from(rng.random::<u32>());
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(RelayError::ExhaustedIdSpace(kind))
}
