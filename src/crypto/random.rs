// SKDP Random Number Generation
// Cryptographically secure entropy acquisition.

use crate::error::{SkdpError, SkdpResult};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Fills the buffer with cryptographically strong random bytes from the
/// operating system.
pub fn fill_random(buffer: &mut [u8]) -> SkdpResult<()> {
    fill_from(&mut OsRng, buffer)
}

/// Fills the buffer from the supplied generator, mapping a generator
/// failure to [`SkdpError::RandomFailure`].
///
/// The key exchange state machines draw all their randomness through this
/// so tests can substitute a deterministic generator.
pub fn fill_from<R: RngCore + CryptoRng>(rng: &mut R, buffer: &mut [u8]) -> SkdpResult<()> {
    rng.try_fill_bytes(buffer)
        .map_err(|_| SkdpError::RandomFailure)
}

/// Returns `len` random bytes from the operating system.
pub fn random_bytes(len: usize) -> SkdpResult<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes)?;
    Ok(bytes)
}
