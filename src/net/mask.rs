//! Client-to-server payload masking.

use ring::rand::{self, SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// XORs `buf` in place with `key[i % 4]`. Applying it twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk[0] ^= key[0];
        chunk[1] ^= key[1];
        chunk[2] ^= key[2];
        chunk[3] ^= key[3];
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

/// Fresh masking key from the OS RNG.
pub fn generate_mask() -> Result<u32> {
    let bytes: [u8; 4] = rand::generate(&SystemRandom::new())
        .map_err(|_| Error::InvalidInput("system RNG unavailable"))?
        .expose();
    Ok(u32::from_be_bytes(bytes))
}

/// `len` random bytes from the OS RNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut out)
        .map_err(|_| Error::InvalidInput("system RNG unavailable"))?;
    Ok(out)
}
