use std::fmt;

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha256;

use crate::memory::{SecureBuffer, Sensitive};
use crate::types::{RegionError, Result, KEY_LEN, PBKDF2_ITERATIONS, SALT_LEN};

type HmacSha256 = Hmac<Sha256>;

/// A derived AES-256 key held in a wiped-on-drop, lock-requested buffer
pub struct DerivedKey {
    buf: SecureBuffer,
}

impl DerivedKey {
    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

// Prevent accidentally printing key material
impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED; {}])", KEY_LEN)
    }
}

/// Derive the blob key from `secret` and the blob's salt using
/// PBKDF2-HMAC-SHA256 with the fixed blob iteration count.
///
/// Deterministic. Neither input is retained; wiping `secret` is the caller's job.
pub fn derive_key(secret: &[u8], salt: &[u8; SALT_LEN]) -> Result<DerivedKey> {
    derive_key_with(secret, salt, PBKDF2_ITERATIONS, true)
}

/// Same as [`derive_key`] with an explicit round count and locking choice.
///
/// Only the default round count opens existing blobs.
pub fn derive_key_with(
    secret: &[u8],
    salt: &[u8],
    iterations: u32,
    lock: bool,
) -> Result<DerivedKey> {
    if iterations == 0 {
        return Err(RegionError::KeyDerivation);
    }

    // Derive straight into the protected buffer so no unwiped copy exists
    let mut buf = SecureBuffer::new(KEY_LEN, Sensitive::Key, lock)?;
    pbkdf2::<HmacSha256>(secret, salt, iterations, buf.as_mut_slice())
        .map_err(|_| RegionError::KeyDerivation)?;

    Ok(DerivedKey { buf })
}
