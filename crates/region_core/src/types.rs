use std::fmt;

use serde::Serialize;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt length at the start of every blob
pub const SALT_LEN: usize = 16;

/// Initialization vector length, directly after the salt
pub const IV_LEN: usize = 16;

/// Bytes preceding the ciphertext in a blob
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN;

/// Derived AES-256 key length
pub const KEY_LEN: usize = 32;

/// AES block size; ciphertext is always a whole number of blocks
pub const BLOCK_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 rounds used by every existing blob
pub const PBKDF2_ITERATIONS: u32 = 65_536;

/// Default number of registry slots
pub const DEFAULT_REGISTRY_CAPACITY: usize = 256;

/// Default upper bound on a region's `length`
pub const DEFAULT_MAX_REGION_LEN: u64 = 256 * 1024 * 1024;

/// Errors surfaced by the region vault.
///
/// Messages never carry secret, key or plaintext bytes.
#[derive(Debug, Error)]
pub enum RegionError {
    /// Bad arguments, rejected before any I/O
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Seek or read failure, including a short read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The PBKDF2 primitive refused the request
    #[error("key derivation failed")]
    KeyDerivation,

    /// Block or padding validation failed (also what a wrong key usually looks like)
    #[error("decryption failed")]
    Decryption,

    /// Every registry slot is in use
    #[error("allocation registry exhausted ({capacity} buffers outstanding)")]
    RegistryExhausted {
        /// Configured slot count
        capacity: usize,
    },

    /// Release of an address the registry does not track
    #[error("unknown or already released handle")]
    UnknownHandle,

    /// The allocator could not provide a buffer
    #[error("failed to allocate {requested} bytes")]
    Allocation {
        /// Bytes that were requested
        requested: usize,
    },

    /// A configuration value was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fieldless classification of [`RegionError`], for callers that branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`RegionError::InvalidInput`]
    InvalidInput,
    /// See [`RegionError::Io`]
    Io,
    /// See [`RegionError::KeyDerivation`]
    KeyDerivation,
    /// See [`RegionError::Decryption`]
    Decryption,
    /// See [`RegionError::RegistryExhausted`]
    RegistryExhausted,
    /// See [`RegionError::UnknownHandle`]
    UnknownHandle,
    /// See [`RegionError::Allocation`]
    Allocation,
    /// See [`RegionError::InvalidConfig`]
    InvalidConfig,
}

impl RegionError {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegionError::InvalidInput(_) => ErrorKind::InvalidInput,
            RegionError::Io(_) => ErrorKind::Io,
            RegionError::KeyDerivation => ErrorKind::KeyDerivation,
            RegionError::Decryption => ErrorKind::Decryption,
            RegionError::RegistryExhausted { .. } => ErrorKind::RegistryExhausted,
            RegionError::UnknownHandle => ErrorKind::UnknownHandle,
            RegionError::Allocation { .. } => ErrorKind::Allocation,
            RegionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        RegionError::InvalidInput(msg.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Io => "io",
            ErrorKind::KeyDerivation => "key_derivation",
            ErrorKind::Decryption => "decryption",
            ErrorKind::RegistryExhausted => "registry_exhausted",
            ErrorKind::UnknownHandle => "unknown_handle",
            ErrorKind::Allocation => "allocation",
            ErrorKind::InvalidConfig => "invalid_config",
        };
        f.write_str(name)
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = RegionError> = std::result::Result<T, E>;

/// Salt and IV read from the front of a blob.
///
/// Neither value is secret, but both are wiped on drop so that no
/// blob-derived bytes linger on the stack of a failed call.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BlobHeader {
    /// Key derivation salt
    pub salt: [u8; SALT_LEN],
    /// CBC initialization vector
    pub iv: [u8; IV_LEN],
    /// Length of the ciphertext following the header
    pub ciphertext_len: usize,
}

impl fmt::Debug for BlobHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHeader")
            .field("ciphertext_len", &self.ciphertext_len)
            .finish_non_exhaustive()
    }
}
