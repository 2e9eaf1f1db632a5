//! # RegionVault Core - Decrypt, Expose, Release
//!
//! This crate decrypts password-protected blobs stored at arbitrary offsets
//! inside larger files and hands the plaintext to the caller in tracked,
//! wiped-on-release memory.
//!
//! ## Blob Format
//!
//! A blob occupies `length` bytes starting at `offset`:
//!
//! 1. **Salt**: 16 bytes, input to PBKDF2-HMAC-SHA256 (65536 rounds)
//! 2. **IV**: 16 bytes, initialization vector for AES-256-CBC
//! 3. **Ciphertext**: `length - 32` bytes, PKCS#7 padded
//!
//! ## Memory Security
//!
//! Every intermediate holding secret material is overwritten before its
//! memory is given back, on success and on every error path:
//!
//! - The caller's secret is wiped as soon as the key has been derived
//! - Key and ciphertext buffers are wiped as soon as decryption finishes
//! - Key and plaintext buffers are locked against swapping where the OS allows
//! - Exposed plaintext is tracked in a bounded registry and wiped on release
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::fs::File;
//! use region_vault_core::{seal_blob, RegionVault};
//!
//! let blob = seal_blob(b"hello world", b"pw123").unwrap();
//! std::fs::write("blob.bin", &blob).unwrap();
//!
//! let vault = RegionVault::default();
//! let mut file = File::open("blob.bin").unwrap();
//! let mut secret = b"pw123".to_vec();
//!
//! let handle = vault
//!     .decrypt_reader(&mut file, 0, blob.len() as i64, &mut secret)
//!     .unwrap();
//! assert_eq!(handle.as_bytes(), b"hello world");
//!
//! // Wipes, unlocks and frees the plaintext
//! vault.release(handle).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Error types, blob layout constants and the blob header
pub mod types;

/// Secure memory: wiping, page locking and owned wiped-on-drop buffers
pub mod memory;

/// PBKDF2-HMAC-SHA256 key derivation
pub mod kdf;

pub mod cipher;

/// Bounded table of outstanding plaintext buffers
pub mod registry;

/// Vault configuration
pub mod config;

pub mod blob;

/// The decrypt, expose and release pipeline
pub mod pipeline;

pub use blob::{read_blob_header, seal_blob, seal_blob_with};
pub use config::RegionConfig;
pub use kdf::{derive_key, derive_key_with, DerivedKey};
pub use memory::{memory_locking_available, secure_wipe};
pub use pipeline::{RegionHandle, RegionVault};
pub use registry::{AllocationRegistry, SlotId};
pub use types::{BlobHeader, ErrorKind, RegionError, Result};
