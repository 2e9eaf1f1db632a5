use std::fmt;
use std::io::{Read, Seek};
use std::ptr::NonNull;
use std::sync::Arc;

#[cfg(unix)]
use std::{fs::File, os::unix::io::RawFd};

use tracing::{debug, warn};

use crate::blob::{read_blob, seal_blob_rounds, StagedBlob};
use crate::cipher;
use crate::config::RegionConfig;
use crate::kdf::derive_key_with;
use crate::memory::{SecureBuffer, Sensitive, WipeOnDrop};
use crate::registry::AllocationRegistry;
use crate::types::{RegionError, Result, HEADER_LEN};

struct Shared {
    config: RegionConfig,
    registry: AllocationRegistry,
}

impl Shared {
    /// Unregister and free a buffer owned by a handle
    fn release_owned(&self, buf: SecureBuffer) -> Result<()> {
        let address = buf.as_ptr() as usize;
        match self.registry.unregister(address) {
            Some(recorded) => {
                debug_assert_eq!(recorded, buf.len());
                drop(buf);
                debug!(len = recorded, "Released region");
                Ok(())
            }
            None => {
                // The handle still owns the buffer even though its entry is gone
                warn!(len = buf.len(), "Handle was not tracked at release; wiping it anyway");
                drop(buf);
                Err(RegionError::UnknownHandle)
            }
        }
    }
}

/// Decrypts file regions into tracked plaintext buffers.
///
/// Cloning is cheap and clones share one allocation registry, so a vault can
/// be handed to any number of threads.
#[derive(Clone)]
pub struct RegionVault {
    inner: Arc<Shared>,
}

impl RegionVault {
    /// Create a vault after validating `config`
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;
        let registry = AllocationRegistry::new(config.registry_capacity);
        Ok(Self {
            inner: Arc::new(Shared { config, registry }),
        })
    }

    /// The configuration this vault runs with
    pub fn config(&self) -> &RegionConfig {
        &self.inner.config
    }

    /// The registry tracking this vault's outstanding buffers
    pub fn registry(&self) -> &AllocationRegistry {
        &self.inner.registry
    }

    /// Maximum number of outstanding handles
    pub fn capacity(&self) -> usize {
        self.inner.registry.capacity()
    }

    /// Handles currently outstanding
    pub fn outstanding(&self) -> usize {
        self.inner.registry.outstanding()
    }

    /// Decrypt the blob stored at `offset..offset + length` of an open file
    /// descriptor.
    ///
    /// The descriptor stays open and owned by the caller; its file offset is
    /// moved, as with any `lseek`. `secret` is wiped before this returns,
    /// whatever the outcome.
    #[cfg(unix)]
    #[allow(unsafe_code)]
    pub fn decrypt_region(
        &self,
        fd: RawFd,
        offset: i64,
        length: i64,
        secret: &mut [u8],
    ) -> Result<RegionHandle> {
        use std::os::unix::io::{FromRawFd, OwnedFd};

        let mut secret = WipeOnDrop::new(secret, Sensitive::Secret);
        if fd < 0 {
            return Err(RegionError::invalid("file descriptor must not be negative"));
        }
        let (offset, length) = self.check_args(offset, length, secret.as_slice())?;

        // Work on a duplicate so dropping it never closes the caller's descriptor
        let dup = unsafe { libc::dup(fd) };
        if dup < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // `dup` just returned this descriptor; nothing else owns it
        let mut file = File::from(unsafe { OwnedFd::from_raw_fd(dup) });

        self.run(&mut file, offset, length, &mut secret)
    }

    /// Decrypt the blob stored at `offset..offset + length` of any seekable
    /// source. `secret` is wiped before this returns, whatever the outcome.
    pub fn decrypt_reader<R: Read + Seek>(
        &self,
        reader: &mut R,
        offset: i64,
        length: i64,
        secret: &mut [u8],
    ) -> Result<RegionHandle> {
        let mut secret = WipeOnDrop::new(secret, Sensitive::Secret);
        let (offset, length) = self.check_args(offset, length, secret.as_slice())?;
        self.run(reader, offset, length, &mut secret)
    }

    /// Seal `plaintext` into a new blob that this vault can open, with a
    /// random salt and IV and the configured round count
    pub fn seal(&self, plaintext: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
        let blob = seal_blob_rounds(plaintext, secret, self.inner.config.kdf_iterations)?;
        debug!(len = blob.len(), "Sealed blob");
        Ok(blob)
    }

    /// Release a handle: wipe, unlock and free its buffer and clear its slot
    pub fn release(&self, handle: RegionHandle) -> Result<()> {
        handle.release()
    }

    /// Release a buffer previously exported with [`RegionHandle::into_raw`].
    ///
    /// Unknown addresses (never handed out, already released, null) fail
    /// with [`RegionError::UnknownHandle`] and no memory is touched.
    ///
    /// # Safety
    ///
    /// If `ptr` is tracked by this vault it must have come from
    /// [`RegionHandle::into_raw`], not from [`RegionHandle::address`] of a
    /// handle that is still alive.
    #[allow(unsafe_code)]
    pub unsafe fn release_raw(&self, ptr: *const u8) -> Result<()> {
        let Some(ptr) = NonNull::new(ptr as *mut u8) else {
            warn!("Release of a null handle");
            return Err(RegionError::UnknownHandle);
        };

        let Some(len) = self.inner.registry.unregister(ptr.as_ptr() as usize) else {
            warn!("Release of an unknown or already released handle");
            return Err(RegionError::UnknownHandle);
        };

        // The registry entry proves this is a live buffer of exactly `len` bytes,
        // allocated under this vault's locking choice
        drop(SecureBuffer::from_raw(
            ptr,
            len,
            Sensitive::Plaintext,
            self.inner.config.lock_memory,
        ));
        debug!(len, "Released exported region");
        Ok(())
    }

    fn check_args(&self, offset: i64, length: i64, secret: &[u8]) -> Result<(u64, u64)> {
        if offset < 0 {
            return Err(RegionError::invalid("offset must not be negative"));
        }
        if length <= HEADER_LEN as i64 {
            return Err(RegionError::invalid(format!(
                "length must exceed the {} byte header",
                HEADER_LEN
            )));
        }
        if length as u64 > self.inner.config.max_region_len {
            return Err(RegionError::invalid(format!(
                "length {} exceeds the configured maximum of {}",
                length, self.inner.config.max_region_len
            )));
        }
        if secret.is_empty() {
            return Err(RegionError::invalid("secret must not be empty"));
        }
        Ok((offset as u64, length as u64))
    }

    fn run<R: Read + Seek>(
        &self,
        reader: &mut R,
        offset: u64,
        length: u64,
        secret: &mut WipeOnDrop<'_>,
    ) -> Result<RegionHandle> {
        let config = &self.inner.config;

        let StagedBlob { header, ciphertext } = read_blob(reader, offset, length)?;

        // The secret is wiped as soon as derivation finishes, success or not
        let derived = derive_key_with(
            secret.as_slice(),
            &header.salt,
            config.kdf_iterations,
            config.lock_memory,
        );
        secret.wipe_now();
        let key = derived?;
        debug!("Derived region key");

        // Neither the key nor the ciphertext outlives this step
        let decrypted = cipher::decrypt_to_buffer(
            ciphertext.as_slice(),
            key.as_bytes(),
            &header.iv,
            config.lock_memory,
        );
        drop(ciphertext);
        drop(key);
        let staged = decrypted?;

        // Exact-size copy, so the registry length is also the allocation length
        let mut plaintext = SecureBuffer::new(staged.len(), Sensitive::Plaintext, config.lock_memory)?;
        plaintext.as_mut_slice().copy_from_slice(staged.as_slice());
        drop(staged);

        let slot = self
            .inner
            .registry
            .register(plaintext.as_ptr() as usize, plaintext.len())
            .map_err(|err| {
                warn!(error = %err, "Refusing to expose an untracked buffer");
                err
            })?;

        debug!(
            slot = slot.0,
            len = plaintext.len(),
            locked = plaintext.is_locked(),
            "Exposed decrypted region"
        );
        Ok(RegionHandle {
            buf: Some(plaintext),
            vault: Arc::clone(&self.inner),
        })
    }
}

impl Default for RegionVault {
    fn default() -> Self {
        let config = RegionConfig::default();
        let registry = AllocationRegistry::new(config.registry_capacity);
        Self {
            inner: Arc::new(Shared { config, registry }),
        }
    }
}

impl fmt::Debug for RegionVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionVault")
            .field("config", &self.inner.config)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Decrypted plaintext owned by the caller until released.
///
/// Dropping an unreleased handle releases it. After
/// [`into_raw`](RegionHandle::into_raw) the memory stays alive until
/// [`RegionVault::release_raw`] is called with the returned pointer.
pub struct RegionHandle {
    buf: Option<SecureBuffer>,
    vault: Arc<Shared>,
}

impl RegionHandle {
    /// The plaintext
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref().map(SecureBuffer::as_slice).unwrap_or(&[])
    }

    /// Plaintext length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the plaintext is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the plaintext pages are locked in RAM
    pub fn is_locked(&self) -> bool {
        self.buf.as_ref().map_or(false, SecureBuffer::is_locked)
    }

    /// Start address of the plaintext, as tracked by the registry
    pub fn address(&self) -> *const u8 {
        self.buf
            .as_ref()
            .map(SecureBuffer::as_ptr)
            .unwrap_or(std::ptr::null())
    }

    /// Wipe, unlock and free the plaintext and clear its registry slot
    pub fn release(mut self) -> Result<()> {
        match self.buf.take() {
            Some(buf) => self.vault.release_owned(buf),
            None => Err(RegionError::UnknownHandle),
        }
    }

    /// Hand the buffer to an external owner as `(address, length)`.
    ///
    /// The registry entry stays in place; the only way to reclaim the memory
    /// is [`RegionVault::release_raw`].
    pub fn into_raw(mut self) -> (*const u8, usize) {
        match self.buf.take() {
            Some(buf) => {
                let len = buf.len();
                (buf.into_raw().as_ptr() as *const u8, len)
            }
            None => (std::ptr::null(), 0),
        }
    }
}

impl AsRef<[u8]> for RegionHandle {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Drop for RegionHandle {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let _ = self.vault.release_owned(buf);
        }
    }
}

// Prevent accidentally printing plaintext
impl fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionHandle(length={})", self.len())
    }
}
