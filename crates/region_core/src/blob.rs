//! Blob layout: `[16-byte salt][16-byte IV][ciphertext]`, stored at an
//! arbitrary offset inside a larger file.

use std::io::{self, Read, Seek, SeekFrom};

use rand_core::{OsRng, RngCore};
use tracing::debug;

use crate::cipher;
use crate::kdf::derive_key_with;
use crate::memory::{SecureBuffer, Sensitive};
use crate::types::{
    BlobHeader, RegionError, Result, BLOCK_LEN, HEADER_LEN, IV_LEN, PBKDF2_ITERATIONS, SALT_LEN,
};

impl BlobHeader {
    /// Whether the ciphertext is a positive whole number of cipher blocks
    pub fn is_block_aligned(&self) -> bool {
        self.ciphertext_len > 0 && self.ciphertext_len % BLOCK_LEN == 0
    }
}

/// A blob read into memory, ciphertext in a wiped-on-drop buffer
pub(crate) struct StagedBlob {
    pub(crate) header: BlobHeader,
    pub(crate) ciphertext: SecureBuffer,
}

/// Seek to `offset` and read the salt and IV of a blob spanning `length` bytes.
///
/// Does not read the ciphertext; `ciphertext_len` is `length - 32`.
pub fn read_blob_header<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
) -> Result<BlobHeader> {
    if length <= HEADER_LEN as u64 {
        return Err(RegionError::invalid(format!(
            "region length {} does not exceed the {} byte header",
            length, HEADER_LEN
        )));
    }
    let ciphertext_len = usize::try_from(length - HEADER_LEN as u64)
        .map_err(|_| RegionError::invalid("region length does not fit in memory"))?;

    reader.seek(SeekFrom::Start(offset))?;

    let mut header = BlobHeader {
        salt: [0u8; SALT_LEN],
        iv: [0u8; IV_LEN],
        ciphertext_len,
    };
    read_full(reader, &mut header.salt)?;
    read_full(reader, &mut header.iv)?;

    Ok(header)
}

/// Read a whole blob. Nothing read so far survives an error.
pub(crate) fn read_blob<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
) -> Result<StagedBlob> {
    let header = read_blob_header(reader, offset, length)?;

    let mut ciphertext = SecureBuffer::new(header.ciphertext_len, Sensitive::Ciphertext, false)?;
    read_full(reader, ciphertext.as_mut_slice())?;

    debug!(
        offset,
        ciphertext_len = header.ciphertext_len,
        "Read blob from region"
    );
    Ok(StagedBlob { header, ciphertext })
}

/// Fill `buf` completely, retrying short reads. End of stream before the
/// buffer is full is an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("region truncated after {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Encrypt `plaintext` into a new blob with a random salt and IV, using the
/// default round count.
pub fn seal_blob(plaintext: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
    seal_blob_rounds(plaintext, secret, PBKDF2_ITERATIONS)
}

pub(crate) fn seal_blob_rounds(plaintext: &[u8], secret: &[u8], iterations: u32) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    seal_blob_with(plaintext, secret, &salt, &iv, iterations)
}

/// Encrypt `plaintext` into a blob with caller-chosen salt, IV and rounds
pub fn seal_blob_with(
    plaintext: &[u8],
    secret: &[u8],
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
    iterations: u32,
) -> Result<Vec<u8>> {
    if secret.is_empty() {
        return Err(RegionError::invalid("secret must not be empty"));
    }

    let key = derive_key_with(secret, salt, iterations, true)?;
    let ciphertext = cipher::encrypt(plaintext, key.as_bytes(), iv)?;

    let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    blob.extend_from_slice(salt);
    blob.extend_from_slice(iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call and fails with
    /// `Interrupted` every other call
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
            }
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    impl Seek for Trickle {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn sample_blob() -> Vec<u8> {
        seal_blob_with(b"hello world", b"pw123", &[1u8; SALT_LEN], &[2u8; IV_LEN], 10).unwrap()
    }

    #[test]
    fn test_blob_layout() {
        let blob = sample_blob();
        assert_eq!(blob.len(), HEADER_LEN + BLOCK_LEN);
        assert_eq!(&blob[..SALT_LEN], &[1u8; SALT_LEN]);
        assert_eq!(&blob[SALT_LEN..HEADER_LEN], &[2u8; IV_LEN]);
    }

    #[test]
    fn test_read_header_at_offset() {
        let mut file = vec![0xEEu8; 100];
        let blob = sample_blob();
        file.extend_from_slice(&blob);

        let header =
            read_blob_header(&mut Cursor::new(file), 100, blob.len() as u64).unwrap();
        assert_eq!(header.salt, [1u8; SALT_LEN]);
        assert_eq!(header.iv, [2u8; IV_LEN]);
        assert_eq!(header.ciphertext_len, BLOCK_LEN);
        assert!(header.is_block_aligned());
    }

    #[test]
    fn test_header_only_length_rejected() {
        let result = read_blob_header(&mut Cursor::new(sample_blob()), 0, HEADER_LEN as u64);
        assert!(matches!(result, Err(RegionError::InvalidInput(_))));
    }

    #[test]
    fn test_unaligned_ciphertext_reported() {
        let header = read_blob_header(&mut Cursor::new(sample_blob()), 0, 40).unwrap();
        assert_eq!(header.ciphertext_len, 8);
        assert!(!header.is_block_aligned());
    }

    #[test]
    fn test_short_reads_are_retried() {
        let blob = sample_blob();
        let mut reader = Trickle {
            inner: Cursor::new(blob.clone()),
            chunk: 3,
            interrupt: false,
        };

        let staged = read_blob(&mut reader, 0, blob.len() as u64).unwrap();
        assert_eq!(staged.ciphertext.as_slice(), &blob[HEADER_LEN..]);
    }

    #[test]
    fn test_truncated_region_is_io_error() {
        let blob = sample_blob();
        let result = read_blob(&mut Cursor::new(blob.clone()), 0, blob.len() as u64 + 16);
        match result {
            Err(RegionError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected I/O error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncated_header_is_io_error() {
        let result = read_blob_header(&mut Cursor::new(vec![0u8; 20]), 0, 64);
        assert!(matches!(result, Err(RegionError::Io(_))));
    }

    #[test]
    fn test_seal_rejects_empty_secret() {
        let result = seal_blob_with(b"data", b"", &[0u8; SALT_LEN], &[0u8; IV_LEN], 10);
        assert!(matches!(result, Err(RegionError::InvalidInput(_))));
    }

    #[test]
    fn test_seal_uses_fresh_salt_and_iv() {
        let a = seal_blob(b"same", b"pw123").unwrap();
        let b = seal_blob(b"same", b"pw123").unwrap();
        assert_ne!(&a[..HEADER_LEN], &b[..HEADER_LEN]);
    }
}
