//! AES-256-CBC with PKCS#7 padding.
//!
//! The mode is unauthenticated: a wrong key or a corrupted blob usually fails
//! padding validation, but roughly one attempt in 256 "succeeds" and yields
//! garbage. This is kept for compatibility with the existing blob format; a
//! new format should use an AEAD instead.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor as CbcDecryptor, Encryptor as CbcEncryptor};
use zeroize::Zeroizing;

use crate::memory::{SecureBuffer, Sensitive};
use crate::types::{RegionError, Result, BLOCK_LEN, IV_LEN, KEY_LEN};

type Aes256CbcDec = CbcDecryptor<Aes256>;
type Aes256CbcEnc = CbcEncryptor<Aes256>;

/// Decrypt `ciphertext` and strip its padding.
///
/// Fails with [`RegionError::Decryption`] when the length is not a whole
/// number of blocks or the padding does not validate.
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8; IV_LEN]) -> Result<Zeroizing<Vec<u8>>> {
    let plaintext = decrypt_to_buffer(ciphertext, key, iv, false)?;
    Ok(Zeroizing::new(plaintext.as_slice().to_vec()))
}

/// Decrypt into a fresh plaintext buffer sized `ciphertext.len() + BLOCK_LEN`,
/// truncated to the unpadded length. The buffer is wiped in full on drop,
/// including when padding validation fails.
pub(crate) fn decrypt_to_buffer(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8; IV_LEN],
    lock: bool,
) -> Result<SecureBuffer> {
    if key.len() != KEY_LEN {
        return Err(RegionError::invalid(format!(
            "key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(RegionError::Decryption);
    }

    let mut out = SecureBuffer::new(ciphertext.len() + BLOCK_LEN, Sensitive::Plaintext, lock)?;

    let cipher =
        Aes256CbcDec::new_from_slices(key, iv).map_err(|_| RegionError::Decryption)?;

    let len = cipher
        .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, out.as_mut_slice())
        .map_err(|_| RegionError::Decryption)?
        .len();

    out.truncate(len);
    Ok(out)
}

/// Encrypt `plaintext` with PKCS#7 padding. The inverse of [`decrypt`].
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(RegionError::invalid(format!(
            "key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    // Padding always adds between 1 and BLOCK_LEN bytes
    let mut buffer = vec![0u8; plaintext.len() + BLOCK_LEN];

    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| RegionError::invalid("bad key or IV length"))?;

    let ciphertext_len = cipher
        .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut buffer)
        .map_err(|_| RegionError::invalid("output buffer too small"))?
        .len();

    buffer.truncate(ciphertext_len);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::wipe_log;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];
    const IV: [u8; IV_LEN] = [0x24; IV_LEN];

    #[test]
    fn test_encrypt_decrypt_basic() {
        let ciphertext = encrypt(b"hello world", &KEY, &IV).unwrap();
        assert_eq!(ciphertext.len(), BLOCK_LEN);

        let plaintext = decrypt(&ciphertext, &KEY, &IV).unwrap();
        assert_eq!(&plaintext[..], b"hello world");
    }

    #[test]
    fn test_full_block_gets_extra_padding_block() {
        let data = [0x11u8; BLOCK_LEN * 2];
        let ciphertext = encrypt(&data, &KEY, &IV).unwrap();
        assert_eq!(ciphertext.len(), BLOCK_LEN * 3);
        assert_eq!(&decrypt(&ciphertext, &KEY, &IV).unwrap()[..], &data[..]);
    }

    #[test]
    fn test_empty_plaintext() {
        let ciphertext = encrypt(b"", &KEY, &IV).unwrap();
        assert_eq!(ciphertext.len(), BLOCK_LEN);
        assert!(decrypt(&ciphertext, &KEY, &IV).unwrap().is_empty());
    }

    #[test]
    fn test_partial_block_rejected() {
        let mut ciphertext = encrypt(b"hello world", &KEY, &IV).unwrap();
        ciphertext.push(0);
        assert!(matches!(
            decrypt(&ciphertext, &KEY, &IV),
            Err(RegionError::Decryption)
        ));
    }

    #[test]
    fn test_empty_ciphertext_rejected() {
        assert!(matches!(decrypt(&[], &KEY, &IV), Err(RegionError::Decryption)));
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let ciphertext = encrypt(b"hello world", &KEY, &IV).unwrap();
        let result = decrypt(&ciphertext, &KEY[..16], &IV);
        assert!(matches!(result, Err(RegionError::InvalidInput(_))));
    }

    #[test]
    fn test_corrupted_padding_rejected() {
        let ciphertext = encrypt(b"hello world", &KEY, &IV).unwrap();

        // Steer the final pad byte (0x05) to 0x00 through the IV
        let mut iv = IV;
        iv[IV_LEN - 1] ^= 0x05;
        assert!(matches!(
            decrypt(&ciphertext, &KEY, &iv),
            Err(RegionError::Decryption)
        ));
    }

    #[test]
    fn test_failed_decrypt_wipes_staging_buffer() {
        let ciphertext = encrypt(b"hello world", &KEY, &IV).unwrap();
        let mut iv = IV;
        iv[IV_LEN - 1] ^= 0x05;

        wipe_log::take();
        let result = decrypt_to_buffer(&ciphertext, &KEY, &iv, false);
        assert!(result.is_err());

        let records = wipe_log::take();
        assert_eq!(wipe_log::count(&records, Sensitive::Plaintext), 1);
        assert_eq!(records[0].len, ciphertext.len() + BLOCK_LEN);
        assert!(records[0].zeroed);
    }

    #[test]
    fn test_staging_buffer_is_ciphertext_plus_block() {
        let ciphertext = encrypt(b"abc", &KEY, &IV).unwrap();
        wipe_log::take();

        let buffer = decrypt_to_buffer(&ciphertext, &KEY, &IV, false).unwrap();
        assert_eq!(buffer.as_slice(), b"abc");
        drop(buffer);

        let records = wipe_log::take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len, ciphertext.len() + BLOCK_LEN);
    }
}
