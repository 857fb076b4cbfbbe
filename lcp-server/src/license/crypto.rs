//! AES-256-CBC primitives for license key wrapping and user-field encryption.
//!
//! Three encrypter instances share the same cipher: the content-key wrapper,
//! the user-field encrypter, and the key-check encrypter. Ciphertext layout
//! is `IV || CBC(blocks)` with the IV prepended.
//!
//! Padding follows the W3C XML-ENC convention: 1..=16 pad octets are always
//! appended and only the final octet is meaningful (it encodes the pad
//! length). A block-aligned plaintext such as a 32-octet content key or a
//! 36-octet license UUID therefore grows by one full block.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use sha2::{Digest, Sha256};

/// AES block size in octets.
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in octets.
pub const KEY_SIZE: usize = 32;

/// Algorithm URI carried in `encryption.content_key.algorithm`.
pub const AES256_CBC_URI: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

/// Algorithm URI carried in `encryption.user_key.algorithm`.
pub const SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_SIZE} octets, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext must be at least two blocks and block-aligned, got {0} octets")]
    MalformedCiphertext(usize),
    #[error("invalid padding byte {0}")]
    InvalidPadding(u8),
    #[error("passphrase hash is not hex-encoded SHA-256: {0}")]
    BadPassHash(String),
}

/// A symmetric cipher bound to an XML-ENC algorithm URI.
///
/// `encrypt` and `decrypt` operate on whole buffers; the IV travels
/// prepended to the ciphertext.
pub trait Encrypter {
    /// Algorithm URI written into the license encryption block.
    fn signature(&self) -> &'static str;
    /// Generate a fresh random content key.
    fn generate_key(&self) -> Vec<u8>;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-CBC with W3C padding.
///
/// The IV is derived from `SHA-256(key || plaintext)` so that wrapping the
/// same plaintext under the same key is reproducible: a re-issued license is
/// bit-identical and an RSA signature over it verifies byte-for-byte.
/// Decryption reads the IV from the ciphertext, so externally produced
/// ciphertexts with random IVs decrypt the same way.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbcEncrypter;

impl Encrypter for AesCbcEncrypter {
    fn signature(&self) -> &'static str {
        AES256_CBC_URI
    }

    fn generate_key(&self) -> Vec<u8> {
        let key: [u8; KEY_SIZE] = rand::random();
        key.to_vec()
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key: &[u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        let iv = derive_iv(key, plaintext);

        let mut padded = plaintext.to_vec();
        let pad = BLOCK_SIZE - (padded.len() % BLOCK_SIZE);
        // 1..=16: a block-aligned input gets one full block of padding
        padded.resize(padded.len() + pad, 0);
        *padded.last_mut().unwrap() = pad as u8;

        let cipher = Aes256::new(key.into());
        let mut out = Vec::with_capacity(BLOCK_SIZE + padded.len());
        out.extend_from_slice(&iv);
        let mut prev = iv;
        for chunk in padded.chunks_exact(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            for i in 0..BLOCK_SIZE {
                block[i] = chunk[i] ^ prev[i];
            }
            let mut block_ga = GenericArray::from(block);
            cipher.encrypt_block(&mut block_ga);
            prev.copy_from_slice(&block_ga);
            out.extend_from_slice(&block_ga);
        }
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key: &[u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        if ciphertext.len() < 2 * BLOCK_SIZE || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::MalformedCiphertext(ciphertext.len()));
        }

        let cipher = Aes256::new(key.into());
        let mut plaintext = Vec::with_capacity(ciphertext.len() - BLOCK_SIZE);
        let mut prev: [u8; BLOCK_SIZE] = ciphertext[..BLOCK_SIZE].try_into().unwrap();
        for chunk in ciphertext[BLOCK_SIZE..].chunks_exact(BLOCK_SIZE) {
            let saved: [u8; BLOCK_SIZE] = chunk.try_into().unwrap();
            let mut block = *GenericArray::from_slice(chunk);
            cipher.decrypt_block(&mut block);
            for i in 0..BLOCK_SIZE {
                plaintext.push(block[i] ^ prev[i]);
            }
            prev = saved;
        }

        // Only the final octet of padding is meaningful
        let pad = *plaintext.last().unwrap() as usize;
        if pad == 0 || pad > BLOCK_SIZE || pad > plaintext.len() {
            return Err(CryptoError::InvalidPadding(pad as u8));
        }
        plaintext.truncate(plaintext.len() - pad);
        Ok(plaintext)
    }
}

/// Derive the user key from a hex-encoded SHA-256 passphrase hash
/// (basic profile: the decoded hash IS the key).
pub fn user_key_from_hex(pass_hash: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = hex::decode(pass_hash.trim())
        .map_err(|e| CryptoError::BadPassHash(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::BadPassHash(format!("expected 32 octets, got {}", bytes.len())))
}

fn derive_iv(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(plaintext);
    let digest = hasher.finalize();
    digest[..BLOCK_SIZE].try_into().unwrap()
}
