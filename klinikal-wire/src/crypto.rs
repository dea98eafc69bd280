//! Cryptographic primitives: X25519, BLAKE2s, HKDF-SHA256 and
//! ChaCha20-Poly1305 with WireGuard's counter nonces.

use blake2::{Blake2s256, Digest};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{Result, WireError};

/// Generate a fresh X25519 private key. Clamping happens at use time in the
/// scalar multiplication.
pub fn generate_private_key() -> [u8; 32] {
    use rand::Rng;
    let mut key = [0u8; 32];
    rand::thread_rng().fill(&mut key);
    key
}

/// Derive the X25519 public key for a private key.
pub fn public_key(private_key: &[u8; 32]) -> [u8; 32] {
    MontgomeryPoint::mul_base_clamped(*private_key).to_bytes()
}

/// X25519 Diffie-Hellman.
pub fn dh(private_key: &[u8; 32], public_key: &[u8; 32]) -> [u8; 32] {
    MontgomeryPoint(*public_key).mul_clamped(*private_key).to_bytes()
}

/// BLAKE2s-256 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2s256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// HKDF key schedule: expand `input_key_material` salted with the chaining
/// key into `num_outputs` 32-byte keys.
pub fn kdf(chaining_key: &[u8; 32], input_key_material: &[u8], num_outputs: usize) -> Vec<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), input_key_material);
    let mut outputs = Vec::with_capacity(num_outputs);
    for i in 0..num_outputs {
        let mut key = [0u8; 32];
        hk.expand(&[i as u8 + 1], &mut key)
            .expect("HKDF expand with 32-byte output");
        outputs.push(key);
    }
    outputs
}

fn counter_nonce(counter: u64) -> Nonce {
    // 4 zero bytes then the counter, little endian.
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    *Nonce::from_slice(&nonce)
}

/// AEAD seal under the per-direction transport key.
pub fn aead_encrypt(key: &[u8; 32], counter: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(&counter_nonce(counter), plaintext)
        .map_err(|e| WireError::Crypto(format!("encrypt failed: {e:?}")))
}

/// AEAD open; any tampering or counter mismatch fails.
pub fn aead_decrypt(key: &[u8; 32], counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(&counter_nonce(counter), ciphertext)
        .map_err(|_| WireError::DecryptionFailed)
}

/// Static key pair; the private half is wiped on drop.
pub struct KeyPair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Self {
        let private_key = generate_private_key();
        Self::from_private_key(private_key)
    }

    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let public_key = public_key(&private_key);
        Self {
            private_key,
            public_key,
        }
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_deterministic() {
        let pair = KeyPair::generate();
        assert_ne!(pair.private_key, pair.public_key);
        assert_eq!(pair.public_key, public_key(&pair.private_key));
    }

    #[test]
    fn diffie_hellman_agrees() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(
            dh(&alice.private_key, &bob.public_key),
            dh(&bob.private_key, &alice.public_key)
        );
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash(b"test data"), hash(b"test data"));
        assert_ne!(hash(b"a"), hash(b"b"));
    }

    #[test]
    fn kdf_outputs_differ() {
        let keys = kdf(&[7u8; 32], b"ikm", 2);
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[test]
    fn aead_roundtrip_and_tamper() {
        let key = [1u8; 32];
        let sealed = aead_encrypt(&key, 3, b"Hello, tunnel!").unwrap();
        assert_eq!(aead_decrypt(&key, 3, &sealed).unwrap(), b"Hello, tunnel!");
        assert!(aead_decrypt(&key, 4, &sealed).is_err());
        let mut mangled = sealed;
        mangled[0] ^= 0xFF;
        assert!(aead_decrypt(&key, 3, &mangled).is_err());
    }
}
