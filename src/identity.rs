use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    /// Key material rejected at startup (wrong length / not hex).
    #[error("invalid encryption key")]
    InvalidKey,
    /// Wrong key, mangled IV, or tampered ciphertext. Never carries the
    /// attempted plaintext or ciphertext.
    #[error("corrupted identity ciphertext")]
    Corrupted,
}

/// Ciphertext plus the IV that produced it, both hex encoded.
///
/// This is the only shape in which owner identifiers and message bodies
/// ever reach storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

/// AES-256-CBC (PKCS7) codec over the process-wide secret key.
///
/// A fresh random IV per `encrypt` call means the same MID sealed twice
/// yields different ciphertext, so rows cannot be correlated by author.
/// Constructed once at startup and injected as `Arc<IdentityCodec>`.
pub struct IdentityCodec {
    key: [u8; 32],
}

impl IdentityCodec {
    /// Parse a 64-hex-char key (matches the `ENCRYPTION_SECRET_KEY` format).
    pub fn from_hex_key(hex_key: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| IdentityError::InvalidKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| IdentityError::InvalidKey)?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plain: &str) -> Result<Sealed, IdentityError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let enc = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| IdentityError::InvalidKey)?;
        let ct = enc.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        Ok(Sealed {
            ciphertext: hex::encode(ct),
            iv: hex::encode(iv),
        })
    }

    pub fn decrypt(&self, ciphertext_hex: &str, iv_hex: &str) -> Result<String, IdentityError> {
        let ct = hex::decode(ciphertext_hex).map_err(|_| IdentityError::Corrupted)?;
        let iv = hex::decode(iv_hex).map_err(|_| IdentityError::Corrupted)?;
        if iv.len() != IV_LEN {
            return Err(IdentityError::Corrupted);
        }
        let dec = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| IdentityError::Corrupted)?;
        let plain = dec
            .decrypt_padded_vec_mut::<Pkcs7>(&ct)
            .map_err(|_| IdentityError::Corrupted)?;
        String::from_utf8(plain).map_err(|_| IdentityError::Corrupted)
    }

    /// Convenience for sealed values carried together.
    pub fn open(&self, sealed: &Sealed) -> Result<String, IdentityError> {
        self.decrypt(&sealed.ciphertext, &sealed.iv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const KEY_B: &str = "f1e2d3c4b5a69788796a5b4c3d2e1f000102030405060708090a0b0c0d0e0f10";

    fn codec() -> IdentityCodec {
        IdentityCodec::from_hex_key(KEY_A).unwrap()
    }

    #[test]
    fn round_trip() {
        let c = codec();
        let sealed = c.encrypt("mid-42").unwrap();
        assert_eq!(c.open(&sealed).unwrap(), "mid-42");
    }

    #[test]
    fn same_plaintext_differs_across_calls() {
        let c = codec();
        let a = c.encrypt("mid-42").unwrap();
        let b = c.encrypt("mid-42").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn wrong_key_is_corrupted() {
        let sealed = codec().encrypt("mid-42").unwrap();
        let other = IdentityCodec::from_hex_key(KEY_B).unwrap();
        assert!(matches!(other.open(&sealed), Err(IdentityError::Corrupted)));
    }

    #[test]
    fn garbage_input_is_corrupted() {
        let c = codec();
        assert!(matches!(
            c.decrypt("not hex at all", "ffff"),
            Err(IdentityError::Corrupted)
        ));
        // valid hex, wrong iv length
        assert!(matches!(
            c.decrypt("deadbeef", "0001"),
            Err(IdentityError::Corrupted)
        ));
    }

    #[test]
    fn bad_key_rejected_up_front() {
        assert!(matches!(
            IdentityCodec::from_hex_key("abcd"),
            Err(IdentityError::InvalidKey)
        ));
        assert!(matches!(
            IdentityCodec::from_hex_key("zz"),
            Err(IdentityError::InvalidKey)
        ));
    }
}
