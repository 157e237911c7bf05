//! Payload encryption for the inner `pack` field.
//! AES-128-ECB with PKCS7 padding, base64 on the wire.

use crate::error::{GreeError, Result};
use aes::Aes128;
use base64::{Engine as _, engine::general_purpose};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;

const BLOCK_SIZE: usize = 16;

/// A 16-byte AES key.
///
/// Before binding every unit accepts the well-known generic key
/// ([`CodecKey::default`]); the bind reply hands out a per-device session key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CodecKey([u8; BLOCK_SIZE]);

impl CodecKey {
    pub const GENERIC: CodecKey = CodecKey(*b"a3K8Bx%2r8Y7#xDh");

    pub fn new(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl Default for CodecKey {
    fn default() -> Self {
        Self::GENERIC
    }
}

impl TryFrom<&[u8]> for CodecKey {
    type Error = GreeError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let key: [u8; BLOCK_SIZE] = bytes.try_into().map_err(|_| {
            GreeError::Codec(format!("key must be 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }
}

impl FromStr for CodecKey {
    type Err = GreeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.as_bytes())
    }
}

// Session keys are secrets; keep them out of logs.
impl fmt::Debug for CodecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::GENERIC {
            f.write_str("CodecKey(generic)")
        } else {
            f.write_str("CodecKey(..)")
        }
    }
}

/// GreeCipher encrypts and decrypts inner packet records with one key.
#[derive(Debug, Clone)]
pub struct GreeCipher {
    key: CodecKey,
}

impl GreeCipher {
    pub fn new(key: CodecKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &CodecKey {
        &self.key
    }

    /// Serialize `payload` to JSON, encrypt it and return the base64 text.
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(payload)?;
        let ciphertext = self.encrypt_bytes(&plaintext);
        Ok(general_purpose::STANDARD.encode(ciphertext))
    }

    /// Decode base64, decrypt, strip padding and parse the JSON record.
    ///
    /// A wrong key almost always shows up as bad padding; when it does not,
    /// the garbage plaintext fails JSON parsing instead. Both are `Codec` errors.
    pub fn decrypt<T: DeserializeOwned>(&self, data: &str) -> Result<T> {
        let ciphertext = general_purpose::STANDARD.decode(data.trim())?;
        let plaintext = self.decrypt_bytes(ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn encrypt_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut encryptor = Encryptor::<Aes128>::new(&(*self.key.as_bytes()).into());

        let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
        let mut buf = Vec::with_capacity(data.len() + pad_len);
        buf.extend_from_slice(data);
        buf.resize(data.len() + pad_len, pad_len as u8);

        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            encryptor.encrypt_block_mut(block);
        }
        buf
    }

    fn decrypt_bytes(&self, mut buf: Vec<u8>) -> Result<Vec<u8>> {
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(GreeError::Codec(format!(
                "ciphertext length {} is not a positive multiple of {}",
                buf.len(),
                BLOCK_SIZE
            )));
        }

        let mut decryptor = Decryptor::<Aes128>::new(&(*self.key.as_bytes()).into());
        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            decryptor.decrypt_block_mut(block);
        }

        let pad_len = buf[buf.len() - 1] as usize;
        if pad_len == 0
            || pad_len > BLOCK_SIZE
            || buf[buf.len() - pad_len..]
                .iter()
                .any(|&b| b as usize != pad_len)
        {
            return Err(GreeError::Codec("invalid padding".into()));
        }
        buf.truncate(buf.len() - pad_len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn session_key() -> CodecKey {
        "0123456789abcdef".parse().unwrap()
    }

    #[test]
    fn round_trip_with_generic_and_session_keys() {
        let payload = json!({"t": "status", "cols": ["Pow", "SetTem"], "mac": "f4911e7aca59"});
        for key in [CodecKey::GENERIC, session_key()] {
            let cipher = GreeCipher::new(key);
            let encrypted = cipher.encrypt(&payload).unwrap();
            let decrypted: Value = cipher.decrypt(&encrypted).unwrap();
            assert_eq!(decrypted, payload);
        }
    }

    #[test]
    fn block_aligned_plaintext_gets_a_full_padding_block() {
        // `{"t":"scan_xyz"}` is exactly 16 bytes
        let payload = json!({"t": "scan_xyz"});
        assert_eq!(serde_json::to_vec(&payload).unwrap().len(), 16);
        let cipher = GreeCipher::new(CodecKey::default());
        let encrypted = cipher.encrypt(&payload).unwrap();
        let raw = general_purpose::STANDARD.decode(&encrypted).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let payload = json!({"t": "bindok", "key": "0123456789abcdef", "r": 200});
        let encrypted = GreeCipher::new(CodecKey::GENERIC).encrypt(&payload).unwrap();
        let result: Result<Value> = GreeCipher::new(session_key()).decrypt(&encrypted);
        assert!(matches!(result, Err(GreeError::Codec(_))));
    }

    #[test]
    fn garbage_input_is_rejected() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        assert!(matches!(
            cipher.decrypt::<Value>("not base64!"),
            Err(GreeError::Codec(_))
        ));
        // valid base64, 5 bytes
        assert!(matches!(
            cipher.decrypt::<Value>("aGVsbG8="),
            Err(GreeError::Codec(_))
        ));
    }

    #[test]
    fn non_json_plaintext_is_rejected() {
        let cipher = GreeCipher::new(CodecKey::GENERIC);
        let encrypted = general_purpose::STANDARD.encode(cipher.encrypt_bytes(b"hello, world"));
        assert!(matches!(
            cipher.decrypt::<Value>(&encrypted),
            Err(GreeError::Codec(_))
        ));
    }

    #[test]
    fn keys_must_be_sixteen_bytes() {
        assert!("short".parse::<CodecKey>().is_err());
        assert!("0123456789abcdef0".parse::<CodecKey>().is_err());
        assert_eq!(format!("{:?}", session_key()), "CodecKey(..)");
    }
}
