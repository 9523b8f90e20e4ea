//! Message decoding: decrypt, then parse
//!
//! The bus delivers an opaque byte sequence: a 12-byte nonce followed by the
//! AES-256-GCM ciphertext of a JSON document. Both failure modes (payload
//! does not decrypt under the configured key; plaintext is not a valid JSON
//! object) are permanent; a redelivery of the same bytes fails identically.
//!
//! Parsing keeps the document as a generic attribute map. The null/missing
//! distinction matters downstream: a field that is absent is not the same as
//! a field whose value is empty, and the normalizer uses absence to decide
//! whether to preserve prior state on update.

use crate::error::PipelineError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use pnp_common::{Error, Result};
use serde_json::{Map, Value};

/// Nonce length prepended to every payload
pub const NONCE_LEN: usize = 12;

/// Decrypts bus payloads and parses them into attribute maps
pub struct MessageDecoder {
    cipher: Aes256Gcm,
}

impl MessageDecoder {
    /// Build a decoder from raw 32-byte key material
    pub fn new(key: &[u8; 32]) -> MessageDecoder {
        MessageDecoder {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Build a decoder from the base64-encoded key held in configuration
    pub fn from_base64_key(encoded: &str) -> Result<MessageDecoder> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Config(format!("decryption key is not valid base64: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("decryption key must decode to 32 bytes".into()))?;
        Ok(MessageDecoder::new(&key))
    }

    /// Decrypt and parse one payload into the canonical attribute map
    pub fn decode(&self, payload: &[u8]) -> std::result::Result<Map<String, Value>, PipelineError> {
        if payload.len() < NONCE_LEN {
            return Err(PipelineError::decryption(format!(
                "payload too short: {} bytes",
                payload.len()
            )));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                PipelineError::decryption("payload does not decrypt under the configured key")
            })?;

        let value: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| PipelineError::malformed(format!("plaintext is not valid JSON: {e}")))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::malformed(format!(
                "top-level document must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Encrypt a plaintext document the way the upstream adapter does:
    /// random nonce prepended to the ciphertext. Used by tests and fixtures.
    pub fn encode(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        payload
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
